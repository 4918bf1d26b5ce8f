pub mod job;
pub mod operation;
pub mod preview;
pub mod raster;
pub mod worker;
