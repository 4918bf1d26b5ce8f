pub mod dispatcher;
pub mod geo;
pub mod geo_client;
pub mod operations;
pub mod preview;
pub mod queue;
pub mod registry;
pub mod storage;
pub mod store;
pub mod worker_pool;
