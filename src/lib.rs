//! Raster Job Orchestrator
//!
//! Accepts geospatial raster operations (clip, reproject, resample, mosaic),
//! queues them, runs them on a pool of async executors against pluggable
//! storage and geoprocessing backends, and tracks each job through a strict
//! lifecycle with progress, cancellation and time limits.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
