pub mod claim;
pub mod config;
pub mod service;
pub mod startup;
pub mod store;
pub mod telemetry;
