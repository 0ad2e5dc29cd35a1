pub mod config;
pub mod limiter;
pub mod pool;
pub mod proxy;
pub mod service;
pub mod telemetry;
#[cfg(test)]
mod test_support;
