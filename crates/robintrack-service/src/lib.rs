#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod dataset;
pub mod logging;
pub mod ratelimit;
pub mod services;
pub mod utils;
