pub mod analysis;
pub mod candles;
pub mod config;
pub mod error;
pub mod exchange;
pub mod funding;
pub mod indicators;
pub mod logging;
pub mod rate_limit;
pub mod scheduler;
