pub mod config;
pub mod errors;
pub mod job;
pub mod limiter;
pub mod logging;
pub mod progress;
pub mod server;
pub mod worker;
