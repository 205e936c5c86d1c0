//! Queue-polling worker that drives dispatch attempts.

pub mod config;
pub mod worker;

pub use config::{ConfigError, LogFormat, WorkerConfig};
pub use worker::QueueWorker;
