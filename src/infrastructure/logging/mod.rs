//! Logging infrastructure built on tracing.

pub mod logger;

pub use logger::{init_logging, LogConfig, LogFormat};
