//! medsync common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Functionality shared by every medsync workspace member.
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment variables

pub mod logging;

pub use logging::{init_logging, LogConfig, LoggingGuard};
