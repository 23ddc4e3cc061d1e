//! Shared configuration and errors for Harbor.
//!
//! The operator reads one TOML file at startup. [`OperatorConfig`] holds
//! the controller, backoff and logging settings; every crate that turns
//! them into runtime values depends on this one.

#![forbid(clippy::panic)]

pub mod config;
pub mod error;

pub use config::{BackoffSettings, ControllerSettings, LoggingSettings, OperatorConfig};
pub use error::{Error, Result};
