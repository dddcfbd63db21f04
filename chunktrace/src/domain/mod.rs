//! Domain model for chunktrace
//!
//! This module contains the error types shared by the capture and analysis
//! layers.

pub mod errors;

pub use errors::{ConfigError, SessionError};
