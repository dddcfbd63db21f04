//! Structured error types for chunktrace
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Only lifecycle misuse surfaces as an error; capture-path backpressure is
//! reported through counters and the overflow callback instead.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Trace session already running")]
    AlreadyRunning,

    #[error("Trace session is not running")]
    NotRunning,

    #[error("Invalid session options: {0}")]
    InvalidOptions(#[from] ConfigError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_capacity must be greater than zero")]
    ZeroChunkCapacity,

    #[error("sample rate for id {id} must be greater than zero")]
    ZeroSampleRate { id: i32 },

    #[error("category filters need a metadata provider to resolve categories")]
    CategoryFilterWithoutMetadata,
}
