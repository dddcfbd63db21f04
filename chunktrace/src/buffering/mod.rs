//! Capture-side buffering
//!
//! - `chunk`: fixed-capacity event arrays and the single-writer capability
//! - `pool`: lock-free free-list of reset chunks, shared across sessions
//! - `collector`: per-session accounting, overflow policy, chunk ledger
//! - `writer`: per-thread writer applying filter, sampling and rate limits

pub mod chunk;
pub mod collector;
pub mod pool;
pub mod writer;

pub use chunk::{ActiveChunk, Chunk, ChunkKey};
pub use collector::{CollectorStats, SessionCollector, WriterLink};
pub use pool::ChunkPool;
pub use writer::{CategoryFilter, ThreadWriter};
