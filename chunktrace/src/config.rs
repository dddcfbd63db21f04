//! Session configuration
//!
//! [`SessionOptions`] is plain data plus three optional hooks. The data part
//! deserializes with serde (every field defaults), so options can come from a
//! config file as easily as from code:
//!
//! ```
//! use chunktrace::{OverflowPolicy, SessionOptions};
//!
//! let options = SessionOptions::default()
//!     .with_max_total_events(1_000_000)
//!     .with_overflow_policy(OverflowPolicy::DropOldest);
//! assert!(options.validate().is_ok());
//! ```

use crate::domain::ConfigError;
use crate::metadata::MetadataProvider;
use chunktrace_common::{DEFAULT_CHUNK_CAPACITY, MIN_CHUNK_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Rule applied when a capacity limit is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new event and count it as dropped
    #[default]
    DropNew,
    /// Evict the oldest inactive chunk to make room
    DropOldest,
    /// Refuse the event and close the session
    StopSession,
}

/// Which limit triggered an overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowReason {
    MaxTotalEvents,
    MaxTotalChunks,
    RateLimit,
}

/// Payload of the once-per-session overflow notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverflowInfo {
    pub reason: OverflowReason,
    pub policy: OverflowPolicy,
}

/// An End whose id did not match the innermost open scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MismatchedEndInfo {
    pub thread_id: i32,
    pub expected_id: i32,
    pub actual_id: i32,
    pub timestamp: i64,
}

pub type OverflowCallback = Arc<dyn Fn(OverflowInfo) + Send + Sync>;
pub type MismatchCallback = Arc<dyn Fn(MismatchedEndInfo) + Send + Sync>;

/// Configuration for one trace session.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Events per chunk (raised to [`MIN_CHUNK_CAPACITY`] at session start)
    pub chunk_capacity: usize,

    /// Cap on admitted events, 0 = unlimited
    pub max_total_events: u64,

    /// Cap on simultaneously held chunks, 0 = unlimited
    pub max_total_chunks: usize,

    pub overflow_policy: OverflowPolicy,

    /// Keep one event in N across all ids, 0 or 1 = keep all
    pub sample_every_n_global: u32,

    /// Keep one event in N for specific ids; overrides the global rate
    pub sample_every_n_by_id: HashMap<i32, u32>,

    /// Per-thread events per second, 0 = unlimited
    pub max_events_per_second: u64,

    /// Only record ids whose category is listed
    pub enabled_categories: Vec<String>,

    /// Never record ids whose category is listed (ignored when an allow-list is set)
    pub disabled_categories: Vec<String>,

    #[serde(skip)]
    pub metadata: Option<Arc<dyn MetadataProvider>>,

    #[serde(skip)]
    pub on_overflow: Option<OverflowCallback>,

    #[serde(skip)]
    pub on_mismatched_end: Option<MismatchCallback>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            max_total_events: 0,
            max_total_chunks: 0,
            overflow_policy: OverflowPolicy::DropNew,
            sample_every_n_global: 0,
            sample_every_n_by_id: HashMap::new(),
            max_events_per_second: 0,
            enabled_categories: Vec::new(),
            disabled_categories: Vec::new(),
            metadata: None,
            on_overflow: None,
            on_mismatched_end: None,
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_total_events(mut self, max: u64) -> Self {
        self.max_total_events = max;
        self
    }

    #[must_use]
    pub fn with_max_total_chunks(mut self, max: usize) -> Self {
        self.max_total_chunks = max;
        self
    }

    #[must_use]
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    #[must_use]
    pub fn with_global_sampling(mut self, every_n: u32) -> Self {
        self.sample_every_n_global = every_n;
        self
    }

    #[must_use]
    pub fn with_id_sampling(mut self, id: i32, every_n: u32) -> Self {
        self.sample_every_n_by_id.insert(id, every_n);
        self
    }

    #[must_use]
    pub fn with_max_events_per_second(mut self, max: u64) -> Self {
        self.max_events_per_second = max;
        self
    }

    #[must_use]
    pub fn with_enabled_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_disabled_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(provider);
        self
    }

    #[must_use]
    pub fn on_overflow(mut self, callback: impl Fn(OverflowInfo) + Send + Sync + 'static) -> Self {
        self.on_overflow = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_mismatched_end(
        mut self,
        callback: impl Fn(MismatchedEndInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_mismatched_end = Some(Arc::new(callback));
        self
    }

    /// Check the options for combinations that cannot work.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_capacity == 0 {
            return Err(ConfigError::ZeroChunkCapacity);
        }

        if let Some((&id, _)) = self.sample_every_n_by_id.iter().find(|(_, &n)| n == 0) {
            return Err(ConfigError::ZeroSampleRate { id });
        }

        if self.has_category_filter() && self.metadata.is_none() {
            return Err(ConfigError::CategoryFilterWithoutMetadata);
        }

        Ok(())
    }

    /// Chunk capacity a live session actually uses.
    #[must_use]
    pub fn effective_chunk_capacity(&self) -> usize {
        self.chunk_capacity.max(MIN_CHUNK_CAPACITY)
    }

    #[must_use]
    pub fn has_category_filter(&self) -> bool {
        !self.enabled_categories.is_empty() || !self.disabled_categories.is_empty()
    }

    #[must_use]
    pub fn has_sampling(&self) -> bool {
        self.sample_every_n_global > 1 || self.sample_every_n_by_id.values().any(|&n| n > 1)
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("chunk_capacity", &self.chunk_capacity)
            .field("max_total_events", &self.max_total_events)
            .field("max_total_chunks", &self.max_total_chunks)
            .field("overflow_policy", &self.overflow_policy)
            .field("sample_every_n_global", &self.sample_every_n_global)
            .field("sample_every_n_by_id", &self.sample_every_n_by_id)
            .field("max_events_per_second", &self.max_events_per_second)
            .field("enabled_categories", &self.enabled_categories)
            .field("disabled_categories", &self.disabled_categories)
            .field("metadata", &self.metadata.is_some())
            .field("on_overflow", &self.on_overflow.is_some())
            .field("on_mismatched_end", &self.on_mismatched_end.is_some())
            .finish()
    }
}
