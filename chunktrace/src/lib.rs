//! # chunktrace - In-Process Event Tracing Core
//!
//! chunktrace records nested timed regions ("scopes"), cross-thread causal
//! chains ("flows"), instants and counters from inside a running program,
//! with as little disturbance of the measured code as possible. A bounded
//! capture interval (a "session") ends in an immutable [`TraceSession`] that
//! the analysis passes turn into call trees, hotspot rankings and flow chains.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Instrumented Code                          │
//! │        scope(id) · flow(id) · instant(id) · counter(id, v)      │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ one atomic load when idle
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Capture (thread-confined)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ ThreadWriter │──▶│  Collector   │──▶│  ChunkPool   │         │
//! │  │ filter/sample│   │ caps/policy  │   │ lock-free    │         │
//! │  │ rate window  │   │ chunk ledger │   │ free-list    │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ stop(): freeze (deep copy)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 TraceSession (immutable)                        │
//! │           raw per-thread order · k-way sorted merge             │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Analysis                                 │
//! │   call trees · hotspots · per-id stats · flow chains            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Capture
//!
//! - [`capture`]: session control surface (`start`, `stop`, scopes, flows)
//!   - process-wide context with a session version, per-thread writer cache
//! - [`buffering`]: chunks, the lock-free pool, the session collector and
//!   per-thread writers
//! - [`config`]: [`SessionOptions`], overflow policies and callbacks
//! - [`time`]: monotonic tick clock and tick → wall-unit conversion
//!
//! ### Results
//!
//! - [`session`]: the frozen [`TraceSession`]
//! - [`analysis`]: stack reconstruction, hotspots, stats, flows
//! - [`metadata`]: id → name/category lookup for reports and category filters
//! - [`domain`]: error types
//!
//! ## Backpressure
//!
//! Capture never blocks and never returns errors. Limits (`max_total_events`,
//! `max_total_chunks`, `max_events_per_second`) are enforced by refusing
//! events and counting them; the first limit hit in a session sets
//! [`TraceSession::was_overflow`], logs a warning and calls the optional
//! overflow callback. What happens next is the [`OverflowPolicy`]:
//!
//! 1. **`DropNew`** (default): refuse new events
//! 2. **`DropOldest`**: evict the oldest chunk no writer holds
//! 3. **`StopSession`**: refuse and close the session
//!
//! ## Typical Usage
//!
//! ```
//! use chunktrace::analysis::{process, ProcessOptions};
//!
//! # fn main() -> Result<(), chunktrace::SessionError> {
//! chunktrace::start(chunktrace::SessionOptions::default())?;
//! {
//!     let _request = chunktrace::scope(1);
//!     let flow = chunktrace::flow_start_new_handle(2);
//!     std::thread::spawn(move || flow.end()).join().ok();
//! }
//! let session = chunktrace::stop()?;
//!
//! let trace = process(&session, &ProcessOptions::default());
//! assert_eq!(trace.hotspots[0].id, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! - **Scope**: Begin/End pair on one thread, closed by dropping a guard
//! - **Flow**: FlowStart → FlowStep* → FlowEnd chain sharing a flow id,
//!   possibly across threads
//! - **Chunk**: fixed-capacity event array owned by one writer at a time
//! - **Session version**: bumped on every start; stale writers rebind
//! - **Phase rank**: tie-break that sorts Begins before Ends at equal timestamps

pub mod analysis;
pub mod buffering;
pub mod capture;
pub mod config;
pub mod domain;
pub mod metadata;
pub mod session;
pub mod time;

pub use capture::{
    counter, current_thread_id, flow, flow_end, flow_id_from_trace_id, flow_start,
    flow_start_new, flow_start_new_handle, flow_step, instant, is_running, new_flow_id, scope,
    start, stop, FlowHandle, FlowScope, ScopeGuard,
};
pub use chunktrace_common::{TraceEvent, TraceEventKind, NO_FLOW};
pub use config::{
    MismatchedEndInfo, OverflowInfo, OverflowPolicy, OverflowReason, SessionOptions,
};
pub use domain::{ConfigError, SessionError};
pub use metadata::{
    category_id, CompositeMetadataProvider, DictionaryMetadataProvider, MetadataProvider,
    TraceMeta,
};
pub use session::TraceSession;
