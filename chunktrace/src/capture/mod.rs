//! Session control surface
//!
//! Everything here is safe to call from any number of threads at once. While
//! no session runs, every emitting call returns after one atomic load.
//!
//! ```
//! # fn main() -> Result<(), chunktrace::SessionError> {
//! chunktrace::start(chunktrace::SessionOptions::default())?;
//! {
//!     let _outer = chunktrace::scope(1);
//!     let _inner = chunktrace::scope(2);
//!     chunktrace::counter(3, 128);
//! }
//! let session = chunktrace::stop()?;
//! assert_eq!(session.event_count(), 5);
//! # Ok(())
//! # }
//! ```

mod context;
pub mod flow;
pub mod scope;

pub use context::current_thread_id;
pub use flow::{flow_id_from_trace_id, FlowHandle, FlowScope};
pub use scope::ScopeGuard;

use crate::buffering::SessionCollector;
use crate::config::SessionOptions;
use crate::domain::SessionError;
use crate::session::TraceSession;
use crate::time;
use chunktrace_common::{TraceEventKind, NO_FLOW};
use context::{emit, ActiveSession, CONTEXT};
use flow::emit_flow;
use log::info;
use std::sync::Arc;

// ============================================================================
// Lifecycle
// ============================================================================

/// Start capturing.
///
/// # Errors
/// [`SessionError::InvalidOptions`] when the options do not validate,
/// [`SessionError::AlreadyRunning`] when a session is live.
pub fn start(options: SessionOptions) -> Result<(), SessionError> {
    options.validate()?;

    if !CONTEXT.try_begin() {
        return Err(SessionError::AlreadyRunning);
    }

    let capacity = options.effective_chunk_capacity();
    let options = Arc::new(options);
    let pool = CONTEXT.pool_for(capacity);
    let collector = Arc::new(SessionCollector::new(Arc::clone(&options), pool));

    CONTEXT.reset_flow_ids();
    let version = CONTEXT.next_version();

    info!(
        "trace session {version} started (chunk capacity {capacity}, max events {}, max chunks {}, policy {:?})",
        options.max_total_events, options.max_total_chunks, options.overflow_policy
    );

    CONTEXT.install(Arc::new(ActiveSession {
        version,
        collector,
        options,
        start_timestamp: time::now(),
    }));
    Ok(())
}

/// Stop capturing and freeze everything recorded.
///
/// # Errors
/// [`SessionError::NotRunning`] when no session is live.
pub fn stop() -> Result<TraceSession, SessionError> {
    if !CONTEXT.try_finish() {
        return Err(SessionError::NotRunning);
    }

    let end_timestamp = time::now();
    let session = CONTEXT.take_session().ok_or(SessionError::NotRunning)?;
    let collector = &session.collector;

    collector.close();
    let writers = collector.close_writers();
    let chunks = collector.freeze();
    let stats = collector.stats();

    let frozen = TraceSession::from_capture(
        chunks,
        session.start_timestamp,
        end_timestamp,
        Arc::clone(&session.options),
        collector.thread_names(),
        stats,
    );

    info!(
        "trace session {} stopped: {} events in {} chunks from {writers} threads, {} dropped, {} sampled out, {} rate limited",
        session.version,
        frozen.event_count(),
        frozen.chunk_count(),
        stats.dropped_events,
        stats.sampled_out_events,
        stats.rate_limited_events,
    );

    Ok(frozen)
}

#[must_use]
pub fn is_running() -> bool {
    CONTEXT.is_running()
}

// ============================================================================
// Emission
// ============================================================================

/// Open a timed region that closes when the returned guard drops.
pub fn scope(id: i32) -> ScopeGuard {
    ScopeGuard::begin(id)
}

pub fn instant(id: i32) {
    emit(id, TraceEventKind::Instant, NO_FLOW, 0);
}

pub fn counter(id: i32, value: i64) {
    emit(id, TraceEventKind::Counter, NO_FLOW, value);
}

/// Next flow id of the current session; never 0.
#[must_use]
pub fn new_flow_id() -> i64 {
    CONTEXT.new_flow_id()
}

pub fn flow_start(id: i32, flow_id: i64) {
    emit_flow(id, TraceEventKind::FlowStart, flow_id);
}

pub fn flow_step(id: i32, flow_id: i64) {
    emit_flow(id, TraceEventKind::FlowStep, flow_id);
}

pub fn flow_end(id: i32, flow_id: i64) {
    emit_flow(id, TraceEventKind::FlowEnd, flow_id);
}

/// Start a flow under a fresh id and return the id.
pub fn flow_start_new(id: i32) -> i64 {
    let flow_id = new_flow_id();
    flow_start(id, flow_id);
    flow_id
}

/// Start a flow and return a handle that can end it from anywhere.
///
/// The handle is inert when no session is running.
#[must_use]
pub fn flow_start_new_handle(id: i32) -> FlowHandle {
    if !is_running() {
        return FlowHandle::inert(id);
    }
    FlowHandle::new(id, flow_start_new(id))
}

/// Start a flow that ends when the returned scope drops.
pub fn flow(id: i32) -> FlowScope {
    FlowScope::new(flow_start_new_handle(id))
}
