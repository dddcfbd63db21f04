//! Cross-thread causal chains
//!
//! A flow is a chain of FlowStart, FlowStep* and FlowEnd events that share a
//! flow id. Unlike scopes, each link may be emitted from any thread.

use super::context::emit;
use chunktrace_common::{TraceEventKind, NO_FLOW};
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) fn emit_flow(id: i32, kind: TraceEventKind, flow_id: i64) {
    if flow_id == NO_FLOW {
        return;
    }
    emit(id, kind, flow_id, 0);
}

/// Shareable handle to an open flow that ends at most once.
///
/// `Send + Sync`: hand it to another thread or task and call [`end`] there.
///
/// [`end`]: FlowHandle::end
#[derive(Debug)]
pub struct FlowHandle {
    id: i32,
    flow_id: i64,
    ended: AtomicBool,
}

impl FlowHandle {
    /// Wrap an already started flow.
    #[must_use]
    pub fn new(id: i32, flow_id: i64) -> Self {
        Self { id, flow_id, ended: AtomicBool::new(false) }
    }

    pub(crate) fn inert(id: i32) -> Self {
        Self::new(id, NO_FLOW)
    }

    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[must_use]
    pub fn flow_id(&self) -> i64 {
        self.flow_id
    }

    /// False for handles created while no session was running.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.flow_id != NO_FLOW
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Emit a FlowStep unless the flow already ended.
    pub fn step(&self) {
        if !self.is_valid() || self.is_ended() {
            return;
        }
        emit_flow(self.id, TraceEventKind::FlowStep, self.flow_id);
    }

    /// Emit the FlowEnd; returns false if this or another call already did.
    pub fn try_end(&self) -> bool {
        if !self.is_valid() || self.ended.swap(true, Ordering::AcqRel) {
            return false;
        }
        emit_flow(self.id, TraceEventKind::FlowEnd, self.flow_id);
        true
    }

    pub fn end(&self) {
        self.try_end();
    }
}

/// Flow that ends when dropped.
#[must_use = "the flow ends as soon as the scope is dropped"]
#[derive(Debug)]
pub struct FlowScope {
    handle: FlowHandle,
}

impl FlowScope {
    pub(crate) fn new(handle: FlowHandle) -> Self {
        Self { handle }
    }

    #[must_use]
    pub fn id(&self) -> i32 {
        self.handle.id()
    }

    #[must_use]
    pub fn flow_id(&self) -> i64 {
        self.handle.flow_id()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn step(&self) {
        self.handle.step();
    }

    /// Stop ending on drop and hand the open flow to whoever ends it later.
    #[must_use]
    pub fn into_handle(mut self) -> FlowHandle {
        let id = self.handle.id();
        std::mem::replace(&mut self.handle, FlowHandle::inert(id))
    }
}

impl Drop for FlowScope {
    fn drop(&mut self) {
        self.handle.end();
    }
}

/// Map an external trace id (for example a W3C trace id) to a flow id.
///
/// FNV-1a 64 with the sign bit cleared; never returns 0, so the result is
/// always a usable flow id. Stable across processes.
#[must_use]
pub fn flow_id_from_trace_id(trace_id: &str) -> i64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for byte in trace_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }

    let id = i64::try_from(hash & (u64::MAX >> 1)).unwrap_or(i64::MAX);
    if id == NO_FLOW {
        1
    } else {
        id
    }
}
