//! RAII timed regions

use super::context::{emit, CONTEXT};
use chunktrace_common::{TraceEventKind, NO_FLOW};
use std::marker::PhantomData;

/// Open scope on the current thread; emits the matching End when dropped.
///
/// The guard is `!Send`: a scope begins and ends on the same thread. For work
/// that hops threads or `.await` points, use a flow instead.
#[must_use = "the scope ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ScopeGuard {
    id: i32,
    /// Session version the Begin was written to, `None` when inert
    version: Option<u64>,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub(crate) fn begin(id: i32) -> Self {
        if !CONTEXT.is_running() {
            return Self::inert(id);
        }

        let version = CONTEXT.version();
        emit(id, TraceEventKind::Begin, NO_FLOW, 0);
        Self { id, version: Some(version), _not_send: PhantomData }
    }

    fn inert(id: i32) -> Self {
        Self { id, version: None, _not_send: PhantomData }
    }

    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Whether this guard will emit an End.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.version.is_some()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let Some(version) = self.version.take() else {
            return;
        };
        // A different session owns the writer now; its stream never saw the Begin.
        if CONTEXT.version() != version {
            return;
        }
        emit(self.id, TraceEventKind::End, NO_FLOW, 0);
    }
}
