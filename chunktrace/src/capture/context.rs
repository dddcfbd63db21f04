//! Process-wide capture state and the per-thread writer cache
//!
//! `CONTEXT` is const-initialized, so there is no setup call and nothing to
//! tear down. The session version is bumped on every start; a thread whose
//! cached writer carries an older version rebinds on its next event, which is
//! the only time the session mutex is taken on the emit path.

use crate::buffering::{ChunkPool, SessionCollector, ThreadWriter};
use crate::config::SessionOptions;
use chunktrace_common::{TraceEventKind, NO_FLOW};
use log::debug;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The live half of a session, shared by every writer bound to it.
pub(crate) struct ActiveSession {
    pub(crate) version: u64,
    pub(crate) collector: Arc<SessionCollector>,
    pub(crate) options: Arc<SessionOptions>,
    pub(crate) start_timestamp: i64,
}

pub(crate) struct TraceContext {
    running: AtomicBool,
    version: AtomicU64,
    next_flow_id: AtomicI64,
    session: Mutex<Option<Arc<ActiveSession>>>,
    pool: Mutex<Option<Arc<ChunkPool>>>,
}

pub(crate) static CONTEXT: TraceContext = TraceContext::new();

static NEXT_THREAD_ID: AtomicI32 = AtomicI32::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TraceContext {
    const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            version: AtomicU64::new(0),
            next_flow_id: AtomicI64::new(0),
            session: Mutex::new(None),
            pool: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Claim the running flag; false when a session is already live.
    pub(crate) fn try_begin(&self) -> bool {
        self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Release the running flag; false when no session was live.
    pub(crate) fn try_finish(&self) -> bool {
        self.running.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub(crate) fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn install(&self, session: Arc<ActiveSession>) {
        *lock(&self.session) = Some(session);
    }

    pub(crate) fn take_session(&self) -> Option<Arc<ActiveSession>> {
        lock(&self.session).take()
    }

    fn current_session(&self) -> Option<Arc<ActiveSession>> {
        lock(&self.session).clone()
    }

    /// Pool for chunks of `capacity`, reusing the previous one when it fits.
    pub(crate) fn pool_for(&self, capacity: usize) -> Arc<ChunkPool> {
        let mut slot = lock(&self.pool);
        if let Some(pool) = slot.as_ref().filter(|pool| pool.capacity() == capacity) {
            return Arc::clone(pool);
        }

        debug!("creating chunk pool for capacity {capacity}");
        let pool = Arc::new(ChunkPool::new(capacity));
        *slot = Some(Arc::clone(&pool));
        pool
    }

    pub(crate) fn reset_flow_ids(&self) {
        self.next_flow_id.store(0, Ordering::Release);
    }

    pub(crate) fn new_flow_id(&self) -> i64 {
        loop {
            let id = self.next_flow_id.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
            if id != NO_FLOW {
                return id;
            }
        }
    }
}

// ============================================================================
// Per-thread writer cache
// ============================================================================

struct LocalWriter {
    thread_id: i32,
    version: u64,
    writer: Option<ThreadWriter>,
}

impl LocalWriter {
    fn new() -> Self {
        Self {
            thread_id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            version: 0,
            writer: None,
        }
    }

    /// Make sure the cached writer belongs to the session at `version`.
    fn bind(&mut self, version: u64) -> Option<&mut ThreadWriter> {
        if self.version != version || self.writer.is_none() {
            // Release the old writer's chunk before binding anew.
            self.writer = None;

            let session = CONTEXT.current_session()?;
            if session.version != version {
                return None;
            }

            let current = std::thread::current();
            let collector = Arc::clone(&session.collector);
            self.writer = Some(ThreadWriter::new(collector, self.thread_id, current.name()));
            self.version = version;
        }
        self.writer.as_mut()
    }
}

thread_local! {
    static LOCAL: RefCell<LocalWriter> = RefCell::new(LocalWriter::new());
}

/// Small integer id of the calling thread, stable for the thread's lifetime.
#[must_use]
pub fn current_thread_id() -> i32 {
    LOCAL.try_with(|local| local.try_borrow().map_or(0, |local| local.thread_id)).unwrap_or(0)
}

/// Send one event through the calling thread's writer.
///
/// Silently does nothing when no session is running, during thread-local
/// teardown, or when re-entered from inside a write on the same thread.
pub(crate) fn emit(id: i32, kind: TraceEventKind, flow_id: i64, value: i64) {
    if !CONTEXT.is_running() {
        return;
    }

    let _ = LOCAL.try_with(|local| {
        let Ok(mut local) = local.try_borrow_mut() else {
            return;
        };
        if let Some(writer) = local.bind(CONTEXT.version()) {
            writer.write(id, kind, flow_id, value);
        }
    });
}
