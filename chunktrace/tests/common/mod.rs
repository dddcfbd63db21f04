//! Shared helpers for tests that drive the process-wide session.
//!
//! Only one session can run per process, and the test harness runs tests on
//! parallel threads, so every test that calls `start` holds [`exclusive`].

#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

static SESSION_LOCK: Mutex<()> = Mutex::new(());

/// Serialize access to the global session and reset leftovers from a
/// previously failed test.
pub fn exclusive() -> MutexGuard<'static, ()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let guard = SESSION_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if chunktrace::is_running() {
        let _ = chunktrace::stop();
    }
    guard
}

/// Counter values of every event with `id`, in time order.
pub fn values_of(session: &chunktrace::TraceSession, id: i32) -> Vec<i64> {
    session.events_sorted().filter(|e| e.id == id).map(|e| e.value).collect()
}
