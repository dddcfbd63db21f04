//! Per-session accounting and overflow policy
//!
//! The collector is the authority on what a session holds. Every chunk a
//! writer rents is entered in the ledger, so `freeze` can see chunks whose
//! writers never rotated them. The ledger, writer list and thread-name table
//! are behind short mutexes touched only on chunk rotation, writer creation
//! and stop; the per-event path sees atomics only.

use super::chunk::{ActiveChunk, Chunk, ChunkKey};
use super::pool::ChunkPool;
use crate::config::{OverflowInfo, OverflowPolicy, OverflowReason, SessionOptions};
use chunktrace_common::TraceEvent;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// Writer Links
// ============================================================================

/// Shared close flag between the collector and one thread writer.
#[derive(Debug, Default)]
pub struct WriterLink {
    closed: AtomicBool,
}

impl WriterLink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Point-in-time copy of the collector's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Events admitted and still held (evicted events are subtracted)
    pub event_count: u64,
    pub chunk_count: usize,
    pub dropped_events: u64,
    pub dropped_chunks: u64,
    pub sampled_out_events: u64,
    pub rate_limited_events: u64,
    pub overflowed: bool,
}

// ============================================================================
// Collector
// ============================================================================

struct LedgerEntry {
    chunk: Arc<Chunk>,
    active: bool,
}

pub struct SessionCollector {
    options: Arc<SessionOptions>,
    pool: Arc<ChunkPool>,

    closed: AtomicBool,
    overflowed: AtomicBool,

    event_count: AtomicU64,
    chunk_count: AtomicUsize,
    dropped_events: AtomicU64,
    dropped_chunks: AtomicU64,
    sampled_out: AtomicU64,
    rate_limited: AtomicU64,

    /// Rented chunks, oldest first
    ledger: Mutex<VecDeque<LedgerEntry>>,
    writers: Mutex<Vec<Arc<WriterLink>>>,
    thread_names: Mutex<HashMap<i32, String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section leaves the data consistent, so a panic elsewhere
    // does not make it unusable.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionCollector {
    #[must_use]
    pub fn new(options: Arc<SessionOptions>, pool: Arc<ChunkPool>) -> Self {
        Self {
            options,
            pool,
            closed: AtomicBool::new(false),
            overflowed: AtomicBool::new(false),
            event_count: AtomicU64::new(0),
            chunk_count: AtomicUsize::new(0),
            dropped_events: AtomicU64::new(0),
            dropped_chunks: AtomicU64::new(0),
            sampled_out: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            ledger: Mutex::new(VecDeque::new()),
            writers: Mutex::new(Vec::new()),
            thread_names: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn options(&self) -> &Arc<SessionOptions> {
        &self.options
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse all further chunks and events. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            event_count: self.event_count.load(Ordering::Acquire),
            chunk_count: self.chunk_count.load(Ordering::Acquire),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            dropped_chunks: self.dropped_chunks.load(Ordering::Relaxed),
            sampled_out_events: self.sampled_out.load(Ordering::Relaxed),
            rate_limited_events: self.rate_limited.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Acquire),
        }
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Hand out a fresh chunk for exclusive writing.
    ///
    /// `None` when the session is closed or the chunk cap is reached and the
    /// policy cannot make room.
    pub fn try_rent_chunk(&self) -> Option<ActiveChunk> {
        if self.is_closed() {
            return None;
        }

        if !self.reserve_chunk_slot() {
            return self.rent_at_chunk_cap();
        }

        let chunk = self.pool.rent();
        let mut ledger = lock(&self.ledger);
        if self.is_closed() {
            drop(ledger);
            self.chunk_count.fetch_sub(1, Ordering::AcqRel);
            self.pool.return_chunk(chunk);
            return None;
        }

        ledger.push_back(LedgerEntry { chunk: Arc::clone(&chunk), active: true });
        Some(ActiveChunk::new(chunk))
    }

    /// Count one more chunk against `max_total_chunks`; false at the cap.
    fn reserve_chunk_slot(&self) -> bool {
        let max = self.options.max_total_chunks;
        if max == 0 {
            self.chunk_count.fetch_add(1, Ordering::AcqRel);
            return true;
        }

        self.chunk_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < max).then_some(count + 1)
            })
            .is_ok()
    }

    fn rent_at_chunk_cap(&self) -> Option<ActiveChunk> {
        let policy = self.options.overflow_policy;

        if policy == OverflowPolicy::DropOldest {
            let mut ledger = lock(&self.ledger);
            while !self.is_closed() && self.evict_oldest(&mut ledger) {
                // Another renter may take the freed slot first; evict again then.
                if !self.reserve_chunk_slot() {
                    continue;
                }
                let chunk = self.pool.rent();
                ledger.push_back(LedgerEntry { chunk: Arc::clone(&chunk), active: true });
                drop(ledger);
                self.signal_overflow(OverflowReason::MaxTotalChunks);
                return Some(ActiveChunk::new(chunk));
            }
        }

        self.signal_overflow(OverflowReason::MaxTotalChunks);
        if policy == OverflowPolicy::StopSession {
            self.close();
        }
        None
    }

    /// Take back a writer's chunk.
    ///
    /// While the session is open the chunk stays in the ledger and becomes
    /// evictable. Once the session is closed `freeze` has already copied it
    /// (or will, if it still holds it), so the chunk goes back to the pool.
    pub fn release_chunk(&self, chunk: ActiveChunk) {
        let key = chunk.key();
        let chunk = chunk.into_inner();

        if self.is_closed() {
            self.pool.return_chunk(chunk);
            return;
        }

        drop(chunk);
        self.mark_chunk_inactive(key);
    }

    /// The writer holding `key` has let it go; it may now be evicted.
    pub fn mark_chunk_inactive(&self, key: ChunkKey) {
        let mut ledger = lock(&self.ledger);
        if let Some(entry) = ledger.iter_mut().find(|entry| ChunkKey::of(&entry.chunk) == key) {
            entry.active = false;
        }
    }

    /// Remove the oldest inactive chunk, moving its events to the dropped tally.
    fn evict_oldest(&self, ledger: &mut VecDeque<LedgerEntry>) -> bool {
        let Some(position) = ledger.iter().position(|entry| !entry.active) else {
            return false;
        };
        let Some(entry) = ledger.remove(position) else {
            return false;
        };

        let events = entry.chunk.len() as u64;
        self.event_count.fetch_sub(events, Ordering::AcqRel);
        self.chunk_count.fetch_sub(1, Ordering::AcqRel);
        self.dropped_events.fetch_add(events, Ordering::Relaxed);
        self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
        debug!("evicted oldest chunk ({events} events)");

        self.pool.return_chunk(entry.chunk);
        true
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Admit one event against `max_total_events`.
    pub fn try_accept_event(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let max = self.options.max_total_events;
        if max == 0 {
            self.event_count.fetch_add(1, Ordering::AcqRel);
            return true;
        }

        if self.event_count.fetch_add(1, Ordering::AcqRel) < max {
            return true;
        }
        self.event_count.fetch_sub(1, Ordering::AcqRel);

        match self.options.overflow_policy {
            OverflowPolicy::DropNew => {
                self.record_dropped_event(OverflowReason::MaxTotalEvents);
                false
            }
            OverflowPolicy::StopSession => {
                self.record_dropped_event(OverflowReason::MaxTotalEvents);
                self.close();
                false
            }
            OverflowPolicy::DropOldest => self.accept_after_eviction(max),
        }
    }

    fn accept_after_eviction(&self, max: u64) -> bool {
        {
            let mut ledger = lock(&self.ledger);
            while self.event_count.load(Ordering::Acquire) >= max {
                if !self.evict_oldest(&mut ledger) {
                    break;
                }
            }
        }

        if self.event_count.fetch_add(1, Ordering::AcqRel) < max {
            self.signal_overflow(OverflowReason::MaxTotalEvents);
            return true;
        }
        self.event_count.fetch_sub(1, Ordering::AcqRel);

        self.record_dropped_event(OverflowReason::MaxTotalEvents);
        false
    }

    /// Tally an event lost to a capacity limit.
    pub fn record_dropped_event(&self, reason: OverflowReason) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
        self.signal_overflow(reason);
    }

    pub fn record_sampled_out_event(&self) {
        self.sampled_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Tally an event refused by a writer's rate window.
    ///
    /// The window is per thread, so excess never closes the session, even
    /// under `StopSession`; only the session-wide caps do that.
    pub fn handle_rate_limit_exceeded(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
        self.signal_overflow(OverflowReason::RateLimit);
    }

    /// First overflow of the session: set the flag, log and notify.
    fn signal_overflow(&self, reason: OverflowReason) {
        if self
            .overflowed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let policy = self.options.overflow_policy;
        warn!("trace session overflow: {reason:?} reached, applying {policy:?}");

        if let Some(callback) = &self.options.on_overflow {
            callback(OverflowInfo { reason, policy });
        }
    }

    // ========================================================================
    // Threads and writers
    // ========================================================================

    /// Remember a thread's name; the first registration wins.
    pub fn register_thread_name(&self, thread_id: i32, name: &str) {
        if name.trim().is_empty() {
            return;
        }
        lock(&self.thread_names).entry(thread_id).or_insert_with(|| name.to_string());
    }

    #[must_use]
    pub fn thread_names(&self) -> HashMap<i32, String> {
        lock(&self.thread_names).clone()
    }

    pub fn register_writer(&self, link: Arc<WriterLink>) {
        lock(&self.writers).push(link);
    }

    /// Close every registered writer; returns how many were closed.
    pub fn close_writers(&self) -> usize {
        let writers = std::mem::take(&mut *lock(&self.writers));
        for link in &writers {
            link.close();
        }
        writers.len()
    }

    // ========================================================================
    // Freeze
    // ========================================================================

    /// Copy out every published event and recycle the chunks.
    ///
    /// Chunks still held by a writer are copied but left to that writer,
    /// which returns them through [`release_chunk`](Self::release_chunk)
    /// when it notices the session is closed.
    pub fn freeze(&self) -> Vec<Box<[TraceEvent]>> {
        let entries: Vec<LedgerEntry> = lock(&self.ledger).drain(..).collect();

        let mut frozen = Vec::with_capacity(entries.len());
        let mut recycled = 0_usize;
        for entry in entries {
            if !entry.chunk.is_empty() {
                frozen.push(entry.chunk.snapshot());
            }
            if self.pool.return_chunk(entry.chunk) {
                recycled += 1;
            }
        }

        debug!("froze {} chunks, recycled {recycled}", frozen.len());
        frozen
    }
}

impl std::fmt::Debug for SessionCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCollector")
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
