//! Fixed-capacity event buffers
//!
//! A [`Chunk`] is shared (`Arc`) between the collector's ledger, which only
//! reads published events, and at most one [`ActiveChunk`], the capability
//! that lets a thread writer append. Writes go to the slot at the cursor and
//! are published by a release store of the cursor, so readers never look at a
//! slot that is still being written.

use chunktrace_common::TraceEvent;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct Chunk {
    slots: Box<[UnsafeCell<TraceEvent>]>,
    count: AtomicUsize,
    /// Free-list link, only meaningful while the chunk sits in a pool
    pub(super) next: AtomicPtr<Chunk>,
}

// SAFETY: slots below `count` are immutable once published (release store of
// `count` after the write, acquire load before any read). Slots at or above
// `count` are touched only through the single `ActiveChunk` for this chunk,
// or through `&mut Chunk` in `reset`.
#[allow(unsafe_code)]
unsafe impl Sync for Chunk {}

impl Chunk {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| UnsafeCell::new(TraceEvent::default())).collect();
        Self { slots, count: AtomicUsize::new(0), next: AtomicPtr::new(ptr::null_mut()) }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of published events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Copy of every published event.
    #[must_use]
    #[allow(unsafe_code)]
    pub fn snapshot(&self) -> Box<[TraceEvent]> {
        let published = self.len();
        let mut copy = Vec::with_capacity(published);
        for slot in &self.slots[..published] {
            // SAFETY: the slot is below the published cursor and never written again
            copy.push(unsafe { *slot.get() });
        }
        copy.into_boxed_slice()
    }

    /// Clear the cursor and free-list link. Requires exclusive access.
    pub fn reset(&mut self) {
        *self.count.get_mut() = 0;
        *self.next.get_mut() = ptr::null_mut();
    }

    /// Append one event; false when full.
    ///
    /// Only reachable through [`ActiveChunk`], which guarantees a single writer.
    #[allow(unsafe_code)]
    fn push(&self, event: TraceEvent) -> bool {
        let index = self.count.load(Ordering::Relaxed);
        let Some(slot) = self.slots.get(index) else {
            return false;
        };

        // SAFETY: `index` is unpublished, and the only writer is the caller
        // holding the unique ActiveChunk, so nobody else reads or writes it.
        unsafe {
            *slot.get() = event;
        }

        self.count.store(index + 1, Ordering::Release);
        true
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Identity of a chunk, stable while anyone holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey(usize);

impl ChunkKey {
    #[must_use]
    pub fn of(chunk: &Arc<Chunk>) -> Self {
        Self(Arc::as_ptr(chunk) as usize)
    }
}

/// Exclusive write access to one chunk.
///
/// Handed out once per rental by the session collector; not `Clone`.
#[derive(Debug)]
pub struct ActiveChunk {
    chunk: Arc<Chunk>,
}

impl ActiveChunk {
    /// Wrap a chunk that nobody else can write.
    pub(super) fn new(chunk: Arc<Chunk>) -> Self {
        Self { chunk }
    }

    pub fn try_write(&mut self, event: TraceEvent) -> bool {
        self.chunk.push(event)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.chunk.is_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    #[must_use]
    pub fn key(&self) -> ChunkKey {
        ChunkKey::of(&self.chunk)
    }

    /// Give up write access and hand back the shared chunk.
    #[must_use]
    pub fn into_inner(self) -> Arc<Chunk> {
        self.chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunktrace_common::TraceEventKind;

    fn event(id: i32) -> TraceEvent {
        TraceEvent::new(id, 1, i64::from(id), TraceEventKind::Instant, 0, 0, 0)
    }

    #[test]
    fn writes_past_capacity_fail() {
        let mut active = ActiveChunk::new(Arc::new(Chunk::new(2)));

        assert!(active.try_write(event(1)));
        assert!(active.try_write(event(2)));
        assert!(active.is_full());
        assert!(!active.try_write(event(3)));
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn snapshot_copies_published_events_only() {
        let chunk = Arc::new(Chunk::new(4));
        let mut active = ActiveChunk::new(Arc::clone(&chunk));
        active.try_write(event(7));

        let copy = chunk.snapshot();
        assert_eq!(copy.len(), 1);
        assert_eq!(copy[0].id, 7);

        active.try_write(event(8));
        assert_eq!(copy.len(), 1);
        assert_eq!(chunk.snapshot().len(), 2);
    }

    #[test]
    fn reset_clears_cursor() {
        let mut chunk = Chunk::new(2);
        assert!(chunk.push(event(1)));
        chunk.reset();
        assert!(chunk.is_empty());
        assert_eq!(chunk.capacity(), 2);
    }
}
