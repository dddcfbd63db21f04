//! Lock-free chunk free-list
//!
//! Free chunks form an intrusive singly linked list through [`Chunk::next`];
//! the list owns one strong `Arc` count per node (held as a raw pointer).
//!
//! - `return_chunk` pushes with a CAS retry loop on the head. Pushing is
//!   immune to ABA because the new node links to whatever node is head at
//!   the moment the CAS succeeds.
//! - `rent` detaches the whole list with one `swap`, keeps the first node and
//!   splices the rest back. No thread ever reads `next` of a node it does not
//!   own, so no tagged pointers or hazard pointers are needed.
//!
//! A renter that races another renter may see the list momentarily empty and
//! allocate; that is the only cost of the scheme.

use super::chunk::Chunk;
use log::debug;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct ChunkPool {
    head: AtomicPtr<Chunk>,
    capacity: usize,
    allocated: AtomicUsize,
}

impl ChunkPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            capacity: capacity.max(1),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Capacity of every chunk this pool hands out.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks allocated because the free-list was empty.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Take an empty chunk, allocating when none is free. Never blocks.
    #[must_use]
    pub fn rent(&self) -> Arc<Chunk> {
        let head = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        if head.is_null() {
            let total = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("chunk pool allocated chunk #{total} (capacity {})", self.capacity);
            return Arc::new(Chunk::new(self.capacity));
        }

        // SAFETY: the swap detached the whole list, so this thread is the only
        // owner of every node in it; `head` came from `Arc::into_raw`.
        #[allow(unsafe_code)]
        let first = unsafe { Arc::from_raw(head) };

        let rest = first.next.swap(ptr::null_mut(), Ordering::Relaxed);
        if !rest.is_null() {
            self.push_list(rest);
        }

        first
    }

    /// Reset `chunk` and put it back on the free-list.
    ///
    /// Returns false (and lets the chunk drop) when someone else still holds
    /// a reference or the capacity does not match this pool.
    pub fn return_chunk(&self, mut chunk: Arc<Chunk>) -> bool {
        if chunk.capacity() != self.capacity {
            return false;
        }

        let Some(exclusive) = Arc::get_mut(&mut chunk) else {
            return false;
        };
        exclusive.reset();

        let node = Arc::into_raw(chunk).cast_mut();
        self.push_list(node);
        true
    }

    /// Push an owned, null-terminated list onto the free-list.
    #[allow(unsafe_code)]
    fn push_list(&self, first: *mut Chunk) {
        // SAFETY (whole function): every node from `first` to the tail is owned
        // by this thread until the CAS below publishes them.
        let tail = unsafe {
            let mut tail = first;
            loop {
                let next = (*tail).next.load(Ordering::Relaxed);
                if next.is_null() {
                    break tail;
                }
                tail = next;
            }
        };

        let mut current = self.head.load(Ordering::Acquire);
        loop {
            unsafe {
                (*tail).next.store(current, Ordering::Relaxed);
            }

            match self.head.compare_exchange_weak(
                current,
                first,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for ChunkPool {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            // SAFETY: `&mut self` means no concurrent access; every node was
            // produced by `Arc::into_raw` and is released exactly once here.
            #[allow(unsafe_code)]
            let chunk = unsafe { Arc::from_raw(node) };
            node = chunk.next.load(Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for ChunkPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPool")
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated())
            .finish_non_exhaustive()
    }
}
