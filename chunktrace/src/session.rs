//! Frozen result of one capture interval
//!
//! A [`TraceSession`] owns private copies of every chunk's published events,
//! so it stays valid (and cheap to share) after the live chunks go back to
//! the pool. Two views are offered:
//!
//! - [`TraceSession::events`]: chunk by chunk, which keeps each thread's
//!   emission order and is what stack reconstruction wants
//! - [`TraceSession::events_sorted`]: one stream ordered by
//!   `(timestamp, phase rank, thread id, sequence)`, produced by a k-way merge
//!   over the chunks, for anything that correlates threads

use crate::buffering::CollectorStats;
use crate::config::SessionOptions;
use crate::time::{TickConverter, FREQUENCY};
use chunktrace_common::TraceEvent;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TraceSession {
    chunks: Vec<Box<[TraceEvent]>>,
    start_timestamp: i64,
    end_timestamp: i64,
    frequency: i64,
    options: Arc<SessionOptions>,
    thread_names: HashMap<i32, String>,
    dropped_events: u64,
    dropped_chunks: u64,
    sampled_out_events: u64,
    rate_limited_events: u64,
    was_overflow: bool,
}

impl TraceSession {
    pub(crate) fn from_capture(
        chunks: Vec<Box<[TraceEvent]>>,
        start_timestamp: i64,
        end_timestamp: i64,
        options: Arc<SessionOptions>,
        thread_names: HashMap<i32, String>,
        stats: CollectorStats,
    ) -> Self {
        Self {
            chunks,
            start_timestamp,
            end_timestamp,
            frequency: FREQUENCY,
            options,
            thread_names,
            dropped_events: stats.dropped_events,
            dropped_chunks: stats.dropped_chunks,
            sampled_out_events: stats.sampled_out_events,
            rate_limited_events: stats.rate_limited_events,
            was_overflow: stats.overflowed,
        }
    }

    /// Build a session from already-recorded events.
    ///
    /// Events are grouped per thread; within a thread they must be in
    /// emission order. Start and end are the earliest and latest timestamps.
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = TraceEvent>) -> Self {
        let mut by_thread: Vec<(i32, Vec<TraceEvent>)> = Vec::new();
        let mut start = i64::MAX;
        let mut end = i64::MIN;

        for event in events {
            start = start.min(event.timestamp);
            end = end.max(event.timestamp);
            match by_thread.iter_mut().find(|(thread, _)| *thread == event.thread_id) {
                Some((_, list)) => list.push(event),
                None => by_thread.push((event.thread_id, vec![event])),
            }
        }

        if start > end {
            start = 0;
            end = 0;
        }

        Self {
            chunks: by_thread.into_iter().map(|(_, list)| list.into_boxed_slice()).collect(),
            start_timestamp: start,
            end_timestamp: end,
            frequency: FREQUENCY,
            options: Arc::new(SessionOptions::default()),
            thread_names: HashMap::new(),
            dropped_events: 0,
            dropped_chunks: 0,
            sampled_out_events: 0,
            rate_limited_events: 0,
            was_overflow: false,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    #[must_use]
    pub fn with_frequency(mut self, frequency: i64) -> Self {
        self.frequency = TickConverter::new(frequency).frequency();
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, thread_id: i32, name: impl Into<String>) -> Self {
        self.thread_names.insert(thread_id, name.into());
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    #[must_use]
    pub fn end_timestamp(&self) -> i64 {
        self.end_timestamp
    }

    /// Ticks per second of every timestamp in this session.
    #[must_use]
    pub fn frequency(&self) -> i64 {
        self.frequency
    }

    #[must_use]
    pub fn converter(&self) -> TickConverter {
        TickConverter::new(self.frequency)
    }

    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.converter().to_millis(self.end_timestamp - self.start_timestamp)
    }

    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    #[must_use]
    pub fn thread_names(&self) -> &HashMap<i32, String> {
        &self.thread_names
    }

    #[must_use]
    pub fn thread_name(&self, thread_id: i32) -> Option<&str> {
        self.thread_names.get(&thread_id).map(String::as_str)
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    #[must_use]
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks
    }

    #[must_use]
    pub fn sampled_out_events(&self) -> u64 {
        self.sampled_out_events
    }

    #[must_use]
    pub fn rate_limited_events(&self) -> u64 {
        self.rate_limited_events
    }

    /// Whether any capacity or rate limit was hit during capture.
    #[must_use]
    pub fn was_overflow(&self) -> bool {
        self.was_overflow
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.len()).sum()
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Distinct thread ids, ascending.
    #[must_use]
    pub fn thread_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.events().map(|e| e.thread_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Events chunk by chunk, each thread's events in emission order.
    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }

    /// Events in global `(timestamp, phase rank, thread id, sequence)` order.
    #[must_use]
    pub fn events_sorted(&self) -> SortedEvents<'_> {
        SortedEvents::new(&self.chunks)
    }
}

// ============================================================================
// K-way merge
// ============================================================================

type MergeKey = (i64, u8, i32, i64);

/// Iterator returned by [`TraceSession::events_sorted`].
#[derive(Debug)]
pub struct SortedEvents<'a> {
    chunks: &'a [Box<[TraceEvent]>],
    /// (key of the chunk's next event, chunk index, event index)
    heap: BinaryHeap<Reverse<(MergeKey, usize, usize)>>,
}

impl<'a> SortedEvents<'a> {
    fn new(chunks: &'a [Box<[TraceEvent]>]) -> Self {
        let heap = chunks
            .iter()
            .enumerate()
            .filter_map(|(index, chunk)| chunk.first().map(|e| Reverse((e.order_key(), index, 0))))
            .collect();
        Self { chunks, heap }
    }
}

impl<'a> Iterator for SortedEvents<'a> {
    type Item = &'a TraceEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((_, chunk_index, event_index)) = self.heap.pop()?;
        let chunk = &self.chunks[chunk_index];

        if let Some(next) = chunk.get(event_index + 1) {
            self.heap.push(Reverse((next.order_key(), chunk_index, event_index + 1)));
        }

        chunk.get(event_index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .heap
            .iter()
            .map(|Reverse((_, chunk, index))| self.chunks[*chunk].len() - index)
            .sum();
        (remaining, Some(remaining))
    }
}
