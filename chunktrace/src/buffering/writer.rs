//! Thread-confined event writer
//!
//! One [`ThreadWriter`] exists per thread per session. It owns the thread's
//! [`ActiveChunk`] and all per-thread policy state, so nothing here needs
//! synchronization beyond the collector's atomics.
//!
//! `write` runs its checks cheapest first and reads the clock last:
//!
//! 1. closed writer or collector
//! 2. category filter (cached per id)
//! 3. sampling
//! 4. rate window
//! 5. chunk rotation
//! 6. global admission
//! 7. timestamp, sequence, append

use super::chunk::ActiveChunk;
use super::collector::{SessionCollector, WriterLink};
use crate::config::{OverflowReason, SessionOptions};
use crate::metadata::{category_id, MetadataProvider};
use crate::time::{self, TickConverter};
use chunktrace_common::{TraceEvent, TraceEventKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ============================================================================
// Category filter
// ============================================================================

/// Allow/deny lists of categories, resolved through session metadata.
///
/// An allow-list wins over a deny-list. Ids without a category fail an
/// allow-list and pass a deny-list.
pub struct CategoryFilter {
    metadata: Arc<dyn MetadataProvider>,
    enabled: HashSet<i32>,
    disabled: HashSet<i32>,
}

impl CategoryFilter {
    /// `None` when the options carry no category lists or no metadata.
    #[must_use]
    pub fn from_options(options: &SessionOptions) -> Option<Self> {
        if !options.has_category_filter() {
            return None;
        }
        let metadata = Arc::clone(options.metadata.as_ref()?);

        Some(Self {
            metadata,
            enabled: options.enabled_categories.iter().map(|c| category_id(c)).collect(),
            disabled: options.disabled_categories.iter().map(|c| category_id(c)).collect(),
        })
    }

    #[must_use]
    pub fn allows(&self, id: i32) -> bool {
        let category = self
            .metadata
            .get(id)
            .and_then(|meta| meta.category)
            .map_or(0, |name| category_id(&name));

        if !self.enabled.is_empty() {
            return category != 0 && self.enabled.contains(&category);
        }
        category == 0 || !self.disabled.contains(&category)
    }
}

impl std::fmt::Debug for CategoryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryFilter")
            .field("enabled", &self.enabled.len())
            .field("disabled", &self.disabled.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Sampling
// ============================================================================

/// "Keep one in N" counters. Only Begin, Instant and Counter events draw a
/// decision; an End replays the decision of the Begin it closes.
#[derive(Debug, Default)]
struct Sampler {
    global_every_n: u64,
    every_n_by_id: HashMap<i32, u64>,
    global_counter: u64,
    id_counters: HashMap<i32, u64>,
    open_scopes: Vec<bool>,
}

impl Sampler {
    fn new(options: &SessionOptions) -> Self {
        Self {
            global_every_n: u64::from(options.sample_every_n_global),
            every_n_by_id: options
                .sample_every_n_by_id
                .iter()
                .map(|(&id, &n)| (id, u64::from(n)))
                .collect(),
            ..Self::default()
        }
    }

    fn is_enabled(&self) -> bool {
        self.global_every_n > 1 || self.every_n_by_id.values().any(|&n| n > 1)
    }

    fn keep(&mut self, id: i32, kind: TraceEventKind) -> bool {
        match kind {
            TraceEventKind::Begin => {
                let keep = self.draw(id);
                self.open_scopes.push(keep);
                keep
            }
            // Unbalanced Ends are kept so processing can report them.
            TraceEventKind::End => self.open_scopes.pop().unwrap_or(true),
            TraceEventKind::Instant | TraceEventKind::Counter => self.draw(id),
            TraceEventKind::FlowStart | TraceEventKind::FlowStep | TraceEventKind::FlowEnd => true,
        }
    }

    fn draw(&mut self, id: i32) -> bool {
        // A listed id uses its own rate, even when that rate keeps everything.
        if let Some(&every_n) = self.every_n_by_id.get(&id) {
            if every_n <= 1 {
                return true;
            }
            let counter = self.id_counters.entry(id).or_insert(0);
            *counter += 1;
            return *counter % every_n == 1;
        }

        if self.global_every_n <= 1 {
            return true;
        }
        self.global_counter += 1;
        self.global_counter % self.global_every_n == 1
    }
}

// ============================================================================
// Rate window
// ============================================================================

#[derive(Debug)]
struct RateWindow {
    max_per_window: u64,
    window_ticks: i64,
    window_start: i64,
    count: u64,
}

impl RateWindow {
    fn new(max_per_second: u64) -> Self {
        Self {
            max_per_window: max_per_second,
            window_ticks: TickConverter::default().per_seconds(1),
            window_start: i64::MIN,
            count: 0,
        }
    }

    fn is_enabled(&self) -> bool {
        self.max_per_window > 0
    }

    fn admit(&mut self, now: i64) -> bool {
        if now.saturating_sub(self.window_start) >= self.window_ticks {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.max_per_window
    }
}

// ============================================================================
// Writer
// ============================================================================

pub struct ThreadWriter {
    collector: Option<Arc<SessionCollector>>,
    link: Arc<WriterLink>,
    chunk: Option<ActiveChunk>,
    thread_id: i32,
    sequence: i64,

    filter: Option<CategoryFilter>,
    filter_cache: HashMap<i32, bool>,
    sampler: Sampler,
    rate: RateWindow,
}

impl ThreadWriter {
    /// Bind a writer for `thread_id` to `collector` and register it there.
    #[must_use]
    pub fn new(
        collector: Arc<SessionCollector>,
        thread_id: i32,
        thread_name: Option<&str>,
    ) -> Self {
        let options = Arc::clone(collector.options());
        let link = Arc::new(WriterLink::new());

        collector.register_writer(Arc::clone(&link));
        if let Some(name) = thread_name {
            collector.register_thread_name(thread_id, name);
        }

        Self {
            collector: Some(collector),
            link,
            chunk: None,
            thread_id,
            sequence: 0,
            filter: CategoryFilter::from_options(&options),
            filter_cache: HashMap::new(),
            sampler: Sampler::new(&options),
            rate: RateWindow::new(options.max_events_per_second),
        }
    }

    #[must_use]
    pub fn thread_id(&self) -> i32 {
        self.thread_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.is_closed() || self.collector.as_ref().map_or(true, |c| c.is_closed())
    }

    /// Record one event. Returns whether it was written.
    pub fn write(&mut self, id: i32, kind: TraceEventKind, flow_id: i64, value: i64) -> bool {
        if self.is_closed() {
            self.detach();
            return false;
        }
        let Some(collector) = self.collector.clone() else {
            return false;
        };

        if !self.passes_filter(id) {
            return false;
        }

        if self.sampler.is_enabled() && !self.sampler.keep(id, kind) {
            collector.record_sampled_out_event();
            return false;
        }

        if self.rate.is_enabled() && !self.rate.admit(time::now()) {
            collector.handle_rate_limit_exceeded();
            return false;
        }

        if self.chunk.as_ref().map_or(true, ActiveChunk::is_full) {
            self.release_chunk(&collector);
            let Some(fresh) = collector.try_rent_chunk() else {
                collector.record_dropped_event(OverflowReason::MaxTotalChunks);
                return false;
            };
            self.chunk = Some(fresh);
        }

        if !collector.try_accept_event() {
            return false;
        }

        let Some(chunk) = self.chunk.as_mut() else {
            return false;
        };
        let event =
            TraceEvent::new(id, self.thread_id, time::now(), kind, flow_id, value, self.sequence);
        self.sequence += 1;
        chunk.try_write(event)
    }

    fn passes_filter(&mut self, id: i32) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        *self.filter_cache.entry(id).or_insert_with(|| filter.allows(id))
    }

    /// Hand the current chunk back to the collector.
    fn release_chunk(&mut self, collector: &SessionCollector) {
        if let Some(chunk) = self.chunk.take() {
            collector.release_chunk(chunk);
        }
    }

    /// Drop every reference into the session. Further writes are no-ops.
    pub fn detach(&mut self) {
        self.link.close();
        if let Some(collector) = self.collector.take() {
            self.release_chunk(&collector);
        }
    }
}

impl Drop for ThreadWriter {
    fn drop(&mut self) {
        if let Some(collector) = self.collector.take() {
            self.release_chunk(&collector);
        }
    }
}

impl std::fmt::Debug for ThreadWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWriter")
            .field("thread_id", &self.thread_id)
            .field("sequence", &self.sequence)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::pool::ChunkPool;
    use crate::metadata::DictionaryMetadataProvider;

    fn writer(options: SessionOptions) -> (Arc<SessionCollector>, ThreadWriter) {
        let pool = Arc::new(ChunkPool::new(options.chunk_capacity));
        let collector = Arc::new(SessionCollector::new(Arc::new(options), pool));
        let writer = ThreadWriter::new(Arc::clone(&collector), 1, Some("main"));
        (collector, writer)
    }

    fn frozen_ids(collector: &SessionCollector) -> Vec<i32> {
        collector.freeze().iter().flat_map(|c| c.iter().map(|e| e.id)).collect()
    }

    #[test]
    fn writes_stamp_thread_and_sequence() {
        let (collector, mut writer) = writer(SessionOptions::default().with_chunk_capacity(2));

        for id in 1..=5 {
            assert!(writer.write(id, TraceEventKind::Instant, 0, 0));
        }
        drop(writer);

        let events: Vec<TraceEvent> =
            collector.freeze().iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.thread_id == 1));
        assert_eq!(events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(collector.stats().chunk_count, 3);
    }

    #[test]
    fn registers_thread_name() {
        let (collector, _writer) = writer(SessionOptions::default());
        assert_eq!(collector.thread_names().get(&1).map(String::as_str), Some("main"));
    }

    #[test]
    fn closed_collector_makes_writes_no_ops() {
        let (collector, mut writer) = writer(SessionOptions::default());
        assert!(writer.write(1, TraceEventKind::Instant, 0, 0));

        collector.close();
        assert!(!writer.write(2, TraceEventKind::Instant, 0, 0));
        assert!(writer.is_closed());
        assert_eq!(collector.stats().event_count, 1);
    }

    #[test]
    fn held_chunk_returns_to_pool_after_close() {
        let options = Arc::new(SessionOptions::default().with_chunk_capacity(4));
        let pool = Arc::new(ChunkPool::new(4));

        let first = Arc::new(SessionCollector::new(Arc::clone(&options), Arc::clone(&pool)));
        let mut writer = ThreadWriter::new(Arc::clone(&first), 1, None);
        assert!(writer.write(1, TraceEventKind::Instant, 0, 0));

        first.close();
        first.close_writers();
        let frozen = first.freeze();
        assert_eq!(frozen.iter().map(|c| c.len()).sum::<usize>(), 1);
        assert_eq!(pool.allocated(), 1);

        // The next write notices the closed session and gives the chunk back.
        assert!(!writer.write(2, TraceEventKind::Instant, 0, 0));

        let second = Arc::new(SessionCollector::new(options, Arc::clone(&pool)));
        let mut writer = ThreadWriter::new(Arc::clone(&second), 1, None);
        assert!(writer.write(3, TraceEventKind::Instant, 0, 0));

        assert_eq!(pool.allocated(), 1);
        assert_eq!(frozen[0][0].id, 1);
    }

    #[test]
    fn closed_link_detaches_writer() {
        let (collector, mut writer) = writer(SessionOptions::default());
        collector.close_writers();

        assert!(!writer.write(1, TraceEventKind::Instant, 0, 0));
        assert_eq!(collector.stats().event_count, 0);
    }

    #[test]
    fn global_sampling_keeps_one_in_n() {
        let (collector, mut writer) = writer(SessionOptions::default().with_global_sampling(3));

        let kept = (0..9).filter(|_| writer.write(1, TraceEventKind::Instant, 0, 0)).count();

        assert_eq!(kept, 3);
        assert_eq!(collector.stats().sampled_out_events, 6);
    }

    #[test]
    fn id_sampling_overrides_global() {
        let (collector, mut writer) =
            writer(SessionOptions::default().with_global_sampling(3).with_id_sampling(5, 1));

        let kept = (0..6).filter(|_| writer.write(5, TraceEventKind::Counter, 0, 1)).count();

        assert_eq!(kept, 6);
        assert_eq!(collector.stats().sampled_out_events, 0);
    }

    #[test]
    fn end_follows_begin_sampling_decision() {
        let (collector, mut writer) = writer(SessionOptions::default().with_global_sampling(2));

        for _ in 0..4 {
            writer.write(1, TraceEventKind::Begin, 0, 0);
            writer.write(1, TraceEventKind::End, 0, 0);
        }
        drop(writer);

        let stats = collector.stats();
        assert_eq!(stats.event_count, 4);
        assert_eq!(stats.sampled_out_events, 4);

        let kinds: Vec<TraceEventKind> =
            collector.freeze().iter().flat_map(|c| c.iter().map(|e| e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                TraceEventKind::Begin,
                TraceEventKind::End,
                TraceEventKind::Begin,
                TraceEventKind::End
            ]
        );
    }

    #[test]
    fn flow_events_are_never_sampled() {
        let (collector, mut writer) = writer(SessionOptions::default().with_global_sampling(10));

        assert!(writer.write(1, TraceEventKind::FlowStart, 7, 0));
        assert!(writer.write(1, TraceEventKind::FlowStep, 7, 0));
        assert!(writer.write(1, TraceEventKind::FlowEnd, 7, 0));
        assert_eq!(collector.stats().sampled_out_events, 0);
    }

    #[test]
    fn rate_window_caps_events_per_second() {
        let (collector, mut writer) =
            writer(SessionOptions::default().with_max_events_per_second(5));

        let kept = (0..10).filter(|_| writer.write(1, TraceEventKind::Instant, 0, 0)).count();
        let stats = collector.stats();

        assert_eq!(kept, 5);
        assert_eq!(stats.rate_limited_events, 5);
        assert_eq!(stats.event_count, 5);
        assert!(stats.overflowed);
    }

    #[test]
    fn chunk_cap_tallies_dropped_events() {
        let (collector, mut writer) =
            writer(SessionOptions::default().with_chunk_capacity(2).with_max_total_chunks(1));

        let kept = (0..5).filter(|_| writer.write(1, TraceEventKind::Instant, 0, 0)).count();
        let stats = collector.stats();

        assert_eq!(kept, 2);
        assert_eq!(stats.dropped_events, 3);
        assert!(stats.overflowed);
    }

    #[test]
    fn category_allow_list() {
        let metadata = DictionaryMetadataProvider::new()
            .with(1, "read", Some("io"))
            .with(2, "parse", Some("cpu"))
            .with(3, "misc", None);
        let options = SessionOptions::default()
            .with_metadata(Arc::new(metadata))
            .with_enabled_categories(["io"]);
        let (collector, mut writer) = writer(options);

        for id in 1..=4 {
            writer.write(id, TraceEventKind::Instant, 0, 0);
        }
        drop(writer);

        assert_eq!(frozen_ids(&collector), vec![1]);
    }

    #[test]
    fn category_deny_list_passes_uncategorized() {
        let metadata = DictionaryMetadataProvider::new()
            .with(1, "read", Some("io"))
            .with(2, "parse", Some("cpu"));
        let options = SessionOptions::default()
            .with_metadata(Arc::new(metadata))
            .with_disabled_categories(["io"]);
        let (collector, mut writer) = writer(options);

        for id in 1..=3 {
            writer.write(id, TraceEventKind::Instant, 0, 0);
        }
        drop(writer);

        assert_eq!(frozen_ids(&collector), vec![2, 3]);
    }
}
