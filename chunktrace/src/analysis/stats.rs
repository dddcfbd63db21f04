//! Per-id duration statistics
//!
//! Lighter than [`process`](super::call_tree::process): no tree, only
//! count/total/min/max per instrumentation id plus the same anomaly counts.

use super::stack::{FrameStack, NestingAnomalies};
use crate::metadata::display_name;
use crate::session::TraceSession;
use chunktrace_common::TraceEventKind;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceIdStats {
    pub id: i32,
    pub name: String,
    pub count: u64,
    pub total_ms: f64,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStats {
    pub duration_ms: f64,
    /// Begin and End events replayed
    pub total_events: u64,
    pub threads_seen: usize,
    pub anomalies: NestingAnomalies,
    /// Sorted by total time, most expensive first
    pub by_total_time: Vec<TraceIdStats>,
}

#[derive(Debug, Clone, Copy)]
struct Durations {
    count: u64,
    total: i64,
    min: i64,
    max: i64,
}

impl Durations {
    fn new(ticks: i64) -> Self {
        Self { count: 1, total: ticks, min: ticks, max: ticks }
    }

    fn add(&mut self, ticks: i64) {
        self.count += 1;
        self.total += ticks;
        self.min = self.min.min(ticks);
        self.max = self.max.max(ticks);
    }
}

/// Summarize scope durations per id.
#[must_use]
pub fn analyze(session: &TraceSession, strict: bool) -> TraceStats {
    let conv = session.converter();
    let metadata = session.options().metadata.as_deref();
    let on_mismatch = session.options().on_mismatched_end.as_ref();

    let mut stacks: HashMap<i32, FrameStack<()>> = HashMap::new();
    let mut per_id: HashMap<i32, Durations> = HashMap::new();
    let mut anomalies = NestingAnomalies::default();
    let mut total_events = 0_u64;

    for event in session.events() {
        if !event.kind.is_scope() {
            continue;
        }
        total_events += 1;
        let stack = stacks.entry(event.thread_id).or_default();

        if event.kind == TraceEventKind::Begin {
            stack.push(event.id, event.timestamp, ());
            continue;
        }

        let Some(closed) = stack.close(event, strict, &mut anomalies, on_mismatch) else {
            continue;
        };

        let ticks = event.timestamp - closed.frame.start;
        if ticks < 0 {
            anomalies.invalid_durations += 1;
            continue;
        }

        per_id
            .entry(closed.frame.id)
            .and_modify(|durations| durations.add(ticks))
            .or_insert_with(|| Durations::new(ticks));
    }

    for stack in stacks.values_mut() {
        stack.drain(&mut anomalies);
    }

    let mut ranked: Vec<(i32, Durations)> = per_id.into_iter().collect();
    ranked.sort_unstable_by_key(|(id, durations)| (std::cmp::Reverse(durations.total), *id));

    #[allow(clippy::cast_precision_loss)]
    let by_total_time = ranked
        .into_iter()
        .map(|(id, d)| {
            let total_ms = conv.to_millis(d.total);
            TraceIdStats {
                id,
                name: display_name(metadata, id),
                count: d.count,
                total_ms,
                average_ms: total_ms / d.count as f64,
                min_ms: conv.to_millis(d.min),
                max_ms: conv.to_millis(d.max),
            }
        })
        .collect();

    TraceStats {
        duration_ms: session.duration_ms(),
        total_events,
        threads_seen: stacks.len(),
        anomalies,
        by_total_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunktrace_common::TraceEvent;

    fn scope(thread: i32, id: i32, start: i64, end: i64) -> [TraceEvent; 2] {
        [
            TraceEvent::new(id, thread, start, TraceEventKind::Begin, 0, 0, 0),
            TraceEvent::new(id, thread, end, TraceEventKind::End, 0, 0, 1),
        ]
    }

    #[test]
    fn per_id_min_max_average() {
        let events: Vec<TraceEvent> = [scope(1, 5, 0, 10), scope(1, 5, 20, 50), scope(2, 6, 0, 5)]
            .into_iter()
            .flatten()
            .collect();
        let stats = analyze(&TraceSession::from_events(events).with_frequency(1_000), false);

        assert_eq!(stats.threads_seen, 2);
        assert_eq!(stats.total_events, 6);
        assert!(stats.anomalies.is_clean());

        let first = &stats.by_total_time[0];
        assert_eq!((first.id, first.count), (5, 2));
        assert!((first.total_ms - 40.0).abs() < 1e-9);
        assert!((first.average_ms - 20.0).abs() < 1e-9);
        assert!((first.min_ms - 10.0).abs() < 1e-9);
        assert!((first.max_ms - 30.0).abs() < 1e-9);
        assert_eq!(stats.by_total_time[1].id, 6);
    }

    #[test]
    fn non_scope_events_are_ignored() {
        let events = vec![
            TraceEvent::new(1, 1, 0, TraceEventKind::Instant, 0, 0, 0),
            TraceEvent::new(1, 1, 1, TraceEventKind::Counter, 0, 9, 1),
        ];
        let stats = analyze(&TraceSession::from_events(events), true);

        assert_eq!(stats.total_events, 0);
        assert!(stats.by_total_time.is_empty());
    }
}
