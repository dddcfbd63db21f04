//! Hotspot analysis for trace sessions.
//!
//! Flattens every closed scope into one row per instrumentation id so the
//! most expensive regions surface regardless of where in the call tree they
//! ran.
//!
//! # Architecture
//!
//! - **`HotspotStats`** - Aggregation as scopes close during stack matching
//! - **`analyze_hotspots()`** - Batch analysis from a `TraceSession`
//!
//! ## Data Flow
//!
//! ```text
//! End event matched
//!     │
//!     ├──► HotspotStats.record()   ← flat id → totals
//!     │
//!     └──► call tree node merge    ← nested view
//! ```
//!
//! # Performance
//!
//! - `record()`: O(1) amortized (HashMap insert/update)
//! - `to_hotspots()`: O(n log n) where n = unique ids (sorting)

// Percentage calculations intentionally convert tick totals to f64
#![allow(clippy::cast_precision_loss)]

use super::call_tree::{process, ProcessOptions};
use crate::metadata::{display_name, MetadataProvider};
use crate::session::TraceSession;
use crate::time::TickConverter;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// HOTSPOT ROW (OUTPUT TYPE)
// =============================================================================

/// One instrumentation id with aggregated timings.
///
/// ```text
/// HOTSPOTS
/// ─────────────────────────────────────────────
///   parse_request   412  38.20ms incl  21.04ms excl  55.1%
///   load_config       1  12.50ms incl  12.50ms excl  32.8%
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotRow {
    pub id: i32,

    /// Display name from session metadata, or the id.
    pub name: String,

    /// Closed scopes with this id.
    pub count: u64,

    pub inclusive_ms: f64,
    pub exclusive_ms: f64,

    /// Share of all exclusive time (0.0 - 100.0).
    pub exclusive_percentage: f64,

    /// Per-thread breakdown: thread id → closed scopes.
    pub threads: BTreeMap<i32, u64>,
}

// =============================================================================
// HOTSPOT STATS (AGGREGATOR)
// =============================================================================

/// Hotspot aggregator fed one closed scope at a time.
///
/// Totals stay in ticks until [`HotspotStats::to_hotspots`].
#[derive(Debug, Default)]
pub struct HotspotStats {
    ids: HashMap<i32, IdStats>,

    /// Exclusive ticks over all ids; denominator for percentages.
    total_exclusive: i64,
}

#[derive(Debug, Default, Clone)]
struct IdStats {
    count: u64,
    inclusive: i64,
    exclusive: i64,
    threads: BTreeMap<i32, u64>,
}

impl HotspotStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one closed scope.
    pub fn record(&mut self, id: i32, thread_id: i32, inclusive: i64, exclusive: i64) {
        let stats = self.ids.entry(id).or_default();
        stats.count += 1;
        stats.inclusive += inclusive;
        stats.exclusive += exclusive;
        *stats.threads.entry(thread_id).or_insert(0) += 1;

        self.total_exclusive += exclusive;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Convert to rows sorted by inclusive time, most expensive first.
    #[must_use]
    pub fn to_hotspots(
        &self,
        conv: TickConverter,
        metadata: Option<&dyn MetadataProvider>,
    ) -> Vec<HotspotRow> {
        let mut rows: Vec<(i64, HotspotRow)> = self
            .ids
            .iter()
            .map(|(&id, stats)| {
                let exclusive_percentage = if self.total_exclusive > 0 {
                    (stats.exclusive as f64 / self.total_exclusive as f64) * 100.0
                } else {
                    0.0
                };

                let row = HotspotRow {
                    id,
                    name: display_name(metadata, id),
                    count: stats.count,
                    inclusive_ms: conv.to_millis(stats.inclusive),
                    exclusive_ms: conv.to_millis(stats.exclusive),
                    exclusive_percentage,
                    threads: stats.threads.clone(),
                };
                (stats.inclusive, row)
            })
            .collect();

        // Sort on ticks; ties by id keep output deterministic
        rows.sort_unstable_by_key(|(inclusive, row)| (std::cmp::Reverse(*inclusive), row.id));
        rows.into_iter().map(|(_, row)| row).collect()
    }
}

/// Rank instrumentation ids of `session` by inclusive time.
///
/// Uses non-strict matching over all threads; for other settings run
/// [`process`] and read `hotspots` from the result.
#[must_use]
pub fn analyze_hotspots(session: &TraceSession) -> Vec<HotspotRow> {
    process(session, &ProcessOptions::default()).hotspots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DictionaryMetadataProvider;
    use crate::time::FREQUENCY;

    fn create_test_stats() -> HotspotStats {
        let mut stats = HotspotStats::new();
        // id 1 twice on two threads, id 2 once
        stats.record(1, 10, 4_000_000, 3_000_000);
        stats.record(1, 11, 2_000_000, 1_000_000);
        stats.record(2, 10, 1_000_000, 1_000_000);
        stats
    }

    #[test]
    fn test_hotspots_sorted_by_inclusive() {
        let hotspots = create_test_stats().to_hotspots(TickConverter::new(FREQUENCY), None);

        assert_eq!(hotspots.len(), 2);
        assert_eq!(hotspots[0].id, 1);
        assert_eq!(hotspots[0].count, 2);
        assert!((hotspots[0].inclusive_ms - 6.0).abs() < 1e-9);
        assert!((hotspots[0].exclusive_ms - 4.0).abs() < 1e-9);
        assert_eq!(hotspots[1].id, 2);
    }

    #[test]
    fn test_hotspots_calculate_percentages() {
        let hotspots = create_test_stats().to_hotspots(TickConverter::new(FREQUENCY), None);

        assert!((hotspots[0].exclusive_percentage - 80.0).abs() < 0.01);
        assert!((hotspots[1].exclusive_percentage - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_hotspots_track_threads() {
        let hotspots = create_test_stats().to_hotspots(TickConverter::new(FREQUENCY), None);

        assert_eq!(hotspots[0].threads.len(), 2);
        assert_eq!(hotspots[0].threads[&10], 1);
        assert_eq!(hotspots[0].threads[&11], 1);
        assert_eq!(hotspots[1].threads.len(), 1);
    }

    #[test]
    fn test_hotspots_resolve_names() {
        let metadata = DictionaryMetadataProvider::new().with(1, "parse", None);
        let hotspots =
            create_test_stats().to_hotspots(TickConverter::new(FREQUENCY), Some(&metadata));

        assert_eq!(hotspots[0].name, "parse");
        assert_eq!(hotspots[1].name, "2");
    }
}
