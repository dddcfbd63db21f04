//! # Shared Event Model (capture ↔ analysis)
//!
//! Defines the fixed-size event record written by capture threads and read back
//! by the frozen session and every analysis pass. The record uses `#[repr(C)]`
//! so a chunk of events is a flat, predictable block of memory.
//!
//! ## Key Types
//!
//! - [`TraceEvent`] - One occurrence (scope begin/end, flow link, instant, counter)
//! - [`TraceEventKind`] - Discriminates the occurrence
//!
//! ## Ordering
//!
//! Capture establishes no global total order. Consumers that need one order by
//! `(timestamp, phase rank, thread id, sequence)`; see [`TraceEventKind::phase_rank`].

#![no_std]

// ============================================================================
// Constants
// ============================================================================

/// Flow id meaning "not part of a flow".
///
/// Never appears on `FlowStart`, `FlowStep` or `FlowEnd` events.
pub const NO_FLOW: i64 = 0;

/// Default number of events held by one chunk.
pub const DEFAULT_CHUNK_CAPACITY: usize = 16_384;

/// Smallest chunk capacity a live session will use.
///
/// Smaller capacities rotate chunks so often that the ledger mutex shows up
/// in the measurement.
pub const MIN_CHUNK_CAPACITY: usize = 1_024;

// ============================================================================
// Event Kind
// ============================================================================

/// What a [`TraceEvent`] records.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TraceEventKind {
    /// Opens a scope on the emitting thread
    #[default]
    Begin = 1,
    /// Closes the innermost scope with the same id
    End = 2,
    /// First link of a flow chain
    FlowStart = 3,
    /// Intermediate link of a flow chain, possibly on another thread
    FlowStep = 4,
    /// Last link of a flow chain
    FlowEnd = 5,
    /// Unpaired point in time
    Instant = 6,
    /// Unpaired sample carrying `value`
    Counter = 7,
}

impl TraceEventKind {
    /// Tie-break rank for events that share a timestamp.
    ///
    /// Begins sort first and Ends last so that zero-length scopes on different
    /// threads still open before they close.
    #[must_use]
    pub const fn phase_rank(self) -> u8 {
        match self {
            Self::Begin => 0,
            Self::FlowStart => 1,
            Self::FlowStep => 2,
            Self::FlowEnd => 3,
            Self::Instant => 4,
            Self::Counter => 5,
            Self::End => 6,
        }
    }

    /// Returns true for `FlowStart`, `FlowStep` and `FlowEnd`.
    #[must_use]
    pub const fn is_flow(self) -> bool {
        matches!(self, Self::FlowStart | Self::FlowStep | Self::FlowEnd)
    }

    /// Returns true for `Begin` and `End`.
    #[must_use]
    pub const fn is_scope(self) -> bool {
        matches!(self, Self::Begin | Self::End)
    }
}

// ============================================================================
// Event Record
// ============================================================================

/// One captured occurrence.
///
/// Written once into a chunk slot by the owning thread writer and never
/// modified afterwards.
///
/// **Memory Layout**: `#[repr(C)]`, 48 bytes, 8-byte aligned
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceEvent {
    /// Monotonic timestamp in ticks of the session clock
    pub timestamp: i64,

    /// Flow chain this event belongs to ([`NO_FLOW`] for non-flow events)
    pub flow_id: i64,

    /// Payload for `Counter` events, 0 otherwise
    pub value: i64,

    /// Per-writer sequence number, strictly increasing on one thread
    ///
    /// Breaks timestamp ties between events of the same thread.
    pub sequence: i64,

    /// Caller-supplied instrumentation id (non-zero)
    pub id: i32,

    /// Small integer id of the emitting thread
    pub thread_id: i32,

    /// What happened
    pub kind: TraceEventKind,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    #[cfg_attr(feature = "serde", serde(skip))]
    pub _padding: [u8; 7],
}

impl TraceEvent {
    /// Builds an event record.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        id: i32,
        thread_id: i32,
        timestamp: i64,
        kind: TraceEventKind,
        flow_id: i64,
        value: i64,
        sequence: i64,
    ) -> Self {
        Self { timestamp, flow_id, value, sequence, id, thread_id, kind, _padding: [0; 7] }
    }

    /// Sort key used by time-ordered iteration.
    #[must_use]
    pub const fn order_key(&self) -> (i64, u8, i32, i64) {
        (self.timestamp, self.kind.phase_rank(), self.thread_id, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_is_fixed_size() {
        assert_eq!(core::mem::size_of::<TraceEvent>(), 48);
        assert_eq!(core::mem::align_of::<TraceEvent>(), 8);
    }

    #[test]
    fn begin_sorts_before_end_at_equal_timestamp() {
        let begin = TraceEvent::new(1, 2, 100, TraceEventKind::Begin, NO_FLOW, 0, 5);
        let end = TraceEvent::new(1, 1, 100, TraceEventKind::End, NO_FLOW, 0, 0);
        assert!(begin.order_key() < end.order_key());
    }

    #[test]
    fn flow_kinds_are_classified() {
        assert!(TraceEventKind::FlowStep.is_flow());
        assert!(!TraceEventKind::Counter.is_flow());
        assert!(TraceEventKind::End.is_scope());
    }
}
