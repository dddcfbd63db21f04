//! Begin/End matching shared by every stack-based pass
//!
//! Capture assumes well-formed nesting but never enforces it, so matching has
//! to survive three kinds of damage:
//!
//! - an End on an empty stack (unmatched End)
//! - an End whose id is not the innermost open scope (mismatched End); the
//!   non-strict matcher looks further down and abandons the frames above a
//!   match, strict matching drops the End
//! - frames still open when the stream ends (unmatched Begin)

use crate::config::{MismatchCallback, MismatchedEndInfo};
use chunktrace_common::TraceEvent;
use serde::Serialize;

/// Nesting damage found while matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NestingAnomalies {
    pub unmatched_begin: u64,
    pub unmatched_end: u64,
    pub mismatched_end: u64,
    /// Matched pairs whose End is earlier than their Begin
    pub invalid_durations: u64,
}

impl NestingAnomalies {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug)]
pub(crate) struct Frame<T> {
    pub(crate) id: i32,
    pub(crate) start: i64,
    pub(crate) data: T,
}

/// A frame closed by an End, plus any frames it abandoned on the way down.
#[derive(Debug)]
pub(crate) struct Closed<T> {
    pub(crate) frame: Frame<T>,
    /// Frames above the match, bottom first; already counted as unmatched Begins
    pub(crate) abandoned: Vec<Frame<T>>,
}

/// Open frames of one thread.
#[derive(Debug)]
pub(crate) struct FrameStack<T> {
    frames: Vec<Frame<T>>,
}

impl<T> Default for FrameStack<T> {
    fn default() -> Self {
        Self { frames: Vec::new() }
    }
}

impl<T> FrameStack<T> {
    pub(crate) fn push(&mut self, id: i32, start: i64, data: T) {
        self.frames.push(Frame { id, start, data });
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut Frame<T>> {
        self.frames.last_mut()
    }

    /// Match an End against the open frames.
    ///
    /// `None` when the End closes nothing; the anomaly is already tallied.
    pub(crate) fn close(
        &mut self,
        end: &TraceEvent,
        strict: bool,
        anomalies: &mut NestingAnomalies,
        on_mismatch: Option<&MismatchCallback>,
    ) -> Option<Closed<T>> {
        let Some(top) = self.frames.last() else {
            anomalies.unmatched_end += 1;
            return None;
        };

        if top.id == end.id {
            let frame = self.frames.pop()?;
            return Some(Closed { frame, abandoned: Vec::new() });
        }

        anomalies.mismatched_end += 1;
        if let Some(callback) = on_mismatch {
            callback(MismatchedEndInfo {
                thread_id: end.thread_id,
                expected_id: top.id,
                actual_id: end.id,
                timestamp: end.timestamp,
            });
        }
        if strict {
            return None;
        }

        let Some(index) = self.frames.iter().rposition(|frame| frame.id == end.id) else {
            anomalies.unmatched_end += 1;
            return None;
        };

        let abandoned = self.frames.split_off(index + 1);
        anomalies.unmatched_begin += abandoned.len() as u64;
        let frame = self.frames.pop()?;
        Some(Closed { frame, abandoned })
    }

    /// Remove every open frame at end of stream, counting each as unmatched.
    pub(crate) fn drain(&mut self, anomalies: &mut NestingAnomalies) -> Vec<Frame<T>> {
        anomalies.unmatched_begin += self.frames.len() as u64;
        std::mem::take(&mut self.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunktrace_common::TraceEventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn end(id: i32, timestamp: i64) -> TraceEvent {
        TraceEvent::new(id, 1, timestamp, TraceEventKind::End, 0, 0, 0)
    }

    /// B1@10 B2@20 E1@30 E2@40 E3@50
    fn run(strict: bool, on_mismatch: Option<&MismatchCallback>) -> NestingAnomalies {
        let mut stack = FrameStack::default();
        let mut anomalies = NestingAnomalies::default();

        stack.push(1, 10, ());
        stack.push(2, 20, ());
        for (id, ts) in [(1, 30), (2, 40), (3, 50)] {
            stack.close(&end(id, ts), strict, &mut anomalies, on_mismatch);
        }
        stack.drain(&mut anomalies);
        anomalies
    }

    #[test]
    fn non_strict_searches_down() {
        let anomalies = run(false, None);
        assert_eq!(anomalies.mismatched_end, 1);
        assert_eq!(anomalies.unmatched_begin, 1);
        assert_eq!(anomalies.unmatched_end, 2);
    }

    #[test]
    fn strict_discards_mismatched_end() {
        let anomalies = run(true, None);
        assert_eq!(anomalies.mismatched_end, 2);
        assert_eq!(anomalies.unmatched_begin, 1);
        assert_eq!(anomalies.unmatched_end, 0);
    }

    #[test]
    fn mismatch_callback_sees_expected_and_actual() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let callback: MismatchCallback = Arc::new(move |info: MismatchedEndInfo| {
            if seen.fetch_add(1, Ordering::Relaxed) == 0 {
                assert_eq!((info.expected_id, info.actual_id, info.timestamp), (2, 1, 30));
            }
        });

        run(false, Some(&callback));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn abandoned_frames_are_returned_bottom_first() {
        let mut stack = FrameStack::default();
        let mut anomalies = NestingAnomalies::default();
        stack.push(1, 0, 'a');
        stack.push(2, 1, 'b');
        stack.push(3, 2, 'c');

        let closed = stack.close(&end(1, 5), false, &mut anomalies, None).unwrap();
        assert_eq!(closed.frame.data, 'a');
        assert_eq!(closed.abandoned.iter().map(|f| f.data).collect::<Vec<_>>(), vec!['b', 'c']);
        assert_eq!(anomalies.unmatched_begin, 2);
    }
}
