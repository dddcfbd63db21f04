//! Flow chain extraction
//!
//! Groups flow events by flow id over the time-ordered stream. A chain runs
//! from its first FlowStart to the last FlowEnd after it; chains missing
//! either boundary are skipped. Each link reports the gap to the next link.

use crate::metadata::display_name;
use crate::session::TraceSession;
use chunktrace_common::{TraceEvent, TraceEventKind, NO_FLOW};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStepInfo {
    pub id: i32,
    pub kind: TraceEventKind,
    pub thread_id: i32,
    pub timestamp: i64,
    /// Time until the next link of the chain
    pub duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowAnalysis {
    pub flow_id: i64,
    /// Id of the FlowStart event
    pub id: i32,
    pub name: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub total_duration_ms: f64,
    /// Every link from the start up to (not including) the end
    pub steps: Vec<FlowStepInfo>,
}

impl FlowAnalysis {
    /// Threads the chain touched, in order of first appearance.
    #[must_use]
    pub fn threads(&self) -> Vec<i32> {
        let mut seen = Vec::new();
        for step in &self.steps {
            if !seen.contains(&step.thread_id) {
                seen.push(step.thread_id);
            }
        }
        seen
    }
}

/// Complete flow chains, longest first, truncated to `top` when given.
#[must_use]
pub fn analyze_flows(session: &TraceSession, top: Option<usize>) -> Vec<FlowAnalysis> {
    let conv = session.converter();
    let metadata = session.options().metadata.as_deref();

    let mut chains: HashMap<i64, Vec<&TraceEvent>> = HashMap::new();
    for event in session.events_sorted() {
        if event.flow_id != NO_FLOW && event.kind.is_flow() {
            chains.entry(event.flow_id).or_default().push(event);
        }
    }

    let mut flows: Vec<(i64, FlowAnalysis)> = chains
        .into_iter()
        .filter_map(|(flow_id, links)| {
            let start = links.iter().position(|e| e.kind == TraceEventKind::FlowStart)?;
            let end = links.iter().rposition(|e| e.kind == TraceEventKind::FlowEnd)?;
            if end <= start {
                return None;
            }

            let steps = links[start..=end]
                .windows(2)
                .map(|pair| FlowStepInfo {
                    id: pair[0].id,
                    kind: pair[0].kind,
                    thread_id: pair[0].thread_id,
                    timestamp: pair[0].timestamp,
                    duration_ms: conv.to_millis((pair[1].timestamp - pair[0].timestamp).max(0)),
                })
                .collect();

            let (first, last) = (links[start], links[end]);
            let total = last.timestamp - first.timestamp;
            Some((
                total,
                FlowAnalysis {
                    flow_id,
                    id: first.id,
                    name: display_name(metadata, first.id),
                    start_timestamp: first.timestamp,
                    end_timestamp: last.timestamp,
                    total_duration_ms: conv.to_millis(total),
                    steps,
                },
            ))
        })
        .collect();

    flows.sort_unstable_by_key(|(total, flow)| (std::cmp::Reverse(*total), flow.flow_id));

    let mut flows: Vec<FlowAnalysis> = flows.into_iter().map(|(_, flow)| flow).collect();
    if let Some(top) = top {
        flows.truncate(top);
    }
    flows
}
