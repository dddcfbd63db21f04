//! Analysis of frozen trace sessions
//!
//! Pure functions over a [`TraceSession`](crate::TraceSession); nothing here
//! touches capture state, so analysis can run on any thread after `stop()`.
//!
//! - `call_tree`: per-thread and merged call trees, anomalies, hotspots
//! - `hotspot_analyzer`: flat id ranking by inclusive time
//! - `stats`: per-id count/total/min/max without building a tree
//! - `flows`: cross-thread flow chains and their step gaps
//! - `stack`: Begin/End matching shared by the passes above

pub mod call_tree;
pub mod flows;
pub mod hotspot_analyzer;
mod stack;
pub mod stats;

pub use call_tree::{process, CallTreeNode, ProcessOptions, ProcessedTrace, ThreadTrace};
pub use flows::{analyze_flows, FlowAnalysis, FlowStepInfo};
pub use hotspot_analyzer::{analyze_hotspots, HotspotRow, HotspotStats};
pub use stack::NestingAnomalies;
pub use stats::{analyze, TraceIdStats, TraceStats};
