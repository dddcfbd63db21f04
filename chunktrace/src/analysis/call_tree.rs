//! Call tree reconstruction
//!
//! Replays each thread's Begin/End stream through a [`FrameStack`] and builds
//! a tree per thread: every closed scope becomes a node under whatever scope
//! is open below it, and same-id siblings merge. A global tree merges all
//! threads, and the same pass feeds [`HotspotStats`].
//!
//! Timings stay in ticks until the final conversion. When a frame closes
//! without producing a node (abandoned by a mismatched End, left open at end
//! of stream, or closed with a negative duration), its completed children are
//! handed to the frame below so their time still shows up in the tree.

use super::hotspot_analyzer::{HotspotRow, HotspotStats};
use super::stack::{Closed, FrameStack, NestingAnomalies};
use crate::metadata::{display_name, MetadataProvider};
use crate::session::TraceSession;
use crate::time::TickConverter;
use chunktrace_common::{TraceEvent, TraceEventKind};
use serde::Serialize;
use std::collections::HashMap;

/// Display name of synthetic roots.
pub const ROOT_NAME: &str = "(root)";

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Drop mismatched Ends instead of searching down the stack
    pub strict: bool,
    /// One tree per thread; false yields a single merged tree as thread 0
    pub group_by_thread: bool,
    /// Only replay events of this thread
    pub thread_id: Option<i32>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self { strict: false, group_by_thread: true, thread_id: None }
    }
}

impl ProcessOptions {
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    #[must_use]
    pub fn merged(mut self) -> Self {
        self.group_by_thread = false;
        self
    }

    #[must_use]
    pub fn only_thread(mut self, thread_id: i32) -> Self {
        self.thread_id = Some(thread_id);
        self
    }
}

// ============================================================================
// Output model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallTreeNode {
    /// Instrumentation id, 0 for synthetic roots
    pub id: i32,
    pub name: String,
    pub count: u64,
    pub inclusive_ms: f64,
    pub exclusive_ms: f64,
    /// Sorted by inclusive time, most expensive first
    pub children: Vec<CallTreeNode>,
}

impl CallTreeNode {
    /// First node with `id` in depth-first order, including `self`.
    #[must_use]
    pub fn find(&self, id: i32) -> Option<&CallTreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    #[must_use]
    pub fn child(&self, id: i32) -> Option<&CallTreeNode> {
        self.children.iter().find(|child| child.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadTrace {
    pub thread_id: i32,
    pub thread_name: Option<String>,
    pub root: CallTreeNode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedTrace {
    pub duration_ms: f64,
    /// Begin and End events replayed
    pub total_events: u64,
    pub threads_seen: usize,
    pub anomalies: NestingAnomalies,

    pub dropped_events: u64,
    pub dropped_chunks: u64,
    pub sampled_out_events: u64,
    pub rate_limited_events: u64,
    pub was_overflow: bool,

    /// Ascending by thread id
    pub threads: Vec<ThreadTrace>,
    pub global_root: CallTreeNode,
    /// Sorted by inclusive time, most expensive first
    pub hotspots: Vec<HotspotRow>,
}

impl ProcessedTrace {
    #[must_use]
    pub fn thread(&self, thread_id: i32) -> Option<&ThreadTrace> {
        self.threads.iter().find(|thread| thread.thread_id == thread_id)
    }
}

// ============================================================================
// Tick-domain tree
// ============================================================================

#[derive(Debug, Default)]
struct TickNode {
    id: i32,
    count: u64,
    inclusive: i64,
    exclusive: i64,
    children: Vec<TickNode>,
}

impl TickNode {
    fn absorb(&mut self, other: TickNode) {
        self.count += other.count;
        self.inclusive += other.inclusive;
        self.exclusive += other.exclusive;
        for child in other.children {
            merge_child(&mut self.children, child);
        }
    }

    fn freeze(&self, conv: TickConverter, metadata: Option<&dyn MetadataProvider>) -> CallTreeNode {
        let mut order: Vec<&TickNode> = self.children.iter().collect();
        order.sort_unstable_by_key(|child| (std::cmp::Reverse(child.inclusive), child.id));

        CallTreeNode {
            id: self.id,
            name: display_name(metadata, self.id),
            count: self.count,
            inclusive_ms: conv.to_millis(self.inclusive),
            exclusive_ms: conv.to_millis(self.exclusive),
            children: order.into_iter().map(|child| child.freeze(conv, metadata)).collect(),
        }
    }
}

fn merge_child(children: &mut Vec<TickNode>, node: TickNode) {
    match children.iter_mut().find(|child| child.id == node.id) {
        Some(existing) => existing.absorb(node),
        None => children.push(node),
    }
}

/// Root over `children`; its inclusive time is the sum of theirs.
fn root_of(children: Vec<TickNode>) -> TickNode {
    let inclusive = children.iter().map(|child| child.inclusive).sum();
    TickNode { id: 0, count: 0, inclusive, exclusive: 0, children }
}

fn freeze_root(
    root: &TickNode,
    conv: TickConverter,
    metadata: Option<&dyn MetadataProvider>,
) -> CallTreeNode {
    CallTreeNode { name: ROOT_NAME.to_string(), ..root.freeze(conv, metadata) }
}

// ============================================================================
// Replay
// ============================================================================

/// Completed children collected while a frame is open.
#[derive(Debug, Default)]
struct Pending {
    children: Vec<TickNode>,
    /// Σ inclusive ticks of `children`
    child_ticks: i64,
}

impl Pending {
    fn adopt(&mut self, other: Pending) {
        self.child_ticks += other.child_ticks;
        for child in other.children {
            merge_child(&mut self.children, child);
        }
    }
}

#[derive(Debug, Default)]
struct ThreadState {
    stack: FrameStack<Pending>,
    roots: Vec<TickNode>,
}

impl ThreadState {
    /// Give completed nodes to the innermost open frame, or the root.
    fn hand_down(&mut self, pending: Pending) {
        match self.stack.top_mut() {
            Some(top) => top.data.adopt(pending),
            None => {
                for child in pending.children {
                    merge_child(&mut self.roots, child);
                }
            }
        }
    }

    fn attach(&mut self, node: TickNode) {
        let inclusive = node.inclusive;
        let mut pending = Pending::default();
        pending.children.push(node);
        pending.child_ticks = inclusive;
        self.hand_down(pending);
    }
}

struct Replay<'a> {
    strict: bool,
    session: &'a TraceSession,
    threads: HashMap<i32, ThreadState>,
    anomalies: NestingAnomalies,
    hotspots: HotspotStats,
    total_events: u64,
}

impl<'a> Replay<'a> {
    fn new(session: &'a TraceSession, strict: bool) -> Self {
        Self {
            strict,
            session,
            threads: HashMap::new(),
            anomalies: NestingAnomalies::default(),
            hotspots: HotspotStats::new(),
            total_events: 0,
        }
    }

    fn apply(&mut self, event: &TraceEvent) {
        let thread = self.threads.entry(event.thread_id).or_default();

        match event.kind {
            TraceEventKind::Begin => {
                self.total_events += 1;
                thread.stack.push(event.id, event.timestamp, Pending::default());
            }
            TraceEventKind::End => {
                self.total_events += 1;
                let on_mismatch = self.session.options().on_mismatched_end.as_ref();
                let Some(Closed { mut frame, abandoned }) =
                    thread.stack.close(event, self.strict, &mut self.anomalies, on_mismatch)
                else {
                    return;
                };

                for lost in abandoned {
                    frame.data.adopt(lost.data);
                }

                let inclusive = event.timestamp - frame.start;
                if inclusive < 0 {
                    self.anomalies.invalid_durations += 1;
                    thread.hand_down(frame.data);
                    return;
                }

                let exclusive = (inclusive - frame.data.child_ticks).max(0);
                self.hotspots.record(frame.id, event.thread_id, inclusive, exclusive);
                thread.attach(TickNode {
                    id: frame.id,
                    count: 1,
                    inclusive,
                    exclusive,
                    children: frame.data.children,
                });
            }
            _ => {}
        }
    }

    /// Close out every thread; returns per-thread roots ascending by thread id.
    fn finish(&mut self) -> Vec<(i32, TickNode)> {
        let mut roots: Vec<(i32, TickNode)> = self
            .threads
            .iter_mut()
            .map(|(&thread_id, state)| {
                for frame in state.stack.drain(&mut self.anomalies) {
                    for child in frame.data.children {
                        merge_child(&mut state.roots, child);
                    }
                }
                (thread_id, root_of(std::mem::take(&mut state.roots)))
            })
            .collect();
        roots.sort_unstable_by_key(|(thread_id, _)| *thread_id);
        roots
    }
}

/// Rebuild call trees, anomaly counts and hotspots for `session`.
#[must_use]
pub fn process(session: &TraceSession, options: &ProcessOptions) -> ProcessedTrace {
    let conv = session.converter();
    let metadata = session.options().metadata.as_deref();

    let mut replay = Replay::new(session, options.strict);
    for event in session.events() {
        if options.thread_id.is_some_and(|only| only != event.thread_id) {
            continue;
        }
        replay.apply(event);
    }

    let roots = replay.finish();
    let threads_seen = roots.len();

    let mut threads: Vec<ThreadTrace> = roots
        .iter()
        .map(|(thread_id, root)| ThreadTrace {
            thread_id: *thread_id,
            thread_name: session.thread_name(*thread_id).map(str::to_string),
            root: freeze_root(root, conv, metadata),
        })
        .collect();

    let mut merged = Vec::new();
    for (_, root) in roots {
        for child in root.children {
            merge_child(&mut merged, child);
        }
    }
    let global_root = freeze_root(&root_of(merged), conv, metadata);

    if !options.group_by_thread {
        threads = vec![ThreadTrace { thread_id: 0, thread_name: None, root: global_root.clone() }];
    }

    ProcessedTrace {
        duration_ms: session.duration_ms(),
        total_events: replay.total_events,
        threads_seen,
        anomalies: replay.anomalies,
        dropped_events: session.dropped_events(),
        dropped_chunks: session.dropped_chunks(),
        sampled_out_events: session.sampled_out_events(),
        rate_limited_events: session.rate_limited_events(),
        was_overflow: session.was_overflow(),
        threads,
        global_root,
        hotspots: replay.hotspots.to_hotspots(conv, metadata),
    }
}
