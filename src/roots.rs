//! GC root registry.
//!
//! Consumes the raw root list from the loader and produces the BFS
//! seed set: one canonical entry per referenced object (first seen
//! wins), with root kinds that do not anchor liveness dropped and
//! stack-local roots attributed to their owning thread object.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::snapshot::{NodeIndex, RootKind, Snapshot};

/// Canonical GC root entry after deduplication.
#[derive(Debug, Clone, Copy)]
pub struct GcRoot {
    pub node: NodeIndex,
    pub kind: RootKind,
}

impl RootKind {
    /// Whether this root kind anchors liveness at all. Mirrors the
    /// runtime's semantics: interned strings, debugger handles,
    /// finalizer-queue entries and unreachable markers do not keep an
    /// object alive on their own.
    pub fn anchors_liveness(&self) -> bool {
        !matches!(
            self,
            RootKind::InternedString
                | RootKind::Debugger
                | RootKind::Finalizing
                | RootKind::Unknown
                | RootKind::Unreachable
        )
    }
}

/// Deduplicated seed set plus the per-thread stack locals.
pub struct RootRegistry {
    seeds: Vec<GcRoot>,
    locals: HashMap<NodeIndex, Vec<NodeIndex>>,
}

impl RootRegistry {
    /// Build the registry from a snapshot's raw root list.
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut seeds = Vec::new();
        let mut locals: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut dangling = 0usize;

        let mut seed = |node: NodeIndex, kind: RootKind, seeds: &mut Vec<GcRoot>| {
            if seen.insert(node) {
                seeds.push(GcRoot { node, kind });
            }
        };

        for root in snapshot.roots() {
            if !root.kind.anchors_liveness() {
                continue;
            }
            let node = match snapshot.index_of(root.object_id) {
                Some(node) => node,
                None => {
                    dangling += 1;
                    continue;
                }
            };
            match root.kind {
                RootKind::JavaFrame | RootKind::JniLocal => {
                    // A local variable on some thread's stack: the hop is
                    // materialized as a Local edge out of the thread object
                    // during the search, so the thread is the seed here.
                    let thread = root
                        .thread_serial
                        .and_then(|serial| snapshot.thread_object_by_serial(serial));
                    match thread {
                        Some(thread) => {
                            locals.entry(thread).or_default().push(node);
                            seed(thread, RootKind::ThreadObject, &mut seeds);
                        }
                        None => {
                            warn!(object_id = root.object_id, "stack local without thread object");
                            seed(node, root.kind, &mut seeds);
                        }
                    }
                }
                _ => seed(node, root.kind, &mut seeds),
            }
        }

        debug!(
            raw = snapshot.roots().len(),
            seeds = seeds.len(),
            threads_with_locals = locals.len(),
            dangling,
            "gc roots deduplicated"
        );
        Self { seeds, locals }
    }

    /// Canonical seeds in root-enumeration order.
    pub fn seeds(&self) -> &[GcRoot] {
        &self.seeds
    }

    /// Stack locals attributed to the given thread object.
    pub fn locals_of(&self, thread: NodeIndex) -> &[NodeIndex] {
        self.locals
            .get(&thread)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
