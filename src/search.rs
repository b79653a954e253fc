//! Exclusion-aware shortest path search over the object graph.
//!
//! Breadth-first search seeded from every deduplicated GC root toward
//! the target, restricted to strong reference edges. Two FIFO frontiers
//! are kept: edges matching an exclusion rule land on the fallback
//! frontier, which is drained only once the normal frontier is
//! exhausted, so a leak reachable through any clean path is always
//! explained by one, and a leak reachable only through known-benign
//! patterns is still reported but flagged.
//!
//! Iterative throughout: the path is kept as a parent-indexed arena,
//! never as recursion state, so deep graphs cannot overflow the stack.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::exclusions::{ExcludedRefs, Exclusion};
use crate::roots::RootRegistry;
use crate::snapshot::{NodeData, NodeIndex, Snapshot};
use crate::timeout::IterationTimeout;

pub const JAVA_LOCAL_REFERENCE: &str = "<Java Local>";

/// Strong reference edge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceKind {
    InstanceField,
    StaticField,
    ArrayEntry,
    Local,
}

/// A labeled edge: how the holder refers to the referent.
#[derive(Debug, Clone)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub name: Arc<str>,
}

/// One hop of the found path, root first. The seed step carries no
/// incoming reference.
#[derive(Debug, Clone)]
pub struct PathStep {
    pub node: NodeIndex,
    pub reference: Option<Reference>,
    pub exclusion: Option<String>,
}

/// Shortest path from some GC root to the target.
#[derive(Debug)]
pub struct FoundPath {
    pub steps: Vec<PathStep>,
    /// True iff every edge on the path matched an exclusion rule.
    pub excluding: bool,
}

/// Search instrumentation, exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    /// Nodes expanded; each vertex is expanded at most once globally.
    pub visited: usize,
    /// Continuations placed on either frontier.
    pub enqueued: usize,
}

#[derive(Debug)]
pub struct SearchOutcome {
    pub path: Option<FoundPath>,
    pub stats: SearchStats,
}

struct PathNode {
    node: NodeIndex,
    parent: Option<u32>,
    reference: Option<Reference>,
    exclusion: Option<Exclusion>,
    /// All-edges-excluded fold; `None` until the path has any
    /// classifiable hop.
    excluding: Option<bool>,
}

/// Single-use BFS state over one snapshot.
pub struct ShortestPathFinder<'a> {
    snapshot: &'a Snapshot,
    registry: &'a RootRegistry,
    excluded: &'a ExcludedRefs,
    budget: Duration,

    arena: Vec<PathNode>,
    normal: VecDeque<u32>,
    fallback: VecDeque<u32>,
    visited: Vec<bool>,
    enqueued_normal: Vec<bool>,
    enqueued_fallback: Vec<bool>,
    can_ignore_strings: bool,
    stats: SearchStats,
}

impl<'a> ShortestPathFinder<'a> {
    pub fn new(
        snapshot: &'a Snapshot,
        registry: &'a RootRegistry,
        excluded: &'a ExcludedRefs,
        budget: Duration,
    ) -> Self {
        Self {
            snapshot,
            registry,
            excluded,
            budget,
            arena: Vec::new(),
            normal: VecDeque::new(),
            fallback: VecDeque::new(),
            visited: Vec::new(),
            enqueued_normal: Vec::new(),
            enqueued_fallback: Vec::new(),
            can_ignore_strings: true,
            stats: SearchStats::default(),
        }
    }

    /// Run the search toward `target`. Returns the first path found in
    /// BFS order (shortest hop count, ties broken by root-enumeration
    /// order), or no path when the target is unreachable over strong
    /// edges.
    pub fn find_path(mut self, target: NodeIndex) -> Result<SearchOutcome> {
        let node_count = self.snapshot.node_count();
        self.visited.try_reserve_exact(node_count)?;
        self.visited.resize(node_count, false);
        self.enqueued_normal.try_reserve_exact(node_count)?;
        self.enqueued_normal.resize(node_count, false);
        self.enqueued_fallback.try_reserve_exact(node_count)?;
        self.enqueued_fallback.resize(node_count, false);

        self.can_ignore_strings = !self.snapshot.is_string(target);

        for root in self.registry.seeds() {
            let exclusion = self.seed_exclusion(root.node).cloned();
            self.enqueue_seed(root.node, exclusion);
        }
        debug!(
            seeds = self.arena.len(),
            target,
            "starting shortest-path search"
        );

        let mut timeout = IterationTimeout::new(self.budget, "shortest-path search");

        while let Some(current) = self
            .normal
            .pop_front()
            .or_else(|| self.fallback.pop_front())
        {
            timeout.check()?;

            let node = self.arena[current as usize].node;
            if node == target {
                let excluding = self.arena[current as usize].excluding.unwrap_or(false);
                let steps = self.materialize(current);
                info!(
                    hops = steps.len().saturating_sub(1),
                    excluding,
                    visited = self.stats.visited,
                    "reference path found"
                );
                return Ok(SearchOutcome {
                    path: Some(FoundPath { steps, excluding }),
                    stats: self.stats,
                });
            }

            if self.visited[node as usize] {
                continue;
            }
            self.visited[node as usize] = true;
            self.stats.visited += 1;

            match self.snapshot.node(node).data {
                NodeData::Class { .. } => self.expand_class(current, node),
                NodeData::Instance { .. } => {
                    if self.snapshot.extends_thread(node) {
                        self.expand_thread(current, node);
                    }
                    self.expand_instance(current, node);
                }
                NodeData::ObjectArray { .. } => self.expand_array(current, node),
                NodeData::PrimitiveArray { .. } => {}
            }
        }

        info!(visited = self.stats.visited, "target not reachable from gc roots");
        Ok(SearchOutcome {
            path: None,
            stats: self.stats,
        })
    }

    /// Class-name rules with `gc_root_only` apply when the object is
    /// itself serving as a GC root.
    fn seed_exclusion(&self, node: NodeIndex) -> Option<&Exclusion> {
        let class = self.snapshot.class_of(node)?;
        let chain: Vec<&str> = self
            .snapshot
            .class_chain(class.id)
            .map(|c| &*c.name)
            .collect();
        self.excluded.class(chain, true)
    }

    /// Class-name rules that apply to any reference into the referent.
    fn referent_exclusion(&self, referent: NodeIndex) -> Option<&Exclusion> {
        let class = self.snapshot.class_of(referent)?;
        let chain: Vec<&str> = self
            .snapshot
            .class_chain(class.id)
            .map(|c| &*c.name)
            .collect();
        self.excluded.class(chain, false)
    }

    fn expand_class(&mut self, current: u32, node: NodeIndex) {
        let class = match self.snapshot.class_of(node) {
            Some(class) => class,
            None => return,
        };
        let class_name = Arc::clone(&class.name);
        let edges: Vec<(Arc<str>, u64)> = class
            .static_fields
            .iter()
            .filter(|field| {
                field.ty == crate::hprof::BasicType::Object
                    && field.value != 0
                    && &*field.name != "$staticOverhead"
            })
            .map(|field| (Arc::clone(&field.name), field.value))
            .collect();

        for (name, child_id) in edges {
            let exclusion = self
                .excluded
                .static_field(&class_name, &name)
                .cloned()
                .or_else(|| {
                    self.snapshot
                        .index_of(child_id)
                        .and_then(|child| self.referent_exclusion(child))
                        .cloned()
                });
            self.enqueue(
                current,
                child_id,
                Reference {
                    kind: ReferenceKind::StaticField,
                    name,
                },
                exclusion,
            );
        }
    }

    fn expand_instance(&mut self, current: u32, node: NodeIndex) {
        let class_id = match self.snapshot.node(node).data {
            NodeData::Instance { class_id, .. } => class_id,
            _ => return,
        };
        let chain: Vec<Arc<str>> = self
            .snapshot
            .class_chain(class_id)
            .map(|c| Arc::clone(&c.name))
            .collect();

        for field in self.snapshot.instance_fields_of(node) {
            if field.ty != crate::hprof::BasicType::Object || field.bits == 0 {
                continue;
            }
            let exclusion = self
                .excluded
                .instance_field(chain.iter().map(|n| &**n), &field.name)
                .cloned()
                .or_else(|| {
                    self.snapshot
                        .index_of(field.bits)
                        .and_then(|child| self.referent_exclusion(child))
                        .cloned()
                });
            self.enqueue(
                current,
                field.bits,
                Reference {
                    kind: ReferenceKind::InstanceField,
                    name: field.name,
                },
                exclusion,
            );
        }
    }

    fn expand_thread(&mut self, current: u32, node: NodeIndex) {
        let thread_exclusion = self
            .snapshot
            .thread_name(node)
            .and_then(|name| self.excluded.thread(&name).cloned());
        let locals: Vec<NodeIndex> = self.registry.locals_of(node).to_vec();

        for local in locals {
            let exclusion = thread_exclusion
                .clone()
                .or_else(|| self.referent_exclusion(local).cloned());
            let child_id = self.snapshot.node(local).id;
            self.enqueue(
                current,
                child_id,
                Reference {
                    kind: ReferenceKind::Local,
                    name: Arc::from(JAVA_LOCAL_REFERENCE),
                },
                exclusion,
            );
        }
    }

    fn expand_array(&mut self, current: u32, node: NodeIndex) {
        for (i, child_id) in self.snapshot.array_elements(node).into_iter().enumerate() {
            if child_id == 0 {
                continue;
            }
            let exclusion = self
                .snapshot
                .index_of(child_id)
                .and_then(|child| self.referent_exclusion(child))
                .cloned();
            self.enqueue(
                current,
                child_id,
                Reference {
                    kind: ReferenceKind::ArrayEntry,
                    name: Arc::from(format!("[{}]", i)),
                },
                exclusion,
            );
        }
    }

    fn enqueue_seed(&mut self, node: NodeIndex, exclusion: Option<Exclusion>) {
        if exclusion.as_ref().map(|e| e.always).unwrap_or(false) {
            return;
        }
        if self.enqueued_normal[node as usize] {
            return;
        }
        let excluded_seed = exclusion.is_some();
        if excluded_seed && self.enqueued_fallback[node as usize] {
            return;
        }
        let excluding = if excluded_seed { Some(true) } else { None };
        self.push(
            PathNode {
                node,
                parent: None,
                reference: None,
                exclusion,
                excluding,
            },
            excluded_seed,
        );
    }

    fn enqueue(
        &mut self,
        parent: u32,
        child_id: u64,
        reference: Reference,
        exclusion: Option<Exclusion>,
    ) {
        if child_id == 0 {
            return;
        }
        let child = match self.snapshot.index_of(child_id) {
            Some(child) => child,
            None => return, // referent not present in the dump
        };
        // `always` rules suppress the continuation outright.
        if exclusion.as_ref().map(|e| e.always).unwrap_or(false) {
            return;
        }
        if self.snapshot.is_primitive_wrapper(child) || self.snapshot.is_primitive_array(child) {
            return;
        }
        if self.can_ignore_strings && self.snapshot.is_string(child) {
            return;
        }
        // Already awaiting a normal visit: nothing better can come.
        if self.enqueued_normal[child as usize] {
            return;
        }
        let excluded_edge = exclusion.is_some();
        if excluded_edge && self.enqueued_fallback[child as usize] {
            return;
        }
        if self.visited[child as usize] {
            return;
        }

        let excluding = Some(match self.arena[parent as usize].excluding {
            None => excluded_edge,
            Some(all_excluded) => all_excluded && excluded_edge,
        });
        self.push(
            PathNode {
                node: child,
                parent: Some(parent),
                reference: Some(reference),
                exclusion,
                excluding,
            },
            excluded_edge,
        );
    }

    fn push(&mut self, path_node: PathNode, excluded: bool) {
        let node = path_node.node;
        let index = self.arena.len() as u32;
        self.arena.push(path_node);
        self.stats.enqueued += 1;
        if excluded {
            self.enqueued_fallback[node as usize] = true;
            self.fallback.push_back(index);
        } else {
            self.enqueued_normal[node as usize] = true;
            self.normal.push_back(index);
        }
    }

    /// Walk the parent map from the found node back to its seed and
    /// emit the steps root first.
    fn materialize(&self, found: u32) -> Vec<PathStep> {
        let mut steps = Vec::new();
        let mut cursor = Some(found);
        while let Some(index) = cursor {
            let entry = &self.arena[index as usize];
            steps.push(PathStep {
                node: entry.node,
                reference: entry.reference.clone(),
                exclusion: entry.exclusion.as_ref().map(|e| e.reason.clone()),
            });
            cursor = entry.parent;
        }
        steps.reverse();
        steps
    }
}
