//! Externally visible projection of a found path.
//!
//! Converts the raw parent-map path returned by the search into an
//! ordered, immutable, serializable chain of typed elements, presented
//! root first. Each element pairs a holder with the reference it uses
//! to reach the next node; the final element is the leaked object
//! itself and carries no outgoing reference.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::hprof::BasicType;
use crate::search::{FoundPath, ReferenceKind};
use crate::snapshot::{NodeData, NodeIndex, Snapshot};

static ANONYMOUS_CLASS_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.+\$\d+$").expect("anonymous class pattern"));

/// What kind of entity holds the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Holder {
    Object,
    Class,
    Thread,
    Array,
}

/// One hop of the chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceTraceElement {
    /// Name the holder uses to reach the next node; `None` on the
    /// final (leaked) element.
    pub reference_name: Option<String>,
    pub reference_type: Option<ReferenceKind>,
    pub holder: Holder,
    pub class_name: String,
    /// Extra human-readable context (thread name, anonymous class
    /// parentage).
    pub extra: Option<String>,
    /// Reason string of the exclusion rule the outgoing edge matched.
    pub exclusion: Option<String>,
    /// Diagnostic field listing of the holder.
    pub fields: Vec<String>,
}

/// The ordered reference chain from a GC root to the leaked object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReferenceChain {
    pub elements: Vec<ReferenceTraceElement>,
}

impl ReferenceChain {
    /// Materialize the chain from a found path, root first.
    pub fn build(snapshot: &Snapshot, path: &FoundPath) -> Self {
        let steps = &path.steps;
        let mut elements = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            let outgoing = steps.get(i + 1);
            let (holder, extra) = describe_holder(snapshot, step.node);
            elements.push(ReferenceTraceElement {
                reference_name: outgoing
                    .and_then(|next| next.reference.as_ref())
                    .map(|r| r.name.to_string()),
                reference_type: outgoing
                    .and_then(|next| next.reference.as_ref())
                    .map(|r| r.kind),
                holder,
                class_name: snapshot.class_name_of(step.node),
                extra,
                exclusion: outgoing.and_then(|next| next.exclusion.clone()),
                fields: describe_fields(snapshot, step.node),
            });
        }
        Self { elements }
    }

    /// Number of hops from root to the leaked object.
    pub fn hops(&self) -> usize {
        self.elements.len().saturating_sub(1)
    }
}

impl fmt::Display for ReferenceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements.iter().enumerate() {
            let last = i + 1 == self.elements.len();
            write!(f, "* {}", element.class_name)?;
            if let Some(extra) = &element.extra {
                write!(f, " {}", extra)?;
            }
            if let Some(name) = &element.reference_name {
                write!(f, " -> {}", name)?;
            }
            if last {
                write!(f, " (leaked)")?;
            }
            if let Some(reason) = &element.exclusion {
                write!(f, " [excluded: {}]", reason)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn describe_holder(snapshot: &Snapshot, node: NodeIndex) -> (Holder, Option<String>) {
    match snapshot.node(node).data {
        NodeData::Class { .. } => (Holder::Class, None),
        NodeData::ObjectArray { .. } | NodeData::PrimitiveArray { .. } => (Holder::Array, None),
        NodeData::Instance { class_id, .. } => {
            if snapshot.extends_thread(node) {
                let name = snapshot
                    .thread_name(node)
                    .unwrap_or_else(|| "<unnamed>".to_string());
                return (Holder::Thread, Some(format!("(named '{}')", name)));
            }
            let class = match snapshot.class_by_id(class_id) {
                Some(class) => class,
                None => return (Holder::Object, None),
            };
            if ANONYMOUS_CLASS_NAME.is_match(&class.name) {
                let parent = snapshot
                    .class_by_id(class.super_id)
                    .map(|c| c.name.to_string())
                    .unwrap_or_else(|| "java.lang.Object".to_string());
                return (
                    Holder::Object,
                    Some(format!("(anonymous subclass of {})", parent)),
                );
            }
            (Holder::Object, None)
        }
    }
}

fn format_value(ty: BasicType, bits: u64) -> String {
    match ty {
        BasicType::Object => {
            if bits == 0 {
                "null".to_string()
            } else {
                format!("@{:#x}", bits)
            }
        }
        BasicType::Boolean => (bits != 0).to_string(),
        _ => bits.to_string(),
    }
}

/// Diagnostic listing of the values visible on a node, in declaration
/// order so repeated runs emit identical output.
fn describe_fields(snapshot: &Snapshot, node: NodeIndex) -> Vec<String> {
    match snapshot.node(node).data {
        NodeData::Class { .. } => {
            let class = match snapshot.class_of(node) {
                Some(class) => class,
                None => return Vec::new(),
            };
            class
                .static_fields
                .iter()
                .map(|f| format!("static {} = {}", f.name, format_value(f.ty, f.value)))
                .collect()
        }
        NodeData::ObjectArray { .. } => snapshot
            .array_elements(node)
            .into_iter()
            .enumerate()
            .map(|(i, id)| format!("[{}] = {}", i, format_value(BasicType::Object, id)))
            .collect(),
        NodeData::PrimitiveArray { .. } => Vec::new(),
        NodeData::Instance { class_id, .. } => {
            let mut fields: Vec<String> = snapshot
                .class_by_id(class_id)
                .map(|class| {
                    class
                        .static_fields
                        .iter()
                        .map(|f| format!("static {} = {}", f.name, format_value(f.ty, f.value)))
                        .collect()
                })
                .unwrap_or_default();
            fields.extend(
                snapshot
                    .instance_fields_of(node)
                    .into_iter()
                    .map(|f| format!("{} = {}", f.name, format_value(f.ty, f.bits))),
            );
            fields
        }
    }
}
