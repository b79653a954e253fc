//! In-memory object graph over a parsed heap dump.
//!
//! The snapshot owns all node storage for the lifetime of one analysis
//! run and is read-only after construction. Nodes live in a single
//! arena addressed by dense `u32` indices; instance field values stay
//! on the backing store (memory-mapped file or owned buffer) and are
//! decoded only when an object is actually expanded.

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use once_cell::sync::Lazy;
use tracing::{debug, info};

use crate::error::Result;
use crate::hprof::parser::{self, ParsedHeap};
use crate::hprof::reader::ByteReader;
use crate::hprof::BasicType;

/// Dense vertex id into the snapshot's node arena.
pub type NodeIndex = u32;

/// Region of the backing store holding an undecoded payload.
#[derive(Debug, Clone, Copy)]
pub struct ByteSpan {
    pub offset: usize,
    pub len: usize,
}

/// One heap entity. The heap address is the stable identity; `data`
/// is the closed set of entity kinds the search switches over.
#[derive(Debug)]
pub struct Node {
    pub id: u64,
    pub data: NodeData,
}

#[derive(Debug)]
pub enum NodeData {
    /// Class object; payload lives in the snapshot's class table.
    Class { class: u32 },
    /// Ordinary instance with an undecoded field blob.
    Instance { class_id: u64, fields: ByteSpan },
    ObjectArray {
        class_id: u64,
        elements: ByteSpan,
        count: u32,
    },
    PrimitiveArray {
        elem_type: BasicType,
        data: ByteSpan,
        count: u32,
    },
}

/// Static field of a class, value decoded eagerly (the table is small).
#[derive(Debug)]
pub struct StaticField {
    pub name: Arc<str>,
    pub ty: BasicType,
    /// Raw value bits; the referent id when `ty` is `Object`.
    pub value: u64,
}

/// Instance field declaration; values are read lazily from the blob.
#[derive(Debug)]
pub struct FieldDecl {
    pub name: Arc<str>,
    pub ty: BasicType,
}

#[derive(Debug)]
pub struct ClassObject {
    pub id: u64,
    pub name: Arc<str>,
    pub super_id: u64,
    pub static_fields: Vec<StaticField>,
    pub instance_fields: Vec<FieldDecl>,
}

/// Raw GC root entry as emitted by the dump, before deduplication.
#[derive(Debug, Clone, Copy)]
pub struct RawRoot {
    pub object_id: u64,
    pub kind: RootKind,
    pub thread_serial: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Unknown,
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    MonitorUsed,
    ThreadObject,
    InternedString,
    Finalizing,
    Debugger,
    ReferenceCleanup,
    VmInternal,
    JniMonitor,
    Unreachable,
}

/// Decoded instance field value.
#[derive(Debug, Clone)]
pub struct FieldValue {
    pub name: Arc<str>,
    pub ty: BasicType,
    pub bits: u64,
}

impl FieldValue {
    pub fn as_i32(&self) -> i32 {
        self.bits as u32 as i32
    }
}

enum DumpBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl DumpBytes {
    fn as_slice(&self) -> &[u8] {
        match self {
            DumpBytes::Mapped(map) => map,
            DumpBytes::Owned(vec) => vec,
        }
    }
}

static PRIMITIVE_WRAPPERS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "java.lang.Boolean",
        "java.lang.Byte",
        "java.lang.Character",
        "java.lang.Short",
        "java.lang.Integer",
        "java.lang.Long",
        "java.lang.Float",
        "java.lang.Double",
    ]
});

const STRING_CLASS: &str = "java.lang.String";
const THREAD_CLASS: &str = "java.lang.Thread";

// Guard against super-chain cycles in corrupt dumps.
const MAX_CLASS_CHAIN: usize = 512;

/// Opaque handle over the parsed heap graph.
pub struct Snapshot {
    bytes: DumpBytes,
    heap: ParsedHeap,
}

impl Snapshot {
    /// Load a snapshot from a dump file through a memory map, so dumps
    /// larger than available memory stay on their backing store.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        info!(path = %path.display(), size_bytes = mmap.len(), "mapping heap dump");
        Self::build(DumpBytes::Mapped(mmap))
    }

    /// Build a snapshot from an in-memory dump buffer.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::build(DumpBytes::Owned(data))
    }

    fn build(bytes: DumpBytes) -> Result<Self> {
        let heap = parser::parse(bytes.as_slice())?;
        debug!(nodes = heap.nodes.len(), "snapshot constructed");
        Ok(Self { bytes, heap })
    }

    pub fn id_size(&self) -> usize {
        self.heap.id_size
    }

    pub fn node_count(&self) -> usize {
        self.heap.nodes.len()
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.heap.nodes[index as usize]
    }

    /// O(1) vertex lookup by heap address.
    pub fn index_of(&self, id: u64) -> Option<NodeIndex> {
        self.heap.index_by_id.get(&id).copied()
    }

    pub fn roots(&self) -> &[RawRoot] {
        &self.heap.raw_roots
    }

    pub fn thread_object_by_serial(&self, serial: u32) -> Option<NodeIndex> {
        let id = self.heap.thread_object_by_serial.get(&serial)?;
        self.index_of(*id)
    }

    pub fn find_class(&self, name: &str) -> Option<&ClassObject> {
        let index = self.heap.class_by_name.get(name)?;
        Some(&self.heap.classes[*index as usize])
    }

    pub fn class_by_id(&self, class_id: u64) -> Option<&ClassObject> {
        let index = self.heap.class_by_id.get(&class_id)?;
        Some(&self.heap.classes[*index as usize])
    }

    /// All instances recorded for the exact class (no subclasses), in
    /// dump order.
    pub fn instances_of(&self, class_id: u64) -> &[NodeIndex] {
        self.heap
            .instances_by_class
            .get(&class_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Walk a class and its super classes, root-most last.
    pub fn class_chain(&self, class_id: u64) -> impl Iterator<Item = &ClassObject> {
        let mut next = Some(class_id);
        let mut steps = 0;
        std::iter::from_fn(move || {
            if steps >= MAX_CLASS_CHAIN {
                return None;
            }
            steps += 1;
            let class = self.class_by_id(next.take()?)?;
            if class.super_id != 0 {
                next = Some(class.super_id);
            }
            Some(class)
        })
    }

    /// The class whose field layout governs this node, if any.
    pub fn class_of(&self, index: NodeIndex) -> Option<&ClassObject> {
        match self.node(index).data {
            NodeData::Class { class } => Some(&self.heap.classes[class as usize]),
            NodeData::Instance { class_id, .. } | NodeData::ObjectArray { class_id, .. } => {
                self.class_by_id(class_id)
            }
            NodeData::PrimitiveArray { .. } => None,
        }
    }

    /// Display class name for any node kind.
    pub fn class_name_of(&self, index: NodeIndex) -> String {
        match self.node(index).data {
            NodeData::PrimitiveArray { elem_type, .. } => {
                let elem = match elem_type {
                    BasicType::Boolean => "boolean",
                    BasicType::Char => "char",
                    BasicType::Float => "float",
                    BasicType::Double => "double",
                    BasicType::Byte => "byte",
                    BasicType::Short => "short",
                    BasicType::Int => "int",
                    BasicType::Long => "long",
                    BasicType::Object => "object",
                };
                format!("{}[]", elem)
            }
            _ => self
                .class_of(index)
                .map(|c| c.name.to_string())
                .unwrap_or_else(|| "<unknown class>".to_string()),
        }
    }

    /// True if the node is an instance whose class chain contains the
    /// named class.
    pub fn is_instance_of(&self, index: NodeIndex, class_name: &str) -> bool {
        match self.node(index).data {
            NodeData::Instance { class_id, .. } => self
                .class_chain(class_id)
                .any(|class| &*class.name == class_name),
            _ => false,
        }
    }

    pub fn extends_thread(&self, index: NodeIndex) -> bool {
        self.is_instance_of(index, THREAD_CLASS)
    }

    pub fn is_string(&self, index: NodeIndex) -> bool {
        match self.node(index).data {
            NodeData::Instance { class_id, .. } => self
                .class_by_id(class_id)
                .map(|class| &*class.name == STRING_CLASS)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Boxed primitives hold no outgoing object references worth
    /// following and are skipped by the search.
    pub fn is_primitive_wrapper(&self, index: NodeIndex) -> bool {
        match self.node(index).data {
            NodeData::Instance { class_id, .. } => self
                .class_by_id(class_id)
                .map(|class| PRIMITIVE_WRAPPERS.contains(&&*class.name))
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_primitive_array(&self, index: NodeIndex) -> bool {
        matches!(self.node(index).data, NodeData::PrimitiveArray { .. })
    }

    fn slice(&self, span: ByteSpan) -> &[u8] {
        &self.bytes.as_slice()[span.offset..span.offset + span.len]
    }

    /// Decode the instance's field values, walking the field layout of
    /// its class chain (declared class first, as laid out in the blob).
    /// A short blob yields the fields that fit.
    pub fn instance_fields_of(&self, index: NodeIndex) -> Vec<FieldValue> {
        let (class_id, span) = match self.node(index).data {
            NodeData::Instance { class_id, fields } => (class_id, fields),
            _ => return Vec::new(),
        };
        let mut reader = ByteReader::new(self.slice(span));
        reader.set_id_size(self.heap.id_size);

        let mut values = Vec::new();
        for class in self.class_chain(class_id) {
            for field in &class.instance_fields {
                match reader.read_value_bits(field.ty) {
                    Ok(bits) => values.push(FieldValue {
                        name: Arc::clone(&field.name),
                        ty: field.ty,
                        bits,
                    }),
                    Err(_) => return values,
                }
            }
        }
        values
    }

    /// Look up one field by name, declared class shadowing supers.
    pub fn field_of(&self, index: NodeIndex, name: &str) -> Option<FieldValue> {
        self.instance_fields_of(index)
            .into_iter()
            .find(|field| &*field.name == name)
    }

    /// Non-null object reference held in the named field.
    pub fn field_object(&self, index: NodeIndex, name: &str) -> Option<u64> {
        let field = self.field_of(index, name)?;
        if field.ty == BasicType::Object && field.bits != 0 {
            Some(field.bits)
        } else {
            None
        }
    }

    /// Element ids of an object array, in index order.
    pub fn array_elements(&self, index: NodeIndex) -> Vec<u64> {
        let span = match self.node(index).data {
            NodeData::ObjectArray { elements, .. } => elements,
            _ => return Vec::new(),
        };
        let mut reader = ByteReader::new(self.slice(span));
        reader.set_id_size(self.heap.id_size);
        let mut ids = Vec::with_capacity(span.len / self.heap.id_size);
        while reader.remaining() >= self.heap.id_size {
            match reader.read_id() {
                Ok(id) => ids.push(id),
                Err(_) => break,
            }
        }
        ids
    }

    /// Decode the contents of a `java.lang.String` instance. Handles
    /// both backing layouts: `char[]` value arrays (UTF-16 code units)
    /// and `byte[]` value arrays (compressed strings, UTF-8), honoring
    /// `offset`/`count` fields when the dump carries them.
    pub fn string_value(&self, index: NodeIndex) -> Option<String> {
        if !self.is_instance_of(index, STRING_CLASS) {
            return None;
        }
        let value_id = self.field_object(index, "value")?;
        let array = self.index_of(value_id)?;
        match self.node(array).data {
            NodeData::PrimitiveArray {
                elem_type: BasicType::Char,
                data,
                ..
            } => {
                let bytes = self.slice(data);
                let offset = self
                    .field_of(index, "offset")
                    .map(|f| f.as_i32().max(0) as usize * 2)
                    .unwrap_or(0)
                    .min(bytes.len());
                let bytes = &bytes[offset..];
                let take = self
                    .field_of(index, "count")
                    .map(|f| (f.as_i32().max(0) as usize * 2).min(bytes.len()))
                    .unwrap_or(bytes.len());
                let units: Vec<u16> = bytes[..take]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Some(String::from_utf16_lossy(&units))
            }
            NodeData::PrimitiveArray {
                elem_type: BasicType::Byte,
                data,
                ..
            } => Some(String::from_utf8_lossy(self.slice(data)).into_owned()),
            _ => None,
        }
    }

    /// Name of a thread object, read from its `name` field.
    pub fn thread_name(&self, index: NodeIndex) -> Option<String> {
        let name_id = self.field_object(index, "name")?;
        self.string_value(self.index_of(name_id)?)
    }
}

// Summary only: the node arena and backing bytes are far too large to
// dump.
impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id_size", &self.heap.id_size)
            .field("nodes", &self.heap.nodes.len())
            .field("classes", &self.heap.classes.len())
            .field("roots", &self.heap.raw_roots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_dump() -> Vec<u8> {
        let mut data = b"JAVA PROFILE 1.0.3\0".to_vec();
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&0u64.to_be_bytes());
        data
    }

    #[test]
    fn test_debug_output_is_a_summary() {
        let snapshot = Snapshot::from_bytes(empty_dump()).unwrap();
        let rendered = format!("{:?}", snapshot);
        assert!(rendered.contains("id_size: 4"));
        assert!(rendered.contains("nodes: 0"));
    }

    #[test]
    fn test_bad_dump_error_is_debuggable() {
        let rendered = format!("{:?}", Snapshot::from_bytes(b"HPROF?\0".to_vec()));
        assert!(rendered.contains("UnsupportedVersion"));
    }
}
