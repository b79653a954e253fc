//! Record-level HPROF parsing.
//!
//! Walks the top-level record stream and the heap-dump sub-records,
//! producing the index tables the snapshot is built from. Instance
//! field blobs are never decoded here: only their spans are recorded,
//! so a dump larger than memory stays on its random-access backing
//! store until the search actually touches an object.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{AnalyzerError, Result};
use crate::hprof::reader::ByteReader;
use crate::hprof::{heap_tag, record_tag, BasicType};
use crate::snapshot::{
    ByteSpan, ClassObject, FieldDecl, Node, NodeData, NodeIndex, RawRoot, RootKind, StaticField,
};

/// Fully parsed dump tables, minus the backing bytes the spans point into.
pub(crate) struct ParsedHeap {
    pub id_size: usize,
    pub nodes: Vec<Node>,
    pub index_by_id: HashMap<u64, NodeIndex>,
    pub classes: Vec<ClassObject>,
    pub class_by_id: HashMap<u64, u32>,
    pub class_by_name: HashMap<Arc<str>, u32>,
    pub instances_by_class: HashMap<u64, Vec<NodeIndex>>,
    pub raw_roots: Vec<RawRoot>,
    pub thread_object_by_serial: HashMap<u32, u64>,
}

pub(crate) fn parse(data: &[u8]) -> Result<ParsedHeap> {
    let mut reader = ByteReader::new(data);

    let version = reader.read_null_terminated_string()?;
    if !version.starts_with("JAVA PROFILE") {
        return Err(AnalyzerError::UnsupportedVersion(version));
    }
    let id_size = reader.read_u32()? as usize;
    if id_size != 4 && id_size != 8 {
        return Err(AnalyzerError::InvalidFormat(format!(
            "identifier size {} not supported",
            id_size
        )));
    }
    reader.set_id_size(id_size);
    let _timestamp = reader.read_u64()?;
    debug!(version = %version, id_size, "parsing heap dump");

    let mut builder = HeapBuilder::new(id_size);

    while !reader.is_empty() {
        let tag = reader.read_u8()?;
        let _time = reader.read_u32()?;
        let length = reader.read_u32()? as usize;
        let body_offset = reader.position();
        let body = reader.take(length)?;

        match tag {
            record_tag::STRING => builder.accept_string(body)?,
            record_tag::LOAD_CLASS => builder.accept_load_class(body)?,
            record_tag::HEAP_DUMP | record_tag::HEAP_DUMP_SEGMENT => {
                builder.accept_heap_dump(body, body_offset)?
            }
            record_tag::HEAP_DUMP_END => {}
            other => trace!(tag = other, length, "skipping record"),
        }
    }

    builder.finish()
}

struct RawClass {
    id: u64,
    super_id: u64,
    static_fields: Vec<(u64, BasicType, u64)>,
    instance_fields: Vec<(u64, BasicType)>,
}

struct HeapBuilder {
    id_size: usize,
    strings: HashMap<u64, Arc<str>>,
    class_name_ids: HashMap<u64, u64>,
    raw_classes: Vec<RawClass>,
    nodes: Vec<Node>,
    index_by_id: HashMap<u64, NodeIndex>,
    raw_roots: Vec<RawRoot>,
    thread_object_by_serial: HashMap<u32, u64>,
}

impl HeapBuilder {
    fn new(id_size: usize) -> Self {
        Self {
            id_size,
            strings: HashMap::new(),
            class_name_ids: HashMap::new(),
            raw_classes: Vec::new(),
            nodes: Vec::new(),
            index_by_id: HashMap::new(),
            raw_roots: Vec::new(),
            thread_object_by_serial: HashMap::new(),
        }
    }

    fn accept_string(&mut self, body: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(body);
        r.set_id_size(self.id_size);
        let id = r.read_id()?;
        let text = String::from_utf8_lossy(r.take(r.remaining())?).into_owned();
        self.strings.insert(id, Arc::from(text));
        Ok(())
    }

    fn accept_load_class(&mut self, body: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(body);
        r.set_id_size(self.id_size);
        let _serial = r.read_u32()?;
        let class_id = r.read_id()?;
        let _stack_serial = r.read_u32()?;
        let name_id = r.read_id()?;
        self.class_name_ids.insert(class_id, name_id);
        Ok(())
    }

    fn push_node(&mut self, id: u64, data: NodeData) -> Result<()> {
        if self.nodes.len() == self.nodes.capacity() {
            self.nodes.try_reserve(self.nodes.len().max(1024))?;
        }
        let index = self.nodes.len() as NodeIndex;
        self.nodes.push(Node { id, data });
        self.index_by_id.entry(id).or_insert(index);
        Ok(())
    }

    fn push_root(&mut self, object_id: u64, kind: RootKind, thread_serial: Option<u32>) {
        self.raw_roots.push(RawRoot {
            object_id,
            kind,
            thread_serial,
        });
    }

    fn accept_heap_dump(&mut self, body: &[u8], base: usize) -> Result<()> {
        let mut r = ByteReader::new(body);
        r.set_id_size(self.id_size);
        let id_size = self.id_size;

        while !r.is_empty() {
            let tag_offset = base + r.position();
            let tag = r.read_u8()?;
            match tag {
                heap_tag::ROOT_UNKNOWN => {
                    let id = r.read_id()?;
                    self.push_root(id, RootKind::Unknown, None);
                }
                heap_tag::ROOT_JNI_GLOBAL => {
                    let id = r.read_id()?;
                    r.skip(id_size)?; // JNI global ref id
                    self.push_root(id, RootKind::JniGlobal, None);
                }
                heap_tag::ROOT_JNI_LOCAL => {
                    let id = r.read_id()?;
                    let thread_serial = r.read_u32()?;
                    r.skip(4)?; // frame number
                    self.push_root(id, RootKind::JniLocal, Some(thread_serial));
                }
                heap_tag::ROOT_JAVA_FRAME => {
                    let id = r.read_id()?;
                    let thread_serial = r.read_u32()?;
                    r.skip(4)?; // frame number
                    self.push_root(id, RootKind::JavaFrame, Some(thread_serial));
                }
                heap_tag::ROOT_NATIVE_STACK => {
                    let id = r.read_id()?;
                    let thread_serial = r.read_u32()?;
                    self.push_root(id, RootKind::NativeStack, Some(thread_serial));
                }
                heap_tag::ROOT_STICKY_CLASS => {
                    let id = r.read_id()?;
                    self.push_root(id, RootKind::StickyClass, None);
                }
                heap_tag::ROOT_THREAD_BLOCK => {
                    let id = r.read_id()?;
                    let thread_serial = r.read_u32()?;
                    self.push_root(id, RootKind::ThreadBlock, Some(thread_serial));
                }
                heap_tag::ROOT_MONITOR_USED => {
                    let id = r.read_id()?;
                    self.push_root(id, RootKind::MonitorUsed, None);
                }
                heap_tag::ROOT_THREAD_OBJECT => {
                    let id = r.read_id()?;
                    let thread_serial = r.read_u32()?;
                    r.skip(4)?; // stack trace serial
                    self.thread_object_by_serial.entry(thread_serial).or_insert(id);
                    self.push_root(id, RootKind::ThreadObject, Some(thread_serial));
                }
                heap_tag::ROOT_INTERNED_STRING => {
                    let id = r.read_id()?;
                    self.push_root(id, RootKind::InternedString, None);
                }
                heap_tag::ROOT_FINALIZING => {
                    let id = r.read_id()?;
                    self.push_root(id, RootKind::Finalizing, None);
                }
                heap_tag::ROOT_DEBUGGER => {
                    let id = r.read_id()?;
                    self.push_root(id, RootKind::Debugger, None);
                }
                heap_tag::ROOT_REFERENCE_CLEANUP => {
                    let id = r.read_id()?;
                    self.push_root(id, RootKind::ReferenceCleanup, None);
                }
                heap_tag::ROOT_VM_INTERNAL => {
                    let id = r.read_id()?;
                    self.push_root(id, RootKind::VmInternal, None);
                }
                heap_tag::ROOT_JNI_MONITOR => {
                    let id = r.read_id()?;
                    let thread_serial = r.read_u32()?;
                    r.skip(4)?; // stack depth
                    self.push_root(id, RootKind::JniMonitor, Some(thread_serial));
                }
                heap_tag::ROOT_UNREACHABLE => {
                    let id = r.read_id()?;
                    self.push_root(id, RootKind::Unreachable, None);
                }
                heap_tag::CLASS_DUMP => self.accept_class_dump(&mut r)?,
                heap_tag::INSTANCE_DUMP => {
                    let id = r.read_id()?;
                    r.skip(4)?; // stack trace serial
                    let class_id = r.read_id()?;
                    let len = r.read_u32()? as usize;
                    let span = ByteSpan {
                        offset: base + r.position(),
                        len,
                    };
                    r.skip(len)?;
                    self.push_node(
                        id,
                        NodeData::Instance {
                            class_id,
                            fields: span,
                        },
                    )?;
                }
                heap_tag::OBJECT_ARRAY_DUMP => {
                    let id = r.read_id()?;
                    r.skip(4)?; // stack trace serial
                    let count = r.read_u32()?;
                    let class_id = r.read_id()?;
                    let len = count as usize * id_size;
                    let span = ByteSpan {
                        offset: base + r.position(),
                        len,
                    };
                    r.skip(len)?;
                    self.push_node(
                        id,
                        NodeData::ObjectArray {
                            class_id,
                            elements: span,
                            count,
                        },
                    )?;
                }
                heap_tag::PRIMITIVE_ARRAY_DUMP | heap_tag::PRIMITIVE_ARRAY_NODATA => {
                    let id = r.read_id()?;
                    r.skip(4)?; // stack trace serial
                    let count = r.read_u32()?;
                    let type_id = r.read_u8()?;
                    let elem_type = BasicType::from_type_id(type_id).ok_or_else(|| {
                        AnalyzerError::ParseError {
                            offset: tag_offset as u64,
                            message: format!("unknown primitive array type id {}", type_id),
                        }
                    })?;
                    let span = if tag == heap_tag::PRIMITIVE_ARRAY_DUMP {
                        let len = count as usize * elem_type.size(id_size);
                        let span = ByteSpan {
                            offset: base + r.position(),
                            len,
                        };
                        r.skip(len)?;
                        span
                    } else {
                        ByteSpan {
                            offset: base + r.position(),
                            len: 0,
                        }
                    };
                    self.push_node(
                        id,
                        NodeData::PrimitiveArray {
                            elem_type,
                            data: span,
                            count,
                        },
                    )?;
                }
                heap_tag::HEAP_DUMP_INFO => {
                    r.skip(4)?; // heap id
                    r.read_id()?; // heap name string id
                }
                other => {
                    // Sub-record lengths are tag dependent: an unknown tag
                    // cannot be skipped over.
                    return Err(AnalyzerError::ParseError {
                        offset: tag_offset as u64,
                        message: format!("unknown heap dump tag {:#04x}", other),
                    });
                }
            }
        }
        Ok(())
    }

    fn accept_class_dump(&mut self, r: &mut ByteReader<'_>) -> Result<()> {
        let id = r.read_id()?;
        r.skip(4)?; // stack trace serial
        let super_id = r.read_id()?;
        r.skip(self.id_size)?; // class loader id
        r.skip(self.id_size * 4)?; // signer, protection domain, reserved x2
        r.skip(4)?; // instance size; field layout is decoded from the blobs

        // Constant pool, skipped by value width
        let pool_entries = r.read_u16()?;
        for _ in 0..pool_entries {
            r.skip(2)?; // pool index
            let type_id = r.read_u8()?;
            let ty = BasicType::from_type_id(type_id).ok_or_else(|| AnalyzerError::ParseError {
                offset: r.position() as u64,
                message: format!("unknown constant pool type id {}", type_id),
            })?;
            r.skip(ty.size(self.id_size))?;
        }

        let static_count = r.read_u16()?;
        let mut static_fields = Vec::with_capacity(static_count as usize);
        for _ in 0..static_count {
            let name_id = r.read_id()?;
            let type_id = r.read_u8()?;
            let ty = BasicType::from_type_id(type_id).ok_or_else(|| AnalyzerError::ParseError {
                offset: r.position() as u64,
                message: format!("unknown static field type id {}", type_id),
            })?;
            let bits = r.read_value_bits(ty)?;
            static_fields.push((name_id, ty, bits));
        }

        let field_count = r.read_u16()?;
        let mut instance_fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let name_id = r.read_id()?;
            let type_id = r.read_u8()?;
            let ty = BasicType::from_type_id(type_id).ok_or_else(|| AnalyzerError::ParseError {
                offset: r.position() as u64,
                message: format!("unknown instance field type id {}", type_id),
            })?;
            instance_fields.push((name_id, ty));
        }

        let class_index = self.raw_classes.len() as u32;
        self.raw_classes.push(RawClass {
            id,
            super_id,
            static_fields,
            instance_fields,
        });
        self.push_node(id, NodeData::Class { class: class_index })?;
        Ok(())
    }

    fn resolve_string(&self, id: u64) -> Arc<str> {
        match self.strings.get(&id) {
            Some(s) => Arc::clone(s),
            None => {
                warn!(string_id = id, "dangling string reference");
                Arc::from(format!("<unknown-string-{:#x}>", id))
            }
        }
    }

    fn finish(self) -> Result<ParsedHeap> {
        let mut classes = Vec::new();
        classes.try_reserve_exact(self.raw_classes.len())?;
        let mut class_by_id = HashMap::new();
        let mut class_by_name: HashMap<Arc<str>, u32> = HashMap::new();

        for (index, raw) in self.raw_classes.iter().enumerate() {
            let name = match self.class_name_ids.get(&raw.id) {
                Some(name_id) => self.resolve_string(*name_id),
                None => {
                    warn!(class_id = raw.id, "class dump without load-class record");
                    Arc::from(format!("<unknown-class-{:#x}>", raw.id))
                }
            };
            let static_fields = raw
                .static_fields
                .iter()
                .map(|&(name_id, ty, bits)| StaticField {
                    name: self.resolve_string(name_id),
                    ty,
                    value: bits,
                })
                .collect();
            let instance_fields = raw
                .instance_fields
                .iter()
                .map(|&(name_id, ty)| FieldDecl {
                    name: self.resolve_string(name_id),
                    ty,
                })
                .collect();

            class_by_id.entry(raw.id).or_insert(index as u32);
            class_by_name
                .entry(Arc::clone(&name))
                .or_insert(index as u32);
            classes.push(ClassObject {
                id: raw.id,
                name,
                super_id: raw.super_id,
                static_fields,
                instance_fields,
            });
        }

        let mut instances_by_class: HashMap<u64, Vec<NodeIndex>> = HashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if let NodeData::Instance { class_id, .. } = node.data {
                instances_by_class
                    .entry(class_id)
                    .or_default()
                    .push(index as NodeIndex);
            }
        }

        debug!(
            nodes = self.nodes.len(),
            classes = classes.len(),
            roots = self.raw_roots.len(),
            "heap dump parsed"
        );

        Ok(ParsedHeap {
            id_size: self.id_size,
            nodes: self.nodes,
            index_by_id: self.index_by_id,
            classes,
            class_by_id,
            class_by_name,
            instances_by_class,
            raw_roots: self.raw_roots,
            thread_object_by_serial: self.thread_object_by_serial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header(version: &str, id_size: u32) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(version.as_bytes());
        data.push(0);
        data.extend_from_slice(&id_size.to_be_bytes());
        data.extend_from_slice(&0u64.to_be_bytes());
        data
    }

    #[test]
    fn test_empty_dump_parses() {
        let data = minimal_header("JAVA PROFILE 1.0.3", 4);
        let heap = parse(&data).unwrap();
        assert_eq!(heap.id_size, 4);
        assert!(heap.nodes.is_empty());
        assert!(heap.raw_roots.is_empty());
    }

    #[test]
    fn test_bad_version_rejected() {
        let data = minimal_header("DALVIK TRACE 1.0", 4);
        assert!(matches!(
            parse(&data),
            Err(AnalyzerError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_bad_id_size_rejected() {
        let data = minimal_header("JAVA PROFILE 1.0.3", 3);
        assert!(matches!(parse(&data), Err(AnalyzerError::InvalidFormat(_))));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let data = b"JAVA PROFILE 1.0.3\0\0\0".to_vec();
        assert!(matches!(
            parse(&data),
            Err(AnalyzerError::ParseError { .. })
        ));
    }

    #[test]
    fn test_unknown_top_level_record_skipped() {
        let mut data = minimal_header("JAVA PROFILE 1.0.3", 4);
        data.push(0x07); // ALLOC SITES, unconsumed
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&[0xaa, 0xbb]);
        let heap = parse(&data).unwrap();
        assert!(heap.nodes.is_empty());
    }

    #[test]
    fn test_unknown_heap_sub_record_is_format_error() {
        let mut data = minimal_header("JAVA PROFILE 1.0.3", 4);
        data.push(record_tag::HEAP_DUMP);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.push(0x77); // not a known sub-record tag
        assert!(matches!(
            parse(&data),
            Err(AnalyzerError::ParseError { .. })
        ));
    }
}
