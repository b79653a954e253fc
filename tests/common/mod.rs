//! Synthetic HPROF dump construction for integration tests.
//!
//! Builds minimal but wire-correct dumps: a version header, one string
//! and one load-class record per interned name, and a single HEAP_DUMP
//! record holding the sub-records. All dumps use 4-byte identifiers.

#![allow(dead_code)]

use std::collections::HashMap;

// HPROF basic type ids used in field declarations.
pub const TY_OBJECT: u8 = 2;
pub const TY_BOOLEAN: u8 = 4;
pub const TY_CHAR: u8 = 5;
pub const TY_BYTE: u8 = 8;
pub const TY_INT: u8 = 10;

fn type_width(ty: u8) -> usize {
    match ty {
        TY_OBJECT => 4,
        TY_BOOLEAN | TY_BYTE => 1,
        TY_CHAR => 2,
        TY_INT => 4,
        other => panic!("unhandled type id {}", other),
    }
}

/// Concatenated big-endian object ids, for instance field blobs and
/// object array elements.
pub fn ids(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out
}

pub struct DumpBuilder {
    records: Vec<u8>,
    heap: Vec<u8>,
    interned: HashMap<String, u32>,
    next_string_id: u32,
}

impl DumpBuilder {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            heap: Vec::new(),
            interned: HashMap::new(),
            next_string_id: 0x7f00_0000,
        }
    }

    fn record(&mut self, tag: u8, body: &[u8]) {
        self.records.push(tag);
        self.records.extend_from_slice(&0u32.to_be_bytes());
        self.records.extend_from_slice(&(body.len() as u32).to_be_bytes());
        self.records.extend_from_slice(body);
    }

    /// Intern a name into the string pool, emitting a STRING record on
    /// first use.
    pub fn intern(&mut self, text: &str) -> u32 {
        if let Some(&id) = self.interned.get(text) {
            return id;
        }
        let id = self.next_string_id;
        self.next_string_id += 1;
        self.interned.insert(text.to_string(), id);
        let mut body = id.to_be_bytes().to_vec();
        body.extend_from_slice(text.as_bytes());
        self.record(0x01, &body);
        id
    }

    /// Register a class: LOAD_CLASS record plus a CLASS_DUMP
    /// sub-record with the given instance field declarations.
    pub fn class(&mut self, class_id: u32, name: &str, super_id: u32, fields: &[(&str, u8)]) {
        self.class_with_statics(class_id, name, super_id, &[], fields);
    }

    pub fn class_with_statics(
        &mut self,
        class_id: u32,
        name: &str,
        super_id: u32,
        statics: &[(&str, u8, u64)],
        fields: &[(&str, u8)],
    ) {
        let name_id = self.intern(name);
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_be_bytes()); // class serial
        body.extend_from_slice(&class_id.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes()); // stack trace serial
        body.extend_from_slice(&name_id.to_be_bytes());
        self.record(0x02, &body);

        self.heap.push(0x20);
        self.heap.extend_from_slice(&class_id.to_be_bytes());
        self.heap.extend_from_slice(&0u32.to_be_bytes()); // stack trace serial
        self.heap.extend_from_slice(&super_id.to_be_bytes());
        self.heap.extend_from_slice(&0u32.to_be_bytes()); // loader
        self.heap.extend_from_slice(&[0u8; 16]); // signer, domain, reserved
        let size: usize = fields.iter().map(|&(_, ty)| type_width(ty)).sum();
        self.heap.extend_from_slice(&(size as u32).to_be_bytes());
        self.heap.extend_from_slice(&0u16.to_be_bytes()); // constant pool
        self.heap
            .extend_from_slice(&(statics.len() as u16).to_be_bytes());
        let static_entries: Vec<(u32, u8, u64)> = statics
            .iter()
            .map(|&(field, ty, value)| (self.intern(field), ty, value))
            .collect();
        for (field_name_id, ty, value) in static_entries {
            self.heap.extend_from_slice(&field_name_id.to_be_bytes());
            self.heap.push(ty);
            match type_width(ty) {
                1 => self.heap.push(value as u8),
                2 => self.heap.extend_from_slice(&(value as u16).to_be_bytes()),
                4 => self.heap.extend_from_slice(&(value as u32).to_be_bytes()),
                _ => unreachable!(),
            }
        }
        self.heap
            .extend_from_slice(&(fields.len() as u16).to_be_bytes());
        let field_entries: Vec<(u32, u8)> = fields
            .iter()
            .map(|&(field, ty)| (self.intern(field), ty))
            .collect();
        for (field_name_id, ty) in field_entries {
            self.heap.extend_from_slice(&field_name_id.to_be_bytes());
            self.heap.push(ty);
        }
    }

    /// Instance dump. The blob must match the class-chain field layout,
    /// declared class first.
    pub fn instance(&mut self, object_id: u32, class_id: u32, blob: &[u8]) {
        self.heap.push(0x21);
        self.heap.extend_from_slice(&object_id.to_be_bytes());
        self.heap.extend_from_slice(&0u32.to_be_bytes()); // stack trace serial
        self.heap.extend_from_slice(&class_id.to_be_bytes());
        self.heap
            .extend_from_slice(&(blob.len() as u32).to_be_bytes());
        self.heap.extend_from_slice(blob);
    }

    pub fn object_array(&mut self, object_id: u32, class_id: u32, elements: &[u32]) {
        self.heap.push(0x22);
        self.heap.extend_from_slice(&object_id.to_be_bytes());
        self.heap.extend_from_slice(&0u32.to_be_bytes()); // stack trace serial
        self.heap
            .extend_from_slice(&(elements.len() as u32).to_be_bytes());
        self.heap.extend_from_slice(&class_id.to_be_bytes());
        self.heap.extend_from_slice(&ids(elements));
    }

    pub fn char_array(&mut self, object_id: u32, text: &str) {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.heap.push(0x23);
        self.heap.extend_from_slice(&object_id.to_be_bytes());
        self.heap.extend_from_slice(&0u32.to_be_bytes()); // stack trace serial
        self.heap
            .extend_from_slice(&(units.len() as u32).to_be_bytes());
        self.heap.push(TY_CHAR);
        for unit in units {
            self.heap.extend_from_slice(&unit.to_be_bytes());
        }
    }

    /// A `java.lang.String` instance backed by a fresh char array. The
    /// String class must have been registered with a `value` field.
    pub fn string(&mut self, object_id: u32, string_class_id: u32, array_id: u32, text: &str) {
        self.char_array(array_id, text);
        self.instance(object_id, string_class_id, &ids(&[array_id]));
    }

    pub fn root_jni_global(&mut self, object_id: u32) {
        self.heap.push(0x01);
        self.heap.extend_from_slice(&object_id.to_be_bytes());
        self.heap.extend_from_slice(&0u32.to_be_bytes()); // ref id
    }

    pub fn root_sticky_class(&mut self, object_id: u32) {
        self.heap.push(0x05);
        self.heap.extend_from_slice(&object_id.to_be_bytes());
    }

    pub fn root_thread_object(&mut self, object_id: u32, thread_serial: u32) {
        self.heap.push(0x08);
        self.heap.extend_from_slice(&object_id.to_be_bytes());
        self.heap.extend_from_slice(&thread_serial.to_be_bytes());
        self.heap.extend_from_slice(&0u32.to_be_bytes()); // stack trace serial
    }

    pub fn root_java_frame(&mut self, object_id: u32, thread_serial: u32) {
        self.heap.push(0x03);
        self.heap.extend_from_slice(&object_id.to_be_bytes());
        self.heap.extend_from_slice(&thread_serial.to_be_bytes());
        self.heap.extend_from_slice(&0u32.to_be_bytes()); // frame number
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"JAVA PROFILE 1.0.3\0");
        out.extend_from_slice(&4u32.to_be_bytes()); // identifier size
        out.extend_from_slice(&0u64.to_be_bytes()); // timestamp
        out.extend_from_slice(&self.records);
        out.push(0x0c); // HEAP_DUMP
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&(self.heap.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.heap);
        out
    }
}

// Well-known class ids shared by the scenario dumps.
pub const CLS_OBJECT: u32 = 0x100;
pub const CLS_STRING: u32 = 0x101;
pub const CLS_WEAK_REF: u32 = 0x102;
pub const CLS_MARKER: u32 = 0x103;
pub const CLS_ACTIVITY: u32 = 0x104;
pub const CLS_LINK: u32 = 0x105;
pub const CLS_THREAD: u32 = 0x106;

pub const MARKER_CLASS_NAME: &str = "com.example.watcher.KeyedWeakReference";
pub const ACTIVITY_CLASS_NAME: &str = "com.example.MainActivity";
pub const LINK_CLASS_NAME: &str = "com.example.Link";

/// Start a dump pre-populated with the classes every scenario needs:
/// Object, String, the weak-reference and marker classes, a leak
/// target class and a `Link` holder class with `direct` and `next`
/// object fields.
pub fn scenario_builder() -> DumpBuilder {
    let mut b = DumpBuilder::new();
    b.class(CLS_OBJECT, "java.lang.Object", 0, &[]);
    b.class(CLS_STRING, "java.lang.String", CLS_OBJECT, &[("value", TY_OBJECT)]);
    b.class(
        CLS_WEAK_REF,
        "java.lang.ref.WeakReference",
        CLS_OBJECT,
        &[("referent", TY_OBJECT)],
    );
    b.class(
        CLS_MARKER,
        MARKER_CLASS_NAME,
        CLS_WEAK_REF,
        &[("mKey", TY_OBJECT), ("mActivityRef", TY_OBJECT)],
    );
    b.class(CLS_ACTIVITY, ACTIVITY_CLASS_NAME, CLS_OBJECT, &[]);
    b.class(
        CLS_LINK,
        LINK_CLASS_NAME,
        CLS_OBJECT,
        &[("direct", TY_OBJECT), ("next", TY_OBJECT)],
    );
    b.class(CLS_THREAD, "java.lang.Thread", CLS_OBJECT, &[("name", TY_OBJECT)]);
    b
}

/// Add a marker record for `key` whose weak reference points at
/// `target` (0 for an already collected referent). Object ids in the
/// 0x9000 range are reserved for this bookkeeping.
pub fn add_marker(b: &mut DumpBuilder, key: &str, target: u32) {
    b.string(0x9001, CLS_STRING, 0x9002, key);
    b.instance(0x9003, CLS_WEAK_REF, &ids(&[target]));
    // Blob layout: marker fields first, then WeakReference's referent.
    let mut blob = ids(&[0x9001, 0x9003]);
    blob.extend_from_slice(&ids(&[0]));
    b.instance(0x9004, CLS_MARKER, &blob);
}
