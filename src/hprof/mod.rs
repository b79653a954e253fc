//! Binary HPROF heap-dump decoding.
//!
//! This crate is a consumer of the HPROF format (JDK 1.0.2 record layout
//! plus the Android/ART extension sub-records), not an owner: the tag
//! tables and value widths below must match the emitter bit-exactly.

pub mod parser;
pub mod reader;

/// Top-level record tags the parser dispatches on; anything else is
/// length-prefixed and skipped wholesale.
pub mod record_tag {
    pub const STRING: u8 = 0x01;
    pub const LOAD_CLASS: u8 = 0x02;
    pub const HEAP_DUMP: u8 = 0x0c;
    pub const HEAP_DUMP_SEGMENT: u8 = 0x1c;
    pub const HEAP_DUMP_END: u8 = 0x2c;
}

/// Heap-dump sub-record tags, including the Android/ART extensions.
pub mod heap_tag {
    pub const ROOT_UNKNOWN: u8 = 0xff;
    pub const ROOT_JNI_GLOBAL: u8 = 0x01;
    pub const ROOT_JNI_LOCAL: u8 = 0x02;
    pub const ROOT_JAVA_FRAME: u8 = 0x03;
    pub const ROOT_NATIVE_STACK: u8 = 0x04;
    pub const ROOT_STICKY_CLASS: u8 = 0x05;
    pub const ROOT_THREAD_BLOCK: u8 = 0x06;
    pub const ROOT_MONITOR_USED: u8 = 0x07;
    pub const ROOT_THREAD_OBJECT: u8 = 0x08;
    pub const CLASS_DUMP: u8 = 0x20;
    pub const INSTANCE_DUMP: u8 = 0x21;
    pub const OBJECT_ARRAY_DUMP: u8 = 0x22;
    pub const PRIMITIVE_ARRAY_DUMP: u8 = 0x23;

    // Android extensions
    pub const HEAP_DUMP_INFO: u8 = 0xfe;
    pub const ROOT_INTERNED_STRING: u8 = 0x89;
    pub const ROOT_FINALIZING: u8 = 0x8a;
    pub const ROOT_DEBUGGER: u8 = 0x8b;
    pub const ROOT_REFERENCE_CLEANUP: u8 = 0x8c;
    pub const ROOT_VM_INTERNAL: u8 = 0x8d;
    pub const ROOT_JNI_MONITOR: u8 = 0x8e;
    pub const ROOT_UNREACHABLE: u8 = 0x90;
    pub const PRIMITIVE_ARRAY_NODATA: u8 = 0xc3;
}

/// HPROF basic value types, as encoded in field and array records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Object,
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl BasicType {
    /// Decode the one-byte type id used by field tables and primitive
    /// array records.
    pub fn from_type_id(id: u8) -> Option<Self> {
        match id {
            2 => Some(BasicType::Object),
            4 => Some(BasicType::Boolean),
            5 => Some(BasicType::Char),
            6 => Some(BasicType::Float),
            7 => Some(BasicType::Double),
            8 => Some(BasicType::Byte),
            9 => Some(BasicType::Short),
            10 => Some(BasicType::Int),
            11 => Some(BasicType::Long),
            _ => None,
        }
    }

    /// Encoded size in bytes; object references use the dump's id size.
    pub fn size(&self, id_size: usize) -> usize {
        match self {
            BasicType::Object => id_size,
            BasicType::Boolean | BasicType::Byte => 1,
            BasicType::Char | BasicType::Short => 2,
            BasicType::Float | BasicType::Int => 4,
            BasicType::Double | BasicType::Long => 8,
        }
    }
}
