//! Bounded big-endian cursor over the raw dump bytes.
//!
//! Every read is bounds-checked; running past the end of the backing
//! store produces a typed parse error with the failing offset rather
//! than a panic. The cursor never copies payload data.

use crate::error::{AnalyzerError, Result};

/// Big-endian reader positioned inside an untrusted byte buffer.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    id_size: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            // Overwritten once the header is decoded.
            id_size: 4,
        }
    }

    /// Set the identifier width declared by the dump header.
    pub fn set_id_size(&mut self, id_size: usize) {
        self.id_size = id_size;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn truncated(&self, wanted: usize) -> AnalyzerError {
        AnalyzerError::ParseError {
            offset: self.pos as u64,
            message: format!(
                "truncated record: wanted {} bytes, {} remaining",
                wanted,
                self.remaining()
            ),
        }
    }

    /// Borrow `len` bytes at the current position and advance past them.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.truncated(len));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read an object identifier at the dump's declared width.
    pub fn read_id(&mut self) -> Result<u64> {
        match self.id_size {
            4 => Ok(self.read_u32()? as u64),
            8 => self.read_u64(),
            other => Err(AnalyzerError::InvalidFormat(format!(
                "unsupported identifier size {}",
                other
            ))),
        }
    }

    /// Read one value of the given basic type, returning its raw bits.
    /// Object references come back as the referent id.
    pub fn read_value_bits(&mut self, ty: super::BasicType) -> Result<u64> {
        use super::BasicType::*;
        match ty {
            Object => self.read_id(),
            Boolean | Byte => Ok(self.read_u8()? as u64),
            Char | Short => Ok(self.read_u16()? as u64),
            Float | Int => Ok(self.read_u32()? as u64),
            Double | Long => self.read_u64(),
        }
    }

    /// Read the NUL-terminated version string at the start of the dump.
    pub fn read_null_terminated_string(&mut self) -> Result<String> {
        let start = self.pos;
        let nul = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| AnalyzerError::InvalidFormat("unterminated header string".into()))?;
        let bytes = self.take(nul)?;
        self.skip(1)?; // consume the NUL
        String::from_utf8(bytes.to_vec())
            .map_err(|_| AnalyzerError::InvalidFormat("non-UTF-8 header string".into()))
    }
}
