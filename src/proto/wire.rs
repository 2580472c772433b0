//! Low-level wire codec primitives
//!
//! A minimal protocol-buffer-style binary codec: varints and tagged fields
//! with the standard wire types. Field numbers are fixed per message and must
//! never be reused across schema evolutions; unknown fields are skipped so
//! that newer-schema messages decode on older readers (forward
//! compatibility).

use crate::errors::ContentError;

// ----------------------------------------------------------------------------
// Wire Types
// ----------------------------------------------------------------------------

/// Varint-encoded scalar
pub const WIRE_VARINT: u32 = 0;
/// Little-endian 64-bit scalar
pub const WIRE_FIXED64: u32 = 1;
/// Length-delimited bytes (strings, bytes, nested messages)
pub const WIRE_LEN: u32 = 2;
/// Little-endian 32-bit scalar
pub const WIRE_FIXED32: u32 = 5;

/// Largest varint length for a u64
const MAX_VARINT_LEN: usize = 10;

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

/// Append-only encoder for one message
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish encoding and take the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Current encoded length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }

    fn tag(&mut self, field: u32, wire_type: u32) {
        self.varint(u64::from(field << 3 | wire_type));
    }

    /// Write a varint field
    pub fn uint64(&mut self, field: u32, value: u64) {
        self.tag(field, WIRE_VARINT);
        self.varint(value);
    }

    /// Write a varint field from a u32
    pub fn uint32(&mut self, field: u32, value: u32) {
        self.uint64(field, u64::from(value));
    }

    /// Write a bool field
    pub fn bool(&mut self, field: u32, value: bool) {
        self.uint64(field, u64::from(value));
    }

    /// Write a length-delimited bytes field
    pub fn bytes(&mut self, field: u32, value: &[u8]) {
        self.tag(field, WIRE_LEN);
        self.varint(value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    /// Write a length-delimited string field
    pub fn string(&mut self, field: u32, value: &str) {
        self.bytes(field, value.as_bytes());
    }

    /// Write a nested message field from its encoded bytes
    pub fn message(&mut self, field: u32, encoded: &[u8]) {
        self.bytes(field, encoded);
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// Cursor-based decoder for one message
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over an encoded message
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Advance to the next field, returning its number and wire type, or
    /// `None` at end of input.
    pub fn next_field(&mut self) -> Result<Option<(u32, u32)>, ContentError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key = self.read_varint()?;
        let field = (key >> 3) as u32;
        let wire_type = (key & 0x07) as u32;
        if field == 0 {
            return Err(ContentError::invalid_wire("Field number zero"));
        }
        Ok(Some((field, wire_type)))
    }

    /// Read a raw varint
    pub fn read_varint(&mut self) -> Result<u64, ContentError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| ContentError::invalid_wire("Truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ContentError::invalid_wire("Varint too long"))
    }

    /// Read a varint field as u32
    pub fn read_uint32(&mut self) -> Result<u32, ContentError> {
        let value = self.read_varint()?;
        u32::try_from(value).map_err(|_| ContentError::invalid_wire("Varint exceeds u32"))
    }

    /// Read a varint field as bool
    pub fn read_bool(&mut self) -> Result<bool, ContentError> {
        Ok(self.read_varint()? != 0)
    }

    /// Read a length-delimited field
    pub fn read_bytes(&mut self) -> Result<&'a [u8], ContentError> {
        let len = self.read_varint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| ContentError::invalid_wire("Truncated length-delimited field"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read a length-delimited field as UTF-8 text
    pub fn read_string(&mut self) -> Result<String, ContentError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ContentError::invalid_wire("Invalid UTF-8 in string field"))
    }

    /// Skip over a field of the given wire type
    pub fn skip(&mut self, wire_type: u32) -> Result<(), ContentError> {
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                self.advance(8)?;
            }
            WIRE_LEN => {
                self.read_bytes()?;
            }
            WIRE_FIXED32 => {
                self.advance(4)?;
            }
            other => {
                return Err(ContentError::invalid_wire(format!(
                    "Unknown wire type {other}"
                )));
            }
        }
        Ok(())
    }

    fn advance(&mut self, count: usize) -> Result<(), ContentError> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| ContentError::invalid_wire("Truncated fixed-width field"))?;
        self.pos = end;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
