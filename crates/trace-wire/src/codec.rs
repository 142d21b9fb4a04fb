//! Low level wire primitives: LEB128 varints, zigzag signed integers and
//! field tags. A field tag packs `(field_number << 3) | wire_type`; only
//! varint (0) and length-delimited (2) wire types exist in this format.

use std::str::Utf8Error;

use thiserror::Error;

pub(crate) const WIRE_VARINT: u32 = 0;
pub(crate) const WIRE_LEN: u32 = 2;

const MAX_VARINT_BYTES: usize = 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of buffer at offset {offset}")]
    Truncated { offset: usize },
    #[error("varint at offset {offset} overflows 64 bits")]
    VarintOverflow { offset: usize },
    #[error("invalid field tag at offset {offset}")]
    InvalidTag { offset: usize },
    #[error("unsupported wire type {wire_type} for field {field}")]
    UnsupportedWireType { field: u32, wire_type: u32 },
    #[error("field {field} is not valid utf-8")]
    NotUtf8 {
        field: u32,
        #[source]
        error: Utf8Error,
    },
}

/// Cursor over a serialized message. Keeps an explicit offset so callers
/// can capture the exact byte span of a field they decide not to decode.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn has_remaining(&self) -> bool {
        self.pos < self.buf.len()
    }

    pub(crate) fn span(&self, start: usize) -> &'a [u8] {
        &self.buf[start..self.pos]
    }

    pub(crate) fn uvarint(&mut self) -> Result<u64, WireError> {
        let start = self.pos;
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(WireError::Truncated { offset: self.pos })?;
            self.pos += 1;
            if self.pos - start > MAX_VARINT_BYTES {
                return Err(WireError::VarintOverflow { offset: start });
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(WireError::VarintOverflow { offset: start });
            }
        }
    }

    /// Read the next field tag, returning `(field_number, wire_type)`.
    pub(crate) fn tag(&mut self) -> Result<(u32, u32), WireError> {
        let start = self.pos;
        let raw = self.uvarint()?;
        let field = (raw >> 3) as u32;
        let wire_type = (raw & 0x7) as u32;
        if field == 0 || raw >> 3 > u64::from(u32::MAX) {
            return Err(WireError::InvalidTag { offset: start });
        }
        Ok((field, wire_type))
    }

    /// Read a length-delimited payload, returning the raw bytes.
    pub(crate) fn len_delimited(&mut self) -> Result<&'a [u8], WireError> {
        let start = self.pos;
        let len = self.uvarint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WireError::Truncated { offset: start })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Skip over one field's payload without interpreting it.
    pub(crate) fn skip(&mut self, field: u32, wire_type: u32) -> Result<(), WireError> {
        match wire_type {
            WIRE_VARINT => self.uvarint().map(drop),
            WIRE_LEN => self.len_delimited().map(drop),
            _ => Err(WireError::UnsupportedWireType { field, wire_type }),
        }
    }
}

pub(crate) fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn put_tag(out: &mut Vec<u8>, field: u32, wire_type: u32) {
    put_uvarint(out, (u64::from(field) << 3) | u64::from(wire_type));
}

pub(crate) fn put_varint_field(out: &mut Vec<u8>, field: u32, value: u64) {
    put_tag(out, field, WIRE_VARINT);
    put_uvarint(out, value);
}

pub(crate) fn put_sint_field(out: &mut Vec<u8>, field: u32, value: i32) {
    put_varint_field(out, field, u64::from(zigzag_encode(value)));
}

pub(crate) fn put_len_field(out: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    put_tag(out, field, WIRE_LEN);
    put_uvarint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub(crate) fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

pub(crate) fn zigzag_decode(value: u64) -> i32 {
    let v = value as u32;
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}
