use byteorder::{ByteOrder, LittleEndian};

use super::error::FormatError;

pub(crate) const REGION_HEADER_LENGTH: u8 = 4;

/// Appends primitives to an owned buffer. Multi-byte values are little-endian.
#[derive(Debug, Default)]
pub struct PrimitiveWriter {
    buf: Vec<u8>,
}

impl PrimitiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes into `buf` after its current contents; used with pooled buffers.
    pub fn with_buffer(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_i16(&mut self, value: i16) {
        let mut b = [0; 2];
        LittleEndian::write_i16(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_u16(&mut self, value: u16) {
        let mut b = [0; 2];
        LittleEndian::write_u16(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_i32(&mut self, value: i32) {
        let mut b = [0; 4];
        LittleEndian::write_i32(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut b = [0; 4];
        LittleEndian::write_u32(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_i64(&mut self, value: i64) {
        let mut b = [0; 8];
        LittleEndian::write_i64(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    /// Raw bytes, no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Unsigned LEB128-style integer, 7 bits per byte.
    pub fn write_7bit(&mut self, mut value: u32) {
        while value >= 0x80 {
            self.buf.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), FormatError> {
        let len = u32::try_from(value.len()).map_err(|_| FormatError::LengthOverflow {
            field: "string",
            length: value.len(),
        })?;
        self.write_7bit(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// `u16` length followed by the bytes. Absent and empty arrays both write `0`.
    pub fn write_short_bytes(&mut self, bytes: Option<&[u8]>) -> Result<(), FormatError> {
        match bytes {
            Some(b) if !b.is_empty() => {
                let len = u16::try_from(b.len()).map_err(|_| FormatError::LengthOverflow {
                    field: "short byte array",
                    length: b.len(),
                })?;
                self.write_u16(len);
                self.buf.extend_from_slice(b);
            }
            _ => self.write_u16(0),
        }
        Ok(())
    }

    /// `i32` length followed by the bytes, `-1` for an absent array.
    pub fn write_int_bytes(&mut self, bytes: Option<&[u8]>) -> Result<(), FormatError> {
        match bytes {
            Some(b) => {
                let len = i32::try_from(b.len()).map_err(|_| FormatError::LengthOverflow {
                    field: "byte array",
                    length: b.len(),
                })?;
                self.write_i32(len);
                self.buf.extend_from_slice(b);
            }
            None => self.write_i32(-1),
        }
        Ok(())
    }

    /// `u16` count of strings followed by each string.
    pub fn write_string_list(&mut self, list: &[String]) -> Result<(), FormatError> {
        self.write_u16(short_count(list.len(), "string list")?);
        for s in list {
            self.write_string(s)?;
        }
        Ok(())
    }

    /// Wraps everything `body` writes in a region whose length is patched in once the
    /// body is complete.
    pub fn region<F>(&mut self, body: F) -> Result<(), FormatError>
    where
        F: FnOnce(&mut Self) -> Result<(), FormatError>,
    {
        self.write_u8(REGION_HEADER_LENGTH);
        let at = self.buf.len();
        self.write_i32(0);
        let start = self.buf.len();

        body(self)?;

        let written = self.buf.len() - start;
        let len = i32::try_from(written).map_err(|_| FormatError::LengthOverflow {
            field: "region",
            length: written,
        })?;
        self.patch_i32(at, len);
        Ok(())
    }

    /// Overwrites four already written bytes at `at`.
    pub(crate) fn patch_i32(&mut self, at: usize, value: i32) {
        LittleEndian::write_i32(&mut self.buf[at..at + 4], value);
    }
}

pub(crate) fn short_count(count: usize, field: &'static str) -> Result<u16, FormatError> {
    u16::try_from(count).map_err(|_| FormatError::LengthOverflow {
        field,
        length: count,
    })
}

pub(crate) fn int_count(count: usize, field: &'static str) -> Result<i32, FormatError> {
    i32::try_from(count).map_err(|_| FormatError::LengthOverflow {
        field,
        length: count,
    })
}
