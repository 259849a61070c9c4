use byteorder::{ByteOrder, LittleEndian};

use super::{error::FormatError, writer::REGION_HEADER_LENGTH};

/// Cursor over a borrowed byte slice. Every read either consumes exactly its encoding or
/// fails with [`FormatError::Truncated`] without moving the cursor.
#[derive(Debug, Clone)]
pub struct PrimitiveReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PrimitiveReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Borrows the next `n` bytes and advances past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if n > self.remaining() {
            return Err(FormatError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, FormatError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16, FormatError> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_u16(&mut self) -> Result<u16, FormatError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, FormatError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i64(&mut self) -> Result<i64, FormatError> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, FormatError> {
        Ok(self.take(n)?.to_vec())
    }

    pub fn read_7bit(&mut self) -> Result<u32, FormatError> {
        let mut value: u32 = 0;
        for shift in (0..35).step_by(7) {
            let b = self.read_u8()?;
            value |= u32::from(b & 0x7F)
                .checked_shl(shift)
                .ok_or(FormatError::MalformedVarint)?;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(FormatError::MalformedVarint)
    }

    pub fn read_string(&mut self) -> Result<String, FormatError> {
        let len = self.read_7bit()? as usize;
        Ok(String::from_utf8(self.read_bytes(len)?)?)
    }

    /// Counterpart of [`PrimitiveWriter::write_short_bytes`](super::PrimitiveWriter::write_short_bytes);
    /// a zero length reads back as `None`.
    pub fn read_short_bytes(&mut self) -> Result<Option<Vec<u8>>, FormatError> {
        match self.read_u16()? {
            0 => Ok(None),
            len => self.read_bytes(len as usize).map(Some),
        }
    }

    pub fn read_int_bytes(&mut self) -> Result<Option<Vec<u8>>, FormatError> {
        match self.read_i32()? {
            -1 => Ok(None),
            len if len < 0 => Err(FormatError::NegativeLength(len)),
            len => self.read_bytes(len as usize).map(Some),
        }
    }

    pub fn read_string_list(&mut self) -> Result<Vec<String>, FormatError> {
        let count = self.read_u16()?;
        (0..count).map(|_| self.read_string()).collect()
    }

    /// Reads an `i32` element count, rejecting negative values.
    pub fn read_count(&mut self) -> Result<usize, FormatError> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| FormatError::NegativeLength(count))
    }

    /// Runs `body` over the bytes of the next region. Whatever `body` leaves unread
    /// inside the region is skipped; reads beyond the region fail.
    pub fn region<T, F>(&mut self, body: F) -> Result<T, FormatError>
    where
        F: FnOnce(&mut PrimitiveReader<'a>) -> Result<T, FormatError>,
    {
        let header = self.read_u8()?;
        if header < REGION_HEADER_LENGTH {
            return Err(FormatError::RegionHeader(header));
        }
        let len = self.read_i32()?;
        if len < 0 {
            return Err(FormatError::NegativeLength(len));
        }
        self.skip((header - REGION_HEADER_LENGTH) as usize)?;

        let mut inner = PrimitiveReader::new(self.take(len as usize)?);
        body(&mut inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PrimitiveWriter;

    #[test]
    fn primitives_read_back() {
        let mut w = PrimitiveWriter::new();
        w.write_u8(9);
        w.write_bool(true);
        w.write_i16(-2);
        w.write_u16(65000);
        w.write_i32(-70000);
        w.write_i64(i64::MIN);
        w.write_string("héllo").unwrap();
        w.write_7bit(u32::MAX);

        let bytes = w.into_inner();
        let mut r = PrimitiveReader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 9);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_u16().unwrap(), 65000);
        assert_eq!(r.read_i32().unwrap(), -70000);
        assert_eq!(r.read_i64().unwrap(), i64::MIN);
        assert_eq!(r.read_string().unwrap(), "héllo");
        assert_eq!(r.read_7bit().unwrap(), u32::MAX);
        assert!(r.is_empty());
    }

    #[test]
    fn reading_past_end_is_an_error() {
        let mut r = PrimitiveReader::new(&[1, 2, 3]);
        let err = r.read_i32().unwrap_err();
        assert!(matches!(
            err,
            FormatError::Truncated {
                needed: 4,
                remaining: 3
            }
        ));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn zero_length_short_bytes_read_as_none() {
        let mut r = PrimitiveReader::new(&[0, 0, 2, 0, 0xAA, 0xBB]);
        assert_eq!(r.read_short_bytes().unwrap(), None);
        assert_eq!(r.read_short_bytes().unwrap(), Some(vec![0xAA, 0xBB]));
    }

    #[test]
    fn int_bytes_distinguish_null_and_empty() {
        let mut w = PrimitiveWriter::new();
        w.write_int_bytes(None).unwrap();
        w.write_int_bytes(Some(&[])).unwrap();
        let bytes = w.into_inner();
        let mut r = PrimitiveReader::new(&bytes);
        assert_eq!(r.read_int_bytes().unwrap(), None);
        assert_eq!(r.read_int_bytes().unwrap(), Some(vec![]));
    }

    #[test]
    fn region_skips_unread_trailing_fields() {
        let mut w = PrimitiveWriter::new();
        w.region(|w| {
            w.write_i32(1);
            w.write_i32(2);
            w.write_string("added later")
        })
        .unwrap();
        w.write_u16(0xBEEF);

        let bytes = w.into_inner();
        let mut r = PrimitiveReader::new(&bytes);
        let first = r.region(|r| r.read_i32()).unwrap();
        assert_eq!(first, 1);
        assert_eq!(r.read_u16().unwrap(), 0xBEEF);
    }

    #[test]
    fn region_bounds_nested_reads() {
        let mut w = PrimitiveWriter::new();
        w.region(|w| {
            w.write_u8(1);
            Ok(())
        })
        .unwrap();
        w.write_i32(5);

        let bytes = w.into_inner();
        let mut r = PrimitiveReader::new(&bytes);
        assert!(r.region(|r| r.read_i32()).is_err());
    }

    #[test]
    fn region_skips_extended_header() {
        let bytes = [6u8, 1, 0, 0, 0, 0xFF, 0xFF, 42];
        let mut r = PrimitiveReader::new(&bytes);
        assert_eq!(r.region(|r| r.read_u8()).unwrap(), 42);
    }
}
