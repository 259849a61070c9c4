use crate::codec::{PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError};

/// Object bytes carried by a [`RelayMessage`](super::RelayMessage), with the cache
/// bookkeeping that travels alongside them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelayPayload {
    pub type_id: i16,
    pub id: i32,
    pub last_updated_ticks: i64,
    pub compressed: bool,
    /// Seconds the object may be cached, `-1` for no limit.
    pub ttl: i32,
    pub expiration_ticks: i64,
    pub byte_array: Option<Vec<u8>>,
    pub extended_id: Option<Vec<u8>>,
}

impl RelayPayload {
    pub fn new(type_id: i16, id: i32, byte_array: impl Into<Vec<u8>>) -> Self {
        Self {
            type_id,
            id,
            ttl: -1,
            byte_array: Some(byte_array.into()),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.byte_array.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VersionSerializable for RelayPayload {
    const CURRENT_VERSION: u8 = 2;
    const KIND: &'static str = "RelayPayload";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_i16(self.type_id);
        writer.write_i32(self.id);
        writer.write_i64(self.last_updated_ticks);
        writer.write_bool(self.compressed);
        writer.write_i32(self.ttl);
        writer.write_i64(self.expiration_ticks);
        writer.write_int_bytes(self.byte_array.as_deref())?;
        writer.write_int_bytes(self.extended_id.as_deref())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let mut payload = Self {
            type_id: reader.read_i16()?,
            id: reader.read_i32()?,
            last_updated_ticks: reader.read_i64()?,
            compressed: reader.read_bool()?,
            ttl: reader.read_i32()?,
            expiration_ticks: reader.read_i64()?,
            byte_array: reader.read_int_bytes()?,
            extended_id: None,
        };
        if version >= 2 {
            payload.extended_id = reader.read_int_bytes()?;
        }
        Ok(payload)
    }
}
