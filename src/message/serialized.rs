use std::{fmt, time::Instant};

use crate::codec::{
    PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError, read_record,
    to_bytes,
};

use super::{MessageType, RelayMessage};

/// A [`RelayMessage`] already encoded as a record, with its routing fields kept beside
/// the bytes so a forwarder can route and re-send it without decoding.
#[derive(Debug, Clone)]
pub struct SerializedRelayMessage {
    pub message_type: MessageType,
    pub type_id: i16,
    pub id: i32,
    pub extended_id: Option<Vec<u8>>,
    pub payload_length: i32,
    /// The message record as [`write_record`](crate::codec::write_record) produced it.
    pub message_bytes: Option<Vec<u8>>,
    pub entered_at: Instant,
}

impl SerializedRelayMessage {
    pub fn new(message: &RelayMessage) -> Result<Self, FormatError> {
        let payload_length = message
            .payload
            .as_ref()
            .and_then(|payload| payload.byte_array.as_ref())
            .map_or(0, |bytes| bytes.len());
        Ok(Self {
            message_type: message.message_type,
            type_id: message.type_id,
            id: message.id,
            extended_id: message.extended_id.clone(),
            payload_length: i32::try_from(payload_length).unwrap_or(i32::MAX),
            message_bytes: Some(to_bytes(message)?),
            entered_at: message.entered_at,
        })
    }

    pub fn is_two_way(&self) -> bool {
        self.message_type.is_two_way()
    }

    /// Decodes the wrapped message.
    pub fn to_relay_message(&self) -> Result<RelayMessage, FormatError> {
        let bytes = self
            .message_bytes
            .as_deref()
            .ok_or(FormatError::UnexpectedNull(RelayMessage::KIND))?;
        let mut message: RelayMessage = read_record(&mut PrimitiveReader::new(bytes))?;
        message.entered_at = self.entered_at;
        Ok(message)
    }

    /// Appends the message record as is. The output is indistinguishable from writing
    /// the decoded message with `write_record`.
    pub fn write_message_record(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        let bytes = self
            .message_bytes
            .as_deref()
            .ok_or(FormatError::UnexpectedNull(RelayMessage::KIND))?;
        writer.write_bytes(bytes);
        Ok(())
    }
}

impl PartialEq for SerializedRelayMessage {
    fn eq(&self, other: &Self) -> bool {
        self.message_type == other.message_type
            && self.type_id == other.type_id
            && self.id == other.id
            && self.extended_id == other.extended_id
            && self.payload_length == other.payload_length
            && self.message_bytes == other.message_bytes
    }
}

impl fmt::Display for SerializedRelayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerializedRelayMessage {:?}", self.message_type)?;
        if self.payload_length > 0 {
            write!(f, " Payload {} Bytes.", self.payload_length)?;
        }
        Ok(())
    }
}

impl VersionSerializable for SerializedRelayMessage {
    const CURRENT_VERSION: u8 = 2;
    const KIND: &'static str = "SerializedRelayMessage";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_i32(self.message_type.into());
        writer.write_i32(self.payload_length);
        writer.write_int_bytes(self.message_bytes.as_deref())?;
        writer.write_i16(self.type_id);
        writer.write_i32(self.id);
        writer.write_int_bytes(self.extended_id.as_deref())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let mut message = Self {
            message_type: MessageType::try_from(reader.read_i32()?)?,
            payload_length: reader.read_i32()?,
            message_bytes: reader.read_int_bytes()?,
            type_id: 0,
            id: 0,
            extended_id: None,
            entered_at: Instant::now(),
        };
        if version >= 2 {
            message.type_id = reader.read_i16()?;
            message.id = reader.read_i32()?;
            message.extended_id = reader.read_int_bytes()?;
        }
        Ok(message)
    }
}
