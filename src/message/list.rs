use std::fmt;

use log::warn;

use crate::codec::{
    PrimitiveReader, PrimitiveWriter, error::FormatError, int_count, read_record, skip_record,
    write_record,
};

use super::{RelayMessage, SerializedRelayMessage, relay::to_hex};

/// Writes `i32 count` followed by each message as a record.
pub fn write_message_list(
    writer: &mut PrimitiveWriter,
    messages: &[RelayMessage],
) -> Result<(), FormatError> {
    writer.write_i32(int_count(messages.len(), "message list")?);
    for message in messages {
        write_record(writer, message)?;
    }
    Ok(())
}

/// Writes up to `count` messages starting at `start` as one list. Returns how many were
/// written.
pub fn write_message_list_range(
    writer: &mut PrimitiveWriter,
    messages: &[RelayMessage],
    start: usize,
    count: usize,
) -> Result<usize, FormatError> {
    let chunk = messages.get(start..).unwrap_or_default();
    let chunk = &chunk[..count.min(chunk.len())];
    write_message_list(writer, chunk)?;
    Ok(chunk.len())
}

/// Same wire form as [`write_message_list`], reusing the already encoded records.
pub fn write_serialized_message_list(
    writer: &mut PrimitiveWriter,
    messages: &[SerializedRelayMessage],
) -> Result<(), FormatError> {
    writer.write_i32(int_count(messages.len(), "message list")?);
    for message in messages {
        message.write_message_record(writer)?;
    }
    Ok(())
}

/// Reads a list written by [`write_message_list`].
///
/// A message that fails to decode aborts the list with [`FormatError::Element`], naming
/// its position and whatever routing fields could still be read from its bytes.
pub fn read_message_list(reader: &mut PrimitiveReader<'_>) -> Result<Vec<RelayMessage>, FormatError> {
    let count = reader.read_count()?;
    let mut messages = Vec::with_capacity(count.min(reader.remaining()));
    for position in 0..count {
        let snapshot = reader.clone();
        match read_record::<RelayMessage>(reader) {
            Ok(message) => messages.push(message),
            Err(source) => {
                let context = describe_failed_message(snapshot);
                warn!("failed to decode message {position} of {count}: {context}: {source}");
                return Err(FormatError::Element {
                    position,
                    context,
                    source: Box::new(source),
                });
            }
        }
    }
    Ok(messages)
}

pub fn message_list_to_bytes(messages: &[RelayMessage]) -> Result<Vec<u8>, FormatError> {
    let mut writer = PrimitiveWriter::new();
    write_message_list(&mut writer, messages)?;
    Ok(writer.into_inner())
}

pub fn message_list_from_bytes(bytes: &[u8]) -> Result<Vec<RelayMessage>, FormatError> {
    read_message_list(&mut PrimitiveReader::new(bytes))
}

#[derive(Default)]
struct Identity {
    type_id: Option<i16>,
    id: Option<i32>,
    extended_id: Option<Vec<u8>>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = || "?".to_string();
        write!(
            f,
            "RelayMessage of Id='{}', ExtendedId='{}', TypeId='{}'",
            self.id.map_or_else(unknown, |id| id.to_string()),
            self.extended_id.as_deref().map_or_else(String::new, to_hex),
            self.type_id.map_or_else(unknown, |id| id.to_string()),
        )
    }
}

/// Walks the leading fields of a message record as far as the bytes allow.
fn describe_failed_message(mut reader: PrimitiveReader<'_>) -> String {
    let mut identity = Identity::default();
    let _ = read_identity(&mut reader, &mut identity);
    identity.to_string()
}

fn read_identity(reader: &mut PrimitiveReader<'_>, identity: &mut Identity) -> Result<(), FormatError> {
    reader.read_u8()?;
    let header_len = reader.read_i16()?;
    // a corrupt header length leaves nothing more to name
    let Some(rest) = header_len.checked_sub(3).and_then(|n| usize::try_from(n).ok()) else {
        return Ok(());
    };
    reader.skip(rest)?;

    identity.type_id = Some(reader.read_i16()?);
    identity.id = Some(reader.read_i32()?);
    // message type, route, legacy marker
    reader.skip(4 + 2 + 4)?;
    if reader.read_bool()? {
        let count = reader.read_i16()?;
        reader.skip(usize::try_from(count).unwrap_or(0) * 4)?;
    }
    if reader.read_bool()? {
        skip_record(reader)?;
    }
    if reader.read_bool()? {
        identity.extended_id = reader.read_int_bytes()?;
    }
    Ok(())
}

/// Messages of one batch split by whether they expect a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageList {
    /// Two-way messages.
    pub out_messages: Vec<RelayMessage>,
    /// One-way messages.
    pub in_messages: Vec<RelayMessage>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message: RelayMessage) {
        if message.is_two_way() {
            self.out_messages.push(message);
        } else {
            self.in_messages.push(message);
        }
    }

    pub fn out_message_count(&self) -> usize {
        self.out_messages.len()
    }

    pub fn in_message_count(&self) -> usize {
        self.in_messages.len()
    }

    pub fn len(&self) -> usize {
        self.in_messages.len() + self.out_messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<RelayMessage> for MessageList {
    fn from_iter<I: IntoIterator<Item = RelayMessage>>(iter: I) -> Self {
        let mut list = Self::new();
        for message in iter {
            list.add(message);
        }
        list
    }
}

impl fmt::Display for MessageList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Relay Message List with {} In Messages and {} Out Messages",
            self.in_message_count(),
            self.out_message_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, RelayPayload};

    fn batch() -> Vec<RelayMessage> {
        vec![
            RelayMessage::get(7, 1),
            RelayMessage::save(RelayPayload::new(7, 2, vec![1, 2])),
            RelayMessage::new(7, 3, MessageType::DeleteWithConfirm),
        ]
    }

    #[test]
    fn list_round_trip() {
        let messages = batch();
        let back = message_list_from_bytes(&message_list_to_bytes(&messages).unwrap()).unwrap();
        assert_eq!(back, messages);
    }

    #[test]
    fn serialized_list_reads_as_message_list() {
        let messages = batch();
        let serialized: Vec<_> = messages
            .iter()
            .map(|m| SerializedRelayMessage::new(m).unwrap())
            .collect();
        let mut w = PrimitiveWriter::new();
        write_serialized_message_list(&mut w, &serialized).unwrap();
        assert_eq!(w.as_slice(), message_list_to_bytes(&messages).unwrap().as_slice());
    }

    #[test]
    fn range_writes_at_most_the_remaining_messages() {
        let messages = batch();
        let mut w = PrimitiveWriter::new();
        assert_eq!(write_message_list_range(&mut w, &messages, 1, 10).unwrap(), 2);
        let back = message_list_from_bytes(w.as_slice()).unwrap();
        assert_eq!(back, messages[1..]);

        let mut w = PrimitiveWriter::new();
        assert_eq!(write_message_list_range(&mut w, &messages, 5, 2).unwrap(), 0);
        assert!(message_list_from_bytes(w.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn decode_failure_names_the_element() {
        let mut failing = RelayMessage::get(7, 99);
        failing.extended_id = Some(vec![0xBE, 0xEF]);
        failing.result_outcome = Some(crate::message::RelayOutcome::Success);
        let messages = vec![RelayMessage::get(7, 1), failing];
        let mut bytes = message_list_to_bytes(&messages).unwrap();
        // the outcome byte sits before the empty details string and the hydration flag
        let outcome_at = bytes.len() - (1 + 1) - 1;
        bytes[outcome_at] = 200;

        let err = message_list_from_bytes(&bytes).unwrap_err();
        match err {
            FormatError::Element {
                position,
                context,
                source,
            } => {
                assert_eq!(position, 1);
                assert_eq!(context, "RelayMessage of Id='99', ExtendedId='beef', TypeId='7'");
                assert!(matches!(
                    *source,
                    FormatError::UnknownDiscriminator {
                        kind: "RelayOutcome",
                        value: 200
                    }
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn corrupt_header_length_is_an_element_error() {
        let bytes = [1, 0, 0, 0, 1, 0x00, 0x80, 0, 0, 0, 0, 0, 0, 0];
        match message_list_from_bytes(&bytes).unwrap_err() {
            FormatError::Element {
                position,
                context,
                source,
            } => {
                assert_eq!(position, 0);
                assert_eq!(context, "RelayMessage of Id='?', ExtendedId='', TypeId='?'");
                assert!(matches!(*source, FormatError::HeaderLength(i16::MIN)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn short_header_length_is_an_element_error() {
        // header length 2 is below the fixed header, with nothing after it
        let bytes = [1, 0, 0, 0, 1, 0x02, 0x00];
        assert!(matches!(
            message_list_from_bytes(&bytes),
            Err(FormatError::Element { position: 0, .. })
        ));
    }

    #[test]
    fn message_list_splits_by_direction() {
        let list: MessageList = batch().into_iter().collect();
        assert_eq!(list.out_message_count(), 2);
        assert_eq!(list.in_message_count(), 1);
        assert_eq!(
            list.to_string(),
            "Relay Message List with 1 In Messages and 2 Out Messages"
        );
    }
}
