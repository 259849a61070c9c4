use std::{fmt, net::Ipv4Addr, time::Instant};

use log::trace;

use crate::{
    codec::{
        PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError, int_count,
        read_record, write_record,
    },
    index::query::PrimaryQuery,
};

use super::{HydrationOptions, HydrationPolicy, MessageType, RelayKeyType, RelayOutcome, RelayPayload};

/// Hops a message may still be forwarded before it is dropped.
pub const DEFAULT_RELAY_TTL: i8 = 2;

/// Envelope for one cache operation.
///
/// Routing uses `type_id` to pick the object type and `id` (or `extended_id` where the
/// type is keyed by bytes) to pick the node. A two-way message is answered by exactly one
/// reply, which is folded back into the request with [`RelayMessage::extract_response`].
#[derive(Debug, Clone)]
pub struct RelayMessage {
    pub type_id: i16,
    pub id: i32,
    pub extended_id: Option<Vec<u8>>,
    pub message_type: MessageType,
    pub source_zone: u8,
    pub relay_ttl: i8,
    pub address_history: Option<Vec<Ipv4Addr>>,
    pub payload: Option<RelayPayload>,
    pub query_id: u8,
    pub query_data_compressed: bool,
    pub query_data: Option<Vec<u8>>,
    pub notification_id: u8,
    /// Ticks of the newest copy the caller already holds.
    pub freshness: Option<i64>,
    pub result_outcome: Option<RelayOutcome>,
    pub result_details: String,
    pub hydration_policy: Option<HydrationPolicy>,
    /// When the message entered this process. Not serialized.
    pub entered_at: Instant,
}

impl Default for RelayMessage {
    fn default() -> Self {
        Self {
            type_id: 0,
            id: 0,
            extended_id: None,
            message_type: MessageType::Undefined,
            source_zone: 0,
            relay_ttl: DEFAULT_RELAY_TTL,
            address_history: None,
            payload: None,
            query_id: 0,
            query_data_compressed: false,
            query_data: None,
            notification_id: 0,
            freshness: None,
            result_outcome: None,
            result_details: String::new(),
            hydration_policy: None,
            entered_at: Instant::now(),
        }
    }
}

impl PartialEq for RelayMessage {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
            && self.id == other.id
            && self.extended_id == other.extended_id
            && self.message_type == other.message_type
            && self.source_zone == other.source_zone
            && self.relay_ttl == other.relay_ttl
            && self.address_history == other.address_history
            && self.payload == other.payload
            && self.query_id == other.query_id
            && self.query_data_compressed == other.query_data_compressed
            && self.query_data == other.query_data
            && self.notification_id == other.notification_id
            && self.freshness == other.freshness
            && self.result_outcome == other.result_outcome
            && self.result_details == other.result_details
            && self.hydration_policy == other.hydration_policy
    }
}

impl Eq for RelayMessage {}

impl RelayMessage {
    pub fn new(type_id: i16, id: i32, message_type: MessageType) -> Self {
        Self {
            type_id,
            id,
            message_type,
            ..Self::default()
        }
    }

    pub fn get(type_id: i16, id: i32) -> Self {
        Self::new(type_id, id, MessageType::Get)
    }

    pub fn save(payload: RelayPayload) -> Self {
        let mut message = Self::new(payload.type_id, payload.id, MessageType::Save);
        message.extended_id = payload.extended_id.clone();
        message.payload = Some(payload);
        message
    }

    pub fn delete(type_id: i16, id: i32) -> Self {
        Self::new(type_id, id, MessageType::Delete)
    }

    /// Wraps an encoded query. The message id is the query's primary id so it routes to
    /// the cluster owning the queried index.
    pub fn query<Q>(type_id: i16, query: &Q) -> Result<Self, FormatError>
    where
        Q: PrimaryQuery + VersionSerializable,
    {
        let mut writer = PrimitiveWriter::new();
        write_record(&mut writer, query)?;

        let mut message = Self::new(type_id, query.primary_id(), MessageType::Query);
        message.query_id = query.query_id().into();
        message.query_data = Some(writer.into_inner());
        Ok(message)
    }

    /// Decodes the query carried by a [`MessageType::Query`] message.
    pub fn read_query<Q: VersionSerializable>(&self) -> Result<Q, FormatError> {
        let data = self.query_data.as_deref().unwrap_or_default();
        read_record(&mut PrimitiveReader::new(data))
    }

    pub fn is_two_way(&self) -> bool {
        self.message_type.is_two_way()
    }

    pub fn allows_return_payload(&self) -> bool {
        self.message_type.allows_return_payload()
    }

    pub fn error_occurred(&self) -> bool {
        matches!(
            self.result_outcome,
            Some(RelayOutcome::Error | RelayOutcome::Timeout | RelayOutcome::NotSupported)
        )
    }

    /// Folds a reply into this request. The payload is only taken for types that
    /// return one; a reply without an outcome means the receiver did not handle it.
    pub fn extract_response(&mut self, reply: RelayMessage) {
        if self.allows_return_payload() {
            self.payload = reply.payload;
        }
        self.result_outcome = Some(reply.result_outcome.unwrap_or(RelayOutcome::NotSupported));
        self.result_details = reply.result_details;
    }

    /// Copy of the routing fields, used as the reply to this message.
    pub fn reply(&self, outcome: RelayOutcome) -> Self {
        Self {
            type_id: self.type_id,
            id: self.id,
            extended_id: self.extended_id.clone(),
            message_type: self.message_type,
            result_outcome: Some(outcome),
            ..Self::default()
        }
    }

    fn carries_query(&self) -> bool {
        matches!(self.message_type, MessageType::Query | MessageType::Invoke)
    }
}

impl fmt::Display for RelayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelayMessage {:?} TypeId {} Id {}", self.message_type, self.type_id, self.id)?;
        if let Some(extended_id) = &self.extended_id {
            write!(f, " ExtendedId {}", to_hex(extended_id))?;
        }
        match self.message_type {
            MessageType::Query | MessageType::Invoke => write!(f, " QueryId {}", self.query_id)?,
            MessageType::Notification => write!(f, " NotificationId {}", self.notification_id)?,
            _ => {}
        }
        if let Some(payload) = &self.payload {
            write!(f, " PayloadLength {}", payload.len())?;
        }
        if let Some(outcome) = self.result_outcome {
            write!(f, " Outcome {outcome:?}")?;
        }
        Ok(())
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Zone in the high byte, TTL in the low byte.
fn compress_route(zone: u8, ttl: i8) -> u16 {
    (u16::from(zone) << 8) | u16::from(ttl as u8)
}

fn decompress_route(value: u16) -> (u8, i8) {
    ((value >> 8) as u8, (value & 0xFF) as u8 as i8)
}

impl VersionSerializable for RelayMessage {
    const CURRENT_VERSION: u8 = 7;
    const KIND: &'static str = "RelayMessage";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_i16(self.type_id);
        writer.write_i32(self.id);
        writer.write_i32(self.message_type.into());
        writer.write_u16(compress_route(self.source_zone, self.relay_ttl));
        // 0 tells the reader this writer understands the length-delimited tail
        writer.write_i32(0);

        match &self.address_history {
            Some(history) => {
                writer.write_bool(true);
                writer.write_i16(
                    i16::try_from(history.len()).map_err(|_| FormatError::LengthOverflow {
                        field: "address history",
                        length: history.len(),
                    })?,
                );
                for address in history {
                    writer.write_bytes(&address.octets());
                }
            }
            None => writer.write_bool(false),
        }

        match &self.payload {
            Some(payload) => {
                writer.write_bool(true);
                write_record(writer, payload)?;
            }
            None => writer.write_bool(false),
        }

        match &self.extended_id {
            Some(extended_id) => {
                writer.write_bool(true);
                writer.write_int_bytes(Some(extended_id))?;
            }
            None => writer.write_bool(false),
        }

        if self.carries_query() {
            writer.write_u8(self.query_id);
            writer.write_bool(self.query_data_compressed);
            writer.write_int_bytes(self.query_data.as_deref())?;
        } else if self.message_type == MessageType::Notification {
            writer.write_u8(self.notification_id);
        }

        let at = writer.len();
        writer.write_i32(0);
        let start = writer.len();

        match self.freshness {
            Some(ticks) => {
                writer.write_bool(true);
                writer.write_i64(ticks);
            }
            None => writer.write_bool(false),
        }
        match self.result_outcome {
            Some(outcome) => {
                writer.write_bool(true);
                writer.write_u8(outcome.into());
            }
            None => writer.write_bool(false),
        }
        writer.write_string(&self.result_details)?;

        match self.hydration_policy {
            Some(policy) => {
                writer.write_bool(true);
                writer.write_7bit(policy.key_type.into());
                writer.write_7bit(policy.options.bits());
            }
            None => writer.write_bool(false),
        }

        let len = int_count(writer.len() - start, "message tail")?;
        writer.patch_i32(at, len);
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let mut message = Self {
            type_id: reader.read_i16()?,
            id: reader.read_i32()?,
            message_type: MessageType::try_from(reader.read_i32()?)?,
            ..Self::default()
        };
        (message.source_zone, message.relay_ttl) = decompress_route(reader.read_u16()?);
        if reader.read_i32()? == -1 {
            trace!("message {} written by a legacy peer", message.id);
        }

        if reader.read_bool()? {
            let count = reader.read_i16()?;
            let count = usize::try_from(count).map_err(|_| FormatError::NegativeLength(count.into()))?;
            let mut history = Vec::with_capacity(count);
            for _ in 0..count {
                let octets = reader.take(4)?;
                history.push(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]));
            }
            message.address_history = Some(history);
        }

        if reader.read_bool()? {
            message.payload = Some(read_record(reader)?);
        }

        if version > 1 {
            // before version 4 the id was always present, possibly empty
            if version < 4 || reader.read_bool()? {
                let len = reader.read_count()?;
                message.extended_id = Some(reader.read_bytes(len)?);
            }
        }

        if version > 2 && message.carries_query() {
            message.query_id = reader.read_u8()?;
            message.query_data_compressed = reader.read_bool()?;
            message.query_data = match reader.read_i32()? {
                len if len < 0 => None,
                len => Some(reader.read_bytes(len as usize)?),
            };
        }

        if version > 3 && message.message_type == MessageType::Notification {
            message.notification_id = reader.read_u8()?;
        }

        if version >= 5 {
            let len = reader.read_count()?;
            let mut tail = PrimitiveReader::new(reader.take(len)?);
            message.freshness = if tail.read_bool()? {
                Some(tail.read_i64()?)
            } else {
                None
            };
            message.result_outcome = if tail.read_bool()? {
                Some(RelayOutcome::try_from(tail.read_u8()?)?)
            } else {
                None
            };
            message.result_details = tail.read_string()?;

            if version == 6 {
                message.hydration_policy = tail.read_bool()?.then_some(HydrationPolicy::LEGACY_DEFAULT);
            } else if version >= 7 && tail.read_bool()? {
                message.hydration_policy = Some(HydrationPolicy {
                    key_type: RelayKeyType::try_from(tail.read_7bit()?)?,
                    options: HydrationOptions::from_bits(tail.read_7bit()?),
                });
            }
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{from_bytes, to_bytes},
        index::query::{QueryTypes, RandomQuery},
    };

    fn full_message() -> RelayMessage {
        let mut payload = RelayPayload::new(7, 42, vec![0x01, 0x02]);
        payload.extended_id = Some(b"k42".to_vec());
        RelayMessage {
            extended_id: Some(b"k42".to_vec()),
            source_zone: 3,
            relay_ttl: -1,
            address_history: Some(vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::LOCALHOST]),
            payload: Some(payload),
            freshness: Some(1_000),
            result_outcome: Some(RelayOutcome::StillFresh),
            result_details: "cached".into(),
            hydration_policy: Some(HydrationPolicy {
                key_type: RelayKeyType::String,
                options: HydrationOptions::HYDRATE_ON_BULK_MISS,
            }),
            ..RelayMessage::new(7, 42, MessageType::Get)
        }
    }

    #[test]
    fn default_and_full_messages_round_trip() {
        let empty = RelayMessage::default();
        let back: RelayMessage = from_bytes(&to_bytes(&empty).unwrap()).unwrap();
        assert_eq!(back, empty);

        let full = full_message();
        let back: RelayMessage = from_bytes(&to_bytes(&full).unwrap()).unwrap();
        assert_eq!(back, full);
        assert_eq!(back.relay_ttl, -1);
    }

    #[test]
    fn route_byte_packing() {
        assert_eq!(compress_route(0x12, 2), 0x1202);
        assert_eq!(decompress_route(compress_route(255, -128)), (255, -128));
    }

    #[test]
    fn query_message_carries_encoded_query() {
        let query = RandomQuery::new(vec![9, 0, 0, 0], 3, "by_score");
        let message = RelayMessage::query(40, &query).unwrap();
        assert_eq!(message.id, 9);
        assert_eq!(message.query_id, u8::from(QueryTypes::RandomQuery));

        let back: RelayMessage = from_bytes(&to_bytes(&message).unwrap()).unwrap();
        let decoded: RandomQuery = back.read_query().unwrap();
        assert_eq!(decoded, query);
    }

    #[test]
    fn notification_id_survives() {
        let mut message = RelayMessage::new(5, 1, MessageType::Notification);
        message.notification_id = 17;
        let back: RelayMessage = from_bytes(&to_bytes(&message).unwrap()).unwrap();
        assert_eq!(back.notification_id, 17);
    }

    #[test]
    fn unknown_tail_fields_are_skipped() {
        let message = full_message();
        let mut w = PrimitiveWriter::new();
        message.serialize(&mut w).unwrap();
        let mut bytes = w.into_inner();

        // grow the tail by two bytes a newer writer might have added
        let tail_len_at = bytes.len()
            - (1 + 8 + 1 + 1 + 1 + "cached".len() + 1 + 1 + 1)
            - 4;
        let tail_len = i32::from_le_bytes(bytes[tail_len_at..tail_len_at + 4].try_into().unwrap());
        bytes[tail_len_at..tail_len_at + 4].copy_from_slice(&(tail_len + 2).to_le_bytes());
        bytes.extend_from_slice(&[0xEE, 0xEE]);
        bytes.extend_from_slice(&0x5A5Ai32.to_le_bytes());

        let mut r = PrimitiveReader::new(&bytes);
        let back = RelayMessage::deserialize(&mut r, 7).unwrap();
        assert_eq!(back, message);
        assert_eq!(r.read_i32().unwrap(), 0x5A5A);
    }

    #[test]
    fn version_six_hydration_flag_maps_to_legacy_default() {
        let mut message = RelayMessage::get(1, 2);
        message.hydration_policy = Some(HydrationPolicy::LEGACY_DEFAULT);
        let mut w = PrimitiveWriter::new();
        message.serialize(&mut w).unwrap();
        let mut bytes = w.into_inner();
        // version 6 wrote a single bool where version 7 writes bool + two varints
        bytes.truncate(bytes.len() - 2);
        let tail_len_at = bytes.len() - (1 + 1 + 1 + 1) - 4;
        bytes[tail_len_at..tail_len_at + 4].copy_from_slice(&4i32.to_le_bytes());

        let back = RelayMessage::deserialize(&mut PrimitiveReader::new(&bytes), 6).unwrap();
        assert_eq!(back.hydration_policy, Some(HydrationPolicy::LEGACY_DEFAULT));
    }

    #[test]
    fn extract_response_respects_return_payload() {
        let mut get = RelayMessage::get(7, 42);
        let mut reply = get.reply(RelayOutcome::Success);
        reply.payload = Some(RelayPayload::new(7, 42, vec![9]));
        reply.result_details = "hit".into();
        get.extract_response(reply.clone());
        assert_eq!(get.payload.as_ref().map(RelayPayload::len), Some(1));
        assert_eq!(get.result_outcome, Some(RelayOutcome::Success));
        assert_eq!(get.result_details, "hit");

        let mut save = RelayMessage::new(7, 42, MessageType::SaveWithConfirm);
        save.extract_response(reply);
        assert!(save.payload.is_none());

        let mut update = RelayMessage::new(7, 42, MessageType::UpdateWithConfirm);
        update.extract_response(RelayMessage::default());
        assert_eq!(update.result_outcome, Some(RelayOutcome::NotSupported));
        assert!(update.error_occurred());
    }

    #[test]
    fn display_names_routing_fields() {
        let mut message = RelayMessage::get(7, 42);
        message.extended_id = Some(vec![0xAB, 0x01]);
        assert_eq!(message.to_string(), "RelayMessage Get TypeId 7 Id 42 ExtendedId ab01");
    }
}
