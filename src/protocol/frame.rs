//! Request and reply frames.
//!
//! Frame fields are written in the connection's [`ByteOrdering`]; the codec output
//! carried as payload is not touched.
use std::io::Read;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};

use super::{
    SocketCommand,
    error::{ProtocolError, TransportError},
};

pub const MESSAGE_STARTER: i16 = 0x7FFF;
pub const MESSAGE_TERMINATOR: i16 = i16::MIN;

/// Marker, length, command word and sync flag.
pub const HEADER_LENGTH: usize = 11;
pub const TERMINATOR_LENGTH: usize = 2;
pub const REPLY_HEADER_LENGTH: usize = 6;

/// Payload of the canonical empty reply.
pub const EMPTY_REPLY_PAYLOAD: [u8; 4] = [241, 216, 255, 255];
pub const EMPTY_REPLY_LENGTH: usize = REPLY_HEADER_LENGTH + EMPTY_REPLY_PAYLOAD.len();

/// Byte order of the multi-byte frame fields on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrdering {
    /// Little-endian.
    #[default]
    Host,
    /// Big-endian.
    Network,
}

impl ByteOrdering {
    pub fn from_network_order(use_network_order: bool) -> Self {
        if use_network_order {
            ByteOrdering::Network
        } else {
            ByteOrdering::Host
        }
    }

    fn put_i16(self, buf: &mut Vec<u8>, value: i16) {
        let mut b = [0; 2];
        match self {
            ByteOrdering::Host => LittleEndian::write_i16(&mut b, value),
            ByteOrdering::Network => BigEndian::write_i16(&mut b, value),
        }
        buf.extend_from_slice(&b);
    }

    fn put_u16(self, buf: &mut Vec<u8>, value: u16) {
        let mut b = [0; 2];
        match self {
            ByteOrdering::Host => LittleEndian::write_u16(&mut b, value),
            ByteOrdering::Network => BigEndian::write_u16(&mut b, value),
        }
        buf.extend_from_slice(&b);
    }

    fn put_i32(self, buf: &mut Vec<u8>, value: i32) {
        let mut b = [0; 4];
        match self {
            ByteOrdering::Host => LittleEndian::write_i32(&mut b, value),
            ByteOrdering::Network => BigEndian::write_i32(&mut b, value),
        }
        buf.extend_from_slice(&b);
    }

    fn read_i16<R: Read>(self, r: &mut R) -> Result<i16, TransportError> {
        match self {
            ByteOrdering::Host => r.read_i16::<LittleEndian>(),
            ByteOrdering::Network => r.read_i16::<BigEndian>(),
        }
        .map_err(TransportError::from_io)
    }

    fn read_u16<R: Read>(self, r: &mut R) -> Result<u16, TransportError> {
        match self {
            ByteOrdering::Host => r.read_u16::<LittleEndian>(),
            ByteOrdering::Network => r.read_u16::<BigEndian>(),
        }
        .map_err(TransportError::from_io)
    }

    fn read_i32<R: Read>(self, r: &mut R) -> Result<i32, TransportError> {
        match self {
            ByteOrdering::Host => r.read_i32::<LittleEndian>(),
            ByteOrdering::Network => r.read_i32::<BigEndian>(),
        }
        .map_err(TransportError::from_io)
    }
}

/// Decoded fixed part of a request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Whole frame, marker through terminator.
    pub length: usize,
    pub command_id: u16,
    /// `0` for frames sent without a reply id.
    pub message_id: u16,
    pub sync: bool,
}

impl FrameHeader {
    /// Unrecognized ids map to [`SocketCommand::Unknown`].
    pub fn command(&self) -> SocketCommand {
        SocketCommand::try_from(self.command_id).unwrap_or(SocketCommand::Unknown)
    }

    pub fn payload_length(&self) -> usize {
        self.length - HEADER_LENGTH - TERMINATOR_LENGTH
    }
}

fn frame_length(payload_len: usize, envelope: usize) -> Result<i32, ProtocolError> {
    let length = payload_len + envelope;
    i32::try_from(length).map_err(|_| ProtocolError::FrameTooLarge {
        length,
        max: i32::MAX as usize,
    })
}

/// Appends a complete request frame to `buf`.
pub fn encode_frame(
    buf: &mut Vec<u8>,
    ordering: ByteOrdering,
    command: SocketCommand,
    message_id: u16,
    sync: bool,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let length = frame_length(payload.len(), HEADER_LENGTH + TERMINATOR_LENGTH)?;
    let word = (u32::from(message_id) << 16) | u32::from(u16::from(command));

    buf.reserve(length as usize);
    ordering.put_i16(buf, MESSAGE_STARTER);
    ordering.put_i32(buf, length);
    ordering.put_i32(buf, word as i32);
    buf.push(sync as u8);
    buf.extend_from_slice(payload);
    ordering.put_i16(buf, MESSAGE_TERMINATOR);
    Ok(())
}

/// Reads one request frame. Lengths above `max_length` are rejected before the payload
/// is read.
pub fn read_frame<R: Read>(
    r: &mut R,
    ordering: ByteOrdering,
    max_length: usize,
) -> Result<(FrameHeader, Vec<u8>), TransportError> {
    let marker = ordering.read_i16(r)?;
    if marker != MESSAGE_STARTER {
        return Err(ProtocolError::BadMarker(marker).into());
    }

    let raw_length = ordering.read_i32(r)?;
    let length = usize::try_from(raw_length)
        .ok()
        .filter(|len| *len >= HEADER_LENGTH + TERMINATOR_LENGTH)
        .ok_or(ProtocolError::InvalidLength(raw_length))?;
    if length > max_length {
        return Err(ProtocolError::FrameTooLarge {
            length,
            max: max_length,
        }
        .into());
    }

    let word = ordering.read_i32(r)? as u32;
    let sync = r.read_u8().map_err(TransportError::from_io)? != 0;
    let header = FrameHeader {
        length,
        command_id: (word & 0xFFFF) as u16,
        message_id: (word >> 16) as u16,
        sync,
    };

    let mut payload = vec![0; header.payload_length()];
    r.read_exact(&mut payload).map_err(TransportError::from_io)?;

    let terminator = ordering.read_i16(r)?;
    if terminator != MESSAGE_TERMINATOR {
        return Err(ProtocolError::BadTerminator(terminator).into());
    }
    Ok((header, payload))
}

/// Appends a reply frame; `None` writes the canonical empty reply.
pub fn encode_reply(
    buf: &mut Vec<u8>,
    ordering: ByteOrdering,
    message_id: u16,
    payload: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    let payload = payload.unwrap_or(&EMPTY_REPLY_PAYLOAD);
    let length = frame_length(payload.len(), REPLY_HEADER_LENGTH)?;
    buf.reserve(length as usize);
    ordering.put_i32(buf, length);
    ordering.put_u16(buf, message_id);
    buf.extend_from_slice(payload);
    Ok(())
}

/// Reads a reply frame. The empty reply reads back as `None`.
pub fn read_reply<R: Read>(
    r: &mut R,
    ordering: ByteOrdering,
    max_length: usize,
) -> Result<(u16, Option<Vec<u8>>), TransportError> {
    let raw_length = ordering.read_i32(r)?;
    let length = usize::try_from(raw_length)
        .ok()
        .filter(|len| *len >= REPLY_HEADER_LENGTH)
        .ok_or(ProtocolError::InvalidLength(raw_length))?;
    if length > max_length {
        return Err(ProtocolError::FrameTooLarge {
            length,
            max: max_length,
        }
        .into());
    }
    let message_id = ordering.read_u16(r)?;

    let mut payload = vec![0; length - REPLY_HEADER_LENGTH];
    r.read_exact(&mut payload).map_err(TransportError::from_io)?;

    if length == EMPTY_REPLY_LENGTH && payload == EMPTY_REPLY_PAYLOAD {
        return Ok((message_id, None));
    }
    Ok((message_id, Some(payload)))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn sync_frame_with_two_byte_payload_is_fifteen_bytes() {
        let mut buf = Vec::new();
        encode_frame(
            &mut buf,
            ByteOrdering::Host,
            SocketCommand::HandleSyncMessage,
            0,
            true,
            &[0x01, 0x02],
        )
        .unwrap();

        assert_eq!(buf.len(), 15);
        assert_eq!(
            buf,
            [0xFF, 0x7F, 15, 0, 0, 0, 3, 0, 0, 0, 1, 0x01, 0x02, 0x00, 0x80]
        );
    }

    #[test]
    fn header_round_trips_in_both_orders() {
        for ordering in [ByteOrdering::Host, ByteOrdering::Network] {
            let mut buf = Vec::new();
            encode_frame(
                &mut buf,
                ordering,
                SocketCommand::HandleSyncMessages,
                513,
                true,
                b"abc",
            )
            .unwrap();

            let (header, payload) = read_frame(&mut Cursor::new(&buf), ordering, 1024).unwrap();
            assert_eq!(
                header,
                FrameHeader {
                    length: 16,
                    command_id: 4,
                    message_id: 513,
                    sync: true,
                }
            );
            assert_eq!(header.command(), SocketCommand::HandleSyncMessages);
            assert_eq!(payload, b"abc");
        }
    }

    #[test]
    fn network_order_is_big_endian() {
        let mut buf = Vec::new();
        encode_frame(
            &mut buf,
            ByteOrdering::Network,
            SocketCommand::HandleOneWayMessage,
            0,
            false,
            &[],
        )
        .unwrap();
        assert_eq!(buf, [0x7F, 0xFF, 0, 0, 0, 13, 0, 0, 0, 1, 0, 0x80, 0x00]);
    }

    #[test]
    fn mismatched_byte_order_is_a_bad_marker() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, ByteOrdering::Host, SocketCommand::Unknown, 0, false, &[]).unwrap();
        let err = read_frame(&mut Cursor::new(&buf), ByteOrdering::Network, 1024).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::BadMarker(_))
        ));
    }

    #[test]
    fn corrupt_terminator_is_rejected() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, ByteOrdering::Host, SocketCommand::Unknown, 0, false, &[9]).unwrap();
        let last = buf.len() - 1;
        buf[last] = 0x7F;
        let err = read_frame(&mut Cursor::new(&buf), ByteOrdering::Host, 1024).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::BadTerminator(_))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected_before_payload() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, ByteOrdering::Host, SocketCommand::Unknown, 0, false, &[0; 64]).unwrap();
        let err = read_frame(&mut Cursor::new(&buf[..6]), ByteOrdering::Host, 32).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::FrameTooLarge { length: 77, max: 32 })
        ));
    }

    #[test]
    fn unknown_command_ids_map_to_unknown() {
        let header = FrameHeader {
            length: 13,
            command_id: 99,
            message_id: 0,
            sync: false,
        };
        assert_eq!(header.command(), SocketCommand::Unknown);
    }

    #[test]
    fn empty_reply_is_special_cased() {
        let mut buf = Vec::new();
        encode_reply(&mut buf, ByteOrdering::Host, 7, None).unwrap();
        assert_eq!(buf, [10, 0, 0, 0, 7, 0, 241, 216, 255, 255]);

        let (id, payload) = read_reply(&mut Cursor::new(&buf), ByteOrdering::Host, 1024).unwrap();
        assert_eq!(id, 7);
        assert_eq!(payload, None);
    }

    #[test]
    fn reply_round_trips() {
        for ordering in [ByteOrdering::Host, ByteOrdering::Network] {
            let mut buf = Vec::new();
            encode_reply(&mut buf, ordering, 300, Some(&[1, 2, 3, 4, 5])).unwrap();
            let (id, payload) = read_reply(&mut Cursor::new(&buf), ordering, 1024).unwrap();
            assert_eq!(id, 300);
            assert_eq!(payload, Some(vec![1, 2, 3, 4, 5]));
        }
    }

    #[test]
    fn truncated_reply_is_an_io_error() {
        let err = read_reply(&mut Cursor::new(&[20, 0, 0, 0, 1][..]), ByteOrdering::Host, 1024)
            .unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
