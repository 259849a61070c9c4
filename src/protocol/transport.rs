use std::io::{self, BufRead, BufReader, Read, Write};

use bincode::{
    config::{BigEndian, Configuration, Fixint},
    decode_from_slice, encode_to_vec,
};

use crate::{component::ComponentRuntimeInfo, config::SocketSettings};

use super::{
    SocketCommand,
    error::TransportError,
    frame::{self, ByteOrdering, FrameHeader},
};

/// Reads and writes frames on one connection. Each frame is encoded in full and
/// handed to the stream with a single `write_all`.
pub struct ProtocolTransport<T: Read + Write> {
    stream: BufReader<T>,
    ordering: ByteOrdering,
    max_frame_length: usize,
    send_buffer_size: usize,
    config: Configuration<BigEndian, Fixint>,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T, settings: &SocketSettings) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        Self {
            stream: BufReader::with_capacity(settings.receive_buffer_size.max(1), stream),
            ordering: ByteOrdering::from_network_order(settings.use_network_order),
            max_frame_length: settings.maximum_frame_length,
            send_buffer_size: settings.send_buffer_size,
            config,
        }
    }

    pub fn ordering(&self) -> ByteOrdering {
        self.ordering
    }

    pub fn get_ref(&self) -> &T {
        self.stream.get_ref()
    }

    pub fn write_frame(
        &mut self,
        command: SocketCommand,
        message_id: u16,
        sync: bool,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut buf = Vec::with_capacity(self.send_buffer_size.min(payload.len() + 16));
        frame::encode_frame(&mut buf, self.ordering, command, message_id, sync, payload)?;
        self.send(&buf)
    }

    /// Waits for the next byte within the stream's read timeout. `false` means the peer
    /// closed the connection. Nothing is consumed, so a timeout here never splits a frame.
    pub fn poll_readable(&mut self) -> Result<bool, TransportError> {
        match self.stream.fill_buf() {
            Ok(buf) => Ok(!buf.is_empty()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(true),
            Err(err) => Err(TransportError::from_io(err)),
        }
    }

    pub fn read_frame(&mut self) -> Result<(FrameHeader, Vec<u8>), TransportError> {
        frame::read_frame(&mut self.stream, self.ordering, self.max_frame_length)
    }

    pub fn write_reply(&mut self, message_id: u16, payload: Option<&[u8]>) -> Result<(), TransportError> {
        let len = payload.map_or(0, <[u8]>::len);
        let mut buf = Vec::with_capacity(self.send_buffer_size.min(len + 16));
        frame::encode_reply(&mut buf, self.ordering, message_id, payload)?;
        self.send(&buf)
    }

    pub fn read_reply(&mut self) -> Result<(u16, Option<Vec<u8>>), TransportError> {
        frame::read_reply(&mut self.stream, self.ordering, self.max_frame_length)
    }

    pub fn encode_runtime_info(&self, info: &[ComponentRuntimeInfo]) -> Result<Vec<u8>, TransportError> {
        Ok(encode_to_vec(info, self.config)?)
    }

    pub fn decode_runtime_info(&self, bytes: &[u8]) -> Result<Vec<ComponentRuntimeInfo>, TransportError> {
        let (info, _) = decode_from_slice(bytes, self.config)?;
        Ok(info)
    }

    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.get_mut();
        stream.write_all(buf).map_err(TransportError::from_io)?;
        stream.flush().map_err(TransportError::from_io)
    }
}
