//! Socket protocol between relay clients and servers.
//!
//! This module frames encoded relay messages on a TCP connection, dispatches them on the
//! server side, and correlates replies on the client side.
//!
//! # Overview
//!
//! Every request is one frame. The frame names a [`SocketCommand`] saying what the
//! payload holds (one message, a list of messages, or nothing for a runtime-info
//! request) and carries a sync flag. When the flag is set the server answers with a
//! reply frame; otherwise the client does not wait.
//!
//! A connection carries one request at a time in each direction. The client serializes
//! writers on a connection with a lock held for the whole frame, and for the reply read
//! on synchronous sends, so frames from concurrent callers never interleave.
//!
//! # Key Components
//!
//! - [`frame`]: request and reply frame encoding in either byte order.
//! - [`ProtocolTransport`]: frame reader/writer over any `Read + Write` stream.
//! - [`RelayServer`]: accepts connections on a [`ThreadPool`] and feeds a
//!   [`RelayComponent`](crate::component::RelayComponent).
//! - [`RelayClient`]: synchronous, bulk and asynchronous sends with reply correlation.
//! - [`BufferPool`]: reusable encode buffers returned on drop.
//!
//! # Binary Format
//!
//! ```text
//! request : i16 marker (0x7FFF) | i32 total length | i32 (message_id << 16 | command)
//!           | u8 sync | payload | i16 terminator (i16::MIN)
//! reply   : i32 total length | u16 message_id | payload
//! empty   : i32 10 | u16 message_id | F1 D8 FF FF
//! ```
//!
//! Total lengths include the header. Multi-byte fields follow the connection's byte
//! order; the payloads themselves are always little-endian codec output.
//!
//! # See Also
//!
//! - [`message`](crate::message): the envelopes carried in frame payloads.
mod buffer;
mod client;
mod command;
pub mod frame;
mod server;
mod thread;
mod transport;

pub use buffer::{BufferPool, PooledBuffer};
pub use client::{Pending, RelayClient};
pub use command::SocketCommand;
pub use error::{ProtocolError, TransportError};
pub use frame::{ByteOrdering, FrameHeader};
pub use server::{RelayServer, ShutdownHandle};
pub use thread::ThreadPool;
pub use transport::ProtocolTransport;

pub mod error {
    use std::{io, net::SocketAddr};

    use thiserror::Error;

    use crate::{codec::error::FormatError, message::RelayErrorType};

    /// The peer violated the framing or correlation rules.
    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum ProtocolError {
        #[error("[frame] bad starter marker {0:#06x}")]
        BadMarker(i16),

        #[error("[frame] bad terminator {0:#06x}")]
        BadTerminator(i16),

        #[error("[frame] invalid frame length {0}")]
        InvalidLength(i32),

        #[error("[frame] frame length {length} exceeds maximum {max}")]
        FrameTooLarge { length: usize, max: usize },

        #[error("[reply] expected reply to message {expected}, got {actual}")]
        ReplyIdMismatch { expected: u16, actual: u16 },

        #[error("[batch] sent {sent} messages, received {received} replies")]
        ReplyCount { sent: usize, received: usize },

        #[error("[batch] reply at position {position} has id {received}, sent id {sent}")]
        IdMismatch {
            position: usize,
            sent: i32,
            received: i32,
        },

        #[error("[send] pre-serialized two-way messages cannot be sent")]
        SerializedTwoWay,
    }

    #[derive(Debug, Error)]
    pub enum TransportError {
        #[error("[io] {0}")]
        Io(#[from] io::Error),

        #[error("[timeout] no reply within the receive timeout")]
        Timeout,

        #[error("[unreachable] {address}: {source}")]
        Unreachable {
            address: SocketAddr,
            #[source]
            source: io::Error,
        },

        #[error("[protocol] {0}")]
        Protocol(#[from] ProtocolError),

        #[error("[format] {0}")]
        Format(#[from] FormatError),

        #[error("[encode] {0}")]
        Encode(#[from] bincode::error::EncodeError),

        #[error("[decode] {0}")]
        Decode(#[from] bincode::error::DecodeError),

        #[error("[async] operation abandoned before completion")]
        Abandoned,

        #[error("[pool] worker pool is shut down")]
        PoolClosed,
    }

    impl TransportError {
        /// Maps socket timeouts to [`TransportError::Timeout`].
        pub fn from_io(err: io::Error) -> Self {
            match err.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
                _ => TransportError::Io(err),
            }
        }

        pub fn error_type(&self) -> RelayErrorType {
            match self {
                TransportError::Unreachable { .. } => RelayErrorType::NodeUnreachable,
                TransportError::Timeout => RelayErrorType::TimedOut,
                _ => RelayErrorType::Unknown,
            }
        }

        /// Whether the connection is unusable afterwards.
        pub fn is_connection_fatal(&self) -> bool {
            matches!(
                self,
                TransportError::Io(_)
                    | TransportError::Timeout
                    | TransportError::Unreachable { .. }
                    | TransportError::Protocol(
                        ProtocolError::BadMarker(_)
                            | ProtocolError::BadTerminator(_)
                            | ProtocolError::InvalidLength(_)
                            | ProtocolError::FrameTooLarge { .. }
                            | ProtocolError::ReplyIdMismatch { .. }
                    )
            )
        }
    }
}
