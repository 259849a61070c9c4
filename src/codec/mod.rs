//! Binary primitive codec and versioned serialization.
//!
//! Every structure that crosses the wire between relay nodes is encoded with the
//! primitives defined here. The codec is deliberately small: fixed-width little-endian
//! integers, 7-bit length-prefixed UTF-8 strings, and two framing helpers that make
//! payloads skippable by readers that do not understand them.
//!
//! # Overview
//!
//! Encoding happens through a [`PrimitiveWriter`] that appends to an owned buffer, and
//! decoding through a [`PrimitiveReader`] that walks a borrowed slice with a cursor.
//! Reading past the end of the input is always a [`FormatError`]; there is no partial
//! recovery inside a single value.
//!
//! # Key Components
//!
//! - [`PrimitiveWriter`] / [`PrimitiveReader`]: primitive values, length-prefixed byte
//!   arrays and strings.
//! - Regions ([`PrimitiveWriter::region`], [`PrimitiveReader::region`]): a scoped
//!   length-prefixed span. The reader is bounded by the declared length and always
//!   resumes right after the span, so trailing fields written by a newer peer are
//!   skipped without desynchronizing the stream.
//! - [`VersionSerializable`]: the contract every versioned type implements. A type never
//!   writes its own version; the record container ([`write_record`]) does.
//!
//! # Binary Format
//!
//! ```text
//! region : u8 header_len (4) | i32 body_len | body
//! record : u8 header_version (1) | i16 header_len (10) | u8 flags
//!          | u8 data_version | u8 data_min_version | i32 data_len | body
//! string : 7-bit varint byte length | UTF-8 bytes
//! ```
//!
//! # See Also
//!
//! - [`index`](crate::index): query, filter and command types encoded with this codec.
//! - [`message`](crate::message): the relay message envelope.
mod reader;
mod record;
mod writer;

pub use reader::PrimitiveReader;
pub use record::{
    VersionSerializable, from_bytes, read_optional_record, read_record, skip_record, to_bytes,
    write_optional_record, write_record,
};
pub use writer::PrimitiveWriter;
pub(crate) use writer::{int_count, short_count};

/// Declares a fieldless enum carried on the wire as a fixed-width integer, with the
/// `TryFrom`/`From` conversions used by the readers and writers.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr($repr)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl TryFrom<$repr> for $name {
            type Error = $crate::codec::error::FormatError;

            fn try_from(value: $repr) -> Result<Self, $crate::codec::error::FormatError> {
                match value {
                    $(v if v == $value => Ok(Self::$variant),)+
                    other => Err($crate::codec::error::FormatError::UnknownDiscriminator {
                        kind: stringify!($name),
                        value: other as i64,
                    }),
                }
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> Self {
                value as $repr
            }
        }
    };
}

pub(crate) use wire_enum;

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum FormatError {
        #[error("[truncated] needed {needed} bytes, {remaining} remaining")]
        Truncated { needed: usize, remaining: usize },

        #[error("[string] invalid UTF-8: {0}")]
        InvalidString(#[from] std::string::FromUtf8Error),

        #[error("[length] {field} length {length} does not fit its prefix")]
        LengthOverflow { field: &'static str, length: usize },

        #[error("[length] negative length {0}")]
        NegativeLength(i32),

        #[error("[varint] malformed 7-bit encoded integer")]
        MalformedVarint,

        #[error("[discriminator] unknown {kind} value {value}")]
        UnknownDiscriminator { kind: &'static str, value: i64 },

        #[error("[region] invalid header length {0}")]
        RegionHeader(u8),

        #[error("[record] unsupported header version {0}")]
        HeaderVersion(u8),

        #[error("[record] invalid header length {0}")]
        HeaderLength(i16),

        #[error("[record] unknown header flags {0:#04x}")]
        HeaderFlags(u8),

        #[error("[record] unexpected null {0} record")]
        UnexpectedNull(&'static str),

        #[error("[version] {kind} requires version {required}, reader supports up to {supported}")]
        UnsupportedVersion {
            kind: &'static str,
            required: u8,
            supported: u8,
        },

        #[error("[element {position}] {context}: {source}")]
        Element {
            position: usize,
            context: String,
            #[source]
            source: Box<FormatError>,
        },
    }
}
