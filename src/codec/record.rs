use log::trace;

use super::{PrimitiveReader, PrimitiveWriter, error::FormatError, writer::int_count};

const HEADER_VERSION: u8 = 1;
const HEADER_LENGTH: i16 = 10;

const FLAG_NULL: u8 = 0x01;
const KNOWN_FLAGS: u8 = FLAG_NULL;

/// A type with a versioned wire format.
///
/// `serialize` always writes the newest layout and never writes a version number.
/// `deserialize` receives the version the peer wrote and must only read fields that
/// existed in that version, guarding each later addition with `version >= N`.
pub trait VersionSerializable: Sized {
    /// Bumped exactly once per on-wire layout change.
    const CURRENT_VERSION: u8;

    /// Oldest reader version able to make sense of what `serialize` writes.
    const MIN_VERSION: u8 = 1;

    /// Name used in error reports.
    const KIND: &'static str;

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError>;

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError>;
}

/// Writes `value` behind a record header carrying its version and body length.
pub fn write_record<T: VersionSerializable>(
    writer: &mut PrimitiveWriter,
    value: &T,
) -> Result<(), FormatError> {
    write_header(writer, 0, T::CURRENT_VERSION, T::MIN_VERSION);
    let at = writer.len() - 4;
    let start = writer.len();

    value.serialize(writer)?;

    let len = int_count(writer.len() - start, T::KIND)?;
    writer.patch_i32(at, len);
    Ok(())
}

/// Like [`write_record`], with `None` written as a bodiless null record.
pub fn write_optional_record<T: VersionSerializable>(
    writer: &mut PrimitiveWriter,
    value: Option<&T>,
) -> Result<(), FormatError> {
    match value {
        Some(value) => write_record(writer, value),
        None => {
            write_header(writer, FLAG_NULL, T::CURRENT_VERSION, T::MIN_VERSION);
            Ok(())
        }
    }
}

/// Reads a record written by [`write_record`]. On return the reader is positioned
/// right after the record body, whether the body was fully understood or not.
pub fn read_record<T: VersionSerializable>(reader: &mut PrimitiveReader<'_>) -> Result<T, FormatError> {
    read_optional_record(reader)?.ok_or(FormatError::UnexpectedNull(T::KIND))
}

pub fn read_optional_record<T: VersionSerializable>(
    reader: &mut PrimitiveReader<'_>,
) -> Result<Option<T>, FormatError> {
    let Some(header) = read_header(reader)? else {
        return Ok(None);
    };

    let body = reader.take(header.len)?;
    if header.min_version > T::CURRENT_VERSION {
        trace!("skipping {} record of version {}", T::KIND, header.version);
        return Err(FormatError::UnsupportedVersion {
            kind: T::KIND,
            required: header.min_version,
            supported: T::CURRENT_VERSION,
        });
    }

    let mut inner = PrimitiveReader::new(body);
    T::deserialize(&mut inner, header.version).map(Some)
}

/// Steps over a record of any type without decoding its body.
pub fn skip_record(reader: &mut PrimitiveReader<'_>) -> Result<(), FormatError> {
    if let Some(header) = read_header(reader)? {
        reader.skip(header.len)?;
    }
    Ok(())
}

struct RecordHeader {
    version: u8,
    min_version: u8,
    len: usize,
}

/// `None` for a null record, which has no body.
fn read_header(reader: &mut PrimitiveReader<'_>) -> Result<Option<RecordHeader>, FormatError> {
    let header_version = reader.read_u8()?;
    if header_version > HEADER_VERSION {
        return Err(FormatError::HeaderVersion(header_version));
    }
    let header_len = reader.read_i16()?;
    if header_len < HEADER_LENGTH {
        return Err(FormatError::HeaderLength(header_len));
    }
    let flags = reader.read_u8()?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(FormatError::HeaderFlags(flags));
    }
    let version = reader.read_u8()?;
    let min_version = reader.read_u8()?;
    let len = reader.read_count()?;
    reader.skip((header_len - HEADER_LENGTH) as usize)?;

    if flags & FLAG_NULL != 0 {
        return Ok(None);
    }
    Ok(Some(RecordHeader {
        version,
        min_version,
        len,
    }))
}

/// Encodes `value` as a standalone record.
pub fn to_bytes<T: VersionSerializable>(value: &T) -> Result<Vec<u8>, FormatError> {
    let mut writer = PrimitiveWriter::new();
    write_record(&mut writer, value)?;
    Ok(writer.into_inner())
}

pub fn from_bytes<T: VersionSerializable>(bytes: &[u8]) -> Result<T, FormatError> {
    read_record(&mut PrimitiveReader::new(bytes))
}

fn write_header(writer: &mut PrimitiveWriter, flags: u8, version: u8, min_version: u8) {
    writer.write_u8(HEADER_VERSION);
    writer.write_i16(HEADER_LENGTH);
    writer.write_u8(flags);
    writer.write_u8(version);
    writer.write_u8(min_version);
    writer.write_i32(0);
}
