//! Index mutation commands, tagged on the wire by a [`CommandType`] byte.

use crate::codec::{
    PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError, read_record,
    wire_enum, write_record,
};

use super::{Filter, cluster::primary_id_or_generated};

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum CommandType: u8 {
        FilteredIndexDelete = 1,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FilteredIndexDelete(FilteredIndexDeleteCommand),
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::FilteredIndexDelete(_) => CommandType::FilteredIndexDelete,
        }
    }

    pub fn primary_id(&self) -> i32 {
        match self {
            Command::FilteredIndexDelete(command) => command.primary_id(),
        }
    }

    pub fn extended_id(&self) -> Option<&[u8]> {
        match self {
            Command::FilteredIndexDelete(command) => command.index_id.as_deref(),
        }
    }

    pub fn write_tagged(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_u8(self.command_type().into());
        match self {
            Command::FilteredIndexDelete(command) => write_record(writer, command),
        }
    }

    /// Reads the type byte and dispatches to the matching record reader.
    pub fn read_tagged(reader: &mut PrimitiveReader<'_>) -> Result<Self, FormatError> {
        match CommandType::try_from(reader.read_u8()?)? {
            CommandType::FilteredIndexDelete => {
                Ok(Command::FilteredIndexDelete(read_record(reader)?))
            }
        }
    }
}

/// Deletes every item of one index that matches `delete_filter`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilteredIndexDeleteCommand {
    pub index_id: Option<Vec<u8>>,
    pub target_index_name: String,
    pub delete_filter: Option<Filter>,
    /// Not on the wire; `0` means derive from `index_id`.
    pub explicit_primary_id: i32,
}

impl FilteredIndexDeleteCommand {
    pub fn new(
        index_id: impl Into<Vec<u8>>,
        target_index_name: impl Into<String>,
        delete_filter: Filter,
    ) -> Self {
        Self {
            index_id: Some(index_id.into()),
            target_index_name: target_index_name.into(),
            delete_filter: Some(delete_filter),
            explicit_primary_id: 0,
        }
    }

    pub fn primary_id(&self) -> i32 {
        primary_id_or_generated(self.explicit_primary_id, self.index_id.as_deref())
    }
}

impl VersionSerializable for FilteredIndexDeleteCommand {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "FilteredIndexDeleteCommand";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| {
            w.write_short_bytes(self.index_id.as_deref())?;
            w.write_string(&self.target_index_name)?;
            Filter::write_tagged(w, self.delete_filter.as_ref())
        })
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            Ok(Self {
                index_id: r.read_short_bytes()?,
                target_index_name: r.read_string()?,
                delete_filter: Filter::read_tagged(r)?,
                explicit_primary_id: 0,
            })
        })
    }
}

/// Envelope carrying a single [`Command`] as a cache payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheIndexUpdate {
    pub command: Command,
}

impl CacheIndexUpdate {
    pub fn new(command: Command) -> Self {
        Self { command }
    }

    pub fn primary_id(&self) -> i32 {
        self.command.primary_id()
    }

    pub fn extended_id(&self) -> Option<&[u8]> {
        self.command.extended_id()
    }
}

impl VersionSerializable for CacheIndexUpdate {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "CacheIndexUpdate";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| self.command.write_tagged(w))
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            Ok(Self {
                command: Command::read_tagged(r)?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{from_bytes, to_bytes},
        index::{Condition, DataType, Operation},
    };

    fn delete_command() -> FilteredIndexDeleteCommand {
        FilteredIndexDeleteCommand::new(
            7i32.to_le_bytes(),
            "by_date",
            Filter::Condition(Condition::new(
                "status",
                true,
                Operation::Equals,
                vec![3],
                DataType::Byte,
            )),
        )
    }

    #[test]
    fn update_round_trip() {
        let update = CacheIndexUpdate::new(Command::FilteredIndexDelete(delete_command()));
        let back: CacheIndexUpdate = from_bytes(&to_bytes(&update).unwrap()).unwrap();
        assert_eq!(back, update);
        assert_eq!(back.extended_id(), Some(&7i32.to_le_bytes()[..]));
    }

    #[test]
    fn primary_id_follows_index_id() {
        let mut command = delete_command();
        assert_eq!(command.primary_id(), 7);
        command.explicit_primary_id = 99;
        assert_eq!(command.primary_id(), 99);
    }

    #[test]
    fn unknown_command_type_is_rejected() {
        let mut reader = PrimitiveReader::new(&[9]);
        assert!(matches!(
            Command::read_tagged(&mut reader),
            Err(FormatError::UnknownDiscriminator { kind: "CommandType", value: 9 })
        ));
    }
}
