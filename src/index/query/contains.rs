use crate::{
    codec::{
        PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError,
        read_optional_record, short_count, write_optional_record,
    },
    index::{FullDataIdInfo, IndexItem, MultiItemResult, cluster::primary_id_or_generated},
};

use super::{PrimaryQuery, QueryTypes};

/// Looks up specific items in one index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainsIndexQuery {
    pub index_id: Option<Vec<u8>>,
    pub index_item_list: Vec<IndexItem>,
    pub target_index_name: String,
    pub tags_from_indexes: Vec<String>,
    pub exclude_data: bool,
    pub get_metadata: bool,
    pub full_data_id_info: Option<FullDataIdInfo>,
    pub explicit_primary_id: i32,
}

impl ContainsIndexQuery {
    pub fn new(
        index_id: impl Into<Vec<u8>>,
        items: Vec<IndexItem>,
        target_index_name: impl Into<String>,
    ) -> Self {
        Self {
            index_id: Some(index_id.into()),
            index_item_list: items,
            target_index_name: target_index_name.into(),
            ..Self::default()
        }
    }
}

impl PrimaryQuery for ContainsIndexQuery {
    fn primary_id(&self) -> i32 {
        primary_id_or_generated(self.explicit_primary_id, self.index_id.as_deref())
    }

    fn query_id(&self) -> QueryTypes {
        QueryTypes::ContainsIndexQuery
    }
}

impl VersionSerializable for ContainsIndexQuery {
    const CURRENT_VERSION: u8 = 2;
    const KIND: &'static str = "ContainsIndexQuery";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_short_bytes(self.index_id.as_deref())?;
        writer.write_u16(short_count(self.index_item_list.len(), "index items")?);
        for item in &self.index_item_list {
            item.serialize(writer)?;
        }
        writer.write_string(&self.target_index_name)?;
        writer.write_string_list(&self.tags_from_indexes)?;
        writer.write_bool(self.exclude_data);
        writer.write_bool(self.get_metadata);
        write_optional_record(writer, self.full_data_id_info.as_ref())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let index_id = reader.read_short_bytes()?;
        let count = reader.read_u16()?;
        let index_item_list = (0..count)
            .map(|_| IndexItem::deserialize(reader, IndexItem::CURRENT_VERSION))
            .collect::<Result<_, _>>()?;
        let mut query = Self {
            index_id,
            index_item_list,
            target_index_name: reader.read_string()?,
            tags_from_indexes: reader.read_string_list()?,
            exclude_data: reader.read_bool()?,
            get_metadata: reader.read_bool()?,
            ..Self::default()
        };
        if version >= 2 {
            query.full_data_id_info = read_optional_record(reader)?;
        }
        Ok(query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainsIndexQueryResult {
    pub multi_item_result: Option<MultiItemResult>,
    pub metadata: Option<Vec<u8>>,
    pub index_size: i32,
    pub index_exists: bool,
    pub exception_info: String,
    pub virtual_count: i32,
}

impl VersionSerializable for ContainsIndexQueryResult {
    const CURRENT_VERSION: u8 = 2;
    const KIND: &'static str = "ContainsIndexQueryResult";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        match &self.multi_item_result {
            Some(result) if !result.items.is_empty() => {
                writer.write_u8(1);
                result.write_inline(writer)?;
            }
            _ => writer.write_u8(0),
        }
        writer.write_short_bytes(self.metadata.as_deref())?;
        writer.write_i32(self.index_size);
        writer.write_bool(self.index_exists);
        writer.write_string(&self.exception_info)?;
        writer.write_i32(self.virtual_count);
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let multi_item_result = match reader.read_u8()? {
            0 => None,
            _ => Some(MultiItemResult::read_inline(reader)?),
        };
        let mut result = Self {
            multi_item_result,
            metadata: reader.read_short_bytes()?,
            index_size: reader.read_i32()?,
            index_exists: reader.read_bool()?,
            exception_info: reader.read_string()?,
            virtual_count: 0,
        };
        if version >= 2 {
            result.virtual_count = reader.read_i32()?;
        }
        Ok(result)
    }
}
