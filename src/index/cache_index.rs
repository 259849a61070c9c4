use std::collections::BTreeMap;

use crate::codec::{
    PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError, int_count,
    short_count,
};

use super::{IndexDataItem, IndexItem, cluster::primary_id_or_generated};

/// Save operation for one index: items to add, items to delete and optional metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheIndex {
    pub index_id: Option<Vec<u8>>,
    pub target_index_name: String,
    /// Index name to the tag names stored with its items.
    pub index_tag_mapping: BTreeMap<String, Vec<String>>,
    pub add_list: Vec<IndexDataItem>,
    pub delete_list: Vec<IndexItem>,
    pub metadata: Option<Vec<u8>>,
    pub update_metadata: bool,
    pub replace_full_index: bool,
    pub preserve_data: bool,
    pub index_virtual_count_mapping: BTreeMap<String, i32>,
    pub explicit_primary_id: i32,
}

impl CacheIndex {
    pub fn new(index_id: impl Into<Vec<u8>>, target_index_name: impl Into<String>) -> Self {
        Self {
            index_id: Some(index_id.into()),
            target_index_name: target_index_name.into(),
            ..Self::default()
        }
    }

    pub fn primary_id(&self) -> i32 {
        primary_id_or_generated(self.explicit_primary_id, self.index_id.as_deref())
    }
}

impl VersionSerializable for CacheIndex {
    const CURRENT_VERSION: u8 = 4;
    const KIND: &'static str = "CacheIndex";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_short_bytes(self.index_id.as_deref())?;
        writer.write_string(&self.target_index_name)?;

        writer.write_u16(short_count(self.index_tag_mapping.len(), "index tag mapping")?);
        for (index_name, tags) in &self.index_tag_mapping {
            writer.write_string(index_name)?;
            writer.write_string_list(tags)?;
        }

        writer.write_i32(int_count(self.add_list.len(), "add list")?);
        for item in &self.add_list {
            item.serialize(writer)?;
        }
        writer.write_i32(int_count(self.delete_list.len(), "delete list")?);
        for item in &self.delete_list {
            item.serialize(writer)?;
        }

        writer.write_short_bytes(self.metadata.as_deref())?;
        writer.write_bool(self.update_metadata);
        writer.write_bool(self.replace_full_index);

        // v2
        writer.write_bool(self.preserve_data);

        // v3
        writer.write_u16(short_count(
            self.index_virtual_count_mapping.len(),
            "virtual count mapping",
        )?);
        for (index_name, count) in &self.index_virtual_count_mapping {
            writer.write_string(index_name)?;
            writer.write_i32(*count);
        }

        // v4
        writer.write_i32(self.explicit_primary_id);
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let mut index = Self {
            index_id: reader.read_short_bytes()?,
            target_index_name: reader.read_string()?,
            ..Self::default()
        };

        for _ in 0..reader.read_u16()? {
            let index_name = reader.read_string()?;
            let tags = reader.read_string_list()?;
            index.index_tag_mapping.insert(index_name, tags);
        }

        let add_count = reader.read_count()?;
        index.add_list = (0..add_count)
            .map(|_| IndexDataItem::deserialize(reader, IndexDataItem::CURRENT_VERSION))
            .collect::<Result<_, _>>()?;
        let delete_count = reader.read_count()?;
        index.delete_list = (0..delete_count)
            .map(|_| IndexItem::deserialize(reader, IndexItem::CURRENT_VERSION))
            .collect::<Result<_, _>>()?;

        index.metadata = reader.read_short_bytes()?;
        index.update_metadata = reader.read_bool()?;
        index.replace_full_index = reader.read_bool()?;

        if version >= 2 {
            index.preserve_data = reader.read_bool()?;
        }
        if version >= 3 {
            for _ in 0..reader.read_u16()? {
                let index_name = reader.read_string()?;
                index
                    .index_virtual_count_mapping
                    .insert(index_name, reader.read_i32()?);
            }
        }
        if version >= 4 {
            index.explicit_primary_id = reader.read_i32()?;
        }
        Ok(index)
    }
}
