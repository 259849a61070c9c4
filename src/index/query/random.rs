use crate::{
    codec::{
        PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError,
        read_optional_record, write_optional_record,
    },
    index::{Filter, FullDataIdInfo, ResultItem, cluster::primary_id_or_generated},
};

use super::{PrimaryQuery, QueryTypes, read_result_items, write_result_items};

/// Asks for `count` items picked at random from one index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RandomQuery {
    pub index_id: Option<Vec<u8>>,
    pub count: i32,
    pub target_index_name: String,
    pub exclude_data: bool,
    pub get_metadata: bool,
    pub filter: Option<Filter>,
    pub full_data_id_info: Option<FullDataIdInfo>,
    pub explicit_primary_id: i32,
}

impl RandomQuery {
    pub fn new(index_id: impl Into<Vec<u8>>, count: i32, target_index_name: impl Into<String>) -> Self {
        Self {
            index_id: Some(index_id.into()),
            count,
            target_index_name: target_index_name.into(),
            ..Self::default()
        }
    }
}

impl PrimaryQuery for RandomQuery {
    fn primary_id(&self) -> i32 {
        primary_id_or_generated(self.explicit_primary_id, self.index_id.as_deref())
    }

    fn query_id(&self) -> QueryTypes {
        QueryTypes::RandomQuery
    }
}

impl VersionSerializable for RandomQuery {
    const CURRENT_VERSION: u8 = 2;
    const KIND: &'static str = "RandomQuery";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| {
            w.write_short_bytes(self.index_id.as_deref())?;
            w.write_i32(self.count);
            w.write_string(&self.target_index_name)?;
            w.write_bool(self.exclude_data);
            w.write_bool(self.get_metadata);
            Filter::write_tagged(w, self.filter.as_ref())?;
            write_optional_record(w, self.full_data_id_info.as_ref())
        })
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            let mut query = Self {
                index_id: r.read_short_bytes()?,
                count: r.read_i32()?,
                target_index_name: r.read_string()?,
                exclude_data: r.read_bool()?,
                get_metadata: r.read_bool()?,
                filter: Filter::read_tagged(r)?,
                ..Self::default()
            };
            if version >= 2 {
                query.full_data_id_info = read_optional_record(r)?;
            }
            Ok(query)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RandomQueryResult {
    pub index_exists: bool,
    pub index_size: i32,
    pub metadata: Option<Vec<u8>>,
    pub result_item_list: Vec<ResultItem>,
    pub exception_info: String,
    pub virtual_count: i32,
}

impl VersionSerializable for RandomQueryResult {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "RandomQueryResult";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_bool(self.index_exists);
        writer.write_i32(self.index_size);
        writer.write_short_bytes(self.metadata.as_deref())?;
        write_result_items(writer, &self.result_item_list)?;
        writer.write_string(&self.exception_info)?;
        writer.write_i32(self.virtual_count);
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        Ok(Self {
            index_exists: reader.read_bool()?,
            index_size: reader.read_i32()?,
            metadata: reader.read_short_bytes()?,
            result_item_list: read_result_items(reader)?,
            exception_info: reader.read_string()?,
            virtual_count: reader.read_i32()?,
        })
    }
}
