use crate::{
    codec::{
        PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError,
        read_optional_record, write_optional_record,
    },
    index::{Filter, FullDataIdInfo, ResultItem, cluster::primary_id_or_generated},
};

use super::{PrimaryQuery, QueryTypes, read_result_items, write_result_items};

/// Returns the first and last pages of one index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirstLastQuery {
    pub index_id: Option<Vec<u8>>,
    pub first_page_size: i32,
    pub last_page_size: i32,
    pub target_index_name: String,
    pub exclude_data: bool,
    pub get_metadata: bool,
    pub filter: Option<Filter>,
    pub full_data_id_info: Option<FullDataIdInfo>,
    pub explicit_primary_id: i32,
}

impl FirstLastQuery {
    pub fn new(
        index_id: impl Into<Vec<u8>>,
        first_page_size: i32,
        last_page_size: i32,
        target_index_name: impl Into<String>,
    ) -> Self {
        Self {
            index_id: Some(index_id.into()),
            first_page_size,
            last_page_size,
            target_index_name: target_index_name.into(),
            ..Self::default()
        }
    }
}

impl PrimaryQuery for FirstLastQuery {
    fn primary_id(&self) -> i32 {
        primary_id_or_generated(self.explicit_primary_id, self.index_id.as_deref())
    }

    fn query_id(&self) -> QueryTypes {
        QueryTypes::FirstLastQuery
    }
}

impl VersionSerializable for FirstLastQuery {
    const CURRENT_VERSION: u8 = 3;
    const KIND: &'static str = "FirstLastQuery";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_short_bytes(self.index_id.as_deref())?;
        writer.write_i32(self.first_page_size);
        writer.write_i32(self.last_page_size);
        writer.write_string(&self.target_index_name)?;
        // retired criterion list slot
        writer.write_u8(0);
        writer.write_bool(self.exclude_data);
        writer.write_bool(self.get_metadata);
        Filter::write_tagged(writer, self.filter.as_ref())?;
        write_optional_record(writer, self.full_data_id_info.as_ref())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let mut query = Self {
            index_id: reader.read_short_bytes()?,
            first_page_size: reader.read_i32()?,
            last_page_size: reader.read_i32()?,
            target_index_name: reader.read_string()?,
            ..Self::default()
        };
        reader.read_u8()?;
        query.exclude_data = reader.read_bool()?;
        query.get_metadata = reader.read_bool()?;
        if version >= 2 {
            query.filter = Filter::read_tagged(reader)?;
        }
        if version >= 3 {
            query.full_data_id_info = read_optional_record(reader)?;
        }
        Ok(query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirstLastQueryResult {
    pub index_exists: bool,
    pub index_size: i32,
    pub metadata: Option<Vec<u8>>,
    pub first_page_result_item_list: Vec<ResultItem>,
    pub last_page_result_item_list: Vec<ResultItem>,
    pub exception_info: String,
    pub virtual_count: i32,
}

impl VersionSerializable for FirstLastQueryResult {
    const CURRENT_VERSION: u8 = 2;
    const KIND: &'static str = "FirstLastQueryResult";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_bool(self.index_exists);
        writer.write_i32(self.index_size);
        writer.write_short_bytes(self.metadata.as_deref())?;
        write_result_items(writer, &self.first_page_result_item_list)?;
        write_result_items(writer, &self.last_page_result_item_list)?;
        writer.write_string(&self.exception_info)?;
        writer.write_i32(self.virtual_count);
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let mut result = Self {
            index_exists: reader.read_bool()?,
            index_size: reader.read_i32()?,
            metadata: reader.read_short_bytes()?,
            first_page_result_item_list: read_result_items(reader)?,
            last_page_result_item_list: read_result_items(reader)?,
            exception_info: reader.read_string()?,
            virtual_count: 0,
        };
        if version >= 2 {
            result.virtual_count = reader.read_i32()?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{from_bytes, to_bytes},
        index::{Condition, DataType, IndexDataItem, IndexItem, Operation},
    };

    #[test]
    fn query_round_trip() {
        let mut query = FirstLastQuery::new(vec![8, 0, 0, 0], 5, 3, "by_date");
        query.filter = Some(Filter::Condition(Condition::new(
            "kind",
            true,
            Operation::NotEquals,
            vec![0],
            DataType::Byte,
        )));
        let back: FirstLastQuery = from_bytes(&to_bytes(&query).unwrap()).unwrap();
        assert_eq!(back, query);
        assert_eq!(back.primary_id(), 8);
    }

    #[test]
    fn version_one_query_has_no_filter() {
        let mut query = FirstLastQuery::new(vec![8], 5, 3, "by_date");
        query.filter = Some(Filter::and(vec![]));
        let mut w = PrimitiveWriter::new();
        query.serialize(&mut w).unwrap();
        let bytes = w.into_inner();

        let back = FirstLastQuery::deserialize(&mut PrimitiveReader::new(&bytes), 1).unwrap();
        assert_eq!(back.first_page_size, 5);
        assert_eq!(back.last_page_size, 3);
        assert_eq!(back.filter, None);
    }

    #[test]
    fn result_round_trip() {
        let item = |id: u8| {
            ResultItem::new(vec![8], IndexDataItem::new(IndexItem::new(vec![id]), None))
        };
        let result = FirstLastQueryResult {
            index_exists: true,
            index_size: 40,
            metadata: None,
            first_page_result_item_list: vec![item(1), item(2)],
            last_page_result_item_list: vec![item(40)],
            exception_info: String::new(),
            virtual_count: 40,
        };
        let back: FirstLastQueryResult = from_bytes(&to_bytes(&result).unwrap()).unwrap();
        assert_eq!(back, result);
    }
}
