use std::collections::BTreeMap;

use crate::codec::{
    PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError,
    read_record, short_count, write_record,
};

/// Anything that exposes an item id and named tag values to the filter and sort engine.
pub trait TagSource {
    fn item_id(&self) -> Option<&[u8]>;

    /// `None` when the tag is absent, `Some(None)` when present without a value.
    fn tag(&self, name: &str) -> Option<Option<&[u8]>>;
}

pub type Tags = BTreeMap<String, Option<Vec<u8>>>;

/// An item inside an index: its id plus tag values, all raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexItem {
    pub item_id: Option<Vec<u8>>,
    pub tags: Tags,
}

impl IndexItem {
    pub fn new(item_id: impl Into<Vec<u8>>) -> Self {
        Self {
            item_id: Some(item_id.into()),
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.tags.insert(name.into(), Some(value.into()));
        self
    }

    pub fn try_get_tag_value(&self, name: &str) -> Option<Option<&[u8]>> {
        self.tags.get(name).map(|v| v.as_deref())
    }

    fn write_fields(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_short_bytes(self.item_id.as_deref())?;
        writer.write_u16(short_count(self.tags.len(), "tags")?);
        for (name, value) in &self.tags {
            writer.write_string(name)?;
            writer.write_short_bytes(value.as_deref())?;
        }
        Ok(())
    }

    fn read_fields(reader: &mut PrimitiveReader<'_>) -> Result<Self, FormatError> {
        let item_id = reader.read_short_bytes()?;
        let count = reader.read_u16()?;
        let mut tags = Tags::new();
        for _ in 0..count {
            let name = reader.read_string()?;
            tags.insert(name, reader.read_short_bytes()?);
        }
        Ok(Self { item_id, tags })
    }
}

impl TagSource for IndexItem {
    fn item_id(&self) -> Option<&[u8]> {
        self.item_id.as_deref()
    }

    fn tag(&self, name: &str) -> Option<Option<&[u8]>> {
        self.try_get_tag_value(name)
    }
}

impl VersionSerializable for IndexItem {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "IndexItem";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        self.write_fields(writer)
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        Self::read_fields(reader)
    }
}

/// An [`IndexItem`] carrying its data blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexDataItem {
    pub item: IndexItem,
    pub data: Option<Vec<u8>>,
}

impl IndexDataItem {
    pub fn new(item: IndexItem, data: Option<Vec<u8>>) -> Self {
        Self { item, data }
    }
}

impl TagSource for IndexDataItem {
    fn item_id(&self) -> Option<&[u8]> {
        self.item.item_id()
    }

    fn tag(&self, name: &str) -> Option<Option<&[u8]>> {
        self.item.tag(name)
    }
}

impl VersionSerializable for IndexDataItem {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "IndexDataItem";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        self.item.write_fields(writer)?;
        writer.write_short_bytes(self.data.as_deref())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        Ok(Self {
            item: IndexItem::read_fields(reader)?,
            data: reader.read_short_bytes()?,
        })
    }
}

/// An item returned from a multi-index query, tagged with the index it came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultItem {
    pub item: IndexDataItem,
    pub index_id: Option<Vec<u8>>,
}

impl ResultItem {
    pub fn new(index_id: impl Into<Vec<u8>>, item: IndexDataItem) -> Self {
        Self {
            item,
            index_id: Some(index_id.into()),
        }
    }
}

impl TagSource for ResultItem {
    fn item_id(&self) -> Option<&[u8]> {
        self.item.item_id()
    }

    fn tag(&self, name: &str) -> Option<Option<&[u8]>> {
        self.item.tag(name)
    }
}

impl VersionSerializable for ResultItem {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "ResultItem";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        self.item.serialize(writer)?;
        writer.write_short_bytes(self.index_id.as_deref())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        Ok(Self {
            item: IndexDataItem::deserialize(reader, version)?,
            index_id: reader.read_short_bytes()?,
        })
    }
}

/// Per-index metadata returned alongside query results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexHeader {
    pub metadata: Option<Vec<u8>>,
    pub virtual_count: i32,
}

impl VersionSerializable for IndexHeader {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "IndexHeader";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_short_bytes(self.metadata.as_deref())?;
        writer.write_i32(self.virtual_count);
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        Ok(Self {
            metadata: reader.read_short_bytes()?,
            virtual_count: reader.read_i32()?,
        })
    }
}

/// Items of one index plus that index id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiItemResult {
    pub index_id: Option<Vec<u8>>,
    pub items: Vec<IndexDataItem>,
}

impl MultiItemResult {
    pub(crate) fn write_inline(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_u16(short_count(self.items.len(), "multi item result")?);
        if !self.items.is_empty() {
            for item in &self.items {
                item.serialize(writer)?;
            }
            writer.write_short_bytes(self.index_id.as_deref())?;
        }
        Ok(())
    }

    pub(crate) fn read_inline(reader: &mut PrimitiveReader<'_>) -> Result<Self, FormatError> {
        let count = reader.read_u16()?;
        if count == 0 {
            return Ok(Self::default());
        }
        let items = (0..count)
            .map(|_| IndexDataItem::deserialize(reader, IndexDataItem::CURRENT_VERSION))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            index_id: reader.read_short_bytes()?,
            items,
        })
    }
}

/// `u16` count followed by each header as a record; absent maps write `0`.
pub(crate) fn write_header_map(
    writer: &mut PrimitiveWriter,
    headers: &BTreeMap<Vec<u8>, IndexHeader>,
) -> Result<(), FormatError> {
    writer.write_u16(short_count(headers.len(), "index header map")?);
    for (index_id, header) in headers {
        writer.write_short_bytes(Some(index_id))?;
        write_record(writer, header)?;
    }
    Ok(())
}

pub(crate) fn read_header_map(
    reader: &mut PrimitiveReader<'_>,
) -> Result<BTreeMap<Vec<u8>, IndexHeader>, FormatError> {
    let count = reader.read_u16()?;
    let mut headers = BTreeMap::new();
    for _ in 0..count {
        let index_id = reader.read_short_bytes()?.unwrap_or_default();
        headers.insert(index_id, read_record(reader)?);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_bytes, to_bytes};

    fn sample() -> IndexItem {
        IndexItem::new(vec![1, 2, 3, 4])
            .with_tag("score", 10i32.to_le_bytes())
            .with_tag("name", b"bob".to_vec())
    }

    #[test]
    fn tag_lookup_distinguishes_absent_and_null() {
        let mut item = sample();
        item.tags.insert("empty".into(), None);
        assert_eq!(item.tag("name"), Some(Some(&b"bob"[..])));
        assert_eq!(item.tag("empty"), Some(None));
        assert_eq!(item.tag("missing"), None);
    }

    #[test]
    fn empty_tag_value_reads_back_as_null() {
        let item = IndexItem::new(vec![7]).with_tag("blank", Vec::new());
        let back: IndexItem = from_bytes(&to_bytes(&item).unwrap()).unwrap();
        assert_eq!(back.tag("blank"), Some(None));
    }

    #[test]
    fn result_item_record() {
        let item = ResultItem::new(
            b"idx".to_vec(),
            IndexDataItem::new(sample(), Some(b"payload".to_vec())),
        );
        let back: ResultItem = from_bytes(&to_bytes(&item).unwrap()).unwrap();
        assert_eq!(back, item);
        assert_eq!(back.item_id(), Some(&[1, 2, 3, 4][..]));
    }

    #[test]
    fn default_items_round_trip() {
        let back: ResultItem = from_bytes(&to_bytes(&ResultItem::default()).unwrap()).unwrap();
        assert_eq!(back, ResultItem::default());
    }

    #[test]
    fn empty_multi_item_result_omits_index_id() {
        let mut w = PrimitiveWriter::new();
        MultiItemResult {
            index_id: Some(vec![1]),
            items: vec![],
        }
        .write_inline(&mut w)
        .unwrap();
        assert_eq!(w.as_slice(), &[0, 0]);
    }
}
