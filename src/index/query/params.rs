use crate::{
    codec::{PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError},
    index::Filter,
};

/// Per-index overrides on a multi-index query. Unset values fall back to the query's own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexIdParams {
    pub max_items: i32,
    pub filter: Option<Filter>,
}

impl Default for IndexIdParams {
    fn default() -> Self {
        Self {
            max_items: -1,
            filter: None,
        }
    }
}

impl IndexIdParams {
    pub fn new(max_items: i32, filter: Option<Filter>) -> Self {
        Self { max_items, filter }
    }

    pub fn max_items_or(&self, base: i32) -> i32 {
        if self.max_items <= 0 { base } else { self.max_items }
    }

    pub fn filter_or<'a>(&'a self, base: Option<&'a Filter>) -> Option<&'a Filter> {
        self.filter.as_ref().or(base)
    }
}

impl VersionSerializable for IndexIdParams {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "IndexIdParams";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| {
            w.write_i32(self.max_items);
            Filter::write_tagged(w, self.filter.as_ref())
        })
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            Ok(Self {
                max_items: r.read_i32()?,
                filter: Filter::read_tagged(r)?,
            })
        })
    }
}
