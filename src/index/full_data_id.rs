use crate::codec::{
    PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError,
    read_optional_record, read_record, wire_enum, write_optional_record, write_record,
};

use super::{DataType, item::TagSource};

wire_enum! {
    /// Source of one part of a full data id.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum FullDataIdType: u8 {
        #[default]
        IndexId = 0,
        ItemId = 1,
        Tag = 2,
    }
}

wire_enum! {
    /// Whether a part contributes its whole value or an `offset`/`count` slice of it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum FullDataIdPartFormat: u8 {
        #[default]
        Full = 0,
        Sliced = 1,
    }
}

/// Describes how the id of the full data object behind an index item is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullDataIdInfo {
    pub related_type_name: String,
    pub field_list: FullDataIdFieldList,
}

impl FullDataIdInfo {
    /// Concatenates every part for `item` in index `index_id`. `None` when any part is
    /// missing.
    pub fn full_data_id<T: TagSource + ?Sized>(
        &self,
        index_id: &[u8],
        item: &T,
    ) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        self.field_list.append(index_id, item, &mut out)?;
        Some(out)
    }
}

impl VersionSerializable for FullDataIdInfo {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "FullDataIdInfo";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| {
            w.write_string(&self.related_type_name)?;
            write_record(w, &self.field_list)
        })
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            Ok(Self {
                related_type_name: r.read_string()?,
                field_list: read_record(r)?,
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullDataIdFieldList {
    pub fields: Vec<FullDataIdField>,
}

impl FullDataIdFieldList {
    fn append<T: TagSource + ?Sized>(
        &self,
        index_id: &[u8],
        item: &T,
        out: &mut Vec<u8>,
    ) -> Option<()> {
        for field in &self.fields {
            field.append(index_id, item, out)?;
        }
        Some(())
    }
}

impl VersionSerializable for FullDataIdFieldList {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "FullDataIdFieldList";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| {
            let count = u8::try_from(self.fields.len()).map_err(|_| {
                FormatError::LengthOverflow {
                    field: "full data id fields",
                    length: self.fields.len(),
                }
            })?;
            w.write_u8(count);
            for field in &self.fields {
                write_record(w, field)?;
            }
            Ok(())
        })
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            let count = r.read_u8()?;
            let fields = (0..count)
                .map(|_| read_record(r))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Self { fields })
        })
    }
}

/// One part of a full data id. A part with a nested list contributes the nested
/// concatenation instead of its own value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullDataIdField {
    pub kind: FullDataIdType,
    pub tag_name: String,
    pub offset: i32,
    pub count: i32,
    pub data_type: DataType,
    pub nested: Option<FullDataIdFieldList>,
    pub part_format: FullDataIdPartFormat,
}

impl FullDataIdField {
    fn append<T: TagSource + ?Sized>(
        &self,
        index_id: &[u8],
        item: &T,
        out: &mut Vec<u8>,
    ) -> Option<()> {
        if let Some(nested) = &self.nested {
            return nested.append(index_id, item, out);
        }
        let value = match self.kind {
            FullDataIdType::IndexId => index_id,
            FullDataIdType::ItemId => item.item_id()?,
            FullDataIdType::Tag => item.tag(&self.tag_name).flatten()?,
        };
        let part = match self.part_format {
            FullDataIdPartFormat::Full => value,
            FullDataIdPartFormat::Sliced => {
                let start = usize::try_from(self.offset).ok()?;
                let len = usize::try_from(self.count).ok()?;
                value.get(start..start.checked_add(len)?)?
            }
        };
        out.extend_from_slice(part);
        Some(())
    }
}

impl VersionSerializable for FullDataIdField {
    const CURRENT_VERSION: u8 = 2;
    const KIND: &'static str = "FullDataIdField";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| {
            w.write_u8(self.kind.into());
            w.write_string(&self.tag_name)?;
            w.write_i32(self.offset);
            w.write_i32(self.count);
            w.write_u8(self.data_type.into());
            w.write_bool(self.nested.is_some());
            if self.nested.is_some() {
                write_optional_record(w, self.nested.as_ref())?;
            }
            w.write_u8(self.part_format.into());
            Ok(())
        })
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            let mut field = Self {
                kind: r.read_u8()?.try_into()?,
                tag_name: r.read_string()?,
                ..Self::default()
            };
            if version >= 2 {
                field.offset = r.read_i32()?;
                field.count = r.read_i32()?;
                field.data_type = DataType::read(r)?;
                if r.read_bool()? {
                    field.nested = read_optional_record(r)?;
                }
                field.part_format = r.read_u8()?.try_into()?;
            }
            Ok(field)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{from_bytes, to_bytes},
        index::IndexItem,
    };

    fn info() -> FullDataIdInfo {
        FullDataIdInfo {
            related_type_name: "Photo".into(),
            field_list: FullDataIdFieldList {
                fields: vec![
                    FullDataIdField {
                        kind: FullDataIdType::IndexId,
                        ..Default::default()
                    },
                    FullDataIdField {
                        kind: FullDataIdType::Tag,
                        tag_name: "album".into(),
                        offset: 1,
                        count: 2,
                        part_format: FullDataIdPartFormat::Sliced,
                        ..Default::default()
                    },
                    FullDataIdField {
                        nested: Some(FullDataIdFieldList {
                            fields: vec![FullDataIdField {
                                kind: FullDataIdType::ItemId,
                                ..Default::default()
                            }],
                        }),
                        ..Default::default()
                    },
                ],
            },
        }
    }

    #[test]
    fn assembles_full_data_id() {
        let item = IndexItem::new(vec![9, 9]).with_tag("album", vec![1, 2, 3, 4]);
        assert_eq!(
            info().full_data_id(&[7], &item),
            Some(vec![7, 2, 3, 9, 9])
        );
    }

    #[test]
    fn missing_part_yields_none() {
        let item = IndexItem::new(vec![9]);
        assert_eq!(info().full_data_id(&[7], &item), None);
    }

    #[test]
    fn nested_record_round_trip() {
        let info = info();
        let back: FullDataIdInfo = from_bytes(&to_bytes(&info).unwrap()).unwrap();
        assert_eq!(back, info);
    }
}
