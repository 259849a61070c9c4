use serde::Deserialize;

use crate::codec::{
    PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError, wire_enum,
};

wire_enum! {
    /// How the bytes of an id or tag value are interpreted when comparing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
    pub enum DataType: u8 {
        UInt16 = 0,
        Int16 = 1,
        UInt32 = 2,
        Int32 = 3,
        UInt64 = 4,
        Int64 = 5,
        SmallDateTime = 6,
        DateTime = 7,
        String = 8,
        Byte = 9,
        Float = 10,
        Double = 11,
        ByteArray = 12,
    }
}

/// Encoded width per [`DataType`], indexed by discriminant. `-1` marks variable width.
const DATA_TYPE_SIZES: [i32; 13] = [2, 2, 4, 4, 8, 8, 4, 8, -1, 1, 4, 8, -1];

impl DataType {
    /// Canonical byte width, `-1` for `String` and `ByteArray`.
    pub const fn size(self) -> i32 {
        DATA_TYPE_SIZES[self as usize]
    }

    pub const fn fixed_size(self) -> Option<usize> {
        match self.size() {
            -1 => None,
            n => Some(n as usize),
        }
    }

    pub(crate) fn read(reader: &mut PrimitiveReader<'_>) -> Result<Self, FormatError> {
        reader.read_u8()?.try_into()
    }
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Int32
    }
}

wire_enum! {
    /// Relational and bitwise operators a [`Condition`](super::Condition) can apply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Operation: u8 {
        LessThan = 0,
        GreaterThan = 1,
        LessThanEquals = 2,
        GreaterThanEquals = 3,
        Equals = 4,
        NotEquals = 5,
        BitwiseComplement = 6,
        BitwiseAnd = 7,
        BitwiseOr = 8,
        BitwiseXor = 9,
        BitwiseShiftLeft = 10,
        BitwiseShiftRight = 11,
    }
}

impl Operation {
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            Operation::BitwiseComplement
                | Operation::BitwiseAnd
                | Operation::BitwiseOr
                | Operation::BitwiseXor
                | Operation::BitwiseShiftLeft
                | Operation::BitwiseShiftRight
        )
    }
}

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
    pub enum SortBy: u8 {
        Asc = 0,
        Desc = 1,
    }
}

/// One key of a multi-key sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SortOrder {
    pub data_type: DataType,
    pub sort_by: SortBy,
}

impl SortOrder {
    pub fn new(data_type: DataType, sort_by: SortBy) -> Self {
        Self { data_type, sort_by }
    }

    pub(crate) fn write_inline(&self, writer: &mut PrimitiveWriter) {
        writer.write_u8(self.data_type.into());
        writer.write_u8(self.sort_by.into());
    }

    pub(crate) fn read_inline(reader: &mut PrimitiveReader<'_>) -> Result<Self, FormatError> {
        Ok(Self {
            data_type: DataType::read(reader)?,
            sort_by: reader.read_u8()?.try_into()?,
        })
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::new(DataType::Int32, SortBy::Desc)
    }
}

impl VersionSerializable for SortOrder {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "SortOrder";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        self.write_inline(writer);
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        Self::read_inline(reader)
    }
}

/// Sort field of a query: either the item id or a named tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagSort {
    pub field_name: String,
    pub is_tag: bool,
    pub sort_order: SortOrder,
}

impl VersionSerializable for TagSort {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "TagSort";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_string(&self.field_name)?;
        writer.write_bool(self.is_tag);
        self.sort_order.write_inline(writer);
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        Ok(Self {
            field_name: reader.read_string()?,
            is_tag: reader.read_bool()?,
            sort_order: SortOrder::read_inline(reader)?,
        })
    }
}
