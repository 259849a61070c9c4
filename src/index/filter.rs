//! Boolean filter trees evaluated against encoded tag values.
//!
//! A [`Filter`] is a closed set of variants tagged on the wire by a [`FilterType`] byte.
//! A `0` tag in place of a filter means "no filter". [`Filter::read_tagged`] is the
//! single dispatch point from tag byte to concrete reader.

use std::{cmp::Ordering, fmt};

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::{
    PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError, read_record,
    short_count, wire_enum, write_record,
};

use super::{
    DataType, Operation, SortBy, SortOrder,
    cluster::readable_bytes,
    compare::{BaseComparer, bytes_equal},
    error::IndexError,
    item::TagSource,
};

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum FilterType: u8 {
        Condition = 1,
        And = 2,
        Or = 3,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Condition(Condition),
    And(AggregateFilter),
    Or(AggregateFilter),
}

impl Filter {
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(AggregateFilter { filters })
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(AggregateFilter { filters })
    }

    pub fn filter_type(&self) -> FilterType {
        match self {
            Filter::Condition(_) => FilterType::Condition,
            Filter::And(_) => FilterType::And,
            Filter::Or(_) => FilterType::Or,
        }
    }

    /// Evaluates the tree against `item`. `And`/`Or` stop at the first child that
    /// decides the outcome.
    pub fn evaluate<T: TagSource + ?Sized>(&self, item: &T) -> Result<bool, IndexError> {
        match self {
            Filter::Condition(condition) => condition.evaluate(item),
            Filter::And(aggregate) => aggregate.evaluate(item, false),
            Filter::Or(aggregate) => aggregate.evaluate(item, true),
        }
    }

    /// Writes the filter type byte followed by the filter record, or a single `0`.
    pub fn write_tagged(
        writer: &mut PrimitiveWriter,
        filter: Option<&Filter>,
    ) -> Result<(), FormatError> {
        let Some(filter) = filter else {
            writer.write_u8(0);
            return Ok(());
        };
        writer.write_u8(filter.filter_type().into());
        match filter {
            Filter::Condition(condition) => write_record(writer, condition),
            Filter::And(aggregate) | Filter::Or(aggregate) => write_record(writer, aggregate),
        }
    }

    pub fn read_tagged(reader: &mut PrimitiveReader<'_>) -> Result<Option<Filter>, FormatError> {
        let tag = reader.read_u8()?;
        if tag == 0 {
            return Ok(None);
        }
        let filter = match FilterType::try_from(tag)? {
            FilterType::Condition => Filter::Condition(read_record(reader)?),
            FilterType::And => Filter::And(read_record(reader)?),
            FilterType::Or => Filter::Or(read_record(reader)?),
        };
        Ok(Some(filter))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Condition(condition) => write!(f, "{condition}"),
            Filter::And(aggregate) => aggregate.fmt_joined(f, "And"),
            Filter::Or(aggregate) => aggregate.fmt_joined(f, "Or"),
        }
    }
}

/// Children of an `And` or `Or` node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregateFilter {
    pub filters: Vec<Filter>,
}

impl AggregateFilter {
    /// `hint` is the child result that decides the node: `false` for And, `true` for Or.
    fn evaluate<T: TagSource + ?Sized>(&self, item: &T, hint: bool) -> Result<bool, IndexError> {
        for filter in &self.filters {
            if filter.evaluate(item)? == hint {
                return Ok(hint);
            }
        }
        Ok(!hint)
    }

    fn fmt_joined(&self, f: &mut fmt::Formatter<'_>, op: &str) -> fmt::Result {
        write!(f, "(")?;
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                write!(f, " {op} ")?;
            }
            write!(f, "{filter}")?;
        }
        write!(f, ")")
    }
}

impl VersionSerializable for AggregateFilter {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "AggregateFilter";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| {
            w.write_u16(short_count(self.filters.len(), "filters")?);
            for filter in &self.filters {
                Filter::write_tagged(w, Some(filter))?;
            }
            Ok(())
        })
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            let count = r.read_u16()?;
            let mut filters = Vec::with_capacity(count as usize);
            for _ in 0..count {
                if let Some(filter) = Filter::read_tagged(r)? {
                    filters.push(filter);
                }
            }
            Ok(Self { filters })
        })
    }
}

/// Leaf of a filter tree: compares one field of an item against a literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field_name: String,
    pub is_tag: bool,
    pub operation: Operation,
    pub value: Option<Vec<u8>>,
    pub data_type: DataType,
    pub expected_bitwise_result: Option<Vec<u8>>,
    pub shift_by: u8,
}

impl Condition {
    pub fn new(
        field_name: impl Into<String>,
        is_tag: bool,
        operation: Operation,
        value: impl Into<Vec<u8>>,
        data_type: DataType,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            is_tag,
            operation,
            value: Some(value.into()),
            data_type,
            expected_bitwise_result: None,
            shift_by: 0,
        }
    }

    /// Bitwise condition: `item <op> value == expected`, or for shifts
    /// `item <op> shift_by == expected`.
    pub fn bitwise(
        field_name: impl Into<String>,
        is_tag: bool,
        operation: Operation,
        value: Option<Vec<u8>>,
        data_type: DataType,
        expected: impl Into<Vec<u8>>,
        shift_by: u8,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            is_tag,
            operation,
            value,
            data_type,
            expected_bitwise_result: Some(expected.into()),
            shift_by,
        }
    }

    /// Looks up the condition's field on `item` and applies the operation. A tag the
    /// item does not carry is an error.
    pub fn evaluate<T: TagSource + ?Sized>(&self, item: &T) -> Result<bool, IndexError> {
        let value = if self.is_tag {
            item.tag(&self.field_name)
                .ok_or_else(|| IndexError::MissingTag(self.field_name.clone()))?
        } else {
            item.item_id()
        };
        self.process(value)
    }

    /// Applies the operation to an already extracted field value.
    pub fn process(&self, item_value: Option<&[u8]>) -> Result<bool, IndexError> {
        let literal = self.value.as_deref();
        let relation = || {
            BaseComparer::for_item_ids(SortOrder::new(self.data_type, SortBy::Asc))
                .compare(literal, item_value)
        };

        Ok(match self.operation {
            Operation::Equals => bytes_equal(literal, item_value),
            Operation::NotEquals => !bytes_equal(literal, item_value),
            Operation::GreaterThan => relation() == Ordering::Less,
            Operation::GreaterThanEquals => relation() != Ordering::Greater,
            Operation::LessThan => relation() == Ordering::Greater,
            Operation::LessThanEquals => relation() != Ordering::Less,
            _ => return self.process_bitwise(item_value),
        })
    }

    fn process_bitwise(&self, item_value: Option<&[u8]>) -> Result<bool, IndexError> {
        let unsupported = || IndexError::UnsupportedOperation {
            operation: self.operation,
            data_type: self.data_type,
        };
        let shape = Bits::shape(self.data_type).ok_or_else(unsupported)?;

        let Some(item) = item_value.and_then(|v| shape.decode(v)) else {
            return Ok(false);
        };
        let expected = self
            .expected_bitwise_result
            .as_deref()
            .and_then(|v| shape.decode(v));
        let literal = self.value.as_deref().and_then(|v| shape.decode(v));

        let outcome = match self.operation {
            Operation::BitwiseComplement => literal.map(|l| shape.mask(!item) == l),
            Operation::BitwiseAnd => literal
                .zip(expected)
                .map(|(l, e)| shape.mask(item & l) == e),
            Operation::BitwiseOr => literal
                .zip(expected)
                .map(|(l, e)| shape.mask(item | l) == e),
            Operation::BitwiseXor => literal
                .zip(expected)
                .map(|(l, e)| shape.mask(item ^ l) == e),
            Operation::BitwiseShiftLeft => expected.map(|e| shape.shl(item, self.shift_by) == e),
            Operation::BitwiseShiftRight => expected.map(|e| shape.shr(item, self.shift_by) == e),
            _ => None,
        };
        Ok(outcome.unwrap_or(false))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {}",
            self.field_name,
            self.operation,
            readable_bytes(self.value.as_deref())
        )
    }
}

impl VersionSerializable for Condition {
    const CURRENT_VERSION: u8 = 2;
    const KIND: &'static str = "Condition";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| {
            w.write_string(&self.field_name)?;
            w.write_bool(self.is_tag);
            w.write_u8(self.operation.into());
            w.write_short_bytes(self.value.as_deref())?;
            w.write_u8(self.data_type.into());
            w.write_short_bytes(self.expected_bitwise_result.as_deref())?;
            w.write_u8(self.shift_by);
            Ok(())
        })
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            let mut condition = Self {
                field_name: r.read_string()?,
                is_tag: r.read_bool()?,
                operation: r.read_u8()?.try_into()?,
                value: r.read_short_bytes()?,
                data_type: DataType::read(r)?,
                expected_bitwise_result: None,
                shift_by: 0,
            };
            if version >= 2 {
                condition.expected_bitwise_result = r.read_short_bytes()?;
                condition.shift_by = r.read_u8()?;
            }
            Ok(condition)
        })
    }
}

/// Integer view of a fixed-width data type used by bitwise conditions.
#[derive(Debug, Clone, Copy)]
struct Bits {
    width: u32,
    signed: bool,
}

impl Bits {
    fn shape(data_type: DataType) -> Option<Self> {
        let (width, signed) = match data_type {
            DataType::Byte => (8, false),
            DataType::UInt16 => (16, false),
            DataType::Int16 => (16, true),
            DataType::UInt32 => (32, false),
            DataType::Int32 | DataType::SmallDateTime => (32, true),
            DataType::UInt64 => (64, false),
            DataType::Int64 | DataType::DateTime => (64, true),
            _ => return None,
        };
        Some(Self { width, signed })
    }

    fn decode(&self, bytes: &[u8]) -> Option<u64> {
        let n = (self.width / 8) as usize;
        if bytes.len() < n {
            return None;
        }
        Some(LittleEndian::read_uint(&bytes[..n], n))
    }

    fn mask(&self, value: u64) -> u64 {
        if self.width == 64 {
            value
        } else {
            value & ((1u64 << self.width) - 1)
        }
    }

    fn shl(&self, value: u64, by: u8) -> u64 {
        if u32::from(by) >= self.width {
            0
        } else {
            self.mask(value << by)
        }
    }

    fn shr(&self, value: u64, by: u8) -> u64 {
        if self.signed {
            let extended = ((value << (64 - self.width)) as i64) >> (64 - self.width);
            self.mask((extended >> u32::from(by).min(63)) as u64)
        } else if u32::from(by) >= self.width {
            0
        } else {
            value >> by
        }
    }
}

/// Inclusive range over the index's sort field, turned into the conditions that mark
/// where a scan enters and leaves the range.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexCondition {
    pub inclusive_max_value: Option<Vec<u8>>,
    pub inclusive_min_value: Option<Vec<u8>>,
}

impl IndexCondition {
    /// Returns `(enter, exit)` for an index sorted by `sort_order`. Descending order
    /// enters at the max bound; ascending order swaps the two.
    pub fn create_conditions(
        &self,
        field_name: &str,
        is_tag: bool,
        sort_order: SortOrder,
    ) -> (Option<Condition>, Option<Condition>) {
        let bound = |op, value: &Option<Vec<u8>>| {
            value.as_ref().map(|v| {
                Condition::new(field_name, is_tag, op, v.clone(), sort_order.data_type)
            })
        };
        let enter = bound(Operation::LessThanEquals, &self.inclusive_max_value);
        let exit = bound(Operation::GreaterThanEquals, &self.inclusive_min_value);
        match sort_order.sort_by {
            SortBy::Desc => (enter, exit),
            SortBy::Asc => (exit, enter),
        }
    }
}

impl VersionSerializable for IndexCondition {
    const CURRENT_VERSION: u8 = 1;
    const KIND: &'static str = "IndexCondition";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.region(|w| {
            w.write_short_bytes(self.inclusive_max_value.as_deref())?;
            w.write_short_bytes(self.inclusive_min_value.as_deref())
        })
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, _version: u8) -> Result<Self, FormatError> {
        reader.region(|r| {
            Ok(Self {
                inclusive_max_value: r.read_short_bytes()?,
                inclusive_min_value: r.read_short_bytes()?,
            })
        })
    }
}
