//! Byte-array comparison driven by a declared [`DataType`].
//!
//! Ids and tag values travel as raw bytes; their meaning is supplied by a sort spec.
//! Fixed-width numeric types are decoded little-endian at a cursor and compared by
//! value, strings compare ordinally by their UTF-8 bytes (no culture-aware collation),
//! and `ByteArray` (or anything too short for its declared width) falls back to
//! [`compare_bytes`].

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use super::{
    DataType, SortBy, SortOrder,
    error::IndexError,
    item::TagSource,
};

/// Length first, then lexicographic: a shorter array sorts before a longer one
/// regardless of content.
pub fn compare_bytes(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Straight content equality; independent of any data type.
pub fn bytes_equal(a: Option<&[u8]>, b: Option<&[u8]>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}

/// Compares the values at `*i1` in `a` and `*i2` in `b` as `data_type`, advancing both
/// cursors past what was consumed. Variable-width types consume the rest of the arrays.
pub fn compare_typed(
    a: &[u8],
    b: &[u8],
    i1: &mut usize,
    i2: &mut usize,
    data_type: DataType,
) -> Ordering {
    let rest_a = a.get(*i1..).unwrap_or_default();
    let rest_b = b.get(*i2..).unwrap_or_default();

    let Some(width) = data_type.fixed_size() else {
        *i1 = a.len();
        *i2 = b.len();
        return match data_type {
            DataType::String => rest_a.cmp(rest_b),
            _ => compare_bytes(rest_a, rest_b),
        };
    };

    if rest_a.len() < width || rest_b.len() < width {
        *i1 = a.len();
        *i2 = b.len();
        return compare_bytes(rest_a, rest_b);
    }

    let (x, y) = (&rest_a[..width], &rest_b[..width]);
    *i1 += width;
    *i2 += width;

    match data_type {
        DataType::UInt16 => LittleEndian::read_u16(x).cmp(&LittleEndian::read_u16(y)),
        DataType::Int16 => LittleEndian::read_i16(x).cmp(&LittleEndian::read_i16(y)),
        DataType::UInt32 => LittleEndian::read_u32(x).cmp(&LittleEndian::read_u32(y)),
        DataType::Int32 | DataType::SmallDateTime => {
            LittleEndian::read_i32(x).cmp(&LittleEndian::read_i32(y))
        }
        DataType::UInt64 => LittleEndian::read_u64(x).cmp(&LittleEndian::read_u64(y)),
        DataType::Int64 | DataType::DateTime => {
            LittleEndian::read_i64(x).cmp(&LittleEndian::read_i64(y))
        }
        DataType::Byte => x[0].cmp(&y[0]),
        DataType::Float => {
            compare_floats(f64::from(LittleEndian::read_f32(x)), f64::from(LittleEndian::read_f32(y)))
        }
        DataType::Double => compare_floats(LittleEndian::read_f64(x), LittleEndian::read_f64(y)),
        DataType::String | DataType::ByteArray => compare_bytes(x, y),
    }
}

/// NaN sorts below every number and equal to itself; `-0.0` equals `0.0`.
fn compare_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Single-key convenience over [`compare_typed`].
pub fn compare_as(a: &[u8], b: &[u8], data_type: DataType) -> Ordering {
    compare_typed(a, b, &mut 0, &mut 0, data_type)
}

/// Multi-key comparer over item ids or a named tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseComparer {
    is_tag_primary_sort: bool,
    sort_field_name: String,
    sort_orders: Vec<SortOrder>,
}

impl BaseComparer {
    pub fn new(
        is_tag_primary_sort: bool,
        sort_field_name: impl Into<String>,
        sort_orders: Vec<SortOrder>,
    ) -> Result<Self, IndexError> {
        if sort_orders.is_empty() {
            return Err(IndexError::EmptySortOrder);
        }
        Ok(Self {
            is_tag_primary_sort,
            sort_field_name: sort_field_name.into(),
            sort_orders,
        })
    }

    /// Comparer over item ids with a single key.
    pub fn for_item_ids(order: SortOrder) -> Self {
        Self {
            is_tag_primary_sort: false,
            sort_field_name: String::new(),
            sort_orders: vec![order],
        }
    }

    pub fn sort_orders(&self) -> &[SortOrder] {
        &self.sort_orders
    }

    pub fn is_tag_primary_sort(&self) -> bool {
        self.is_tag_primary_sort
    }

    pub fn sort_field_name(&self) -> &str {
        &self.sort_field_name
    }

    /// Null placement is decided by the first key alone: before non-null values when it
    /// is ascending, after them when descending.
    pub fn compare(&self, a: Option<&[u8]>, b: Option<&[u8]>) -> Ordering {
        let (a, b) = match (a, b) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) | (Some(_), None) => {
                let null_first = match self.sort_orders[0].sort_by {
                    SortBy::Asc => Ordering::Less,
                    SortBy::Desc => Ordering::Greater,
                };
                return if a.is_none() {
                    null_first
                } else {
                    null_first.reverse()
                };
            }
            (Some(a), Some(b)) => (a, b),
        };

        if a.len() != b.len() {
            return a.len().cmp(&b.len());
        }

        let (mut i1, mut i2) = (0, 0);
        for order in &self.sort_orders {
            // Descending keys swap operands (and cursors) rather than negating.
            let ord = match order.sort_by {
                SortBy::Asc => compare_typed(a, b, &mut i1, &mut i2, order.data_type),
                SortBy::Desc => compare_typed(b, a, &mut i2, &mut i1, order.data_type),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compares two items by their sort field: a tag value or the item id. A missing
    /// tag compares as null.
    pub fn compare_items<X, Y>(&self, x: &X, y: &Y) -> Ordering
    where
        X: TagSource + ?Sized,
        Y: TagSource + ?Sized,
    {
        if self.is_tag_primary_sort {
            let a = x.tag(&self.sort_field_name).flatten();
            let b = y.tag(&self.sort_field_name).flatten();
            self.compare(a, b)
        } else {
            self.compare(x.item_id(), y.item_id())
        }
    }
}
