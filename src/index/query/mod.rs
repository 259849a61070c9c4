//! Queries sent to an index cache and the results they produce.
//!
//! Every query names the cluster that owns it through [`PrimaryQuery::primary_id`].
//! Queries spanning many indexes additionally implement [`SplitableQuery`] and
//! [`MergeableQuery`]: the client splits them per cluster with the same partition
//! function used for routing, sends each part, and merges the partial results back into
//! what a single server holding every index would have answered.
pub mod contains;
pub mod first_last;
pub mod paged;
pub mod params;
pub mod random;

pub use contains::{ContainsIndexQuery, ContainsIndexQueryResult};
pub use first_last::{FirstLastQuery, FirstLastQueryResult};
pub use paged::{PagedIndexQuery, PagedIndexQueryResult, merge_sorted};
pub use params::IndexIdParams;
pub use random::{RandomQuery, RandomQueryResult};

use crate::codec::{
    PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError, int_count,
    wire_enum,
};

use super::ResultItem;

wire_enum! {
    /// Query id carried in a query message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum QueryTypes: u8 {
        PagedIndexQuery = 1,
        CappedCompositeIndexQuery = 2,
        ContainsCacheListQuery = 3,
        PagedCacheListQuery = 4,
        ReversePagedCacheListQuery = 5,
        ContainsIndexQuery = 6,
        SublistCacheListQuery = 7,
        RandomizedCacheListQuery = 8,
        MultiContainsCacheListQuery = 9,
        ExclusionSublistCacheListQuery = 10,
        PagedTaggedIndexQuery = 11,
        FirstLastQuery = 12,
        GetRangeQuery = 13,
        RandomQuery = 14,
        IntersectionQuery = 15,
        RemoteClusteredIntersectionQuery = 16,
        SpanQuery = 17,
        RemoteClusteredPagedIndexQuery = 18,
        RemoteClusteredSpanQuery = 19,
    }
}

wire_enum! {
    /// Which index headers a multi-index query returns.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum GetIndexHeaderType: u8 {
        #[default]
        None = 0,
        ResultItemsIndexIds = 1,
        AllIndexIds = 2,
    }
}

/// A query routed to the cluster owning its primary id.
pub trait PrimaryQuery {
    fn primary_id(&self) -> i32;

    fn query_id(&self) -> QueryTypes;
}

/// A multi-index query that can be partitioned across clusters.
pub trait SplitableQuery: Sized {
    /// One sub-query per cluster that owns at least one of the query's indexes.
    fn split_query(&mut self, num_clusters: usize) -> Vec<Self>;
}

/// Combines partial results from sub-queries produced by [`SplitableQuery`].
pub trait MergeableQuery {
    type Output;

    /// `None` entries stand for clusters that produced no result.
    fn merge_results(&self, partials: Vec<Option<Self::Output>>) -> Self::Output;
}

/// `i32` count followed by each item inline.
pub(crate) fn write_result_items(
    writer: &mut PrimitiveWriter,
    items: &[ResultItem],
) -> Result<(), FormatError> {
    writer.write_i32(int_count(items.len(), "result items")?);
    for item in items {
        item.serialize(writer)?;
    }
    Ok(())
}

pub(crate) fn read_result_items(
    reader: &mut PrimitiveReader<'_>,
) -> Result<Vec<ResultItem>, FormatError> {
    let count = reader.read_count()?;
    (0..count)
        .map(|_| ResultItem::deserialize(reader, ResultItem::CURRENT_VERSION))
        .collect()
}
