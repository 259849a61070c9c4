//! Index items, sort specifications, filters and the queries run against them.
//!
//! An index is a named list of items ordered by a sort spec. Item ids and tag values are
//! raw byte arrays whose meaning comes from a [`DataType`]; nothing in this module
//! knows about application types.
//!
//! # Key Components
//!
//! - [`BaseComparer`]: multi-key ordering over ids or tag values.
//! - [`Filter`]: boolean trees of [`Condition`]s evaluated against an item's tags.
//! - [`query`]: the query payloads a client sends, together with the logic that splits
//!   a multi-index query into per-cluster sub-queries and merges partial results.
//! - [`CacheIndex`] and [`CacheIndexUpdate`]: save and mutate operations.
//!
//! # See Also
//!
//! - [`codec`](crate::codec): wire encoding used by every type in this module.
pub mod cache_index;
pub mod cluster;
pub mod command;
pub mod compare;
pub mod data_type;
pub mod filter;
pub mod full_data_id;
pub mod item;
pub mod query;

pub use cache_index::CacheIndex;
pub use cluster::{ClusterParams, cluster_of, generate_primary_id, split_index_ids_by_cluster};
pub use command::{CacheIndexUpdate, Command, CommandType, FilteredIndexDeleteCommand};
pub use compare::{BaseComparer, compare_bytes};
pub use data_type::{DataType, Operation, SortBy, SortOrder, TagSort};
pub use filter::{AggregateFilter, Condition, Filter, FilterType, IndexCondition};
pub use full_data_id::{FullDataIdField, FullDataIdFieldList, FullDataIdInfo};
pub use item::{IndexDataItem, IndexHeader, IndexItem, MultiItemResult, ResultItem, TagSource};

pub mod error {
    use thiserror::Error;

    use super::{DataType, Operation};
    use crate::codec::error::FormatError;

    #[derive(Debug, Error)]
    pub enum IndexError {
        #[error("[filter] tag {0} not present on item")]
        MissingTag(String),

        #[error("[sort] at least one sort order is required")]
        EmptySortOrder,

        #[error("[filter] {operation:?} is not supported for {data_type:?}")]
        UnsupportedOperation {
            operation: Operation,
            data_type: DataType,
        },

        #[error("[format] {0}")]
        Format(#[from] FormatError),
    }
}
