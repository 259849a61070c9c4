//! Paged query over many indexes at once.
//!
//! The client splits a [`PagedIndexQuery`] per cluster with
//! [`split_index_ids_by_cluster`], each server sorts the items of its indexes, and
//! [`MergeableQuery::merge_results`] merges the partial lists with [`merge_sorted`]
//! before cutting out the requested page. When more than one cluster answers, servers
//! return their top `page_num * page_size` items unpaged ([`PagedIndexQuery::select_page`])
//! so the merged page matches what one server holding every index would return.

use std::{cmp::Ordering, collections::BTreeMap, ops::Range};

use log::{debug, warn};

use crate::{
    codec::{
        PrimitiveReader, PrimitiveWriter, VersionSerializable, error::FormatError,
        read_optional_record, read_record, short_count, skip_record, write_optional_record,
        write_record,
    },
    index::{
        BaseComparer, Filter, FullDataIdInfo, IndexCondition, IndexHeader, ResultItem,
        SortOrder, TagSort,
        cluster::split_index_ids_by_cluster,
        item::{read_header_map, write_header_map},
    },
};

use super::{
    GetIndexHeaderType, IndexIdParams, MergeableQuery, PrimaryQuery, QueryTypes,
    SplitableQuery,
};

/// Primary id of a multi-index query before it is split.
pub const MULTI_INDEX_QUERY_PRIMARY_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedIndexQuery {
    pub index_id_list: Vec<Vec<u8>>,
    /// Overrides the generated primary id of each index when it lines up with
    /// `index_id_list`.
    pub primary_id_list: Vec<i32>,
    pub page_size: i32,
    /// 1-based; `0` asks for every item.
    pub page_num: i32,
    pub target_index_name: String,
    pub tags_from_indexes: Vec<String>,
    pub tag_sort: Option<TagSort>,
    pub max_items_per_index: i32,
    pub exclude_data: bool,
    pub get_pageable_item_count: bool,
    pub filter: Option<Filter>,
    pub index_id_params_mapping: BTreeMap<Vec<u8>, IndexIdParams>,
    pub full_data_id_info: Option<FullDataIdInfo>,
    /// Set by [`SplitableQuery::split_query`] when the page has to be cut on the client.
    pub client_side_paging: bool,
    pub index_condition: Option<IndexCondition>,
    pub get_index_header_type: GetIndexHeaderType,
    pub primary_id: i32,
    num_clusters: usize,
}

impl Default for PagedIndexQuery {
    fn default() -> Self {
        Self {
            index_id_list: Vec::new(),
            primary_id_list: Vec::new(),
            page_size: 0,
            page_num: 0,
            target_index_name: String::new(),
            tags_from_indexes: Vec::new(),
            tag_sort: None,
            max_items_per_index: 0,
            exclude_data: false,
            get_pageable_item_count: false,
            filter: None,
            index_id_params_mapping: BTreeMap::new(),
            full_data_id_info: None,
            client_side_paging: false,
            index_condition: None,
            get_index_header_type: GetIndexHeaderType::None,
            primary_id: MULTI_INDEX_QUERY_PRIMARY_ID,
            num_clusters: 0,
        }
    }
}

impl PagedIndexQuery {
    pub fn new(
        index_id_list: Vec<Vec<u8>>,
        page_size: i32,
        page_num: i32,
        target_index_name: impl Into<String>,
    ) -> Self {
        Self {
            index_id_list,
            page_size,
            page_num,
            target_index_name: target_index_name.into(),
            ..Self::default()
        }
    }

    pub fn get_index_header(&self) -> bool {
        self.get_index_header_type == GetIndexHeaderType::ResultItemsIndexIds
    }

    /// Number of merged items needed to cut the requested page.
    pub fn max_merge_count(&self) -> usize {
        if self.page_num == 0 {
            return usize::MAX;
        }
        usize::try_from(self.page_num.saturating_mul(self.page_size)).unwrap_or(0)
    }

    pub fn max_items_for(&self, index_id: &[u8]) -> i32 {
        match self.index_id_params_mapping.get(index_id) {
            Some(params) => params.max_items_or(self.max_items_per_index),
            None => self.max_items_per_index,
        }
    }

    pub fn filter_for(&self, index_id: &[u8]) -> Option<&Filter> {
        match self.index_id_params_mapping.get(index_id) {
            Some(params) => params.filter_or(self.filter.as_ref()),
            None => self.filter.as_ref(),
        }
    }

    /// Bounds of the requested page within a list of `len` sorted items.
    pub fn page_range(&self, len: usize) -> Range<usize> {
        let page_size = usize::try_from(self.page_size).unwrap_or(0);
        let page_num = usize::try_from(self.page_num).unwrap_or(0);
        let end = page_num.saturating_mul(page_size).min(len);
        let start = page_num.saturating_sub(1).saturating_mul(page_size).min(end);
        start..end
    }

    /// Items a server returns from its fully sorted candidates: the page itself, or the
    /// top [`max_merge_count`](Self::max_merge_count) items when the client pages.
    pub fn select_page(&self, mut sorted: Vec<ResultItem>) -> Vec<ResultItem> {
        if self.page_num == 0 {
            return sorted;
        }
        if self.client_side_paging {
            sorted.truncate(self.max_merge_count());
            return sorted;
        }
        let range = self.page_range(sorted.len());
        sorted.drain(range).collect()
    }
}

impl PrimaryQuery for PagedIndexQuery {
    fn primary_id(&self) -> i32 {
        self.primary_id
    }

    fn query_id(&self) -> QueryTypes {
        QueryTypes::PagedTaggedIndexQuery
    }
}

impl SplitableQuery for PagedIndexQuery {
    fn split_query(&mut self, num_clusters: usize) -> Vec<Self> {
        let clusters = split_index_ids_by_cluster(
            &self.index_id_list,
            &self.primary_id_list,
            &self.index_id_params_mapping,
            num_clusters,
        );
        self.client_side_paging =
            num_clusters > 1 && self.index_id_list.len() > 1 && clusters.len() > 1;
        self.num_clusters = num_clusters;
        debug!(
            "split paged query over {} indexes into {} sub-queries",
            self.index_id_list.len(),
            clusters.len()
        );

        clusters
            .into_iter()
            .map(|(cluster, params)| {
                let mut query = self.clone();
                query.primary_id = i32::try_from(cluster).unwrap_or(i32::MAX);
                query.index_id_list = params.index_ids;
                query.primary_id_list = params.primary_ids;
                query.index_id_params_mapping = params.params;
                query
            })
            .collect()
    }
}

impl MergeableQuery for PagedIndexQuery {
    type Output = PagedIndexQueryResult;

    fn merge_results(&self, partials: Vec<Option<PagedIndexQueryResult>>) -> PagedIndexQueryResult {
        if partials.is_empty() {
            return PagedIndexQueryResult::default();
        }
        let partial_count = partials.len();

        let (mut result, answered) = if partial_count == 1 {
            let single = partials.into_iter().next().flatten();
            let answered = single.is_some();
            (single.unwrap_or_default(), answered)
        } else {
            self.merge_partials(partials)
        };

        // Servers that answered honour `client_side_paging`; otherwise fall back to the
        // cluster count the query was split with.
        let pages_on_client = if answered {
            self.client_side_paging
        } else {
            self.num_clusters > 1
        };
        if pages_on_client && self.page_num != 0 {
            let range = self.page_range(result.result_item_list.len());
            result.result_item_list = result.result_item_list.drain(range).collect();

            if partial_count != 1
                && self.get_index_header_type == GetIndexHeaderType::ResultItemsIndexIds
                && !result.index_id_index_header_mapping.is_empty()
            {
                let complete = std::mem::take(&mut result.index_id_index_header_mapping);
                for item in &result.result_item_list {
                    let Some(index_id) = &item.index_id else {
                        continue;
                    };
                    if let Some(header) = complete.get(index_id) {
                        result
                            .index_id_index_header_mapping
                            .entry(index_id.clone())
                            .or_insert_with(|| header.clone());
                    }
                }
            }
        }
        result
    }
}

impl PagedIndexQuery {
    fn merge_partials(
        &self,
        partials: Vec<Option<PagedIndexQueryResult>>,
    ) -> (PagedIndexQueryResult, bool) {
        let mut merged = PagedIndexQueryResult::default();
        let mut answered = false;
        let mut sort_known = false;

        for partial in partials.into_iter().flatten() {
            answered = true;
            merged.total_count = merged.total_count.saturating_add(partial.total_count);
            if self.get_pageable_item_count {
                merged.additional_available_item_count = merged
                    .additional_available_item_count
                    .saturating_add(partial.additional_available_item_count);
            }

            if !partial.result_item_list.is_empty() {
                let comparer = partial.comparer();
                if !sort_known {
                    merged.is_tag_primary_sort = partial.is_tag_primary_sort;
                    merged.sort_field_name = partial.sort_field_name.clone();
                    merged.sort_order_list = partial.sort_order_list.clone();
                    sort_known = true;
                }
                let items = std::mem::take(&mut merged.result_item_list);
                merged.result_item_list = merge_sorted(
                    items,
                    partial.result_item_list,
                    self.max_merge_count(),
                    &comparer,
                );
            }

            if self.get_index_header_type != GetIndexHeaderType::None {
                for (index_id, header) in partial.index_id_index_header_mapping {
                    merged
                        .index_id_index_header_mapping
                        .entry(index_id)
                        .or_insert(header);
                }
            }
        }
        (merged, answered)
    }
}

/// Two-way merge of sorted lists, keeping at most `max` items. On ties the item from
/// `left` comes first.
pub fn merge_sorted(
    left: Vec<ResultItem>,
    right: Vec<ResultItem>,
    max: usize,
    comparer: &BaseComparer,
) -> Vec<ResultItem> {
    let cap = left.len().saturating_add(right.len()).min(max);
    let mut merged = Vec::with_capacity(cap);
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    while merged.len() < cap {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => comparer.compare_items(l, r) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }
    merged
}

impl VersionSerializable for PagedIndexQuery {
    const CURRENT_VERSION: u8 = 10;
    const KIND: &'static str = "PagedIndexQuery";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_i32(self.page_size);
        writer.write_i32(self.page_num);
        writer.write_string(&self.target_index_name)?;
        writer.write_string_list(&self.tags_from_indexes)?;

        writer.write_bool(self.tag_sort.is_some());
        if let Some(tag_sort) = &self.tag_sort {
            write_record(writer, tag_sort)?;
        }

        writer.write_u16(short_count(self.index_id_list.len(), "index ids")?);
        for index_id in &self.index_id_list {
            writer.write_short_bytes(Some(index_id))?;
        }

        // retired criterion list slot
        writer.write_u8(0);
        writer.write_i32(self.max_items_per_index);
        writer.write_bool(self.exclude_data);
        writer.write_bool(self.get_index_header());

        // v2
        writer.write_bool(self.get_pageable_item_count);

        // v3
        writer.write_u16(short_count(self.primary_id_list.len(), "primary ids")?);
        for primary_id in &self.primary_id_list {
            writer.write_i32(*primary_id);
        }

        // v4
        Filter::write_tagged(writer, self.filter.as_ref())?;

        // v5
        writer.write_u16(short_count(
            self.index_id_params_mapping.len(),
            "index id params",
        )?);
        for (index_id, params) in &self.index_id_params_mapping {
            writer.write_short_bytes(Some(index_id))?;
            if !index_id.is_empty() {
                write_record(writer, params)?;
            }
        }

        // v6
        writer.write_bool(self.full_data_id_info.is_some());
        if self.full_data_id_info.is_some() {
            write_optional_record(writer, self.full_data_id_info.as_ref())?;
        }

        // v7
        writer.write_bool(self.client_side_paging);

        // v8
        writer.write_bool(self.index_condition.is_some());
        if self.index_condition.is_some() {
            write_optional_record(writer, self.index_condition.as_ref())?;
        }

        // v9: cap condition, never sent
        writer.write_bool(false);

        // v10
        writer.write_u8(self.get_index_header_type.into());
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let mut query = Self {
            page_size: reader.read_i32()?,
            page_num: reader.read_i32()?,
            target_index_name: reader.read_string()?,
            tags_from_indexes: reader.read_string_list()?,
            ..Self::default()
        };

        if reader.read_u8()? != 0 {
            query.tag_sort = Some(read_record(reader)?);
        }

        for _ in 0..reader.read_u16()? {
            if let Some(index_id) = reader.read_short_bytes()? {
                query.index_id_list.push(index_id);
            }
        }

        reader.read_u8()?;
        query.max_items_per_index = reader.read_i32()?;
        query.exclude_data = reader.read_bool()?;
        if reader.read_bool()? {
            query.get_index_header_type = GetIndexHeaderType::ResultItemsIndexIds;
        }

        if version >= 2 {
            query.get_pageable_item_count = reader.read_bool()?;
        }
        if version >= 3 {
            for _ in 0..reader.read_u16()? {
                query.primary_id_list.push(reader.read_i32()?);
            }
        }
        if version >= 4 {
            query.filter = Filter::read_tagged(reader)?;
        }
        if version >= 5 {
            for _ in 0..reader.read_u16()? {
                if let Some(index_id) = reader.read_short_bytes()? {
                    let params = read_record(reader)?;
                    query.index_id_params_mapping.insert(index_id, params);
                }
            }
        }
        if version >= 6 && reader.read_bool()? {
            query.full_data_id_info = read_optional_record(reader)?;
        }
        if version >= 7 {
            query.client_side_paging = reader.read_bool()?;
        }
        if version >= 8 && reader.read_bool()? {
            query.index_condition = read_optional_record(reader)?;
        }
        if version >= 9 && reader.read_bool()? {
            skip_record(reader)?;
        }
        if version >= 10 {
            query.get_index_header_type = reader.read_u8()?.try_into()?;
        }
        Ok(query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PagedIndexQueryResult {
    pub result_item_list: Vec<ResultItem>,
    pub index_id_index_header_mapping: BTreeMap<Vec<u8>, IndexHeader>,
    pub total_count: i32,
    pub is_tag_primary_sort: bool,
    pub sort_field_name: String,
    pub sort_order_list: Vec<SortOrder>,
    pub exception_info: String,
    pub additional_available_item_count: i32,
}

impl PagedIndexQueryResult {
    /// Comparer matching the order the server sorted `result_item_list` in.
    pub fn comparer(&self) -> BaseComparer {
        BaseComparer::new(
            self.is_tag_primary_sort,
            self.sort_field_name.as_str(),
            self.sort_order_list.clone(),
        )
        .unwrap_or_else(|_| {
            warn!("partial result carries no sort order, merging by item id");
            BaseComparer::for_item_ids(SortOrder::default())
        })
    }
}

impl VersionSerializable for PagedIndexQueryResult {
    const CURRENT_VERSION: u8 = 2;
    const KIND: &'static str = "PagedIndexQueryResult";

    fn serialize(&self, writer: &mut PrimitiveWriter) -> Result<(), FormatError> {
        writer.write_u16(short_count(self.result_item_list.len(), "result items")?);
        for item in &self.result_item_list {
            item.serialize(writer)?;
        }
        write_header_map(writer, &self.index_id_index_header_mapping)?;
        writer.write_i32(self.total_count);
        writer.write_bool(self.is_tag_primary_sort);
        writer.write_string(&self.sort_field_name)?;
        writer.write_u16(short_count(self.sort_order_list.len(), "sort orders")?);
        for order in &self.sort_order_list {
            order.write_inline(writer);
        }
        writer.write_string(&self.exception_info)?;

        // v2
        writer.write_i32(self.additional_available_item_count);
        Ok(())
    }

    fn deserialize(reader: &mut PrimitiveReader<'_>, version: u8) -> Result<Self, FormatError> {
        let count = reader.read_u16()?;
        let result_item_list = (0..count)
            .map(|_| ResultItem::deserialize(reader, ResultItem::CURRENT_VERSION))
            .collect::<Result<_, _>>()?;
        let mut result = Self {
            result_item_list,
            index_id_index_header_mapping: read_header_map(reader)?,
            total_count: reader.read_i32()?,
            is_tag_primary_sort: reader.read_bool()?,
            sort_field_name: reader.read_string()?,
            ..Self::default()
        };
        for _ in 0..reader.read_u16()? {
            result.sort_order_list.push(SortOrder::read_inline(reader)?);
        }
        result.exception_info = reader.read_string()?;
        if version >= 2 {
            result.additional_available_item_count = reader.read_i32()?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{from_bytes, to_bytes},
        index::{Condition, DataType, IndexDataItem, IndexItem, Operation, SortBy},
    };

    fn index_id(i: i32) -> Vec<u8> {
        i.to_le_bytes().to_vec()
    }

    fn score_order() -> Vec<SortOrder> {
        vec![SortOrder::new(DataType::Int32, SortBy::Desc)]
    }

    /// Five items per index, every score distinct across all indexes.
    fn items_of(index: i32) -> Vec<ResultItem> {
        (0..5)
            .map(|j| {
                let score = (index * 10 + j) * 37 % 1009;
                let item = IndexItem::new(index_id(index * 100 + j))
                    .with_tag("score", score.to_le_bytes());
                ResultItem::new(index_id(index), IndexDataItem::new(item, None))
            })
            .collect()
    }

    /// What a server owning `query.index_id_list` answers.
    fn serve(query: &PagedIndexQuery) -> PagedIndexQueryResult {
        let comparer = BaseComparer::new(true, "score", score_order()).unwrap();
        let mut items: Vec<ResultItem> = query
            .index_id_list
            .iter()
            .flat_map(|id| items_of(i32::from_le_bytes([id[0], id[1], id[2], id[3]])))
            .collect();
        items.sort_by(|a, b| comparer.compare_items(a, b));

        let headers = query
            .index_id_list
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    IndexHeader {
                        metadata: Some(id.clone()),
                        virtual_count: 5,
                    },
                )
            })
            .collect();

        PagedIndexQueryResult {
            total_count: items.len() as i32,
            result_item_list: query.select_page(items),
            index_id_index_header_mapping: headers,
            is_tag_primary_sort: true,
            sort_field_name: "score".into(),
            sort_order_list: score_order(),
            exception_info: String::new(),
            additional_available_item_count: 1,
        }
    }

    fn six_index_query(page_num: i32) -> PagedIndexQuery {
        PagedIndexQuery::new((1..=6).map(index_id).collect(), 4, page_num, "by_score")
    }

    #[test]
    fn merged_split_matches_single_server() {
        for page_num in 0..=8 {
            let single = serve(&six_index_query(page_num));

            let mut query = six_index_query(page_num);
            let subs = query.split_query(3);
            assert_eq!(subs.len(), 3);
            assert!(query.client_side_paging);

            let merged = query.merge_results(subs.iter().map(|q| Some(serve(q))).collect());
            assert_eq!(merged.result_item_list, single.result_item_list, "page {page_num}");
            assert_eq!(merged.total_count, 30);
        }
    }

    #[test]
    fn split_routes_sub_queries_by_cluster() {
        let mut query = six_index_query(1);
        let subs = query.split_query(3);
        let primary_ids: Vec<i32> = subs.iter().map(|q| q.primary_id()).collect();
        assert_eq!(primary_ids, vec![0, 1, 2]);
        assert_eq!(subs[1].index_id_list, vec![index_id(1), index_id(4)]);
        assert!(subs.iter().all(|q| q.client_side_paging));
    }

    #[test]
    fn single_cluster_split_pages_on_server() {
        let mut query = six_index_query(2);
        let subs = query.split_query(1);
        assert_eq!(subs.len(), 1);
        assert!(!query.client_side_paging);

        let merged = query.merge_results(vec![Some(serve(&subs[0]))]);
        assert_eq!(merged, serve(&six_index_query(2)));
    }

    #[test]
    fn header_mapping_follows_paged_items() {
        let mut query = six_index_query(1);
        query.get_index_header_type = GetIndexHeaderType::ResultItemsIndexIds;
        let subs = query.split_query(3);
        let merged = query.merge_results(subs.iter().map(|q| Some(serve(q))).collect());

        assert_eq!(merged.result_item_list.len(), 4);
        for index_id in merged.index_id_index_header_mapping.keys() {
            assert!(
                merged
                    .result_item_list
                    .iter()
                    .any(|item| item.index_id.as_ref() == Some(index_id))
            );
        }
        for item in &merged.result_item_list {
            let id = item.index_id.as_ref().unwrap();
            assert!(merged.index_id_index_header_mapping.contains_key(id));
        }
    }

    #[test]
    fn all_indexes_header_mapping_is_kept_whole() {
        let mut query = six_index_query(1);
        query.get_index_header_type = GetIndexHeaderType::AllIndexIds;
        let subs = query.split_query(3);
        let merged = query.merge_results(subs.iter().map(|q| Some(serve(q))).collect());
        assert_eq!(merged.index_id_index_header_mapping.len(), 6);
    }

    #[test]
    fn pageable_count_only_when_requested() {
        let mut query = six_index_query(1);
        let subs = query.split_query(3);
        let partials: Vec<_> = subs.iter().map(|q| Some(serve(q))).collect();
        assert_eq!(query.merge_results(partials.clone()).additional_available_item_count, 0);

        query.get_pageable_item_count = true;
        assert_eq!(query.merge_results(partials).additional_available_item_count, 3);
    }

    #[test]
    fn missing_partials() {
        let query = six_index_query(1);
        assert_eq!(query.merge_results(vec![]), PagedIndexQueryResult::default());
        assert_eq!(
            query.merge_results(vec![None, None]),
            PagedIndexQueryResult::default()
        );
    }

    #[test]
    fn page_range_is_clamped() {
        let query = six_index_query(3);
        assert_eq!(query.page_range(30), 8..12);
        assert_eq!(query.page_range(10), 8..10);
        assert_eq!(query.page_range(5), 5..5);
        assert_eq!(six_index_query(0).max_merge_count(), usize::MAX);
        assert_eq!(query.max_merge_count(), 12);
    }

    #[test]
    fn merge_prefers_left_on_ties_and_caps() {
        let comparer = BaseComparer::for_item_ids(SortOrder::new(DataType::Int32, SortBy::Asc));
        let item = |index: u8, id: i32| {
            ResultItem::new(vec![index], IndexDataItem::new(IndexItem::new(index_id(id)), None))
        };
        let merged = merge_sorted(
            vec![item(1, 1), item(1, 3)],
            vec![item(2, 1), item(2, 2), item(2, 9)],
            4,
            &comparer,
        );
        let order: Vec<(u8, u8)> = merged
            .iter()
            .map(|r| (r.index_id.as_ref().unwrap()[0], r.item.item.item_id.as_ref().unwrap()[0]))
            .collect();
        assert_eq!(order, vec![(1, 1), (2, 1), (2, 2), (1, 3)]);
    }

    #[test]
    fn per_index_params_override_query_defaults() {
        let mut query = six_index_query(1);
        query.max_items_per_index = 50;
        query.filter = Some(Filter::Condition(Condition::new(
            "score",
            true,
            Operation::GreaterThan,
            0i32.to_le_bytes(),
            DataType::Int32,
        )));
        query
            .index_id_params_mapping
            .insert(index_id(2), IndexIdParams::new(5, None));

        assert_eq!(query.max_items_for(&index_id(2)), 5);
        assert_eq!(query.max_items_for(&index_id(3)), 50);
        assert_eq!(query.filter_for(&index_id(2)), query.filter.as_ref());
    }

    #[test]
    fn query_round_trip() {
        let mut query = six_index_query(2);
        query.primary_id_list = vec![1, 2, 3, 4, 5, 6];
        query.tags_from_indexes = vec!["by_date".into()];
        query.tag_sort = Some(TagSort {
            field_name: "score".into(),
            is_tag: true,
            sort_order: SortOrder::default(),
        });
        query.get_pageable_item_count = true;
        query
            .index_id_params_mapping
            .insert(index_id(1), IndexIdParams::new(3, Some(Filter::or(vec![]))));
        query.index_condition = Some(IndexCondition {
            inclusive_max_value: Some(vec![9]),
            inclusive_min_value: None,
        });
        query.get_index_header_type = GetIndexHeaderType::AllIndexIds;

        let back: PagedIndexQuery = from_bytes(&to_bytes(&query).unwrap()).unwrap();
        assert_eq!(back, query);
    }

    #[test]
    fn version_one_reads_header_flag() {
        let mut query = six_index_query(1);
        query.get_index_header_type = GetIndexHeaderType::ResultItemsIndexIds;
        query.client_side_paging = true;
        let mut w = PrimitiveWriter::new();
        query.serialize(&mut w).unwrap();
        let bytes = w.into_inner();

        let back = PagedIndexQuery::deserialize(&mut PrimitiveReader::new(&bytes), 1).unwrap();
        assert_eq!(back.index_id_list, query.index_id_list);
        assert!(back.get_index_header());
        assert!(!back.client_side_paging);
    }

    #[test]
    fn result_round_trip() {
        let mut query = six_index_query(1);
        query.get_index_header_type = GetIndexHeaderType::AllIndexIds;
        let result = serve(&query);
        let back: PagedIndexQueryResult = from_bytes(&to_bytes(&result).unwrap()).unwrap();
        assert_eq!(back, result);
    }
}
