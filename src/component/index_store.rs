//! In-memory index cache.
//!
//! [`IndexStore`] keeps one sorted item list per `(type id, index name, index id)`, each
//! ordered by the comparer of its schema in [`RelayConfig::indexes`]. Messages map onto
//! it as follows:
//!
//! - `Save`: the payload is a [`CacheIndex`] merged into the target index, or into every
//!   configured index when no target is named.
//! - `Update`: the payload is a [`CacheIndexUpdate`] whose command mutates one index.
//! - `Query`: `query_id` names the query carried in `query_data`; the encoded result
//!   comes back as the reply payload.
//! - `Delete` drops every index whose id is the message's extended id.
//! - `DeleteAllInType` drops every index of the message's type.
//!
//! A query that cannot be answered still succeeds at the message level. Its result
//! reports the index as missing and carries the reason in `exception_info`.
use std::{
    collections::{BTreeMap, HashMap},
    mem,
    sync::{
        Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use log::{debug, info, warn};
use rand::seq::index::sample;

use crate::{
    codec::{VersionSerializable, from_bytes, to_bytes},
    config::RelayConfig,
    index::{
        BaseComparer, CacheIndex, CacheIndexUpdate, Command, Condition, Filter,
        FilteredIndexDeleteCommand, IndexDataItem, IndexHeader, MultiItemResult, ResultItem,
        TagSource,
        query::{
            ContainsIndexQuery, ContainsIndexQueryResult, FirstLastQuery, FirstLastQueryResult,
            GetIndexHeaderType, PagedIndexQuery, PagedIndexQueryResult, QueryTypes, RandomQuery,
            RandomQueryResult, merge_sorted,
        },
    },
    message::{MessageType, RelayMessage, RelayOutcome, RelayPayload},
};

use super::{ComponentRuntimeInfo, RelayComponent, error::ComponentError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    type_id: i16,
    name: String,
    index_id: Vec<u8>,
}

impl IndexKey {
    fn new(type_id: i16, name: &str, index_id: &[u8]) -> Self {
        Self {
            type_id,
            name: name.to_string(),
            index_id: index_id.to_vec(),
        }
    }
}

/// Scan bounds produced by [`IndexCondition::create_conditions`](crate::index::IndexCondition::create_conditions).
type ScanRange = (Option<Condition>, Option<Condition>);

#[derive(Debug, Default)]
struct StoredIndex {
    items: Vec<IndexDataItem>,
    metadata: Option<Vec<u8>>,
    virtual_count: i32,
}

impl StoredIndex {
    fn size(&self) -> i32 {
        i32::try_from(self.items.len()).unwrap_or(i32::MAX)
    }

    fn header(&self) -> IndexHeader {
        IndexHeader {
            metadata: self.metadata.clone(),
            virtual_count: self.virtual_count,
        }
    }

    fn find(&self, item_id: Option<&[u8]>) -> Option<&IndexDataItem> {
        self.items.iter().find(|item| item.item_id() == item_id)
    }

    fn remove(&mut self, item_id: Option<&[u8]>) -> Option<IndexDataItem> {
        let at = self.items.iter().position(|item| item.item_id() == item_id)?;
        Some(self.items.remove(at))
    }

    /// Inserts after every item that sorts equal, replacing an item with the same id.
    fn insert(&mut self, item: IndexDataItem, comparer: &BaseComparer) {
        self.remove(item.item_id());
        let at = self
            .items
            .partition_point(|x| comparer.compare_items(x, &item).is_le());
        self.items.insert(at, item);
    }

    fn apply(&mut self, update: &CacheIndex, name: &str, comparer: &BaseComparer) {
        let kept_tags = update.index_tag_mapping.get(name);
        let previous = if update.replace_full_index {
            StoredIndex {
                items: mem::take(&mut self.items),
                ..StoredIndex::default()
            }
        } else {
            for deleted in &update.delete_list {
                self.remove(deleted.item_id());
            }
            StoredIndex::default()
        };

        for item in &update.add_list {
            let mut item = item.clone();
            if let Some(kept) = kept_tags {
                item.item.tags.retain(|tag, _| kept.contains(tag));
            }
            if update.preserve_data && item.data.is_none() {
                let old = previous.find(item.item_id()).or_else(|| self.find(item.item_id()));
                item.data = old.and_then(|old| old.data.clone());
            }
            self.insert(item, comparer);
        }

        if update.update_metadata {
            self.metadata = update.metadata.clone();
        }
        if let Some(count) = update.index_virtual_count_mapping.get(name) {
            self.virtual_count = *count;
        }
    }

    /// Items passing `filter` in stored order, at most `max_items` of them when positive.
    /// A scan range skips items until its enter condition holds and stops at the first
    /// item failing its exit condition.
    fn extract(
        &self,
        filter: Option<&Filter>,
        max_items: i32,
        range: Option<&ScanRange>,
    ) -> Result<Vec<&IndexDataItem>, ComponentError> {
        let limit = usize::try_from(max_items)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(usize::MAX);
        let mut entered = range.is_none();
        let mut extracted = Vec::new();

        for item in &self.items {
            if extracted.len() >= limit {
                break;
            }
            if let Some((enter, exit)) = range {
                if !entered {
                    if let Some(enter) = enter {
                        if !enter.evaluate(item)? {
                            continue;
                        }
                    }
                    entered = true;
                }
                if let Some(exit) = exit {
                    if !exit.evaluate(item)? {
                        break;
                    }
                }
            }
            if let Some(filter) = filter {
                if !filter.evaluate(item)? {
                    continue;
                }
            }
            extracted.push(item);
        }
        Ok(extracted)
    }
}

/// Copies an item for a reply, dropping its data when the query excludes it.
fn reply_item(item: &IndexDataItem, exclude_data: bool) -> IndexDataItem {
    let data = if exclude_data { None } else { item.data.clone() };
    IndexDataItem::new(item.item.clone(), data)
}

fn required_id<'a>(index_id: Option<&'a [u8]>, kind: &'static str) -> Result<&'a [u8], ComponentError> {
    index_id
        .filter(|id| !id.is_empty())
        .ok_or(ComponentError::MissingIndexId(kind))
}

pub struct IndexStore {
    name: String,
    schemas: RwLock<BTreeMap<String, BaseComparer>>,
    indexes: Mutex<HashMap<IndexKey, StoredIndex>>,
    handled: AtomicU64,
    running: AtomicBool,
    started: Instant,
}

impl IndexStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schemas: RwLock::new(BTreeMap::new()),
            indexes: Mutex::new(HashMap::new()),
            handled: AtomicU64::new(0),
            running: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    /// Number of stored indexes across all types.
    pub fn index_count(&self) -> usize {
        self.indexes().len()
    }

    /// Number of items in one index, if it exists.
    pub fn index_len(&self, type_id: i16, name: &str, index_id: &[u8]) -> Option<usize> {
        self.indexes()
            .get(&IndexKey::new(type_id, name, index_id))
            .map(|index| index.items.len())
    }

    fn schemas(&self) -> RwLockReadGuard<'_, BTreeMap<String, BaseComparer>> {
        self.schemas.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn indexes(&self) -> MutexGuard<'_, HashMap<IndexKey, StoredIndex>> {
        self.indexes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_schemas(config: &RelayConfig) -> Result<BTreeMap<String, BaseComparer>, ComponentError> {
        config
            .indexes
            .iter()
            .map(|schema| Ok((schema.name.clone(), schema.comparer()?)))
            .collect()
    }

    fn comparer<'a>(
        schemas: &'a BTreeMap<String, BaseComparer>,
        name: &str,
    ) -> Result<&'a BaseComparer, ComponentError> {
        schemas
            .get(name)
            .ok_or_else(|| ComponentError::UnknownIndex(name.to_string()))
    }

    fn payload_bytes(message: &RelayMessage) -> Result<&[u8], ComponentError> {
        message
            .payload
            .as_ref()
            .and_then(|payload| payload.byte_array.as_deref())
            .ok_or(ComponentError::MissingPayload(message.message_type))
    }

    fn save(&self, message: &RelayMessage) -> Result<RelayOutcome, ComponentError> {
        let cache_index: CacheIndex = from_bytes(Self::payload_bytes(message)?)?;
        let index_id = required_id(cache_index.index_id.as_deref(), "CacheIndex")?;

        let schemas = self.schemas();
        let targets: Vec<&String> = if cache_index.target_index_name.is_empty() {
            schemas.keys().collect()
        } else {
            Self::comparer(&schemas, &cache_index.target_index_name)?;
            vec![&cache_index.target_index_name]
        };

        let mut indexes = self.indexes();
        for name in targets {
            let comparer = Self::comparer(&schemas, name)?;
            let index = indexes
                .entry(IndexKey::new(message.type_id, name, index_id))
                .or_default();
            index.apply(&cache_index, name, comparer);
            debug!(
                "{} saved {} items into {name}, {} deleted, now {} items",
                self.name,
                cache_index.add_list.len(),
                cache_index.delete_list.len(),
                index.items.len()
            );
        }
        Ok(RelayOutcome::Success)
    }

    fn update(&self, message: &RelayMessage) -> Result<RelayOutcome, ComponentError> {
        let update: CacheIndexUpdate = from_bytes(Self::payload_bytes(message)?)?;
        match &update.command {
            Command::FilteredIndexDelete(command) => self.filtered_delete(message.type_id, command),
        }
    }

    fn filtered_delete(
        &self,
        type_id: i16,
        command: &FilteredIndexDeleteCommand,
    ) -> Result<RelayOutcome, ComponentError> {
        let index_id = required_id(command.index_id.as_deref(), "FilteredIndexDeleteCommand")?;
        Self::comparer(&self.schemas(), &command.target_index_name)?;

        let mut indexes = self.indexes();
        let key = IndexKey::new(type_id, &command.target_index_name, index_id);
        let Some(index) = indexes.get_mut(&key) else {
            return Ok(RelayOutcome::Nonexistent);
        };
        let Some(filter) = &command.delete_filter else {
            return Ok(RelayOutcome::Success);
        };

        let mut kept = Vec::with_capacity(index.items.len());
        for item in &index.items {
            if !filter.evaluate(item)? {
                kept.push(item.clone());
            }
        }
        let deleted = index.items.len() - kept.len();
        index.items = kept;
        index.virtual_count = index
            .virtual_count
            .saturating_sub(i32::try_from(deleted).unwrap_or(i32::MAX));
        debug!(
            "{} deleted {deleted} items from {} by filter",
            self.name, command.target_index_name
        );
        Ok(RelayOutcome::Success)
    }

    fn delete_index(&self, message: &RelayMessage) -> RelayOutcome {
        let Some(index_id) = message.extended_id.as_deref() else {
            return RelayOutcome::Nonexistent;
        };
        let mut indexes = self.indexes();
        let before = indexes.len();
        indexes.retain(|key, _| !(key.type_id == message.type_id && key.index_id == index_id));
        if indexes.len() < before {
            RelayOutcome::Success
        } else {
            RelayOutcome::Nonexistent
        }
    }

    fn query(&self, message: &mut RelayMessage) -> Result<RelayOutcome, ComponentError> {
        let bytes = match QueryTypes::try_from(message.query_id) {
            Ok(QueryTypes::ContainsIndexQuery) => {
                to_bytes(&self.contains(message.type_id, &message.read_query()?))?
            }
            Ok(QueryTypes::FirstLastQuery) => {
                to_bytes(&self.first_last(message.type_id, &message.read_query()?))?
            }
            Ok(QueryTypes::RandomQuery) => {
                to_bytes(&self.random(message.type_id, &message.read_query()?))?
            }
            Ok(QueryTypes::PagedIndexQuery | QueryTypes::PagedTaggedIndexQuery) => {
                to_bytes(&self.paged(message.type_id, &message.read_query()?))?
            }
            Ok(other) => {
                warn!("{} does not run {other:?}", self.name);
                return Ok(RelayOutcome::NotSupported);
            }
            Err(err) => {
                warn!("{} received an unknown query: {err}", self.name);
                return Ok(RelayOutcome::NotSupported);
            }
        };
        message.payload = Some(RelayPayload::new(message.type_id, message.id, bytes));
        Ok(RelayOutcome::Success)
    }

    /// Runs `f` against the index a single-index query targets, passing `None` when the
    /// index is configured but nothing was saved into it yet.
    fn with_index<T>(
        &self,
        type_id: i16,
        name: &str,
        index_id: Option<&[u8]>,
        kind: &'static str,
        f: impl FnOnce(&HashMap<IndexKey, StoredIndex>, Option<&StoredIndex>) -> Result<T, ComponentError>,
    ) -> Result<T, ComponentError> {
        let index_id = required_id(index_id, kind)?;
        let schemas = self.schemas();
        Self::comparer(&schemas, name)?;
        let indexes = self.indexes();
        let index = indexes.get(&IndexKey::new(type_id, name, index_id));
        f(&*indexes, index)
    }

    fn contains(&self, type_id: i16, query: &ContainsIndexQuery) -> ContainsIndexQueryResult {
        let run = || {
            self.with_index(
                type_id,
                &query.target_index_name,
                query.index_id.as_deref(),
                ContainsIndexQuery::KIND,
                |indexes, index| {
                    let Some(index) = index else {
                        return Ok(None);
                    };
                    let mut items: Vec<IndexDataItem> = query
                        .index_item_list
                        .iter()
                        .filter_map(|wanted| index.find(wanted.item_id()))
                        .map(|item| reply_item(item, query.exclude_data))
                        .collect();
                    for item in &mut items {
                        copy_tags(
                            indexes,
                            type_id,
                            query.index_id.as_deref().unwrap_or_default(),
                            &query.tags_from_indexes,
                            item,
                        );
                    }
                    Ok(Some(ContainsIndexQueryResult {
                        multi_item_result: Some(MultiItemResult {
                            index_id: query.index_id.clone(),
                            items,
                        }),
                        metadata: index.metadata.clone().filter(|_| query.get_metadata),
                        index_size: index.size(),
                        index_exists: true,
                        exception_info: String::new(),
                        virtual_count: index.virtual_count,
                    }))
                },
            )
        };
        match run() {
            Ok(Some(result)) => result,
            Ok(None) => ContainsIndexQueryResult {
                index_size: -1,
                virtual_count: -1,
                ..ContainsIndexQueryResult::default()
            },
            Err(err) => ContainsIndexQueryResult {
                index_size: -1,
                virtual_count: -1,
                exception_info: err.to_string(),
                ..ContainsIndexQueryResult::default()
            },
        }
    }

    fn first_last(&self, type_id: i16, query: &FirstLastQuery) -> FirstLastQueryResult {
        let run = || {
            if query.first_page_size < 1 && query.last_page_size < 1 {
                return Err(ComponentError::InvalidQuery(
                    "first or last page size must be positive".into(),
                ));
            }
            self.with_index(
                type_id,
                &query.target_index_name,
                query.index_id.as_deref(),
                FirstLastQuery::KIND,
                |_, index| {
                    let Some(index) = index else {
                        return Ok(None);
                    };
                    let index_id = query.index_id.clone().unwrap_or_default();
                    let wrap = |items: &[&IndexDataItem]| -> Vec<ResultItem> {
                        items
                            .iter()
                            .map(|item| {
                                ResultItem::new(index_id.clone(), reply_item(item, query.exclude_data))
                            })
                            .collect()
                    };

                    let matched = index.extract(query.filter.as_ref(), 0, None)?;
                    let first = usize::try_from(query.first_page_size).unwrap_or(0);
                    let last = usize::try_from(query.last_page_size).unwrap_or(0);
                    let (first_page, last_page) = if first + last <= matched.len() {
                        (wrap(&matched[..first]), wrap(&matched[matched.len() - last..]))
                    } else {
                        (wrap(&matched[..]), Vec::new())
                    };
                    Ok(Some(FirstLastQueryResult {
                        index_exists: true,
                        index_size: index.size(),
                        metadata: index.metadata.clone().filter(|_| query.get_metadata),
                        first_page_result_item_list: first_page,
                        last_page_result_item_list: last_page,
                        exception_info: String::new(),
                        virtual_count: index.virtual_count,
                    }))
                },
            )
        };
        match run() {
            Ok(Some(result)) => result,
            Ok(None) => FirstLastQueryResult {
                index_size: -1,
                virtual_count: -1,
                ..FirstLastQueryResult::default()
            },
            Err(err) => FirstLastQueryResult {
                index_size: -1,
                virtual_count: -1,
                exception_info: err.to_string(),
                ..FirstLastQueryResult::default()
            },
        }
    }

    /// Picks up to `count` matching items uniformly at random, returned in index order.
    fn random(&self, type_id: i16, query: &RandomQuery) -> RandomQueryResult {
        let run = || {
            if query.count < 1 {
                return Err(ComponentError::InvalidQuery("count must be positive".into()));
            }
            self.with_index(
                type_id,
                &query.target_index_name,
                query.index_id.as_deref(),
                RandomQuery::KIND,
                |_, index| {
                    let Some(index) = index else {
                        return Ok(None);
                    };
                    let matched = index.extract(query.filter.as_ref(), 0, None)?;
                    let amount = usize::try_from(query.count).unwrap_or(0).min(matched.len());
                    let mut positions = sample(&mut rand::thread_rng(), matched.len(), amount).into_vec();
                    positions.sort_unstable();

                    let index_id = query.index_id.clone().unwrap_or_default();
                    Ok(Some(RandomQueryResult {
                        index_exists: true,
                        index_size: index.size(),
                        metadata: index.metadata.clone().filter(|_| query.get_metadata),
                        result_item_list: positions
                            .into_iter()
                            .map(|at| {
                                ResultItem::new(index_id.clone(), reply_item(matched[at], query.exclude_data))
                            })
                            .collect(),
                        exception_info: String::new(),
                        virtual_count: index.virtual_count,
                    }))
                },
            )
        };
        match run() {
            Ok(Some(result)) => result,
            Ok(None) => RandomQueryResult {
                index_size: -1,
                virtual_count: -1,
                ..RandomQueryResult::default()
            },
            Err(err) => RandomQueryResult {
                index_size: -1,
                virtual_count: -1,
                exception_info: err.to_string(),
                ..RandomQueryResult::default()
            },
        }
    }

    fn paged(&self, type_id: i16, query: &PagedIndexQuery) -> PagedIndexQueryResult {
        self.run_paged(type_id, query).unwrap_or_else(|err| {
            warn!("{} failed a paged query: {err}", self.name);
            PagedIndexQueryResult {
                exception_info: err.to_string(),
                ..PagedIndexQueryResult::default()
            }
        })
    }

    fn run_paged(
        &self,
        type_id: i16,
        query: &PagedIndexQuery,
    ) -> Result<PagedIndexQueryResult, ComponentError> {
        let schemas = self.schemas();
        let schema_comparer = Self::comparer(&schemas, &query.target_index_name)?;
        let comparer = match &query.tag_sort {
            Some(sort) => BaseComparer::new(sort.is_tag, sort.field_name.clone(), vec![sort.sort_order])?,
            None => schema_comparer.clone(),
        };
        let range = query.index_condition.as_ref().map(|condition| {
            condition.create_conditions(
                schema_comparer.sort_field_name(),
                schema_comparer.is_tag_primary_sort(),
                schema_comparer.sort_orders().first().copied().unwrap_or_default(),
            )
        });

        let mut result = PagedIndexQueryResult {
            is_tag_primary_sort: comparer.is_tag_primary_sort(),
            sort_field_name: comparer.sort_field_name().to_string(),
            sort_order_list: comparer.sort_orders().to_vec(),
            ..PagedIndexQueryResult::default()
        };
        let indexes = self.indexes();
        let mut merged = Vec::new();
        let mut found = Vec::new();

        for index_id in &query.index_id_list {
            let key = IndexKey::new(type_id, &query.target_index_name, index_id);
            let Some(index) = indexes.get(&key) else {
                continue;
            };
            let extracted = index.extract(
                query.filter_for(index_id),
                query.max_items_for(index_id),
                range.as_ref(),
            )?;
            result.total_count = result.total_count.saturating_add(index.size());
            result.additional_available_item_count = result
                .additional_available_item_count
                .saturating_add(i32::try_from(extracted.len()).unwrap_or(i32::MAX));

            let mut items: Vec<ResultItem> = extracted
                .into_iter()
                .map(|item| ResultItem::new(index_id.clone(), reply_item(item, query.exclude_data)))
                .collect();
            if query.tag_sort.is_some() {
                items.sort_by(|a, b| comparer.compare_items(a, b));
            }
            merged = merge_sorted(merged, items, query.max_merge_count(), &comparer);
            found.push((index_id, index));
        }

        result.result_item_list = query.select_page(merged);
        for item in &mut result.result_item_list {
            let index_id = item.index_id.clone().unwrap_or_default();
            copy_tags(&indexes, type_id, &index_id, &query.tags_from_indexes, &mut item.item);
        }

        match query.get_index_header_type {
            GetIndexHeaderType::None => {}
            GetIndexHeaderType::AllIndexIds => {
                for (index_id, index) in &found {
                    result
                        .index_id_index_header_mapping
                        .insert(index_id.to_vec(), index.header());
                }
            }
            GetIndexHeaderType::ResultItemsIndexIds => {
                for item in &result.result_item_list {
                    let Some(index_id) = &item.index_id else {
                        continue;
                    };
                    if let Some((_, index)) = found.iter().find(|(id, _)| *id == index_id) {
                        result
                            .index_id_index_header_mapping
                            .insert(index_id.clone(), index.header());
                    }
                }
            }
        }

        debug!(
            "{} paged {} of {} items over {} indexes",
            self.name,
            result.result_item_list.len(),
            result.total_count,
            found.len()
        );
        Ok(result)
    }
}

/// Fills in tags the item carries in the other named indexes of the same index id.
fn copy_tags(
    indexes: &HashMap<IndexKey, StoredIndex>,
    type_id: i16,
    index_id: &[u8],
    index_names: &[String],
    item: &mut IndexDataItem,
) {
    for name in index_names {
        let Some(other) = indexes.get(&IndexKey::new(type_id, name, index_id)) else {
            continue;
        };
        let Some(source) = other.find(item.item_id()) else {
            continue;
        };
        for (tag, value) in &source.item.tags {
            item.item
                .tags
                .entry(tag.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new("IndexStore")
    }
}

impl RelayComponent for IndexStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, config: &RelayConfig) -> Result<(), ComponentError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ComponentError::AlreadyInitialized(self.name.clone()));
        }
        let schemas = Self::load_schemas(config)?;
        info!("{} initialized with indexes {:?}", self.name, schemas.keys());
        *self.schemas.write().unwrap_or_else(PoisonError::into_inner) = schemas;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn handle_message(&self, message: &mut RelayMessage) -> Result<(), ComponentError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ComponentError::NotRunning(self.name.clone()));
        }
        self.handled.fetch_add(1, Ordering::Relaxed);
        debug!("{} handling {message}", self.name);

        let outcome = match message.message_type {
            MessageType::Save | MessageType::SaveWithConfirm => self.save(message)?,
            MessageType::Update | MessageType::UpdateWithConfirm => self.update(message)?,
            MessageType::Query => self.query(message)?,
            MessageType::Delete | MessageType::DeleteWithConfirm => self.delete_index(message),
            MessageType::DeleteAllInType | MessageType::DeleteAllInTypeWithConfirm => {
                let type_id = message.type_id;
                self.indexes().retain(|key, _| key.type_id != type_id);
                RelayOutcome::Success
            }
            MessageType::Undefined
            | MessageType::Get
            | MessageType::Invoke
            | MessageType::Notification
            | MessageType::NotificationWithConfirm
            | MessageType::Increment
            | MessageType::IncrementWithConfirm
            | MessageType::DeleteAll
            | MessageType::DeleteAllWithConfirm
            | MessageType::DeleteInAllTypes
            | MessageType::DeleteInAllTypesWithConfirm => {
                info!("{} does not support {:?}", self.name, message.message_type);
                RelayOutcome::NotSupported
            }
        };
        message.result_outcome = Some(outcome);
        Ok(())
    }

    /// Re-sorts stored indexes under the new schemas and drops those whose schema is gone.
    fn reload_config(&self, config: &RelayConfig) -> Result<(), ComponentError> {
        let schemas = Self::load_schemas(config)?;
        let mut current = self.schemas.write().unwrap_or_else(PoisonError::into_inner);
        let mut indexes = self.indexes();
        indexes.retain(|key, index| match schemas.get(&key.name) {
            Some(comparer) => {
                index.items.sort_by(|a, b| comparer.compare_items(a, b));
                true
            }
            None => false,
        });
        info!(
            "{} reloaded configuration, {} indexes kept",
            self.name,
            indexes.len()
        );
        *current = schemas;
        Ok(())
    }

    fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("{} shut down after {} messages", self.name, self.handled.load(Ordering::Relaxed));
        }
    }

    fn runtime_info(&self) -> ComponentRuntimeInfo {
        let items: usize = self.indexes().values().map(|index| index.items.len()).sum();
        ComponentRuntimeInfo {
            component_name: self.name.clone(),
            messages_handled: self.handled.load(Ordering::Relaxed),
            objects_stored: items as u64,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc, thread};

    use super::*;
    use crate::{
        codec::VersionSerializable,
        config::SocketSettings,
        index::{
            DataType, FilteredIndexDeleteCommand, IndexCondition, IndexItem, Operation, SortBy,
            SortOrder, TagSort,
            query::{IndexIdParams, PrimaryQuery},
        },
        protocol::{RelayClient, RelayServer},
    };

    const TYPE_ID: i16 = 12;
    const OWNER_A: &[u8] = b"owner-a";
    const OWNER_B: &[u8] = b"owner-b";

    const CONFIG: &str = r#"
        [[indexes]]
        name = "by_score"
        sort_field = "score"
        is_tag = true
        tags = [{ name = "score", data_type = "Int32" }, { name = "kind", data_type = "Byte" }]
        sort_orders = [{ data_type = "Int32", sort_by = "Desc" }]

        [[indexes]]
        name = "by_id"
        sort_orders = [{ data_type = "Int32", sort_by = "Asc" }]
    "#;

    fn config() -> RelayConfig {
        RelayConfig::from_toml_str(CONFIG).unwrap()
    }

    fn running_store() -> IndexStore {
        let store = IndexStore::default();
        store.initialize(&config()).unwrap();
        store
    }

    fn item(id: i32, score: i32) -> IndexDataItem {
        let kind = u8::try_from(id % 2).unwrap();
        IndexDataItem::new(
            IndexItem::new(id.to_le_bytes())
                .with_tag("score", score.to_le_bytes())
                .with_tag("kind", [kind]),
            Some(format!("data-{id}").into_bytes()),
        )
    }

    fn ids(items: &[ResultItem]) -> Vec<i32> {
        items.iter().map(|item| id_of(&item.item)).collect()
    }

    fn id_of(item: &IndexDataItem) -> i32 {
        let bytes = item.item_id().unwrap();
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn int_filter(tag: &str, operation: Operation, value: i32) -> Filter {
        Filter::Condition(Condition::new(tag, true, operation, value.to_le_bytes(), DataType::Int32))
    }

    fn odd_kind() -> Filter {
        Filter::Condition(Condition::new("kind", true, Operation::Equals, [1u8], DataType::Byte))
    }

    fn save_message(cache_index: &CacheIndex) -> RelayMessage {
        let bytes = to_bytes(cache_index).unwrap();
        let mut message = RelayMessage::save(RelayPayload::new(TYPE_ID, cache_index.primary_id(), bytes));
        message.message_type = MessageType::SaveWithConfirm;
        message
    }

    fn update_message(command: FilteredIndexDeleteCommand) -> RelayMessage {
        let update = CacheIndexUpdate::new(Command::FilteredIndexDelete(command));
        let bytes = to_bytes(&update).unwrap();
        let mut message = RelayMessage::save(RelayPayload::new(TYPE_ID, update.primary_id(), bytes));
        message.message_type = MessageType::UpdateWithConfirm;
        message
    }

    /// Saves `items` into every configured index of `owner`.
    fn save(store: &IndexStore, owner: &[u8], items: Vec<IndexDataItem>) {
        let mut cache_index = CacheIndex::new(owner, "");
        cache_index.add_list = items;
        let mut message = save_message(&cache_index);
        store.handle_message(&mut message).unwrap();
        assert_eq!(message.result_outcome, Some(RelayOutcome::Success));
    }

    fn run<Q, R>(store: &IndexStore, query: &Q) -> R
    where
        Q: PrimaryQuery + VersionSerializable,
        R: VersionSerializable,
    {
        let mut message = RelayMessage::query(TYPE_ID, query).unwrap();
        store.handle_message(&mut message).unwrap();
        assert_eq!(message.result_outcome, Some(RelayOutcome::Success));
        from_bytes(message.payload.unwrap().byte_array.as_deref().unwrap()).unwrap()
    }

    /// Owner A holds ids 1..=5 scored 10..=50, owner B ids 11..=15 scored 15..=55.
    fn two_owner_store() -> IndexStore {
        let store = running_store();
        save(&store, OWNER_A, (1..=5).map(|id| item(id, id * 10)).collect());
        save(&store, OWNER_B, (11..=15).map(|id| item(id, (id - 10) * 10 + 5)).collect());
        store
    }

    #[test]
    fn saves_keep_schema_order_and_replace_by_id() {
        let store = running_store();
        save(&store, OWNER_A, (1..=5).map(|id| item(id, id * 10)).collect());
        save(&store, OWNER_A, vec![item(3, 100)]);
        assert_eq!(store.index_len(TYPE_ID, "by_score", OWNER_A), Some(5));
        assert_eq!(store.index_len(TYPE_ID, "by_id", OWNER_A), Some(5));
        assert_eq!(store.index_count(), 2);

        let result: FirstLastQueryResult = run(&store, &FirstLastQuery::new(OWNER_A, 5, 0, "by_score"));
        assert_eq!(ids(&result.first_page_result_item_list), vec![3, 5, 4, 2, 1]);

        let result: FirstLastQueryResult = run(&store, &FirstLastQuery::new(OWNER_A, 5, 0, "by_id"));
        assert_eq!(ids(&result.first_page_result_item_list), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn delete_list_metadata_and_virtual_count_are_applied() {
        let store = running_store();
        save(&store, OWNER_A, (1..=5).map(|id| item(id, id * 10)).collect());

        let mut cache_index = CacheIndex::new(OWNER_A, "by_score");
        cache_index.delete_list = vec![IndexItem::new(2i32.to_le_bytes()), IndexItem::new(9i32.to_le_bytes())];
        cache_index.metadata = Some(b"meta".to_vec());
        cache_index.update_metadata = true;
        cache_index.index_virtual_count_mapping.insert("by_score".into(), 40);
        store.handle_message(&mut save_message(&cache_index)).unwrap();

        let mut query = FirstLastQuery::new(OWNER_A, 10, 0, "by_score");
        query.get_metadata = true;
        let result: FirstLastQueryResult = run(&store, &query);
        assert_eq!(ids(&result.first_page_result_item_list), vec![5, 4, 3, 1]);
        assert_eq!(result.metadata.as_deref(), Some(&b"meta"[..]));
        assert_eq!(result.virtual_count, 40);
        assert_eq!(result.index_size, 4);
        assert_eq!(store.index_len(TYPE_ID, "by_id", OWNER_A), Some(5));
    }

    #[test]
    fn full_replace_can_preserve_data() {
        let store = running_store();
        save(&store, OWNER_A, (1..=3).map(|id| item(id, id * 10)).collect());

        let mut cache_index = CacheIndex::new(OWNER_A, "by_score");
        cache_index.replace_full_index = true;
        cache_index.preserve_data = true;
        cache_index.add_list = vec![
            IndexDataItem::new(item(2, 5).item, None),
            IndexDataItem::new(item(7, 70).item, None),
        ];
        store.handle_message(&mut save_message(&cache_index)).unwrap();

        let result: FirstLastQueryResult = run(&store, &FirstLastQuery::new(OWNER_A, 10, 0, "by_score"));
        let items = &result.first_page_result_item_list;
        assert_eq!(ids(items), vec![7, 2]);
        assert_eq!(items[0].item.data, None);
        assert_eq!(items[1].item.data.as_deref(), Some(&b"data-2"[..]));
    }

    #[test]
    fn tag_mapping_limits_stored_tags() {
        let store = running_store();
        let mut cache_index = CacheIndex::new(OWNER_A, "by_id");
        cache_index.add_list = vec![item(1, 10)];
        cache_index
            .index_tag_mapping
            .insert("by_id".into(), vec!["kind".into()]);
        store.handle_message(&mut save_message(&cache_index)).unwrap();

        let result: FirstLastQueryResult = run(&store, &FirstLastQuery::new(OWNER_A, 1, 0, "by_id"));
        let tags = &result.first_page_result_item_list[0].item.item.tags;
        assert!(tags.contains_key("kind"));
        assert!(!tags.contains_key("score"));
    }

    #[test]
    fn first_last_pages_over_filtered_items() {
        let store = running_store();
        save(&store, OWNER_A, (1..=10).map(|id| item(id, id * 10)).collect());

        let mut query = FirstLastQuery::new(OWNER_A, 2, 2, "by_score");
        query.filter = Some(odd_kind());
        query.exclude_data = true;
        let result: FirstLastQueryResult = run(&store, &query);
        assert!(result.index_exists);
        assert_eq!(result.index_size, 10);
        assert_eq!(ids(&result.first_page_result_item_list), vec![9, 7]);
        assert_eq!(ids(&result.last_page_result_item_list), vec![3, 1]);
        assert!(result.first_page_result_item_list.iter().all(|i| i.item.data.is_none()));

        // pages that would overlap come back as one first page
        query.first_page_size = 4;
        query.last_page_size = 4;
        let result: FirstLastQueryResult = run(&store, &query);
        assert_eq!(ids(&result.first_page_result_item_list), vec![9, 7, 5, 3, 1]);
        assert!(result.last_page_result_item_list.is_empty());
    }

    #[test]
    fn contains_finds_items_and_pulls_tags_from_other_indexes() {
        let store = running_store();
        let mut by_score = CacheIndex::new(OWNER_A, "by_score");
        by_score.add_list = (1i32..=3)
            .map(|id| IndexDataItem::new(IndexItem::new(id.to_le_bytes()).with_tag("score", (id * 10).to_le_bytes()), None))
            .collect();
        store.handle_message(&mut save_message(&by_score)).unwrap();
        let mut by_id = CacheIndex::new(OWNER_A, "by_id");
        by_id.add_list = vec![IndexDataItem::new(IndexItem::new(2i32.to_le_bytes()).with_tag("label", *b"two"), None)];
        store.handle_message(&mut save_message(&by_id)).unwrap();

        let mut query = ContainsIndexQuery::new(
            OWNER_A,
            vec![IndexItem::new(2i32.to_le_bytes()), IndexItem::new(42i32.to_le_bytes())],
            "by_score",
        );
        query.tags_from_indexes = vec!["by_id".into()];
        let result: ContainsIndexQueryResult = run(&store, &query);
        assert!(result.index_exists);
        assert_eq!(result.index_size, 3);

        let found = result.multi_item_result.unwrap();
        assert_eq!(found.index_id.as_deref(), Some(OWNER_A));
        assert_eq!(found.items.len(), 1);
        assert_eq!(id_of(&found.items[0]), 2);
        assert_eq!(found.items[0].item.tag("label"), Some(Some(&b"two"[..])));
        assert_eq!(found.items[0].item.tag("score"), Some(Some(&20i32.to_le_bytes()[..])));
    }

    #[test]
    fn random_picks_distinct_matching_items_in_index_order() {
        let store = running_store();
        save(&store, OWNER_A, (1..=10).map(|id| item(id, id * 10)).collect());

        let mut query = RandomQuery::new(OWNER_A, 3, "by_score");
        query.filter = Some(odd_kind());
        for _ in 0..10 {
            let result: RandomQueryResult = run(&store, &query);
            let picked = ids(&result.result_item_list);
            assert_eq!(picked.len(), 3);
            assert!(picked.iter().all(|id| id % 2 == 1));
            assert!(picked.windows(2).all(|pair| pair[0] > pair[1]), "{picked:?}");
        }

        query.count = 50;
        let result: RandomQueryResult = run(&store, &query);
        assert_eq!(ids(&result.result_item_list), vec![9, 7, 5, 3, 1]);

        query.count = 0;
        let result: RandomQueryResult = run(&store, &query);
        assert!(!result.index_exists);
        assert!(result.exception_info.contains("count"));
    }

    #[test]
    fn missing_and_unknown_indexes_are_reported_in_the_result() {
        let store = two_owner_store();

        let result: RandomQueryResult = run(&store, &RandomQuery::new(b"nobody".to_vec(), 1, "by_score"));
        assert!(!result.index_exists);
        assert_eq!(result.index_size, -1);
        assert!(result.exception_info.is_empty());

        let result: ContainsIndexQueryResult = run(&store, &ContainsIndexQuery::new(OWNER_A, vec![], "by_name"));
        assert!(!result.index_exists);
        assert!(result.exception_info.contains("by_name"), "{}", result.exception_info);

        let result: PagedIndexQueryResult =
            run(&store, &PagedIndexQuery::new(vec![OWNER_A.to_vec()], 2, 1, "by_name"));
        assert!(result.result_item_list.is_empty());
        assert!(result.exception_info.contains("not configured"));
    }

    #[test]
    fn paged_query_merges_indexes_and_cuts_the_page() {
        let store = two_owner_store();
        let owners = vec![OWNER_A.to_vec(), OWNER_B.to_vec()];

        let mut query = PagedIndexQuery::new(owners.clone(), 4, 2, "by_score");
        query.get_index_header_type = GetIndexHeaderType::ResultItemsIndexIds;
        let result: PagedIndexQueryResult = run(&store, &query);
        assert_eq!(ids(&result.result_item_list), vec![13, 3, 12, 2]);
        assert_eq!(result.total_count, 10);
        assert!(result.is_tag_primary_sort);
        assert_eq!(result.sort_field_name, "score");
        assert_eq!(
            result.index_id_index_header_mapping.keys().cloned().collect::<Vec<_>>(),
            owners
        );

        let all: PagedIndexQueryResult = run(&store, &PagedIndexQuery::new(owners, 4, 0, "by_score"));
        assert_eq!(ids(&all.result_item_list), vec![15, 5, 14, 4, 13, 3, 12, 2, 11, 1]);
        assert_eq!(all.additional_available_item_count, 10);
    }

    #[test]
    fn paged_query_applies_caps_filters_and_ranges() {
        let store = two_owner_store();
        let owners = vec![OWNER_A.to_vec(), OWNER_B.to_vec()];

        let mut capped = PagedIndexQuery::new(owners.clone(), 10, 0, "by_score");
        capped.max_items_per_index = 2;
        let result: PagedIndexQueryResult = run(&store, &capped);
        assert_eq!(ids(&result.result_item_list), vec![15, 5, 14, 4]);
        assert_eq!(result.additional_available_item_count, 4);
        assert_eq!(result.total_count, 10);

        let mut filtered = PagedIndexQuery::new(owners.clone(), 10, 0, "by_score");
        filtered.filter = Some(int_filter("score", Operation::GreaterThan, 40));
        filtered.index_id_params_mapping.insert(
            OWNER_A.to_vec(),
            IndexIdParams::new(-1, Some(int_filter("score", Operation::LessThanEquals, 20))),
        );
        let result: PagedIndexQueryResult = run(&store, &filtered);
        assert_eq!(ids(&result.result_item_list), vec![15, 14, 2, 1]);

        let mut ranged = PagedIndexQuery::new(owners, 10, 0, "by_score");
        ranged.index_condition = Some(IndexCondition {
            inclusive_max_value: Some(45i32.to_le_bytes().to_vec()),
            inclusive_min_value: Some(20i32.to_le_bytes().to_vec()),
        });
        let result: PagedIndexQueryResult = run(&store, &ranged);
        assert_eq!(ids(&result.result_item_list), vec![14, 4, 13, 3, 12, 2]);
    }

    #[test]
    fn paged_query_can_sort_by_another_tag() {
        let store = two_owner_store();
        let mut query = PagedIndexQuery::new(vec![OWNER_A.to_vec(), OWNER_B.to_vec()], 3, 1, "by_score");
        query.tag_sort = Some(TagSort {
            field_name: "score".into(),
            is_tag: true,
            sort_order: SortOrder::new(DataType::Int32, SortBy::Asc),
        });
        let result: PagedIndexQueryResult = run(&store, &query);
        assert_eq!(ids(&result.result_item_list), vec![1, 11, 2]);
        assert_eq!(result.sort_order_list, vec![SortOrder::new(DataType::Int32, SortBy::Asc)]);
    }

    #[test]
    fn filtered_delete_prunes_matching_items() {
        let store = running_store();
        let mut cache_index = CacheIndex::new(OWNER_A, "by_score");
        cache_index.add_list = (1..=5).map(|id| item(id, id * 10)).collect();
        cache_index.index_virtual_count_mapping.insert("by_score".into(), 100);
        store.handle_message(&mut save_message(&cache_index)).unwrap();

        let mut delete = update_message(FilteredIndexDeleteCommand::new(
            OWNER_A,
            "by_score",
            int_filter("score", Operation::LessThan, 30),
        ));
        store.handle_message(&mut delete).unwrap();
        assert_eq!(delete.result_outcome, Some(RelayOutcome::Success));

        let result: FirstLastQueryResult = run(&store, &FirstLastQuery::new(OWNER_A, 10, 0, "by_score"));
        assert_eq!(ids(&result.first_page_result_item_list), vec![5, 4, 3]);
        assert_eq!(result.virtual_count, 98);

        let mut missing = update_message(FilteredIndexDeleteCommand::new(
            OWNER_B,
            "by_score",
            odd_kind(),
        ));
        store.handle_message(&mut missing).unwrap();
        assert_eq!(missing.result_outcome, Some(RelayOutcome::Nonexistent));
    }

    #[test]
    fn deletes_drop_whole_indexes() {
        let store = two_owner_store();
        assert_eq!(store.index_count(), 4);
        assert_eq!(store.runtime_info().objects_stored, 20);

        let mut delete = RelayMessage::new(TYPE_ID, 0, MessageType::DeleteWithConfirm);
        delete.extended_id = Some(OWNER_A.to_vec());
        store.handle_message(&mut delete).unwrap();
        assert_eq!(delete.result_outcome, Some(RelayOutcome::Success));
        assert_eq!(store.index_count(), 2);

        store
            .handle_message(&mut RelayMessage::new(TYPE_ID, 0, MessageType::DeleteAllInType))
            .unwrap();
        assert_eq!(store.index_count(), 0);
    }

    #[test]
    fn bad_payloads_and_unsupported_types() {
        let store = running_store();
        let mut save = RelayMessage::save(RelayPayload::new(TYPE_ID, 1, vec![1, 2, 3]));
        assert!(matches!(store.handle_message(&mut save), Err(ComponentError::Format(_))));

        let mut no_target = CacheIndex::new(OWNER_A, "by_name");
        no_target.add_list = vec![item(1, 1)];
        assert!(matches!(
            store.handle_message(&mut save_message(&no_target)),
            Err(ComponentError::UnknownIndex(name)) if name == "by_name"
        ));

        let mut get = RelayMessage::get(TYPE_ID, 1);
        store.handle_message(&mut get).unwrap();
        assert_eq!(get.result_outcome, Some(RelayOutcome::NotSupported));
    }

    #[test]
    fn reload_drops_indexes_without_a_schema() {
        let store = two_owner_store();
        let mut reduced = config();
        reduced.indexes.retain(|schema| schema.name == "by_id");
        store.reload_config(&reduced).unwrap();
        assert_eq!(store.index_count(), 2);
        assert_eq!(store.index_len(TYPE_ID, "by_score", OWNER_A), None);
    }

    fn start_server() -> (SocketAddr, crate::protocol::ShutdownHandle, thread::JoinHandle<()>) {
        let config = config();
        let store = Arc::new(IndexStore::new("TestIndexStore"));
        store.initialize(&config).unwrap();
        let server = RelayServer::bind("127.0.0.1:0".parse().unwrap(), &config, store).unwrap();
        let address = server.local_addr();
        let handle = server.shutdown_handle();
        (address, handle, thread::spawn(move || server.listen().unwrap()))
    }

    #[test]
    fn queries_over_the_wire() {
        let (address, handle, server) = start_server();
        let client = RelayClient::connect(address, SocketSettings::default()).unwrap();

        for (owner, first) in [(OWNER_A, 1), (OWNER_B, 11)] {
            let mut cache_index = CacheIndex::new(owner, "by_score");
            cache_index.add_list = (first..first + 5).map(|id| item(id, id * 3)).collect();
            let mut message = save_message(&cache_index);
            client.send_message(&mut message).unwrap();
            assert_eq!(message.result_outcome, Some(RelayOutcome::Success));
        }

        let mut delete = update_message(FilteredIndexDeleteCommand::new(
            OWNER_B,
            "by_score",
            int_filter("score", Operation::GreaterThan, 40),
        ));
        client.send_message(&mut delete).unwrap();
        assert_eq!(delete.result_outcome, Some(RelayOutcome::Success));

        let mut query = PagedIndexQuery::new(vec![OWNER_A.to_vec(), OWNER_B.to_vec()], 3, 1, "by_score");
        query.filter = Some(odd_kind());
        let mut message = RelayMessage::query(TYPE_ID, &query).unwrap();
        client.send_message(&mut message).unwrap();
        assert_eq!(message.result_outcome, Some(RelayOutcome::Success));
        let result: PagedIndexQueryResult =
            from_bytes(message.payload.unwrap().byte_array.as_deref().unwrap()).unwrap();
        // owner B keeps 11, 12 and 13; owner A keeps 1..=5
        assert_eq!(ids(&result.result_item_list), vec![13, 11, 5]);
        assert_eq!(result.total_count, 8);

        let mut query = FirstLastQuery::new(OWNER_A, 1, 1, "by_score");
        query.exclude_data = true;
        let mut message = RelayMessage::query(TYPE_ID, &query).unwrap();
        client.send_message(&mut message).unwrap();
        let result: FirstLastQueryResult =
            from_bytes(message.payload.unwrap().byte_array.as_deref().unwrap()).unwrap();
        assert_eq!(ids(&result.first_page_result_item_list), vec![5]);
        assert_eq!(ids(&result.last_page_result_item_list), vec![1]);

        drop(client);
        handle.shutdown();
        server.join().unwrap();
    }
}
