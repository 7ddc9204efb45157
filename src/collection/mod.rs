//! A collection: a named, schema-bound set of documents spread over a
//! fixed number of in-memory shards.
//!
//! The collection owns schema validation, sequence-id assignment, document
//! persistence, shard fan-out, result merging, faceting, curation, and
//! highlighting. A document lives in shard `seq_id % num_shards`; queries
//! fan out to every shard and merge by the composite ranking key.

pub mod curation;
pub mod highlight;
pub mod synonym;

pub use curation::Override;
pub use synonym::Synonym;

use std::cmp::Reverse;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::analysis::tokenize;
use crate::error::{QuarryError, Result};
use crate::index::facet::{FacetState, FacetStats};
use crate::index::{
    ShardHit, ShardIndex, ShardSearchArgs, DROP_TOKENS_THRESHOLD, TYPO_TOKENS_THRESHOLD,
};
use crate::query::filter::parse_filter;
use crate::query::sort::{resolve_sort_clauses, SortClause};
use crate::query::TokenOrdering;
use crate::schema::{infer_field_type, validate_document, Field, Schema};
use crate::store::{serialize_u32, Store, WriteBatch};

/// Shard count used when a collection is created with zero shards.
pub const DEFAULT_NUM_MEMORY_SHARDS: usize = 4;

/// Store prefix of collection meta records.
pub const COLLECTION_META_PREFIX: &str = "$CM_";

/// Rough multiplier from document bytes to resident index bytes.
const MEMORY_ESTIMATE_FACTOR: u64 = 4;

/// Persisted collection metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    pub id: u32,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default = "default_num_shards")]
    pub num_memory_shards: usize,
    pub default_sorting_field: String,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub index_all_fields: bool,
}

fn default_num_shards() -> usize {
    DEFAULT_NUM_MEMORY_SHARDS
}

/// One record of a batched (re-)indexing pass.
#[derive(Debug)]
pub struct IndexRecord {
    pub seq_id: u32,
    pub document: Map<String, Value>,
    /// Filled when indexing this record failed.
    pub error: Option<QuarryError>,
}

impl IndexRecord {
    /// Create a record pending indexing.
    pub fn new(seq_id: u32, document: Map<String, Value>) -> Self {
        IndexRecord {
            seq_id,
            document,
            error: None,
        }
    }
}

/// A search request against one collection.
///
/// Defaults mirror the wire-level parameter defaults of the search API.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub query_by: Vec<String>,
    pub query_by_weights: Vec<u32>,
    pub filter_by: String,
    pub facet_by: Vec<String>,
    pub sort_by: Vec<SortClause>,
    pub num_typos: u32,
    pub per_page: usize,
    pub page: usize,
    pub token_order: TokenOrdering,
    pub prefix: bool,
    pub drop_tokens_threshold: u32,
    pub typo_tokens_threshold: u32,
    pub include_fields: AHashSet<String>,
    pub exclude_fields: AHashSet<String>,
    pub max_facet_values: usize,
    pub facet_query: String,
    pub snippet_threshold: usize,
    pub highlight_affix_num_tokens: usize,
    pub highlight_full_fields: Vec<String>,
    pub pinned_hits: String,
    pub hidden_hits: String,
    pub group_by: Vec<String>,
    pub group_limit: usize,
    pub highlight_start_tag: String,
    pub highlight_end_tag: String,
    pub limit_hits: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            query: String::new(),
            query_by: Vec::new(),
            query_by_weights: Vec::new(),
            filter_by: String::new(),
            facet_by: Vec::new(),
            sort_by: Vec::new(),
            num_typos: 2,
            per_page: 10,
            page: 1,
            token_order: TokenOrdering::default(),
            prefix: true,
            drop_tokens_threshold: DROP_TOKENS_THRESHOLD,
            typo_tokens_threshold: TYPO_TOKENS_THRESHOLD,
            include_fields: AHashSet::new(),
            exclude_fields: AHashSet::new(),
            max_facet_values: 10,
            facet_query: String::new(),
            snippet_threshold: 30,
            highlight_affix_num_tokens: 4,
            highlight_full_fields: Vec::new(),
            pinned_hits: String::new(),
            hidden_hits: String::new(),
            group_by: Vec::new(),
            group_limit: 0,
            highlight_start_tag: "<mark>".to_string(),
            highlight_end_tag: "</mark>".to_string(),
            limit_hits: u32::MAX as usize,
        }
    }
}

impl SearchRequest {
    /// Create a request for a query string with all defaults.
    pub fn new<S: Into<String>>(query: S) -> Self {
        SearchRequest {
            query: query.into(),
            ..SearchRequest::default()
        }
    }
}

/// A named, schema-bound, sharded document set.
pub struct Collection {
    name: String,
    collection_id: u32,
    created_at: u64,
    num_shards: usize,
    store: Arc<dyn Store>,
    pool: Arc<rayon::ThreadPool>,
    schema: RwLock<Schema>,
    next_seq_id: Mutex<u32>,
    shards: Vec<RwLock<ShardIndex>>,
    doc_ids: RwLock<AHashMap<String, u32>>,
    overrides: RwLock<BTreeMap<String, Override>>,
    synonyms: RwLock<BTreeMap<String, Synonym>>,
    memory_used: AtomicU64,
    max_memory_bytes: u64,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("collection_id", &self.collection_id)
            .field("num_shards", &self.num_shards)
            .finish()
    }
}

impl Collection {
    /// Construct an empty collection over a store handle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        collection_id: u32,
        created_at: u64,
        next_seq_id: u32,
        store: Arc<dyn Store>,
        pool: Arc<rayon::ThreadPool>,
        schema: Schema,
        num_shards: usize,
        max_memory_bytes: u64,
    ) -> Self {
        let num_shards = if num_shards == 0 {
            DEFAULT_NUM_MEMORY_SHARDS
        } else {
            num_shards
        };

        Collection {
            name: name.to_string(),
            collection_id,
            created_at,
            num_shards,
            store,
            pool,
            schema: RwLock::new(schema),
            next_seq_id: Mutex::new(next_seq_id),
            shards: (0..num_shards).map(|_| RwLock::new(ShardIndex::new())).collect(),
            doc_ids: RwLock::new(AHashMap::new()),
            overrides: RwLock::new(BTreeMap::new()),
            synonyms: RwLock::new(BTreeMap::new()),
            memory_used: AtomicU64::new(0),
            max_memory_bytes,
        }
    }

    // -- key layout -------------------------------------------------------

    /// Store key of a collection's meta record.
    pub fn get_meta_key(name: &str) -> String {
        format!("{COLLECTION_META_PREFIX}{name}")
    }

    /// Store key of a collection's next-sequence-id counter.
    pub fn get_next_seq_id_key(name: &str) -> String {
        format!("{name}_NEXT_SEQ_ID")
    }

    /// Store key of one override.
    pub fn get_override_key(name: &str, override_id: &str) -> String {
        format!("{name}_OVERRIDE_{override_id}")
    }

    /// Store key of one synonym.
    pub fn get_synonym_key(name: &str, synonym_id: &str) -> String {
        format!("{name}_SYNONYM_{synonym_id}")
    }

    /// Store key of a document body. Sequence ids are zero-padded so scan
    /// order equals numeric order.
    pub fn get_seq_id_key(collection_id: u32, seq_id: u32) -> String {
        format!("{collection_id}_D_{seq_id:010}")
    }

    /// Store prefix of all document bodies of a collection.
    pub fn get_seq_id_collection_prefix(collection_id: u32) -> String {
        format!("{collection_id}_D_")
    }

    /// Recover a sequence id from a document key.
    pub fn get_seq_id_from_key(key: &str) -> Option<u32> {
        key.rsplit('_').next()?.parse().ok()
    }

    // -- accessors --------------------------------------------------------

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_collection_id(&self) -> u32 {
        self.collection_id
    }

    pub fn get_created_at(&self) -> u64 {
        self.created_at
    }

    pub fn get_num_shards(&self) -> usize {
        self.num_shards
    }

    pub fn get_next_seq_id(&self) -> u32 {
        *self.next_seq_id.lock()
    }

    /// Snapshot of the schema, including auto-registered fields.
    pub fn get_schema(&self) -> Schema {
        self.schema.read().clone()
    }

    /// Total live documents across all shards.
    pub fn num_documents(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().num_documents()).sum()
    }

    /// Persisted meta record for this collection.
    pub fn to_meta(&self) -> CollectionMeta {
        let schema = self.schema.read();
        CollectionMeta {
            name: self.name.clone(),
            id: self.collection_id,
            created_at: self.created_at,
            num_memory_shards: self.num_shards,
            default_sorting_field: schema.default_sorting_field.clone(),
            fields: schema.fields.clone(),
            index_all_fields: schema.index_all_fields,
        }
    }

    // -- ingestion --------------------------------------------------------

    /// Add a document from its JSON text. Returns the stored document,
    /// with its `id` assigned when absent.
    pub fn add(&self, json_str: &str) -> Result<Value> {
        let parsed: Value =
            serde_json::from_str(json_str).map_err(|_| QuarryError::bad_request("Bad JSON."))?;
        let mut document = match parsed {
            Value::Object(map) => map,
            _ => return Err(QuarryError::bad_request("Bad JSON.")),
        };

        let estimate = json_str.len() as u64 * MEMORY_ESTIMATE_FACTOR;
        if self.memory_used.load(Ordering::Relaxed) + estimate > self.max_memory_bytes {
            return Err(QuarryError::resource_exhausted("Max memory ratio exceeded."));
        }

        // the counter lock is held across the persisted batch so the
        // stored counter always matches the highest assigned id
        let mut next_seq_id = self.next_seq_id.lock();
        let seq_id = *next_seq_id;

        let doc_id = match document.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(_) => {
                return Err(QuarryError::bad_request(
                    "Document's `id` field should be a string.",
                ));
            }
            None => {
                let id = seq_id.to_string();
                document.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        if self.doc_ids.read().contains_key(&doc_id) {
            return Err(QuarryError::conflict(format!(
                "A document with id {doc_id} already exists."
            )));
        }

        self.register_unknown_fields(&document);
        {
            let schema = self.schema.read();
            validate_document(&document, &schema)?;
        }

        let doc_key = Self::get_seq_id_key(self.collection_id, seq_id);
        let mut batch = WriteBatch::new();
        batch.put(doc_key.clone(), serde_json::to_vec(&document)?);
        batch.put(
            Self::get_next_seq_id_key(&self.name),
            serialize_u32(seq_id + 1),
        );
        self.store.batch_write(batch)?;
        *next_seq_id = seq_id + 1;
        drop(next_seq_id);

        let index_result = {
            let schema = self.schema.read();
            self.shards[seq_id as usize % self.num_shards]
                .write()
                .index_document(seq_id, &document, &schema)
        };
        if let Err(err) = index_result {
            // the body write must not outlive a failed index mutation
            let _ = self.store.remove(&doc_key);
            return Err(err);
        }

        self.doc_ids.write().insert(doc_id, seq_id);
        self.memory_used.fetch_add(estimate, Ordering::Relaxed);

        Ok(Value::Object(document))
    }

    /// Fetch one document by its `id`.
    pub fn get(&self, doc_id: &str) -> Result<Value> {
        let seq_id = self.seq_id_of(doc_id)?;
        self.fetch_document(seq_id)
    }

    /// Remove a document by its `id`, returning the removed body.
    pub fn remove(&self, doc_id: &str) -> Result<Value> {
        let seq_id = self.seq_id_of(doc_id)?;
        let document = self.fetch_document(seq_id)?;
        let obj = document
            .as_object()
            .ok_or_else(|| QuarryError::internal("Stored document is not an object."))?;

        {
            let schema = self.schema.read();
            self.shards[seq_id as usize % self.num_shards]
                .write()
                .remove_document(seq_id, obj, &schema);
        }

        self.store
            .remove(&Self::get_seq_id_key(self.collection_id, seq_id))?;
        self.doc_ids.write().remove(doc_id);

        Ok(document)
    }

    /// Index a batch already partitioned by shard, in parallel. Returns the
    /// per-shard counts of successfully indexed records; failed records
    /// carry their error.
    pub fn par_index_in_memory(&self, batches: &mut [Vec<IndexRecord>]) -> Vec<usize> {
        let schema = self.schema.read().clone();

        let counts: Vec<usize> = self.pool.install(|| {
            batches
                .par_iter_mut()
                .enumerate()
                .map(|(shard_idx, records)| {
                    let mut shard = self.shards[shard_idx].write();
                    let mut indexed = 0;
                    for record in records.iter_mut() {
                        match shard.index_document(record.seq_id, &record.document, &schema) {
                            Ok(()) => indexed += 1,
                            Err(err) => record.error = Some(err),
                        }
                    }
                    indexed
                })
                .collect()
        });

        let mut doc_ids = self.doc_ids.write();
        let mut added_bytes = 0u64;
        for records in batches.iter() {
            for record in records {
                if record.error.is_none() {
                    if let Some(id) = record.document.get("id").and_then(Value::as_str) {
                        doc_ids.insert(id.to_string(), record.seq_id);
                    }
                    added_bytes += 64 * record.document.len() as u64;
                }
            }
        }
        self.memory_used.fetch_add(added_bytes, Ordering::Relaxed);

        counts
    }

    /// First per-record error of a batch, if any.
    pub fn get_first_index_error(batches: &[Vec<IndexRecord>]) -> Option<String> {
        batches
            .iter()
            .flatten()
            .find_map(|record| record.error.as_ref().map(|err| err.to_string()))
    }

    // -- curation ---------------------------------------------------------

    /// Add (or replace) an override, persisting it.
    pub fn add_override(&self, override_rule: Override) -> Result<()> {
        let key = Self::get_override_key(&self.name, &override_rule.id);
        self.store
            .insert(&key, &serde_json::to_vec(&override_rule.to_value()?)?)?;
        self.overrides
            .write()
            .insert(override_rule.id.clone(), override_rule);
        Ok(())
    }

    /// Remove an override by id.
    pub fn remove_override(&self, override_id: &str) -> Result<()> {
        if !self.overrides.read().contains_key(override_id) {
            return Err(QuarryError::not_found("Could not find that `id`."));
        }
        self.store
            .remove(&Self::get_override_key(&self.name, override_id))?;
        self.overrides.write().remove(override_id);
        Ok(())
    }

    /// Overrides by id.
    pub fn get_overrides(&self) -> BTreeMap<String, Override> {
        self.overrides.read().clone()
    }

    /// Add (or replace) a synonym, persisting it.
    pub fn add_synonym(&self, synonym: Synonym) -> Result<()> {
        let key = Self::get_synonym_key(&self.name, &synonym.id);
        self.store
            .insert(&key, &serde_json::to_vec(&synonym.to_value()?)?)?;
        self.synonyms.write().insert(synonym.id.clone(), synonym);
        Ok(())
    }

    /// Remove a synonym by id.
    pub fn remove_synonym(&self, synonym_id: &str) -> Result<()> {
        if !self.synonyms.read().contains_key(synonym_id) {
            return Err(QuarryError::not_found("Could not find that `id`."));
        }
        self.store
            .remove(&Self::get_synonym_key(&self.name, synonym_id))?;
        self.synonyms.write().remove(synonym_id);
        Ok(())
    }

    /// Synonyms by id.
    pub fn get_synonyms(&self) -> BTreeMap<String, Synonym> {
        self.synonyms.read().clone()
    }

    // -- search -----------------------------------------------------------

    /// Execute a search and produce the result JSON.
    pub fn search(&self, request: &SearchRequest) -> Result<Value> {
        let schema = self.schema.read().clone();

        let sorts = resolve_sort_clauses(&request.sort_by, &schema)?;
        let match_all = request.query == "*";

        // searched fields must be declared strings
        for field_name in &request.query_by {
            let field = schema.field(field_name).ok_or_else(|| {
                QuarryError::not_found(format!(
                    "Could not find a field named `{field_name}` in the schema."
                ))
            })?;
            if !field.field_type.is_string() {
                return Err(QuarryError::bad_request(format!(
                    "Field `{field_name}` should be a string or a string array."
                )));
            }
        }

        let weights = self.resolve_weights(request)?;
        let query_fields: Vec<(String, u32)> = request
            .query_by
            .iter()
            .cloned()
            .zip(weights)
            .collect();

        let filters = parse_filter(&request.filter_by, &schema)?;

        for facet_field in &request.facet_by {
            let declared = schema.field(facet_field).map(|f| f.facet).unwrap_or(false);
            if !declared {
                return Err(QuarryError::not_found(format!(
                    "Could not find a facet field named `{facet_field}` in the schema."
                )));
            }
        }

        let facet_query = self.resolve_facet_query(request)?;

        for group_field in &request.group_by {
            let declared = schema.field(group_field).map(|f| f.facet).unwrap_or(false);
            if !declared {
                return Err(QuarryError::bad_request(format!(
                    "Group by field `{group_field}` should be a facet field."
                )));
            }
        }

        let query_tokens = tokenize(&request.query);
        let token_lists = self.expand_with_synonyms(&query_tokens);

        let (pinned, hidden) = self.resolve_curation(request, &query_tokens)?;

        let hidden_seqs: AHashSet<u32> = {
            let doc_ids = self.doc_ids.read();
            hidden
                .iter()
                .filter_map(|id| doc_ids.get(id).copied())
                .collect()
        };

        let page_window = request
            .per_page
            .saturating_mul(request.page)
            .min(request.limit_hits);
        let fetch_hits = page_window + hidden_seqs.len();

        let rank_field = schema.default_sorting_field.clone();
        let args = ShardSearchArgs {
            token_lists: &token_lists,
            match_all,
            query_fields: &query_fields,
            filters: &filters,
            sorts: &sorts,
            num_typos: request.num_typos,
            prefix: request.prefix,
            drop_tokens_threshold: request.drop_tokens_threshold,
            typo_tokens_threshold: request.typo_tokens_threshold,
            facet_fields: &request.facet_by,
            facet_query: facet_query
                .as_ref()
                .map(|(field, query)| (field.as_str(), query.as_str())),
            fetch_hits,
            token_order: request.token_order,
            rank_field: Some(rank_field.as_str()),
        };

        // per-shard candidate generation, in parallel
        let shard_results: Vec<Result<crate::index::ShardSearchResult>> = self.pool.install(|| {
            self.shards
                .par_iter()
                .map(|shard| shard.read().search(&args))
                .collect()
        });

        let mut found = 0usize;
        let mut all_hits: Vec<ShardHit> = Vec::new();
        let mut facet_states: BTreeMap<String, FacetState> = BTreeMap::new();
        for result in shard_results {
            let result = result?;
            found += result.found;
            all_hits.extend(result.hits);
            for state in result.facets {
                match facet_states.entry(state.field_name.clone()) {
                    Entry::Occupied(mut merged) => merged.get_mut().merge(state),
                    Entry::Vacant(slot) => {
                        slot.insert(state);
                    }
                }
            }
        }

        // merge by a heap keyed on the composite ranking tuple
        let mut heap: BinaryHeap<Reverse<(crate::index::RankKey, usize)>> =
            BinaryHeap::with_capacity(all_hits.len());
        for (idx, hit) in all_hits.iter().enumerate() {
            heap.push(Reverse((hit.rank_key, idx)));
        }

        let mut ordered: Vec<&ShardHit> = Vec::with_capacity(fetch_hits.min(all_hits.len()));
        while ordered.len() < fetch_hits {
            match heap.pop() {
                Some(Reverse((_, idx))) => {
                    let hit = &all_hits[idx];
                    if !hidden_seqs.contains(&hit.seq_id) {
                        ordered.push(hit);
                    }
                }
                None => break,
            }
        }

        // fetch bodies for the merged window
        let mut window: Vec<(ShardHit, Value)> = Vec::with_capacity(ordered.len());
        for hit in ordered {
            let document = self.fetch_document(hit.seq_id)?;
            window.push((hit.clone(), document));
        }

        self.apply_pinned_hits(&pinned, &mut window)?;

        if !request.group_by.is_empty() && request.group_limit > 0 {
            window = self.apply_grouping(window, request);
        }

        // pagination over the curated window
        let start = request.per_page.saturating_mul(request.page.saturating_sub(1));
        let end = (start + request.per_page)
            .min(window.len())
            .min(request.limit_hits)
            .max(start);
        let page_hits = if start < window.len() {
            &window[start..end]
        } else {
            &[]
        };

        let highlight_options = highlight::HighlightOptions {
            snippet_threshold: request.snippet_threshold,
            affix_num_tokens: request.highlight_affix_num_tokens,
            full_fields: request.highlight_full_fields.iter().cloned().collect(),
            start_tag: request.highlight_start_tag.clone(),
            end_tag: request.highlight_end_tag.clone(),
            num_typos: request.num_typos,
            prefix: request.prefix,
        };

        let mut hits_json = Vec::with_capacity(page_hits.len());
        for (hit, document) in page_hits {
            let obj = document
                .as_object()
                .ok_or_else(|| QuarryError::internal("Stored document is not an object."))?;

            let highlights =
                highlight::highlight_document(obj, &request.query_by, &query_tokens, &highlight_options);

            let mut hit_obj = Map::new();
            hit_obj.insert(
                "document".to_string(),
                Value::Object(self.trim_fields(obj, request)),
            );
            hit_obj.insert(
                "highlights".to_string(),
                Value::Array(highlights.iter().map(highlight::Highlight::to_value).collect()),
            );
            hit_obj.insert("text_match".to_string(), json!(hit.text_match));
            if !hit.geo_distances.is_empty() {
                let mut distances = Map::new();
                for (field, meters) in &hit.geo_distances {
                    distances.insert(field.clone(), json!(meters.round() as i64));
                }
                hit_obj.insert("geo_distance_meters".to_string(), Value::Object(distances));
            }
            hits_json.push(Value::Object(hit_obj));
        }

        let facet_counts =
            self.render_facet_counts(&schema, request, &facet_query, facet_states)?;

        Ok(json!({
            "found": found,
            "out_of": self.num_documents(),
            "page": request.page,
            "hits": hits_json,
            "facet_counts": facet_counts,
            "request_params": {
                "collection_name": self.name,
                "per_page": request.per_page,
                "q": request.query,
            },
        }))
    }

    // -- internals --------------------------------------------------------

    fn seq_id_of(&self, doc_id: &str) -> Result<u32> {
        self.doc_ids.read().get(doc_id).copied().ok_or_else(|| {
            QuarryError::not_found(format!("Could not find a document with id: {doc_id}"))
        })
    }

    fn fetch_document(&self, seq_id: u32) -> Result<Value> {
        let key = Self::get_seq_id_key(self.collection_id, seq_id);
        let bytes = self
            .store
            .get(&key)?
            .ok_or_else(|| QuarryError::internal(format!("Document body missing for key {key}.")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Auto-register unknown scalar fields when `index_all_fields` is set.
    fn register_unknown_fields(&self, document: &Map<String, Value>) {
        if !self.schema.read().index_all_fields {
            return;
        }

        let mut schema = self.schema.write();
        for (key, value) in document {
            if key == "id" || schema.contains(key) {
                continue;
            }
            if let Some(field_type) = infer_field_type(value) {
                schema.add_field(Field::new(key.clone(), field_type).optional(true));
            }
        }
    }

    fn resolve_weights(&self, request: &SearchRequest) -> Result<Vec<u32>> {
        if request.query_by_weights.is_empty() {
            // earlier fields rank higher by default
            return Ok((0..request.query_by.len())
                .map(|idx| (request.query_by.len() - idx) as u32)
                .collect());
        }
        if request.query_by_weights.len() != request.query_by.len() {
            return Err(QuarryError::bad_request(
                "Number of weights in `query_by_weights` does not match number \
                 of `query_by` fields.",
            ));
        }
        Ok(request.query_by_weights.clone())
    }

    fn resolve_facet_query(&self, request: &SearchRequest) -> Result<Option<(String, String)>> {
        if request.facet_query.is_empty() {
            return Ok(None);
        }

        let (field, query) = request.facet_query.split_once(':').ok_or_else(|| {
            QuarryError::bad_request("Facet query must be in the `facet_field: value` format.")
        })?;
        let field = field.trim().to_string();
        let query = query.trim().to_string();

        if !request.facet_by.contains(&field) {
            return Err(QuarryError::bad_request(format!(
                "Facet query refers to a facet field `{field}` that is not part of \
                 `facet_by` parameter."
            )));
        }

        Ok(Some((field, query)))
    }

    /// Primary tokens plus synonym-expanded alternatives.
    fn expand_with_synonyms(&self, query_tokens: &[String]) -> Vec<Vec<String>> {
        let mut lists = vec![query_tokens.to_vec()];
        for synonym in self.synonyms.read().values() {
            for expansion in synonym.apply(query_tokens) {
                if !lists.contains(&expansion) {
                    lists.push(expansion);
                }
            }
        }
        lists
    }

    /// Pinned and hidden document ids from overrides and request params.
    /// Request-level curation wins over override rules on conflicts.
    fn resolve_curation(
        &self,
        request: &SearchRequest,
        query_tokens: &[String],
    ) -> Result<(Vec<(String, usize)>, AHashSet<String>)> {
        let mut pinned: BTreeMap<String, usize> = BTreeMap::new();
        let mut hidden: AHashSet<String> = AHashSet::new();

        for override_rule in self.overrides.read().values() {
            if !override_rule.matches(query_tokens) {
                continue;
            }
            for include in &override_rule.includes {
                pinned.insert(include.id.clone(), include.position);
            }
            for exclude in &override_rule.excludes {
                hidden.insert(exclude.id.clone());
            }
        }

        for entry in request.pinned_hits.split(',').filter(|s| !s.trim().is_empty()) {
            let (id, position) = entry.trim().rsplit_once(':').ok_or_else(|| {
                QuarryError::bad_request("Parameter `pinned_hits` is malformed.")
            })?;
            let position: usize = position.trim().parse().map_err(|_| {
                QuarryError::bad_request("Parameter `pinned_hits` is malformed.")
            })?;
            pinned.insert(id.trim().to_string(), position);
        }

        for id in request.hidden_hits.split(',').filter(|s| !s.trim().is_empty()) {
            hidden.insert(id.trim().to_string());
        }

        let mut pinned_list: Vec<(String, usize)> = pinned.into_iter().collect();
        pinned_list.sort_by_key(|(_, position)| *position);
        Ok((pinned_list, hidden))
    }

    /// Inject pinned documents at their 1-based positions.
    fn apply_pinned_hits(
        &self,
        pinned: &[(String, usize)],
        window: &mut Vec<(ShardHit, Value)>,
    ) -> Result<()> {
        for (doc_id, position) in pinned {
            let Some(seq_id) = self.doc_ids.read().get(doc_id).copied() else {
                continue;
            };

            let existing = window.iter().position(|(hit, _)| hit.seq_id == seq_id);
            let entry = match existing {
                Some(idx) => window.remove(idx),
                None => {
                    let document = self.fetch_document(seq_id)?;
                    (
                        ShardHit {
                            seq_id,
                            rank_key: ([0; 3], 0, seq_id),
                            text_match: 0,
                            geo_distances: Vec::new(),
                        },
                        document,
                    )
                }
            };

            let at = position.saturating_sub(1).min(window.len());
            window.insert(at, entry);
        }
        Ok(())
    }

    /// Keep at most `group_limit` hits per distinct group-key combination.
    fn apply_grouping(
        &self,
        window: Vec<(ShardHit, Value)>,
        request: &SearchRequest,
    ) -> Vec<(ShardHit, Value)> {
        let mut group_counts: AHashMap<String, usize> = AHashMap::new();
        let mut grouped = Vec::with_capacity(window.len());

        for (hit, document) in window {
            let key = request
                .group_by
                .iter()
                .map(|field| {
                    document
                        .get(field)
                        .map(|value| value.to_string())
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
                .join("|");

            let count = group_counts.entry(key).or_insert(0);
            if *count < request.group_limit {
                *count += 1;
                grouped.push((hit, document));
            }
        }

        grouped
    }

    fn trim_fields(&self, document: &Map<String, Value>, request: &SearchRequest) -> Map<String, Value> {
        let mut trimmed = Map::new();
        for (key, value) in document {
            if !request.include_fields.is_empty()
                && key != "id"
                && !request.include_fields.contains(key)
            {
                continue;
            }
            if request.exclude_fields.contains(key) {
                continue;
            }
            trimmed.insert(key.clone(), value.clone());
        }
        trimmed
    }

    /// Resolve merged facet buckets into the result JSON, recovering each
    /// display string from its witness document.
    fn render_facet_counts(
        &self,
        schema: &Schema,
        request: &SearchRequest,
        facet_query: &Option<(String, String)>,
        facet_states: BTreeMap<String, FacetState>,
    ) -> Result<Value> {
        let mut facet_counts = Vec::new();

        for facet_field in &request.facet_by {
            let Some(state) = facet_states.get(facet_field) else {
                continue;
            };

            let mut buckets: Vec<(&u64, &crate::index::facet::FacetCount)> =
                state.counts.iter().collect();
            buckets.sort_by(|a, b| {
                b.1.count
                    .cmp(&a.1.count)
                    .then_with(|| a.1.witness_seq_id.cmp(&b.1.witness_seq_id))
                    .then_with(|| a.0.cmp(b.0))
            });
            buckets.truncate(request.max_facet_values);

            let fq_tokens: Option<Vec<String>> = facet_query
                .as_ref()
                .filter(|(field, _)| field == facet_field)
                .map(|(_, query)| tokenize(query));

            let mut counts_json = Vec::with_capacity(buckets.len());
            for (_, bucket) in buckets {
                let witness = self.fetch_document(bucket.witness_seq_id)?;
                let value_str = facet_display_value(&witness, facet_field, bucket.array_pos);

                let highlighted = match &fq_tokens {
                    Some(tokens) => highlight_facet_value(
                        &value_str,
                        tokens,
                        &request.highlight_start_tag,
                        &request.highlight_end_tag,
                    ),
                    None => value_str.clone(),
                };

                counts_json.push(json!({
                    "value": value_str,
                    "highlighted": highlighted,
                    "count": bucket.count,
                }));
            }

            let is_numeric = schema
                .field(facet_field)
                .map(|f| f.field_type.is_numeric_indexed() && !f.field_type.is_bool())
                .unwrap_or(false);

            let mut field_json = Map::new();
            field_json.insert("field_name".to_string(), json!(facet_field));
            field_json.insert("counts".to_string(), Value::Array(counts_json));
            if is_numeric {
                field_json.insert("stats".to_string(), render_stats(&state.stats));
            }

            facet_counts.push(Value::Object(field_json));
        }

        Ok(Value::Array(facet_counts))
    }
}

/// Stringified display value of a facet bucket, read from its witness.
fn facet_display_value(witness: &Value, field_name: &str, array_pos: u32) -> String {
    let value = witness.get(field_name);
    match value {
        Some(Value::Array(elements)) => elements
            .get(array_pos as usize)
            .map(stringify_scalar)
            .unwrap_or_default(),
        Some(scalar) => stringify_scalar(scalar),
        None => String::new(),
    }
}

fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Wrap the facet-query matched tokens of a facet value in highlight tags.
/// The final query token matches by prefix, earlier ones exactly.
fn highlight_facet_value(
    value: &str,
    query_tokens: &[String],
    start_tag: &str,
    end_tag: &str,
) -> String {
    let Some((last, rest)) = query_tokens.split_last() else {
        return value.to_string();
    };

    value
        .split_whitespace()
        .map(|word| {
            let matched = tokenize(word).into_iter().any(|token| {
                token.starts_with(last.as_str()) || rest.iter().any(|qt| *qt == token)
            });
            if matched {
                format!("{start_tag}{word}{end_tag}")
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_stats(stats: &FacetStats) -> Value {
    let avg = if stats.fvcount == 0 {
        0.0
    } else {
        stats.fvsum / stats.fvcount as f64
    };
    json!({
        "min": if stats.fvcount == 0 { 0.0 } else { stats.fvmin },
        "max": if stats.fvcount == 0 { 0.0 } else { stats.fvmax },
        "sum": stats.fvsum,
        "avg": avg,
        "count": stats.fvcount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use crate::store::MemoryStore;

    fn test_collection() -> Collection {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(2)
                .build()
                .unwrap(),
        );
        let schema = Schema::new(
            vec![
                Field::new("title", FieldType::String),
                Field::new("points", FieldType::Int32),
            ],
            "points",
            false,
        )
        .unwrap();

        Collection::new("books", 0, 0, 0, store, pool, schema, 4, u64::MAX)
    }

    #[test]
    fn test_add_assigns_sequential_ids() {
        let collection = test_collection();

        let doc1 = collection.add(r#"{"title": "alpha", "points": 1}"#).unwrap();
        let doc2 = collection.add(r#"{"title": "beta", "points": 2}"#).unwrap();

        assert_eq!(doc1["id"], "0");
        assert_eq!(doc2["id"], "1");
        assert_eq!(collection.get_next_seq_id(), 2);
        assert_eq!(collection.num_documents(), 2);
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let collection = test_collection();
        collection
            .add(r#"{"id": "x", "title": "alpha", "points": 1}"#)
            .unwrap();

        let err = collection
            .add(r#"{"id": "x", "title": "beta", "points": 2}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "A document with id x already exists.");
        assert_eq!(err.http_code(), 409);
    }

    #[test]
    fn test_add_rejects_non_string_id() {
        let collection = test_collection();
        let err = collection
            .add(r#"{"id": 7, "title": "alpha", "points": 1}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Document's `id` field should be a string.");
    }

    #[test]
    fn test_get_and_remove() {
        let collection = test_collection();
        collection
            .add(r#"{"id": "x", "title": "alpha", "points": 1}"#)
            .unwrap();

        let fetched = collection.get("x").unwrap();
        assert_eq!(fetched["title"], "alpha");

        collection.remove("x").unwrap();
        let err = collection.get("x").unwrap_err();
        assert_eq!(err.to_string(), "Could not find a document with id: x");
        assert_eq!(collection.num_documents(), 0);
    }

    #[test]
    fn test_shard_routing() {
        let collection = test_collection();
        for i in 0..16 {
            collection
                .add(&format!(r#"{{"title": "doc", "points": {i}}}"#))
                .unwrap();
        }

        // every document lives in exactly the shard its seq id hashes to
        for seq_id in 0u32..16 {
            for (shard_idx, shard) in collection.shards.iter().enumerate() {
                let expected = seq_id as usize % collection.num_shards == shard_idx;
                assert_eq!(shard.read().contains(seq_id), expected);
            }
        }
    }

    #[test]
    fn test_search_basic() {
        let collection = test_collection();
        collection.add(r#"{"title": "the fox", "points": 10}"#).unwrap();
        collection.add(r#"{"title": "the dog", "points": 20}"#).unwrap();
        collection.add(r#"{"title": "a cat", "points": 30}"#).unwrap();

        let mut request = SearchRequest::new("the");
        request.query_by = vec!["title".to_string()];
        request.prefix = false;
        request.num_typos = 0;

        let results = collection.search(&request).unwrap();
        assert_eq!(results["found"], 2);
        assert_eq!(results["out_of"], 3);
        // default sorting field DESC
        assert_eq!(results["hits"][0]["document"]["id"], "1");
        assert_eq!(results["hits"][1]["document"]["id"], "0");
    }

    #[test]
    fn test_search_unknown_query_field() {
        let collection = test_collection();
        let mut request = SearchRequest::new("x");
        request.query_by = vec!["missing".to_string()];
        let err = collection.search(&request).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not find a field named `missing` in the schema."
        );
    }

    #[test]
    fn test_search_non_string_query_field() {
        let collection = test_collection();
        let mut request = SearchRequest::new("x");
        request.query_by = vec!["points".to_string()];
        let err = collection.search(&request).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Field `points` should be a string or a string array."
        );
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(Collection::get_meta_key("books"), "$CM_books");
        assert_eq!(Collection::get_next_seq_id_key("books"), "books_NEXT_SEQ_ID");
        assert_eq!(Collection::get_seq_id_key(3, 7), "3_D_0000000007");
        assert_eq!(Collection::get_seq_id_collection_prefix(3), "3_D_");
        assert_eq!(Collection::get_seq_id_from_key("3_D_0000000007"), Some(7));
        assert_eq!(Collection::get_override_key("books", "o1"), "books_OVERRIDE_o1");
        assert_eq!(Collection::get_synonym_key("books", "s1"), "books_SYNONYM_s1");
    }
}
