//! The collection manager: process-wide registry of collections, recovery
//! from the store, symlink aliasing, and wire-level search dispatch.
//!
//! The manager owns the store handle and the shared thread pool. It is a
//! plain value: tests instantiate several independent managers over
//! distinct stores.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use parking_lot::RwLock;
use serde_json::Value;

use crate::collection::{
    Collection, CollectionMeta, IndexRecord, Override, SearchRequest, Synonym,
    COLLECTION_META_PREFIX, DEFAULT_NUM_MEMORY_SHARDS,
};
use crate::error::{QuarryError, Result};
use crate::query::sort::parse_sort_expression;
use crate::query::TokenOrdering;
use crate::schema::{Field, Schema};
use crate::store::{deserialize_u32, serialize_u32, Store, WriteBatch};

/// Store key of the global next-collection-id counter (ASCII decimal).
pub const NEXT_COLLECTION_ID_KEY: &str = "NEXT_COLLECTION_ID";

/// Store prefix of symlink records.
pub const SYMLINK_PREFIX: &str = "$SL_";

/// Percent of elapsed wall time yielded back during recovery.
pub const LOAD_THROTTLE_PERCENT: f32 = 1.0;

/// Pluggable authentication backend consulted after the bootstrap key.
pub trait AuthProvider: Send + Sync {
    /// Whether `key` authorizes `action` over `collections`. Implementations
    /// may inject embedded parameters into `params`.
    fn authenticate(
        &self,
        key: &str,
        action: &str,
        collections: &[String],
        params: &mut HashMap<String, String>,
    ) -> bool;
}

/// Default authentication backend: rejects everything but the bootstrap key.
#[derive(Debug, Default)]
pub struct DenyAllAuth;

impl AuthProvider for DenyAllAuth {
    fn authenticate(
        &self,
        _key: &str,
        _action: &str,
        _collections: &[String],
        _params: &mut HashMap<String, String>,
    ) -> bool {
        false
    }
}

/// Manager construction options.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Advisory fraction of system RAM available to indexes.
    pub max_memory_ratio: f32,
    /// Key accepted unconditionally by [`CollectionManager::auth_key_matches`].
    pub bootstrap_auth_key: String,
    /// Percent of elapsed wall time slept between recovery batches.
    pub load_throttle_percent: f32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            max_memory_ratio: 1.0,
            bootstrap_auth_key: String::new(),
            load_throttle_percent: LOAD_THROTTLE_PERCENT,
        }
    }
}

#[derive(Default)]
struct Registry {
    collections: BTreeMap<String, Arc<Collection>>,
    collection_id_names: BTreeMap<u32, String>,
    symlinks: BTreeMap<String, String>,
    next_collection_id: u32,
}

/// Process-wide registry of collections over one store.
pub struct CollectionManager {
    store: Arc<dyn Store>,
    config: ManagerConfig,
    pool: Arc<rayon::ThreadPool>,
    registry: RwLock<Registry>,
    auth: Box<dyn AuthProvider>,
    load_cancelled: AtomicBool,
    max_memory_bytes: u64,
}

impl std::fmt::Debug for CollectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionManager")
            .field("collections", &self.registry.read().collections.len())
            .finish()
    }
}

impl CollectionManager {
    /// Create a manager over a store with the default auth backend.
    pub fn new(store: Arc<dyn Store>, config: ManagerConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .thread_name(|i| format!("quarry-shard-{i}"))
            .build()
            .map_err(|e| QuarryError::internal(format!("Failed to create thread pool: {e}")))?;

        let max_memory_bytes = if config.max_memory_ratio >= 1.0 {
            u64::MAX
        } else {
            system_memory_bytes()
                .map(|total| (total as f64 * f64::from(config.max_memory_ratio)) as u64)
                .unwrap_or(u64::MAX)
        };

        Ok(CollectionManager {
            store,
            config,
            pool: Arc::new(pool),
            registry: RwLock::new(Registry::default()),
            auth: Box::new(DenyAllAuth),
            load_cancelled: AtomicBool::new(false),
            max_memory_bytes,
        })
    }

    /// Replace the authentication backend.
    pub fn with_auth_provider(mut self, auth: Box<dyn AuthProvider>) -> Self {
        self.auth = auth;
        self
    }

    /// The underlying store handle.
    pub fn get_store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Store key of a symlink record.
    pub fn get_symlink_key(symlink_name: &str) -> String {
        format!("{SYMLINK_PREFIX}{symlink_name}")
    }

    // -- recovery ---------------------------------------------------------

    /// Rebuild all in-memory state from the store. Idempotent: calling it
    /// again drops and reloads any collection already in memory.
    pub fn load(&self, init_batch_size: usize) -> Result<()> {
        info!("CollectionManager::load()");

        let next_id_bytes = self.store.get(NEXT_COLLECTION_ID_KEY)?;
        let global_counter_found = next_id_bytes.is_some();
        let next_collection_id = match next_id_bytes {
            Some(bytes) => String::from_utf8(bytes)
                .ok()
                .and_then(|text| text.parse::<u32>().ok())
                .ok_or_else(|| {
                    QuarryError::internal(
                        "Error while fetching the next collection id from the disk.",
                    )
                })?,
            None => 0,
        };
        self.registry.write().next_collection_id = next_collection_id;

        let metas = self.store.scan_prefix(COLLECTION_META_PREFIX)?;
        info!("Found {} collection(s) on disk.", metas.len());

        for (_, meta_bytes) in metas {
            let meta: CollectionMeta = serde_json::from_slice(&meta_bytes)
                .map_err(|_| QuarryError::internal("Error while parsing collection meta."))?;
            self.load_collection(&meta, global_counter_found, init_batch_size)?;
        }

        let mut symlinks = BTreeMap::new();
        for (key, value) in self.store.scan_prefix(SYMLINK_PREFIX)? {
            if let Some(alias) = key.strip_prefix(SYMLINK_PREFIX) {
                symlinks.insert(alias.to_string(), String::from_utf8_lossy(&value).into_owned());
            }
        }
        self.registry.write().symlinks = symlinks;

        Ok(())
    }

    /// Request cancellation of an in-flight [`CollectionManager::load`].
    /// Recovery observes the flag between indexing batches.
    pub fn cancel_load(&self) {
        self.load_cancelled.store(true, Ordering::Release);
    }

    fn load_collection(
        &self,
        meta: &CollectionMeta,
        global_counter_found: bool,
        init_batch_size: usize,
    ) -> Result<()> {
        let name = &meta.name;

        let next_seq_id = match self.store.get(&Collection::get_next_seq_id_key(name))? {
            Some(bytes) => deserialize_u32(&bytes).ok_or_else(|| {
                QuarryError::internal(format!(
                    "Error while fetching collection's next sequence ID from the disk \
                     for collection `{name}`"
                ))
            })?,
            None if global_counter_found => {
                return Err(QuarryError::internal(format!(
                    "Next collection id was found, but collection's next sequence ID \
                     is missing for `{name}`"
                )));
            }
            None => 0,
        };

        if self.get_collection(name).is_some() {
            warn!("Dropping duplicate collection {name} before loading it again.");
            self.drop_collection(name, false)?;
        }

        info!(
            "Found collection {name} with {} memory shards.",
            meta.num_memory_shards
        );

        let schema = Schema {
            fields: meta.fields.clone(),
            default_sorting_field: meta.default_sorting_field.clone(),
            index_all_fields: meta.index_all_fields,
        };
        let collection = Arc::new(Collection::new(
            name,
            meta.id,
            meta.created_at,
            next_seq_id,
            Arc::clone(&self.store),
            Arc::clone(&self.pool),
            schema,
            meta.num_memory_shards,
            self.max_memory_bytes,
        ));

        info!("Loading collection {name}");

        for (key, bytes) in self
            .store
            .scan_prefix(&Collection::get_override_key(name, ""))?
        {
            match serde_json::from_slice::<Value>(&bytes)
                .map_err(QuarryError::from)
                .and_then(|value| Override::parse(&value, override_id_of(&key)))
            {
                Ok(override_rule) => collection.add_override(override_rule)?,
                Err(e) => error!("Skipping loading of override: {e}"),
            }
        }

        for (key, bytes) in self
            .store
            .scan_prefix(&Collection::get_synonym_key(name, ""))?
        {
            match serde_json::from_slice::<Value>(&bytes)
                .map_err(QuarryError::from)
                .and_then(|value| Synonym::parse(&value, override_id_of(&key)))
            {
                Ok(synonym) => collection.add_synonym(synonym)?,
                Err(e) => error!("Skipping loading of synonym: {e}"),
            }
        }

        self.reindex_documents(&collection, meta, init_batch_size)?;

        let mut registry = self.registry.write();
        registry.collections.insert(name.clone(), Arc::clone(&collection));
        registry.collection_id_names.insert(meta.id, name.clone());

        Ok(())
    }

    fn reindex_documents(
        &self,
        collection: &Arc<Collection>,
        meta: &CollectionMeta,
        init_batch_size: usize,
    ) -> Result<()> {
        let num_shards = collection.get_num_shards();
        // a batch must cover at least one record per shard
        let batch_size = init_batch_size.max(num_shards);

        let prefix = Collection::get_seq_id_collection_prefix(meta.id);
        let documents = self.store.scan_prefix(&prefix)?;

        let mut batches: Vec<Vec<IndexRecord>> = (0..num_shards).map(|_| Vec::new()).collect();
        let num_found = documents.len();
        let mut num_valid = 0usize;
        let mut num_indexed = 0usize;
        let mut begin = Instant::now();

        for (idx, (key, bytes)) in documents.iter().enumerate() {
            let seq_id = Collection::get_seq_id_from_key(key).ok_or_else(|| {
                QuarryError::internal(format!("Malformed document key `{key}`."))
            })?;

            let document: Value = serde_json::from_slice(bytes)
                .map_err(|_| QuarryError::internal("Bad JSON."))?;
            let document = document
                .as_object()
                .cloned()
                .ok_or_else(|| QuarryError::internal("Bad JSON."))?;

            num_valid += 1;
            batches[seq_id as usize % num_shards].push(IndexRecord::new(seq_id, document));

            let last_record = idx + 1 == num_found;
            if num_valid % batch_size == 0 || last_record {
                if self.load_cancelled.load(Ordering::Acquire) {
                    return Err(QuarryError::internal("Load cancelled."));
                }

                let counts = collection.par_index_in_memory(&mut batches);
                for (shard_idx, count) in counts.iter().enumerate() {
                    if *count != batches[shard_idx].len() {
                        if let Some(message) = Collection::get_first_index_error(&batches) {
                            return Err(QuarryError::internal(message));
                        }
                    }
                    num_indexed += count;
                }
                for batch in &mut batches {
                    batch.clear();
                }

                // yield a fixed share of elapsed wall time back to the CPU,
                // but only once a full millisecond has accumulated
                let elapsed_ms = begin.elapsed().as_millis() as u64;
                let throttle_ms =
                    ((self.config.load_throttle_percent / 100.0) as f64 * elapsed_ms as f64) as u64;
                if throttle_ms != 0 {
                    begin = Instant::now();
                    std::thread::sleep(Duration::from_millis(throttle_ms));
                }
            }
        }

        info!(
            "Indexed {num_indexed}/{num_found} documents into collection {}",
            collection.get_name()
        );

        Ok(())
    }

    // -- lifecycle --------------------------------------------------------

    /// Create a collection, persisting its meta and counters atomically.
    pub fn create_collection(
        &self,
        name: &str,
        num_shards: usize,
        fields: Vec<Field>,
        default_sorting_field: &str,
        created_at: u64,
        index_all_fields: bool,
    ) -> Result<Arc<Collection>> {
        if self.store.contains(&Collection::get_meta_key(name))? {
            return Err(QuarryError::conflict(format!(
                "A collection with name `{name}` already exists."
            )));
        }

        let schema = Schema::new(fields, default_sorting_field, index_all_fields)?;
        let num_shards = if num_shards == 0 {
            DEFAULT_NUM_MEMORY_SHARDS
        } else {
            num_shards
        };

        let mut registry = self.registry.write();
        let collection_id = registry.next_collection_id;

        let collection = Arc::new(Collection::new(
            name,
            collection_id,
            created_at,
            0,
            Arc::clone(&self.store),
            Arc::clone(&self.pool),
            schema,
            num_shards,
            self.max_memory_bytes,
        ));

        let meta = collection.to_meta();
        let mut batch = WriteBatch::new();
        batch.put(Collection::get_next_seq_id_key(name), serialize_u32(0));
        batch.put(Collection::get_meta_key(name), serde_json::to_vec(&meta)?);
        batch.put(
            NEXT_COLLECTION_ID_KEY,
            (collection_id + 1).to_string().into_bytes(),
        );
        self.store
            .batch_write(batch)
            .map_err(|_| QuarryError::internal("Could not write to on-disk storage."))?;

        registry.next_collection_id = collection_id + 1;
        registry.collections.insert(name.to_string(), Arc::clone(&collection));
        registry
            .collection_id_names
            .insert(collection_id, name.to_string());

        Ok(collection)
    }

    /// Resolve a collection by name. A symlink name resolves one hop, and
    /// never shadows a real collection of the same name.
    pub fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        let registry = self.registry.read();
        if let Some(collection) = registry.collections.get(name) {
            return Some(Arc::clone(collection));
        }
        let target = registry.symlinks.get(name)?;
        registry.collections.get(target).map(Arc::clone)
    }

    /// Resolve a collection by its numeric id.
    pub fn get_collection_with_id(&self, collection_id: u32) -> Option<Arc<Collection>> {
        let name = self
            .registry
            .read()
            .collection_id_names
            .get(&collection_id)
            .cloned()?;
        self.get_collection(&name)
    }

    /// All live collections, newest (highest id) first.
    pub fn get_collections(&self) -> Vec<Arc<Collection>> {
        let registry = self.registry.read();
        let mut collections: Vec<Arc<Collection>> =
            registry.collections.values().map(Arc::clone).collect();
        collections.sort_by(|a, b| b.get_collection_id().cmp(&a.get_collection_id()));
        collections
    }

    /// The id that will be assigned to the next created collection.
    pub fn get_next_collection_id(&self) -> u32 {
        self.registry.read().next_collection_id
    }

    /// Override the next collection id (used by replication catch-up).
    pub fn set_next_collection_id(&self, next_id: u32) {
        self.registry.write().next_collection_id = next_id;
    }

    /// Drop a collection from memory, and optionally from the store.
    ///
    /// Documents are removed before the counter and meta keys so a partial
    /// failure never leaves meta pointing at missing documents.
    pub fn drop_collection(&self, name: &str, remove_from_store: bool) -> Result<()> {
        let collection = self.get_collection(name).ok_or_else(|| {
            QuarryError::not_found(format!("No collection with name `{name}` found."))
        })?;

        if remove_from_store {
            let prefix = format!("{}_", collection.get_collection_id());
            for (key, _) in self.store.scan_prefix(&prefix)? {
                self.store.remove(&key)?;
            }
            self.store.remove(&Collection::get_next_seq_id_key(name))?;
            self.store.remove(&Collection::get_meta_key(name))?;
        }

        let mut registry = self.registry.write();
        registry.collections.remove(name);
        registry
            .collection_id_names
            .remove(&collection.get_collection_id());

        Ok(())
    }

    /// Drop every collection from memory and close the store.
    pub fn dispose(&self) -> Result<()> {
        let mut registry = self.registry.write();
        registry.collections.clear();
        registry.collection_id_names.clear();
        registry.symlinks.clear();
        self.store.close()
    }

    // -- symlinks ---------------------------------------------------------

    /// The symlink table.
    pub fn get_symlinks(&self) -> BTreeMap<String, String> {
        self.registry.read().symlinks.clone()
    }

    /// Resolve a symlink to its target collection name.
    pub fn resolve_symlink(&self, symlink_name: &str) -> Result<String> {
        self.registry
            .read()
            .symlinks
            .get(symlink_name)
            .cloned()
            .ok_or_else(|| QuarryError::not_found("Not found."))
    }

    /// Create or update a symlink. Rejects names held by real collections.
    pub fn upsert_symlink(&self, symlink_name: &str, collection_name: &str) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.collections.contains_key(symlink_name) {
            return Err(QuarryError::internal(format!(
                "Name `{symlink_name}` conflicts with an existing collection name."
            )));
        }

        self.store.insert(
            &Self::get_symlink_key(symlink_name),
            collection_name.as_bytes(),
        )?;
        registry
            .symlinks
            .insert(symlink_name.to_string(), collection_name.to_string());
        Ok(())
    }

    /// Delete a symlink.
    pub fn delete_symlink(&self, symlink_name: &str) -> Result<()> {
        self.store.remove(&Self::get_symlink_key(symlink_name))?;
        self.registry.write().symlinks.remove(symlink_name);
        Ok(())
    }

    // -- authentication ---------------------------------------------------

    /// Whether a request key authorizes an action. The bootstrap key always
    /// matches; everything else is delegated to the auth backend.
    pub fn auth_key_matches(
        &self,
        auth_key: &str,
        action: &str,
        collections: &[String],
        params: &mut HashMap<String, String>,
    ) -> bool {
        if auth_key.is_empty() {
            return false;
        }
        if !self.config.bootstrap_auth_key.is_empty()
            && self.config.bootstrap_auth_key == auth_key
        {
            return true;
        }
        self.auth.authenticate(auth_key, action, collections, params)
    }

    // -- wire-level search ------------------------------------------------

    /// Parse a wire parameter map, apply defaults, dispatch the search, and
    /// attach the timing fields.
    pub fn do_search(&self, mut params: HashMap<String, String>) -> Result<Value> {
        let begin = Instant::now();

        if !params.contains_key("q") {
            return Err(QuarryError::bad_request("Parameter `q` is required."));
        }

        set_default(&mut params, "num_typos", "2");
        set_default(&mut params, "prefix", "true");
        set_default(
            &mut params,
            "drop_tokens_threshold",
            &crate::index::DROP_TOKENS_THRESHOLD.to_string(),
        );
        set_default(
            &mut params,
            "typo_tokens_threshold",
            &crate::index::TYPO_TOKENS_THRESHOLD.to_string(),
        );
        set_default(&mut params, "max_facet_values", "10");
        set_default(&mut params, "facet_query", "");
        set_default(&mut params, "limit_hits", &u32::MAX.to_string());
        set_default(&mut params, "snippet_threshold", "30");
        set_default(&mut params, "highlight_affix_num_tokens", "4");
        set_default(&mut params, "highlight_full_fields", "");
        set_default(&mut params, "highlight_start_tag", "<mark>");
        set_default(&mut params, "highlight_end_tag", "</mark>");
        set_default(&mut params, "include_fields", "");
        set_default(&mut params, "exclude_fields", "");
        set_default(&mut params, "group_by", "");
        set_default(&mut params, "pinned_hits", "");
        set_default(&mut params, "hidden_hits", "");
        set_default(&mut params, "filter_by", "");
        set_default(&mut params, "query_by", "");
        set_default(&mut params, "sort_by", "");
        set_default(&mut params, "rank_tokens_by", "DEFAULT_SORTING_FIELD");

        // a facet query narrows facet values, so hit listing defaults off
        if !params.contains_key("per_page") {
            let per_page = if params["facet_query"].is_empty() { "10" } else { "0" };
            params.insert("per_page".to_string(), per_page.to_string());
        }
        set_default(&mut params, "page", "1");
        if !params.contains_key("group_limit") {
            let group_limit = if params["group_by"].is_empty() { "0" } else { "3" };
            params.insert("group_limit".to_string(), group_limit.to_string());
        }

        let mut query_by_weights = Vec::new();
        if let Some(weights_str) = params.get("query_by_weights") {
            for weight in weights_str.split(',').filter(|s| !s.is_empty()) {
                let weight: u32 = weight.trim().parse().map_err(|_| {
                    QuarryError::bad_request(
                        "Parameter `query_by_weights` must be a comma separated string \
                         of unsigned integers.",
                    )
                })?;
                query_by_weights.push(weight);
            }
        }

        let mut numeric: HashMap<&str, u32> = HashMap::new();
        for param in [
            "drop_tokens_threshold",
            "typo_tokens_threshold",
            "num_typos",
            "per_page",
            "page",
            "max_facet_values",
            "limit_hits",
            "snippet_threshold",
            "highlight_affix_num_tokens",
            "group_limit",
        ] {
            match params[param].parse::<u32>() {
                Ok(value) => {
                    numeric.insert(param, value);
                }
                Err(_) => {
                    return Err(QuarryError::bad_request(format!(
                        "Parameter `{param}` must be an unsigned integer."
                    )));
                }
            }
        }

        let collection_name = params.get("collection").cloned().unwrap_or_default();
        let collection = self
            .get_collection(&collection_name)
            .ok_or_else(|| QuarryError::not_found("Not found."))?;

        let token_order = if params["rank_tokens_by"].to_uppercase() == "DEFAULT_SORTING_FIELD" {
            TokenOrdering::MaxScore
        } else {
            TokenOrdering::Frequency
        };

        let page = numeric["page"] as usize;

        let request = SearchRequest {
            query: params["q"].clone(),
            query_by: split_list(&params["query_by"]),
            query_by_weights,
            filter_by: params["filter_by"].clone(),
            facet_by: split_list(params.get("facet_by").map(String::as_str).unwrap_or("")),
            sort_by: parse_sort_expression(&params["sort_by"])?,
            num_typos: numeric["num_typos"],
            per_page: numeric["per_page"] as usize,
            page,
            token_order,
            prefix: params["prefix"] == "true",
            drop_tokens_threshold: numeric["drop_tokens_threshold"],
            typo_tokens_threshold: numeric["typo_tokens_threshold"],
            include_fields: split_list(&params["include_fields"]).into_iter().collect(),
            exclude_fields: split_list(&params["exclude_fields"]).into_iter().collect(),
            max_facet_values: numeric["max_facet_values"] as usize,
            facet_query: params["facet_query"].clone(),
            snippet_threshold: numeric["snippet_threshold"] as usize,
            highlight_affix_num_tokens: numeric["highlight_affix_num_tokens"] as usize,
            highlight_full_fields: split_list(&params["highlight_full_fields"]),
            pinned_hits: params["pinned_hits"].clone(),
            hidden_hits: params["hidden_hits"].clone(),
            group_by: split_list(&params["group_by"]),
            group_limit: numeric["group_limit"] as usize,
            highlight_start_tag: params["highlight_start_tag"].clone(),
            highlight_end_tag: params["highlight_end_tag"].clone(),
            limit_hits: numeric["limit_hits"] as usize,
        };

        let mut result = collection.search(&request)?;
        if let Some(obj) = result.as_object_mut() {
            obj.insert(
                "search_time_ms".to_string(),
                Value::from(begin.elapsed().as_millis() as u64),
            );
            obj.insert("page".to_string(), Value::from(page as u64));
        }

        Ok(result)
    }
}

fn set_default(params: &mut HashMap<String, String>, key: &str, value: &str) {
    params
        .entry(key.to_string())
        .or_insert_with(|| value.to_string());
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The id suffix of an override/synonym store key.
fn override_id_of(key: &str) -> &str {
    key.rsplit('_').next().unwrap_or_default()
}

/// Total physical memory, when the platform exposes it.
fn system_memory_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use crate::store::MemoryStore;

    fn test_manager() -> CollectionManager {
        CollectionManager::new(
            Arc::new(MemoryStore::new()),
            ManagerConfig {
                bootstrap_auth_key: "bootstrap".to_string(),
                ..ManagerConfig::default()
            },
        )
        .unwrap()
    }

    fn sample_fields() -> Vec<Field> {
        vec![
            Field::new("title", FieldType::String),
            Field::new("points", FieldType::Int32),
        ]
    }

    #[test]
    fn test_symlink_key() {
        assert_eq!(CollectionManager::get_symlink_key("alias"), "$SL_alias");
    }

    #[test]
    fn test_collection_ids_are_never_reused() {
        let manager = test_manager();
        manager
            .create_collection("a", 1, sample_fields(), "points", 0, false)
            .unwrap();
        manager
            .create_collection("b", 1, sample_fields(), "points", 0, false)
            .unwrap();

        manager.drop_collection("b", true).unwrap();
        let c = manager
            .create_collection("c", 1, sample_fields(), "points", 0, false)
            .unwrap();

        assert_eq!(c.get_collection_id(), 2);
        assert_eq!(manager.get_next_collection_id(), 3);
    }

    #[test]
    fn test_auth_bootstrap_key() {
        let manager = test_manager();
        let mut params = HashMap::new();

        assert!(manager.auth_key_matches("bootstrap", "documents:search", &[], &mut params));
        assert!(!manager.auth_key_matches("other", "documents:search", &[], &mut params));
        assert!(!manager.auth_key_matches("", "documents:search", &[], &mut params));
    }

    #[test]
    fn test_do_search_requires_q() {
        let manager = test_manager();
        let err = manager.do_search(HashMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "Parameter `q` is required.");
    }

    #[test]
    fn test_do_search_validates_numeric_params() {
        let manager = test_manager();
        let mut params = HashMap::new();
        params.insert("q".to_string(), "x".to_string());
        params.insert("per_page".to_string(), "-3".to_string());

        let err = manager.do_search(params).unwrap_err();
        assert_eq!(err.to_string(), "Parameter `per_page` must be an unsigned integer.");
    }

    #[test]
    fn test_do_search_unknown_collection() {
        let manager = test_manager();
        let mut params = HashMap::new();
        params.insert("q".to_string(), "x".to_string());
        params.insert("collection".to_string(), "nope".to_string());

        let err = manager.do_search(params).unwrap_err();
        assert_eq!(err.to_string(), "Not found.");
        assert_eq!(err.http_code(), 404);
    }
}
