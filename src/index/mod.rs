//! The shard index: in-memory structures for one partition of a
//! collection's documents.
//!
//! Each shard owns a token trie per string field, an ordered numeric index
//! per numeric field, a cell index per geopoint field, stringified facet
//! values, and a per-document score payload of sort-eligible values. A
//! shard is single-writer, multi-reader; the owning collection wraps it in
//! a readers-writer lock.

pub mod facet;
pub mod geo;
pub mod numeric;
pub mod trie;

use std::collections::BTreeSet;

use ahash::{AHashMap, AHashSet};
use serde_json::{Map, Value};

use crate::analysis::tokenize;
use crate::error::{QuarryError, Result};
use crate::index::facet::{facet_value_hash, FacetState, TokenPosCost};
use crate::index::geo::{GeoIndex, GeoPoint};
use crate::index::numeric::{float_sort_key, NumericIndex};
use crate::query::filter::{FilterClause, FilterCondition};
use crate::query::sort::{ResolvedSort, SortTarget};
use crate::query::TokenOrdering;
use crate::schema::{validate_document, FieldType, Schema};

/// Default number of candidate documents below which tokens are dropped.
pub const DROP_TOKENS_THRESHOLD: u32 = 10;

/// Default number of candidate documents below which the typo budget grows.
pub const TYPO_TOKENS_THRESHOLD: u32 = 100;

/// Cap on distinct token expansions considered per query token.
const MAX_TOKEN_EXPANSIONS: usize = 250;

/// Arguments of one shard-local search pass, produced by the collection
/// from a validated request.
#[derive(Debug)]
pub struct ShardSearchArgs<'a> {
    /// Token lists to try: the primary query first, synonym expansions
    /// after. Ignored when `match_all` is set.
    pub token_lists: &'a [Vec<String>],
    /// `*` query: candidates come from the filter (or all live docs).
    pub match_all: bool,
    /// Searched string fields with their ranking weights.
    pub query_fields: &'a [(String, u32)],
    pub filters: &'a [FilterClause],
    pub sorts: &'a [ResolvedSort],
    pub num_typos: u32,
    pub prefix: bool,
    pub drop_tokens_threshold: u32,
    pub typo_tokens_threshold: u32,
    /// Facet fields to count, by their declared (non-synthetic) names.
    pub facet_fields: &'a [String],
    /// Facet query filter: `(facet field, query text)`.
    pub facet_query: Option<(&'a str, &'a str)>,
    /// How many top hits to return to the merger.
    pub fetch_hits: usize,
    pub token_order: TokenOrdering,
    /// Field backing `MaxScore` token ordering.
    pub rank_field: Option<&'a str>,
}

/// Composite ranking key: smaller sorts first. Sort-clause components,
/// then inverted text-match score, then `seq_id` for stable ties.
pub type RankKey = ([u64; 3], u64, u32);

/// One candidate produced by a shard.
#[derive(Debug, Clone)]
pub struct ShardHit {
    pub seq_id: u32,
    pub rank_key: RankKey,
    pub text_match: u64,
    /// Haversine distances for geo sort clauses, `(field, meters)`.
    pub geo_distances: Vec<(String, f64)>,
}

/// Result of one shard-local search pass.
#[derive(Debug, Default)]
pub struct ShardSearchResult {
    /// Top hits, best first, truncated to the requested fetch size.
    pub hits: Vec<ShardHit>,
    /// Total candidates in this shard before truncation.
    pub found: usize,
    /// Facet accounting over the full candidate set.
    pub facets: Vec<FacetState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct MatchScore {
    tokens_matched: u32,
    total_cost: u32,
    total_tf: u32,
    weight: u32,
}

impl MatchScore {
    /// Pack into a single orderable score: more tokens beat lower cost,
    /// lower cost beats field weight, weight beats term frequency.
    fn packed(&self) -> u64 {
        let cost_component = 255u64.saturating_sub(u64::from(self.total_cost));
        (u64::from(self.tokens_matched) << 48)
            | (cost_component << 40)
            | (u64::from(self.weight.min(255)) << 32)
            | u64::from(self.total_tf)
    }
}

/// In-memory index of one shard.
#[derive(Debug, Default)]
pub struct ShardIndex {
    text: AHashMap<String, trie::Trie>,
    numeric: AHashMap<String, NumericIndex>,
    geo: AHashMap<String, GeoIndex>,
    /// Facet field -> seq_id -> stringified values, in array order.
    facet_values: AHashMap<String, AHashMap<u32, Vec<String>>>,
    /// Score payload: sort-eligible field -> seq_id -> encoded value.
    sort_values: AHashMap<String, AHashMap<u32, i64>>,
    seq_ids: BTreeSet<u32>,
}

impl ShardIndex {
    /// Create an empty shard index.
    pub fn new() -> Self {
        ShardIndex::default()
    }

    /// Number of live documents in this shard.
    pub fn num_documents(&self) -> usize {
        self.seq_ids.len()
    }

    /// Whether this shard holds the document.
    pub fn contains(&self, seq_id: u32) -> bool {
        self.seq_ids.contains(&seq_id)
    }

    /// Index one validated document into the in-memory structures.
    pub fn index_document(
        &mut self,
        seq_id: u32,
        document: &Map<String, Value>,
        schema: &Schema,
    ) -> Result<()> {
        validate_document(document, schema)?;

        for field in &schema.fields {
            let value = match document.get(&field.name) {
                Some(value) => value,
                None => continue,
            };

            match field.field_type {
                FieldType::String => {
                    let text = value.as_str().unwrap_or_default();
                    self.index_text(&field.name, seq_id, text, None);
                }
                FieldType::StringArray => {
                    for (pos, element) in value.as_array().into_iter().flatten().enumerate() {
                        let text = element.as_str().unwrap_or_default();
                        self.index_text(&field.name, seq_id, text, Some(pos as u32));
                    }
                }
                FieldType::Int32 | FieldType::Int64 => {
                    let encoded = value.as_i64().unwrap_or_default();
                    self.numeric_mut(&field.name).insert(encoded, seq_id);
                    self.sort_values
                        .entry(field.name.clone())
                        .or_default()
                        .insert(seq_id, encoded);
                }
                FieldType::Float => {
                    let encoded = float_sort_key(value.as_f64().unwrap_or_default());
                    self.numeric_mut(&field.name).insert(encoded, seq_id);
                    self.sort_values
                        .entry(field.name.clone())
                        .or_default()
                        .insert(seq_id, encoded);
                }
                FieldType::Int32Array | FieldType::Int64Array => {
                    for element in value.as_array().into_iter().flatten() {
                        let encoded = element.as_i64().unwrap_or_default();
                        self.numeric_mut(&field.name).insert(encoded, seq_id);
                    }
                }
                FieldType::FloatArray => {
                    for element in value.as_array().into_iter().flatten() {
                        let encoded = float_sort_key(element.as_f64().unwrap_or_default());
                        self.numeric_mut(&field.name).insert(encoded, seq_id);
                    }
                }
                FieldType::Bool => {
                    let encoded = i64::from(value.as_bool().unwrap_or_default());
                    self.numeric_mut(&field.name).insert(encoded, seq_id);
                }
                FieldType::BoolArray => {
                    for element in value.as_array().into_iter().flatten() {
                        let encoded = i64::from(element.as_bool().unwrap_or_default());
                        self.numeric_mut(&field.name).insert(encoded, seq_id);
                    }
                }
                FieldType::Geopoint => {
                    let coords = value.as_array().cloned().unwrap_or_default();
                    let lat = coords.first().and_then(Value::as_f64).unwrap_or_default();
                    let lng = coords.get(1).and_then(Value::as_f64).unwrap_or_default();
                    let point = GeoPoint::new(lat, lng).map_err(|_| {
                        QuarryError::bad_request(format!(
                            "Field `{}` must be a 2 element array: [lat, lng].",
                            field.name
                        ))
                    })?;
                    self.geo
                        .entry(field.name.clone())
                        .or_insert_with(|| GeoIndex::new(field.geo_resolution))
                        .insert(point, seq_id);
                }
            }

            if field.facet {
                let values = stringify_values(value);
                // non-string facet fields keep a parallel stringified index
                // under the synthetic `_fstr_` name
                let faceted = field.faceted_name();
                if faceted != field.name {
                    for (pos, text) in values.iter().enumerate() {
                        self.index_text(&faceted, seq_id, text, Some(pos as u32));
                    }
                }
                self.facet_values
                    .entry(field.name.clone())
                    .or_default()
                    .insert(seq_id, values);
            }
        }

        self.seq_ids.insert(seq_id);
        Ok(())
    }

    /// Remove a document from all in-memory structures.
    pub fn remove_document(&mut self, seq_id: u32, document: &Map<String, Value>, schema: &Schema) {
        for field in &schema.fields {
            let value = match document.get(&field.name) {
                Some(value) => value,
                None => continue,
            };

            match field.field_type {
                FieldType::String | FieldType::StringArray => {
                    self.erase_text(&field.name, seq_id, value);
                }
                FieldType::Int32 | FieldType::Int64 => {
                    let encoded = value.as_i64().unwrap_or_default();
                    self.numeric_mut(&field.name).remove(encoded, seq_id);
                    if let Some(map) = self.sort_values.get_mut(&field.name) {
                        map.remove(&seq_id);
                    }
                }
                FieldType::Float => {
                    let encoded = float_sort_key(value.as_f64().unwrap_or_default());
                    self.numeric_mut(&field.name).remove(encoded, seq_id);
                    if let Some(map) = self.sort_values.get_mut(&field.name) {
                        map.remove(&seq_id);
                    }
                }
                FieldType::Int32Array | FieldType::Int64Array => {
                    for element in value.as_array().into_iter().flatten() {
                        let encoded = element.as_i64().unwrap_or_default();
                        self.numeric_mut(&field.name).remove(encoded, seq_id);
                    }
                }
                FieldType::FloatArray => {
                    for element in value.as_array().into_iter().flatten() {
                        let encoded = float_sort_key(element.as_f64().unwrap_or_default());
                        self.numeric_mut(&field.name).remove(encoded, seq_id);
                    }
                }
                FieldType::Bool => {
                    let encoded = i64::from(value.as_bool().unwrap_or_default());
                    self.numeric_mut(&field.name).remove(encoded, seq_id);
                }
                FieldType::BoolArray => {
                    for element in value.as_array().into_iter().flatten() {
                        let encoded = i64::from(element.as_bool().unwrap_or_default());
                        self.numeric_mut(&field.name).remove(encoded, seq_id);
                    }
                }
                FieldType::Geopoint => {
                    if let Some(index) = self.geo.get_mut(&field.name) {
                        index.remove(seq_id);
                    }
                }
            }

            if field.facet {
                let faceted = field.faceted_name();
                if faceted != field.name {
                    for text in stringify_values(value) {
                        for token in tokenize(&text) {
                            if let Some(trie) = self.text.get_mut(&faceted) {
                                trie.erase(&token, seq_id);
                            }
                        }
                    }
                }
                if let Some(map) = self.facet_values.get_mut(&field.name) {
                    map.remove(&seq_id);
                }
            }
        }

        self.seq_ids.remove(&seq_id);
    }

    /// Run one search pass over this shard.
    pub fn search(&self, args: &ShardSearchArgs) -> Result<ShardSearchResult> {
        let filter_set = self.apply_filters(args.filters)?;

        // candidate generation
        let mut candidates: AHashMap<u32, u64> = AHashMap::new();
        if args.match_all {
            let ids: Vec<u32> = match &filter_set {
                Some(set) => set.iter().copied().collect(),
                None => self.seq_ids.iter().copied().collect(),
            };
            for seq_id in ids {
                candidates.insert(seq_id, 0);
            }
        } else {
            for tokens in args.token_lists {
                self.generate_candidates(tokens, args, &mut candidates);
            }
            if let Some(set) = &filter_set {
                candidates.retain(|seq_id, _| set.contains(seq_id));
            }
        }

        let found = candidates.len();

        // facet accounting over the candidate set
        let facets = self.count_facets(args, &candidates)?;

        // score payload extraction and ranking
        let mut hits = Vec::with_capacity(candidates.len());
        for (&seq_id, &text_match) in &candidates {
            let mut components = [0u64; 3];
            let mut geo_distances = Vec::new();

            for (idx, sort) in args.sorts.iter().enumerate().take(3) {
                let (value, descending) = match &sort.target {
                    SortTarget::Field(name) => {
                        let value = self
                            .sort_values
                            .get(name)
                            .and_then(|map| map.get(&seq_id))
                            .copied()
                            .unwrap_or(i64::MAX);
                        (value, sort.descending)
                    }
                    SortTarget::TextMatch => (text_match as i64, sort.descending),
                    SortTarget::GeoDistance { field, reference } => {
                        let point = self.geo.get(field).and_then(|index| index.point(seq_id));
                        match point {
                            Some(point) => {
                                geo_distances
                                    .push((field.clone(), reference.distance_meters(point)));
                                let squared = reference.squared_degree_distance(point);
                                (float_sort_key(squared), sort.descending)
                            }
                            None => (i64::MAX, sort.descending),
                        }
                    }
                };
                components[idx] = rank_component(value, descending);
            }

            hits.push(ShardHit {
                seq_id,
                rank_key: (components, !text_match, seq_id),
                text_match,
                geo_distances,
            });
        }

        hits.sort_unstable_by(|a, b| a.rank_key.cmp(&b.rank_key));
        hits.truncate(args.fetch_hits);

        Ok(ShardSearchResult {
            hits,
            found,
            facets,
        })
    }

    fn index_text(&mut self, field_name: &str, seq_id: u32, text: &str, array_pos: Option<u32>) {
        let mut counts: AHashMap<String, u32> = AHashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_default() += 1;
        }
        let trie = self.text.entry(field_name.to_string()).or_default();
        for (token, tf) in counts {
            trie.insert(&token, seq_id, array_pos, tf);
        }
    }

    fn erase_text(&mut self, field_name: &str, seq_id: u32, value: &Value) {
        let trie = match self.text.get_mut(field_name) {
            Some(trie) => trie,
            None => return,
        };
        let texts: Vec<&str> = match value {
            Value::String(text) => vec![text.as_str()],
            Value::Array(elements) => elements.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        let mut seen: AHashSet<String> = AHashSet::new();
        for text in texts {
            for token in tokenize(text) {
                if seen.insert(token.clone()) {
                    trie.erase(&token, seq_id);
                }
            }
        }
    }

    fn numeric_mut(&mut self, field_name: &str) -> &mut NumericIndex {
        self.numeric.entry(field_name.to_string()).or_default()
    }

    /// Generate candidates for one token list, escalating the typo budget
    /// and dropping tokens from the right per the configured thresholds.
    fn generate_candidates(
        &self,
        tokens: &[String],
        args: &ShardSearchArgs,
        candidates: &mut AHashMap<u32, u64>,
    ) {
        if tokens.is_empty() {
            return;
        }

        let mut budget = 0;
        loop {
            self.candidates_at_budget(tokens, args, budget, candidates);
            if candidates.len() >= args.typo_tokens_threshold as usize || budget >= args.num_typos {
                break;
            }
            budget += 1;
        }

        // a result count under the drop threshold enables token dropping;
        // tokens are then shed from the right until any result exists or a
        // single token remains
        if (candidates.len() as u32) < args.drop_tokens_threshold {
            let mut working: Vec<String> = tokens.to_vec();
            while candidates.is_empty() && working.len() > 1 {
                working.pop();
                self.candidates_at_budget(&working, args, args.num_typos, candidates);
            }
        }
    }

    fn candidates_at_budget(
        &self,
        tokens: &[String],
        args: &ShardSearchArgs,
        budget: u32,
        candidates: &mut AHashMap<u32, u64>,
    ) {
        for (field_name, weight) in args.query_fields {
            let trie = match self.text.get(field_name) {
                Some(trie) => trie,
                None => continue,
            };

            // per-token doc maps: seq_id -> (best cost, tf)
            let mut per_token: Vec<AHashMap<u32, (u32, u32)>> = Vec::with_capacity(tokens.len());
            for (idx, token) in tokens.iter().enumerate() {
                let prefix = args.prefix && idx == tokens.len() - 1;
                let mut matches = trie.lookup(token, budget, prefix);
                if matches.len() > MAX_TOKEN_EXPANSIONS {
                    self.order_expansions(&mut matches, args);
                    matches.truncate(MAX_TOKEN_EXPANSIONS);
                }

                let mut docs: AHashMap<u32, (u32, u32)> = AHashMap::new();
                for term in &matches {
                    for posting in &term.postings {
                        let entry = docs
                            .entry(posting.seq_id)
                            .or_insert((term.cost, posting.term_frequency));
                        if term.cost < entry.0 {
                            entry.0 = term.cost;
                        }
                        entry.1 = entry.1.max(posting.term_frequency);
                    }
                }
                per_token.push(docs);
            }

            // intersect: a candidate must match every token
            let (smallest_idx, _) = match per_token
                .iter()
                .enumerate()
                .min_by_key(|(_, docs)| docs.len())
            {
                Some(smallest) => smallest,
                None => continue,
            };

            for (&seq_id, _) in &per_token[smallest_idx] {
                let mut score = MatchScore {
                    tokens_matched: 0,
                    total_cost: 0,
                    total_tf: 0,
                    weight: *weight,
                };
                let mut matched_all = true;
                for docs in &per_token {
                    match docs.get(&seq_id) {
                        Some(&(cost, tf)) => {
                            score.tokens_matched += 1;
                            score.total_cost += cost;
                            score.total_tf += tf;
                        }
                        None => {
                            matched_all = false;
                            break;
                        }
                    }
                }
                if matched_all {
                    let packed = score.packed();
                    let entry = candidates.entry(seq_id).or_insert(0);
                    *entry = (*entry).max(packed);
                }
            }
        }
    }

    /// Order oversize expansion sets before truncation, per the requested
    /// token ordering.
    fn order_expansions(&self, matches: &mut [trie::TermMatch], args: &ShardSearchArgs) {
        match args.token_order {
            TokenOrdering::Frequency => {
                matches.sort_by(|a, b| {
                    b.postings
                        .len()
                        .cmp(&a.postings.len())
                        .then_with(|| a.cost.cmp(&b.cost))
                });
            }
            TokenOrdering::MaxScore => {
                let rank_values = args.rank_field.and_then(|field| self.sort_values.get(field));
                matches.sort_by_key(|term| {
                    let best = rank_values
                        .map(|values| {
                            term.postings
                                .iter()
                                .filter_map(|p| values.get(&p.seq_id))
                                .copied()
                                .max()
                                .unwrap_or(i64::MIN)
                        })
                        .unwrap_or(i64::MIN);
                    (std::cmp::Reverse(best), term.cost)
                });
            }
        }
    }

    /// Resolve the filter clauses to the allowed document set.
    fn apply_filters(&self, filters: &[FilterClause]) -> Result<Option<BTreeSet<u32>>> {
        if filters.is_empty() {
            return Ok(None);
        }

        let mut allowed: Option<BTreeSet<u32>> = None;
        for clause in filters {
            let mut clause_docs: BTreeSet<u32> = BTreeSet::new();
            for condition in &clause.conditions {
                match condition {
                    FilterCondition::StringValues { values, exclude } => {
                        let mut matched: BTreeSet<u32> = BTreeSet::new();
                        for value in values {
                            matched.extend(self.docs_with_string_value(&clause.field_name, value));
                        }
                        if *exclude {
                            clause_docs
                                .extend(self.seq_ids.iter().filter(|id| !matched.contains(id)));
                        } else {
                            clause_docs.extend(matched);
                        }
                    }
                    FilterCondition::Numeric { comparator, value } => {
                        if let Some(index) = self.numeric.get(&clause.field_name) {
                            clause_docs.extend(index.compare(*comparator, *value));
                        }
                    }
                    FilterCondition::NumericRange { from, to } => {
                        if let Some(index) = self.numeric.get(&clause.field_name) {
                            clause_docs.extend(index.between(*from, *to));
                        }
                    }
                    FilterCondition::Geo {
                        reference,
                        radius_meters,
                    } => {
                        if let Some(index) = self.geo.get(&clause.field_name) {
                            clause_docs.extend(index.within_radius(reference, *radius_meters));
                        }
                    }
                }
            }

            allowed = Some(match allowed {
                None => clause_docs,
                Some(previous) => previous.intersection(&clause_docs).copied().collect(),
            });
        }

        Ok(allowed)
    }

    /// Documents whose string field holds all tokens of `value`.
    fn docs_with_string_value(&self, field_name: &str, value: &str) -> BTreeSet<u32> {
        let trie = match self.text.get(field_name) {
            Some(trie) => trie,
            None => return BTreeSet::new(),
        };

        let tokens = tokenize(value);
        if tokens.is_empty() {
            return BTreeSet::new();
        }

        let mut docs: Option<BTreeSet<u32>> = None;
        for token in &tokens {
            let token_docs: BTreeSet<u32> = trie
                .lookup_exact(token)
                .into_iter()
                .flatten()
                .map(|posting| posting.seq_id)
                .collect();
            docs = Some(match docs {
                None => token_docs,
                Some(previous) => previous.intersection(&token_docs).copied().collect(),
            });
            if docs.as_ref().is_some_and(BTreeSet::is_empty) {
                break;
            }
        }

        docs.unwrap_or_default()
    }

    /// Count facet values over the candidate set.
    fn count_facets(
        &self,
        args: &ShardSearchArgs,
        candidates: &AHashMap<u32, u64>,
    ) -> Result<Vec<FacetState>> {
        let mut states = Vec::with_capacity(args.facet_fields.len());

        for field_name in args.facet_fields {
            let mut state = FacetState::new(field_name.clone());
            let facet_query = match args.facet_query {
                Some((query_field, query)) if query_field == field_name => {
                    Some(tokenize(query))
                }
                _ => None,
            };

            if let Some(values) = self.facet_values.get(field_name) {
                for &seq_id in candidates.keys() {
                    let Some(doc_values) = values.get(&seq_id) else {
                        continue;
                    };
                    for (pos, value) in doc_values.iter().enumerate() {
                        let query_match = match &facet_query {
                            Some(query_tokens) => {
                                facet_value_matches(value, query_tokens)
                            }
                            None => None,
                        };
                        if facet_query.is_some() && query_match.is_none() {
                            continue;
                        }

                        let hash = facet_value_hash(value);
                        let bucket = state.counts.entry(hash).or_default();
                        bucket.count += 1;
                        bucket.witness_seq_id = seq_id;
                        bucket.array_pos = pos as u32;
                        if let Some((token_pos, cost)) = query_match {
                            bucket
                                .query_token_pos
                                .insert(token_pos, TokenPosCost { pos: token_pos, cost });
                        }

                        if let Ok(number) = value.parse::<f64>() {
                            if self
                                .numeric
                                .contains_key(field_name)
                            {
                                state.stats.record(number);
                            }
                        }
                    }
                }
            }

            states.push(state);
        }

        Ok(states)
    }
}

/// Whether a stringified facet value matches the facet query tokens: every
/// query token but the last matches a value token exactly; the last query
/// token matches by prefix. Returns the position of the last matched token.
fn facet_value_matches(value: &str, query_tokens: &[String]) -> Option<(u32, u32)> {
    let (last, rest) = query_tokens.split_last()?;
    let value_tokens = tokenize(value);

    for token in rest {
        if !value_tokens.iter().any(|vt| vt == token) {
            return None;
        }
    }

    value_tokens
        .iter()
        .position(|vt| vt.starts_with(last.as_str()))
        .map(|pos| (pos as u32, 0))
}

/// Order-preserving mapping of a sort component to an ascending `u64` key.
fn rank_component(value: i64, descending: bool) -> u64 {
    let unsigned = (value as u64) ^ (1u64 << 63);
    if descending {
        !unsigned
    } else {
        unsigned
    }
}

/// Stringify a JSON field value for facet accounting.
fn stringify_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(elements) => elements.iter().map(stringify_scalar).collect(),
        other => vec![stringify_scalar(other)],
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
