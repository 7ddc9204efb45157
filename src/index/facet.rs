//! Per-query facet accounting.
//!
//! Facet counts are keyed by a 64-bit hash of the stringified facet value.
//! Each bucket keeps a witness document and array position so the display
//! string can be recovered from the stored document, plus per-query-token
//! position/cost data for facet-query highlighting.

use std::hash::{BuildHasher, Hash, Hasher};

use ahash::{AHashMap, RandomState};

/// Position and edit cost of a query token inside a facet value.
#[derive(Debug, Clone, Copy)]
pub struct TokenPosCost {
    pub pos: u32,
    pub cost: u32,
}

/// One facet value bucket.
#[derive(Debug, Clone, Default)]
pub struct FacetCount {
    /// Number of candidate documents carrying the value.
    pub count: u32,
    /// A document that carries the value, used to recover the display string.
    pub witness_seq_id: u32,
    /// Array position of the value inside the witness document's field.
    pub array_pos: u32,
    /// Query-token positions matched inside the value (facet_query only).
    pub query_token_pos: AHashMap<u32, TokenPosCost>,
}

/// Aggregated numeric statistics for a numeric facet field.
#[derive(Debug, Clone, Copy)]
pub struct FacetStats {
    pub fvmin: f64,
    pub fvmax: f64,
    pub fvsum: f64,
    pub fvcount: u64,
}

impl Default for FacetStats {
    fn default() -> Self {
        FacetStats {
            fvmin: f64::MAX,
            fvmax: f64::MIN,
            fvsum: 0.0,
            fvcount: 0,
        }
    }
}

impl FacetStats {
    /// Fold one numeric facet value into the stats.
    pub fn record(&mut self, value: f64) {
        self.fvmin = self.fvmin.min(value);
        self.fvmax = self.fvmax.max(value);
        self.fvsum += value;
        self.fvcount += 1;
    }

    /// Merge another shard's stats into this one.
    pub fn merge(&mut self, other: &FacetStats) {
        self.fvmin = self.fvmin.min(other.fvmin);
        self.fvmax = self.fvmax.max(other.fvmax);
        self.fvsum += other.fvsum;
        self.fvcount += other.fvcount;
    }
}

/// Facet accounting for one field over one query's candidate set.
#[derive(Debug, Clone, Default)]
pub struct FacetState {
    pub field_name: String,
    pub counts: AHashMap<u64, FacetCount>,
    pub stats: FacetStats,
}

impl FacetState {
    /// Create an empty state for a field.
    pub fn new<S: Into<String>>(field_name: S) -> Self {
        FacetState {
            field_name: field_name.into(),
            counts: AHashMap::new(),
            stats: FacetStats::default(),
        }
    }

    /// Count one occurrence of a value in a candidate document.
    pub fn record(&mut self, value_hash: u64, seq_id: u32, array_pos: u32) {
        let bucket = self.counts.entry(value_hash).or_default();
        bucket.count += 1;
        bucket.witness_seq_id = seq_id;
        bucket.array_pos = array_pos;
    }

    /// Merge another shard's state for the same field.
    pub fn merge(&mut self, other: FacetState) {
        for (hash, bucket) in other.counts {
            match self.counts.get_mut(&hash) {
                Some(existing) => {
                    existing.count += bucket.count;
                }
                None => {
                    self.counts.insert(hash, bucket);
                }
            }
        }
        self.stats.merge(&other.stats);
    }
}

/// Hash a stringified facet value into its 64-bit bucket key.
///
/// Seeds are fixed so hashes agree across shards within a process.
pub fn facet_value_hash(value: &str) -> u64 {
    let state = RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    );
    let mut hasher = state.build_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_distinct() {
        assert_eq!(facet_value_hash("gold"), facet_value_hash("gold"));
        assert_ne!(facet_value_hash("gold"), facet_value_hash("silver"));
    }

    #[test]
    fn test_record_and_merge_counts() {
        let mut a = FacetState::new("brand");
        a.record(facet_value_hash("acme"), 1, 0);
        a.record(facet_value_hash("acme"), 2, 0);

        let mut b = FacetState::new("brand");
        b.record(facet_value_hash("acme"), 7, 0);
        b.record(facet_value_hash("zenith"), 8, 1);

        a.merge(b);

        assert_eq!(a.counts[&facet_value_hash("acme")].count, 3);
        let zenith = &a.counts[&facet_value_hash("zenith")];
        assert_eq!(zenith.count, 1);
        assert_eq!(zenith.witness_seq_id, 8);
        assert_eq!(zenith.array_pos, 1);
    }

    #[test]
    fn test_stats_accumulate() {
        let mut stats = FacetStats::default();
        stats.record(10.0);
        stats.record(30.0);

        let mut other = FacetStats::default();
        other.record(20.0);
        stats.merge(&other);

        assert_eq!(stats.fvmin, 10.0);
        assert_eq!(stats.fvmax, 30.0);
        assert_eq!(stats.fvsum, 60.0);
        assert_eq!(stats.fvcount, 3);
    }
}
