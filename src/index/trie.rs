//! Token trie with typo-tolerant and prefix lookup.
//!
//! Each string field of a shard owns one [`Trie`]. Leaves carry posting
//! lists sorted by `seq_id`. Fuzzy lookup walks the trie iteratively with a
//! Levenshtein row per visited node; branches whose minimum row cost exceeds
//! the budget are pruned.

use std::collections::BTreeMap;

/// A single posting: one document's occurrence data for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// Document sequence id.
    pub seq_id: u32,
    /// Array element positions in which the token occurred (empty for
    /// scalar fields).
    pub array_positions: Vec<u32>,
    /// Number of occurrences across the field value.
    pub term_frequency: u32,
}

/// A token matched by a lookup, with its edit cost and postings.
#[derive(Debug, Clone)]
pub struct TermMatch {
    /// The stored token.
    pub token: String,
    /// Edit distance between the query token and the match.
    pub cost: u32,
    /// Postings of the matched token, sorted by `seq_id`.
    pub postings: Vec<Posting>,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: BTreeMap<u8, TrieNode>,
    postings: Vec<Posting>,
    has_token: bool,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        !self.has_token && self.children.is_empty()
    }
}

/// A byte-radix trie from tokens to posting lists.
#[derive(Debug, Default)]
pub struct Trie {
    root: TrieNode,
    num_tokens: usize,
}

impl Trie {
    /// Create an empty trie.
    pub fn new() -> Self {
        Trie::default()
    }

    /// Number of distinct tokens stored.
    pub fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    /// Insert one occurrence of `token` for `seq_id`.
    ///
    /// Repeated inserts for the same `(token, seq_id)` accumulate the term
    /// frequency and the set of array positions.
    pub fn insert(&mut self, token: &str, seq_id: u32, array_position: Option<u32>, tf: u32) {
        let mut node = &mut self.root;
        for byte in token.bytes() {
            node = node.children.entry(byte).or_default();
        }

        if !node.has_token {
            node.has_token = true;
            self.num_tokens += 1;
        }

        match node.postings.binary_search_by_key(&seq_id, |p| p.seq_id) {
            Ok(idx) => {
                let posting = &mut node.postings[idx];
                posting.term_frequency += tf;
                if let Some(pos) = array_position {
                    if !posting.array_positions.contains(&pos) {
                        posting.array_positions.push(pos);
                    }
                }
            }
            Err(idx) => {
                node.postings.insert(
                    idx,
                    Posting {
                        seq_id,
                        array_positions: array_position.into_iter().collect(),
                        term_frequency: tf,
                    },
                );
            }
        }
    }

    /// Remove all postings of `token` for `seq_id`, pruning empty branches.
    pub fn erase(&mut self, token: &str, seq_id: u32) {
        Self::erase_rec(&mut self.root, token.as_bytes(), seq_id, &mut self.num_tokens);
    }

    fn erase_rec(node: &mut TrieNode, rest: &[u8], seq_id: u32, num_tokens: &mut usize) {
        match rest.first() {
            None => {
                if let Ok(idx) = node.postings.binary_search_by_key(&seq_id, |p| p.seq_id) {
                    node.postings.remove(idx);
                }
                if node.has_token && node.postings.is_empty() {
                    node.has_token = false;
                    *num_tokens -= 1;
                }
            }
            Some(&byte) => {
                if let Some(child) = node.children.get_mut(&byte) {
                    Self::erase_rec(child, &rest[1..], seq_id, num_tokens);
                    if child.is_empty() {
                        node.children.remove(&byte);
                    }
                }
            }
        }
    }

    /// Exact lookup of a token's postings.
    pub fn lookup_exact(&self, token: &str) -> Option<&[Posting]> {
        let mut node = &self.root;
        for byte in token.bytes() {
            node = node.children.get(&byte)?;
        }
        if node.has_token {
            Some(&node.postings)
        } else {
            None
        }
    }

    /// Find stored tokens within `max_cost` edits of `token`.
    ///
    /// With `prefix` set, a stored token also matches when the query is an
    /// approximate prefix of it; the cost is then the best edit distance
    /// between the query and any prefix of the stored token. Matches come
    /// back sorted by ascending cost, then token byte order.
    pub fn lookup(&self, token: &str, max_cost: u32, prefix: bool) -> Vec<TermMatch> {
        let query = token.as_bytes();
        let mut matches = Vec::new();

        // row[i] = edit distance between the consumed trie path and query[..i]
        let initial_row: Vec<u32> = (0..=query.len() as u32).collect();
        let initial_prefix_cost = if query.is_empty() { 0 } else { u32::MAX };

        let mut stack: Vec<(&TrieNode, Vec<u32>, Vec<u8>, u32)> = Vec::new();
        self.visit(
            &self.root,
            &initial_row,
            Vec::new(),
            initial_prefix_cost.min(query.len() as u32),
            query,
            max_cost,
            prefix,
            &mut matches,
            &mut stack,
        );

        matches.sort_by(|a, b| a.cost.cmp(&b.cost).then_with(|| a.token.cmp(&b.token)));
        matches
    }

    #[allow(clippy::too_many_arguments)]
    fn visit<'a>(
        &'a self,
        start: &'a TrieNode,
        start_row: &[u32],
        start_path: Vec<u8>,
        start_best_prefix: u32,
        query: &[u8],
        max_cost: u32,
        prefix: bool,
        matches: &mut Vec<TermMatch>,
        stack: &mut Vec<(&'a TrieNode, Vec<u32>, Vec<u8>, u32)>,
    ) {
        self.collect_if_match(start, start_row, &start_path, start_best_prefix, max_cost, prefix, matches);

        for (&byte, child) in &start.children {
            stack.push((child, start_row.to_vec(), {
                let mut p = start_path.clone();
                p.push(byte);
                p
            }, start_best_prefix));
        }

        while let Some((node, parent_row, path, parent_best_prefix)) = stack.pop() {
            let byte = match path.last() {
                Some(&byte) => byte,
                None => continue,
            };
            let mut row = Vec::with_capacity(parent_row.len());
            row.push(parent_row[0] + 1);
            for i in 1..parent_row.len() {
                let substitution_cost = if query[i - 1] == byte { 0 } else { 1 };
                let cost = (parent_row[i] + 1)
                    .min(row[i - 1] + 1)
                    .min(parent_row[i - 1] + substitution_cost);
                row.push(cost);
            }

            let best_prefix = parent_best_prefix.min(row.last().copied().unwrap_or(u32::MAX));

            self.collect_if_match(node, &row, &path, best_prefix, max_cost, prefix, matches);

            // prune: no cell can shrink below the row minimum, and in
            // prefix mode an already-matched prefix keeps the branch alive
            let row_min = row.iter().min().copied().unwrap_or(u32::MAX);
            let viable = row_min <= max_cost || (prefix && best_prefix <= max_cost);
            if viable {
                for (&child_byte, child) in &node.children {
                    stack.push((child, row.clone(), {
                        let mut p = path.clone();
                        p.push(child_byte);
                        p
                    }, best_prefix));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_if_match(
        &self,
        node: &TrieNode,
        row: &[u32],
        path: &[u8],
        best_prefix: u32,
        max_cost: u32,
        prefix: bool,
        matches: &mut Vec<TermMatch>,
    ) {
        if !node.has_token {
            return;
        }

        let exact_cost = row.last().copied().unwrap_or(u32::MAX);
        let cost = if prefix { best_prefix.min(exact_cost) } else { exact_cost };

        if cost <= max_cost {
            matches.push(TermMatch {
                token: String::from_utf8_lossy(path).into_owned(),
                cost,
                postings: node.postings.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_trie(tokens: &[(&str, u32)]) -> Trie {
        let mut trie = Trie::new();
        for &(token, seq_id) in tokens {
            trie.insert(token, seq_id, None, 1);
        }
        trie
    }

    #[test]
    fn test_insert_and_exact_lookup() {
        let trie = build_trie(&[("apple", 1), ("apply", 2), ("apple", 3)]);

        let postings = trie.lookup_exact("apple").unwrap();
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].seq_id, 1);
        assert_eq!(postings[1].seq_id, 3);

        assert!(trie.lookup_exact("app").is_none());
        assert!(trie.lookup_exact("appliance").is_none());
    }

    #[test]
    fn test_insert_accumulates_tf_and_positions() {
        let mut trie = Trie::new();
        trie.insert("cast", 7, Some(0), 1);
        trie.insert("cast", 7, Some(2), 1);

        let postings = trie.lookup_exact("cast").unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].term_frequency, 2);
        assert_eq!(postings[0].array_positions, vec![0, 2]);
    }

    #[test]
    fn test_erase_prunes_branches() {
        let mut trie = build_trie(&[("apple", 1), ("apply", 2)]);
        trie.erase("apple", 1);

        assert!(trie.lookup_exact("apple").is_none());
        assert!(trie.lookup_exact("apply").is_some());
        assert_eq!(trie.num_tokens(), 1);
    }

    #[test]
    fn test_fuzzy_lookup_within_budget() {
        let trie = build_trie(&[("jeremy", 1), ("jeremiah", 2), ("stark", 3)]);

        let matches = trie.lookup("jeramy", 1, false);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].token, "jeremy");
        assert_eq!(matches[0].cost, 1);

        assert!(trie.lookup("jeramy", 0, false).is_empty());
    }

    #[test]
    fn test_fuzzy_lookup_orders_by_cost() {
        let trie = build_trie(&[("cat", 1), ("cart", 2), ("cast", 3)]);

        let matches = trie.lookup("cat", 1, false);
        let tokens: Vec<&str> = matches.iter().map(|m| m.token.as_str()).collect();
        assert_eq!(tokens, vec!["cat", "cart", "cast"]);
        assert_eq!(matches[0].cost, 0);
        assert_eq!(matches[1].cost, 1);
    }

    #[test]
    fn test_prefix_lookup() {
        let trie = build_trie(&[("jeremy", 1), ("jersey", 2), ("stark", 3)]);

        let matches = trie.lookup("jer", 0, true);
        let tokens: Vec<&str> = matches.iter().map(|m| m.token.as_str()).collect();
        assert_eq!(tokens, vec!["jeremy", "jersey"]);
        assert_eq!(matches[0].cost, 0);
    }

    #[test]
    fn test_prefix_lookup_with_typo() {
        let trie = build_trie(&[("jeremy", 1)]);

        // "jar" is within one edit of the prefix "jer"
        let matches = trie.lookup("jar", 1, true);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].token, "jeremy");
        assert_eq!(matches[0].cost, 1);
    }

    #[test]
    fn test_empty_query_prefix_matches_everything() {
        let trie = build_trie(&[("a", 1), ("b", 2)]);
        let matches = trie.lookup("", 0, true);
        assert_eq!(matches.len(), 2);
    }
}
