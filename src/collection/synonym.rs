//! Query-time synonyms: token rewrites applied before retrieval.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::tokenize;
use crate::error::{QuarryError, Result};

/// Cap on the number of alternative token lists a query can expand into.
const MAX_EXPANSIONS: usize = 10;

/// A synonym definition.
///
/// With a non-empty `root`, occurrences of the root phrase are substituted
/// by each synonym (one-way). With an empty root, every synonym expands to
/// every other (multi-way).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synonym {
    pub id: String,
    #[serde(default)]
    pub root: String,
    pub synonyms: Vec<String>,
}

impl Synonym {
    /// Parse a synonym definition.
    pub fn parse(definition: &Value, id: &str) -> Result<Synonym> {
        let obj = definition
            .as_object()
            .ok_or_else(|| QuarryError::bad_request("Bad JSON."))?;

        let synonyms_ok = obj
            .get("synonyms")
            .and_then(Value::as_array)
            .is_some_and(|arr| !arr.is_empty() && arr.iter().all(Value::is_string));
        if !synonyms_ok {
            return Err(QuarryError::bad_request(
                "Could not find an array of `synonyms` values.",
            ));
        }

        let mut with_id = definition.clone();
        if let Some(map) = with_id.as_object_mut() {
            let id_value = map
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string());
            map.insert("id".to_string(), Value::String(id_value));
        }

        serde_json::from_value(with_id)
            .map_err(|e| QuarryError::bad_request(format!("Invalid synonym: {e}")))
    }

    /// Expand a token list into alternatives generated by this definition.
    /// The original list is not included.
    pub fn apply(&self, tokens: &[String]) -> Vec<Vec<String>> {
        let mut expansions = Vec::new();

        if self.root.is_empty() {
            // multi-way: any member phrase rewrites to every other member
            for (idx, phrase) in self.synonyms.iter().enumerate() {
                let pattern = tokenize(phrase);
                if let Some(pos) = find_subsequence(tokens, &pattern) {
                    for (other_idx, replacement) in self.synonyms.iter().enumerate() {
                        if other_idx == idx {
                            continue;
                        }
                        expansions.push(substitute(tokens, pos, pattern.len(), replacement));
                        if expansions.len() >= MAX_EXPANSIONS {
                            return expansions;
                        }
                    }
                }
            }
        } else {
            let pattern = tokenize(&self.root);
            if let Some(pos) = find_subsequence(tokens, &pattern) {
                for replacement in &self.synonyms {
                    expansions.push(substitute(tokens, pos, pattern.len(), replacement));
                    if expansions.len() >= MAX_EXPANSIONS {
                        return expansions;
                    }
                }
            }
        }

        expansions
    }

    /// Serialize for persistence.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn find_subsequence(haystack: &[String], needle: &[String]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn substitute(tokens: &[String], pos: usize, len: usize, replacement: &str) -> Vec<String> {
    let mut rewritten: Vec<String> = tokens[..pos].to_vec();
    rewritten.extend(tokenize(replacement));
    rewritten.extend_from_slice(&tokens[pos + len..]);
    rewritten
}
