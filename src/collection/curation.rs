//! Search overrides: per-query rules that pin or hide specific documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::tokenize;
use crate::error::{QuarryError, Result};

/// How an override rule's query is matched against incoming queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    #[serde(rename = "exact")]
    Exact,
    #[serde(rename = "contains")]
    Contains,
}

/// The trigger of an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRule {
    /// Query text the rule fires on.
    pub query: String,
    /// Whether the query must match exactly or merely be contained.
    #[serde(rename = "match")]
    pub match_type: MatchType,
}

/// A document pinned to a position by an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideInclude {
    pub id: String,
    /// 1-based position in the result list.
    pub position: usize,
}

/// A document hidden by an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideExclude {
    pub id: String,
}

/// A curation rule: when its trigger matches the query, the listed
/// documents are pinned or hidden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Override {
    pub id: String,
    pub rule: OverrideRule,
    #[serde(default)]
    pub includes: Vec<OverrideInclude>,
    #[serde(default)]
    pub excludes: Vec<OverrideExclude>,
}

impl Override {
    /// Parse an override definition, validating the required parts.
    pub fn parse(definition: &Value, id: &str) -> Result<Override> {
        let obj = definition
            .as_object()
            .ok_or_else(|| QuarryError::bad_request("Bad JSON."))?;

        let rule = obj
            .get("rule")
            .and_then(Value::as_object)
            .ok_or_else(|| QuarryError::bad_request("Missing `rule` definition."))?;

        if !rule.contains_key("query") || !rule.contains_key("match") {
            return Err(QuarryError::bad_request(
                "The `rule` definition must contain a `query` and `match`.",
            ));
        }

        if !obj.contains_key("includes") && !obj.contains_key("excludes") {
            return Err(QuarryError::bad_request(
                "Must contain one of: `includes`, `excludes`.",
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
            .map_err(|e| QuarryError::bad_request(format!("Invalid override: {e}")))
    }

    /// Whether this rule fires for the given normalized query tokens.
    pub fn matches(&self, query_tokens: &[String]) -> bool {
        let rule_tokens = tokenize(&self.rule.query);
        if rule_tokens.is_empty() {
            return false;
        }

        match self.rule.match_type {
            MatchType::Exact => rule_tokens == query_tokens,
            MatchType::Contains => contains_subsequence(query_tokens, &rule_tokens),
        }
    }

    /// Serialize for persistence.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Whether `needle` appears as a contiguous run inside `haystack`.
fn contains_subsequence(haystack: &[String], needle: &[String]) -> bool {
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}
