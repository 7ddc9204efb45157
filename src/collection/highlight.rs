//! Hit highlighting: snippets of matched tokens inside stored field values.

use ahash::AHashSet;
use serde_json::{Map, Value};

use crate::analysis::tokenize;

/// Highlighting options of one search request.
#[derive(Debug, Clone)]
pub struct HighlightOptions {
    /// Fields shorter than this many tokens are returned whole.
    pub snippet_threshold: usize,
    /// Tokens kept on each side of the matched window.
    pub affix_num_tokens: usize,
    /// Fields highlighted whole regardless of length.
    pub full_fields: AHashSet<String>,
    pub start_tag: String,
    pub end_tag: String,
    /// Edit budget when deciding whether a document token matched.
    pub num_typos: u32,
    /// Whether the final query token matches by prefix.
    pub prefix: bool,
}

/// One highlighted field of a hit.
#[derive(Debug, Clone)]
pub struct Highlight {
    pub field: String,
    pub snippet: Option<String>,
    /// Whole-field highlight, present for short values and full fields.
    pub value: Option<String>,
    pub matched_tokens: Vec<String>,
}

impl Highlight {
    /// Serialize into the result JSON shape.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("field".to_string(), Value::String(self.field.clone()));
        if let Some(snippet) = &self.snippet {
            obj.insert("snippet".to_string(), Value::String(snippet.clone()));
        }
        if let Some(value) = &self.value {
            obj.insert("value".to_string(), Value::String(value.clone()));
        }
        obj.insert(
            "matched_tokens".to_string(),
            Value::Array(
                self.matched_tokens
                    .iter()
                    .map(|t| Value::String(t.clone()))
                    .collect(),
            ),
        );
        Value::Object(obj)
    }
}

/// Build highlights for a document over the searched fields.
///
/// Fields are visited in `query_fields` order; a field produces a highlight
/// only when at least one of its tokens matches a query token.
pub fn highlight_document(
    document: &Map<String, Value>,
    query_fields: &[String],
    query_tokens: &[String],
    options: &HighlightOptions,
) -> Vec<Highlight> {
    let mut highlights = Vec::new();
    if query_tokens.is_empty() {
        return highlights;
    }

    for field in query_fields {
        let Some(value) = document.get(field) else {
            continue;
        };

        let text = match value {
            Value::String(text) => Some(text.as_str()),
            Value::Array(elements) => {
                // arrays highlight their first matching element
                elements
                    .iter()
                    .filter_map(Value::as_str)
                    .find(|text| !matched_positions(text, query_tokens, options).is_empty())
            }
            _ => None,
        };

        let Some(text) = text else {
            continue;
        };

        if let Some(highlight) = highlight_text(field, text, query_tokens, options) {
            highlights.push(highlight);
        }
    }

    highlights
}

fn highlight_text(
    field: &str,
    text: &str,
    query_tokens: &[String],
    options: &HighlightOptions,
) -> Option<Highlight> {
    let positions = matched_positions(text, query_tokens, options);
    if positions.is_empty() {
        return None;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let matched_tokens: Vec<String> = positions
        .iter()
        .filter_map(|&idx| tokenize(words[idx]).into_iter().next())
        .collect();

    let (first, last) = match (positions.first(), positions.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return None,
    };

    let short = words.len() <= options.snippet_threshold;
    let (start, end) = if short {
        (0, words.len())
    } else {
        (
            first.saturating_sub(options.affix_num_tokens),
            (last + options.affix_num_tokens + 1).min(words.len()),
        )
    };

    let snippet = render(&words[start..end], &positions, start, options);

    let value = if options.full_fields.contains(field) || short {
        Some(render(&words, &positions, 0, options))
    } else {
        None
    };

    Some(Highlight {
        field: field.to_string(),
        snippet: Some(snippet),
        value,
        matched_tokens,
    })
}

/// Word positions whose normalized token matches a query token.
fn matched_positions(text: &str, query_tokens: &[String], options: &HighlightOptions) -> Vec<usize> {
    let mut positions = Vec::new();

    for (idx, word) in text.split_whitespace().enumerate() {
        let matched = tokenize(word).into_iter().any(|token| {
            query_tokens.iter().enumerate().any(|(query_idx, query_token)| {
                if token == *query_token {
                    return true;
                }
                if options.prefix
                    && query_idx == query_tokens.len() - 1
                    && token.starts_with(query_token.as_str())
                {
                    return true;
                }
                options.num_typos > 0
                    && within_edit_distance(query_token, &token, options.num_typos)
            })
        });
        if matched {
            positions.push(idx);
        }
    }

    positions
}

fn render(words: &[&str], positions: &[usize], offset: usize, options: &HighlightOptions) -> String {
    let mut parts = Vec::with_capacity(words.len());
    for (idx, word) in words.iter().enumerate() {
        if positions.contains(&(idx + offset)) {
            parts.push(format!("{}{}{}", options.start_tag, word, options.end_tag));
        } else {
            parts.push((*word).to_string());
        }
    }
    parts.join(" ")
}

/// Banded Levenshtein check with early termination.
fn within_edit_distance(a: &str, b: &str, max_cost: u32) -> bool {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.len().abs_diff(b_chars.len()) > max_cost as usize {
        return false;
    }

    let mut prev: Vec<u32> = (0..=b_chars.len() as u32).collect();
    let mut curr = vec![0u32; b_chars.len() + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = i as u32 + 1;
        let mut row_min = curr[0];
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = u32::from(a_ch != b_ch);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
            row_min = row_min.min(curr[j + 1]);
        }
        if row_min > max_cost {
            return false;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()] <= max_cost
}
