//! Text analysis: tokenization and normalization.
//!
//! Queries and document fields go through the same pipeline: Unicode
//! compatibility decomposition, lowercasing, and splitting on anything that
//! is not alphanumeric. Combining marks are dropped by the split, so
//! accented text matches its ASCII form.

use unicode_normalization::UnicodeNormalization;

/// Tokenize a string into normalized lowercase tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.nfkd() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                current.push(lower);
            }
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Tokenize and keep each token's ordinal position within the text.
pub fn tokenize_with_positions(text: &str) -> Vec<(String, u32)> {
    tokenize(text)
        .into_iter()
        .enumerate()
        .map(|(pos, token)| (token, pos as u32))
        .collect()
}
