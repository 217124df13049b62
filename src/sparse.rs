//! Keyword (sparse) representation of unit text and queries.
//!
//! Text is lowercased and split on anything that is not alphanumeric.
//! Hyphenated command names (`Show-InstallationPrompt`) contribute both
//! their parts and the joined name, so an exact command-name query scores
//! higher than a query for one of its words. Term weights are
//! `1 + ln(tf)`.
//!
//! The index stores terms as strings; backends that need numeric sparse
//! indices (Qdrant) map each term through [`term_index`], a stable hash.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const MIN_TERM_LEN: usize = 2;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "with",
];

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f32,
}

/// Sorted, de-duplicated weighted terms.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseTerms {
    pub terms: Vec<WeightedTerm>,
}

impl SparseTerms {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn weight_of(&self, term: &str) -> Option<f32> {
        self.terms
            .binary_search_by(|t| t.term.as_str().cmp(term))
            .ok()
            .map(|i| self.terms[i].weight)
    }

    /// Numeric form for sparse-vector backends: parallel index/value arrays.
    ///
    /// Distinct terms that collide on the same index have their weights
    /// summed so the output never repeats an index.
    pub fn to_indexed(&self) -> (Vec<u32>, Vec<f32>) {
        let mut merged: BTreeMap<u32, f32> = BTreeMap::new();
        for t in &self.terms {
            *merged.entry(term_index(&t.term)).or_insert(0.0) += t.weight;
        }
        merged.into_iter().unzip()
    }
}

/// Split text into normalized keyword tokens (with repeats).
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '(' | ')' | '[' | ']' | '<' | '>' | '"' | '\'' | '`' | '{' | '}' | '|' | '=' | ':')) {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if word.is_empty() {
            continue;
        }
        let lower = word.to_lowercase();
        let parts: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() > 1 {
            let joined: String = parts.concat();
            push_token(&mut tokens, &joined);
        }
        for part in parts {
            push_token(&mut tokens, part);
        }
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, token: &str) {
    if token.chars().count() < MIN_TERM_LEN || STOPWORDS.contains(&token) {
        return;
    }
    tokens.push(token.to_string());
}

/// Build weighted sparse terms for a unit text or query.
pub fn encode(text: &str) -> SparseTerms {
    let mut tf: BTreeMap<String, u32> = BTreeMap::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0) += 1;
    }
    let terms = tf
        .into_iter()
        .map(|(term, count)| WeightedTerm {
            term,
            weight: 1.0 + (count as f32).ln(),
        })
        .collect();
    SparseTerms { terms }
}

/// Stable 32-bit index for a term (first four bytes of its SHA-256).
pub fn term_index(term: &str) -> u32 {
    let digest = Sha256::digest(term.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
