//! BM25-style sparse keyword vectors with hashed term ids.

use crate::config::SparseConfig;
use providers::qdrant::SparseVector;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SparseEncoder {
    k1: f32,
    b: f32,
    avg_doc_len: f32,
    max_terms: usize,
}

impl SparseEncoder {
    pub fn new(cfg: &SparseConfig) -> Self {
        Self {
            k1: cfg.k1,
            b: cfg.b,
            avg_doc_len: cfg.avg_doc_len.max(1.0),
            max_terms: cfg.max_terms.max(1),
        }
    }

    pub fn max_terms(&self) -> usize {
        self.max_terms
    }

    /// Saturated term-frequency weights, length-normalised against the
    /// configured average document length.
    pub fn encode_document(&self, text: &str) -> SparseVector {
        let tokens = tokenize(text);
        let doc_len = tokens.len() as f32;
        let norm = self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_doc_len);
        let weights = term_counts(&tokens)
            .into_iter()
            .map(|(id, tf)| (id, tf * (self.k1 + 1.0) / (tf + norm)))
            .collect();
        self.cap(weights)
    }

    /// Queries weight each distinct term once; ranking comes from the
    /// document side.
    pub fn encode_query(&self, text: &str) -> SparseVector {
        let tokens = tokenize(text);
        let weights = term_counts(&tokens)
            .into_iter()
            .map(|(id, _)| (id, 1.0))
            .collect();
        self.cap(weights)
    }

    /// Keeps the `max_terms` heaviest terms (ties broken by id), returned in
    /// ascending id order.
    fn cap(&self, weights: HashMap<u32, f32>) -> SparseVector {
        let mut terms: Vec<(u32, f32)> = weights.into_iter().collect();
        if terms.len() > self.max_terms {
            terms.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            terms.truncate(self.max_terms);
        }
        terms.sort_by_key(|(id, _)| *id);
        SparseVector {
            indices: terms.iter().map(|(id, _)| *id).collect(),
            values: terms.iter().map(|(_, w)| *w).collect(),
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1 || t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Term id from the first four bytes of the token's blake3 hash. Colliding
/// tokens share a slot and their counts add up.
fn term_id(token: &str) -> u32 {
    let hash = blake3::hash(token.as_bytes());
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn term_counts(tokens: &[String]) -> HashMap<u32, f32> {
    let mut counts = HashMap::new();
    for token in tokens {
        *counts.entry(term_id(token)).or_insert(0.0) += 1.0;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(max_terms: usize) -> SparseEncoder {
        SparseEncoder::new(&SparseConfig {
            max_terms,
            ..SparseConfig::default()
        })
    }

    #[test]
    fn repeated_terms_weigh_more() {
        let v = encoder(2048).encode_document("invoice invoice invoice total");
        let invoice = term_id("invoice");
        let total = term_id("total");
        let w = |id: u32| v.values[v.indices.iter().position(|i| *i == id).unwrap()];
        assert!(w(invoice) > w(total));
        assert!(v.indices.windows(2).all(|p| p[0] < p[1]));
    }

    #[test]
    fn capped_to_max_terms_deterministically() {
        let text: String = (0..500).map(|i| format!("term{} ", i)).collect();
        let a = encoder(64).encode_document(&text);
        let b = encoder(64).encode_document(&text);
        assert_eq!(a.indices.len(), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn tokenizer_lowercases_and_drops_punctuation() {
        assert_eq!(
            tokenize("Form W-2, 2023: TAX return!"),
            vec!["form", "2", "2023", "tax", "return"]
        );
    }

    #[test]
    fn query_and_empty_text() {
        let enc = encoder(16);
        assert!(enc.encode_document("").is_empty());
        let q = enc.encode_query("tax tax 2023");
        assert_eq!(q.indices.len(), 2);
        assert!(q.values.iter().all(|w| *w == 1.0));
    }
}
