//! Relevance scoring.
//!
//! Two families of scores live here:
//!
//! - The ranked model stores a per-(document, term) weight at index time,
//!   `sqrt(tf) / sqrt(unique_terms)`, and multiplies it by a query-time
//!   squared IDF. Stored weights never depend on collection statistics, so
//!   adding a document never rewrites other documents' postings.
//! - Okapi BM25, computed entirely at query time from raw term counts and
//!   document lengths.

use crate::index::types::{OkapiParams, TermId};
use rustc_hash::FxHashMap;

/// Index-time weight of a term occurring `tf` times in a document with
/// `unique_terms` distinct terms
#[inline]
pub fn term_weight(tf: u32, unique_terms: usize) -> f64 {
    if tf == 0 || unique_terms == 0 {
        return 0.0;
    }
    (tf as f64).sqrt() / (unique_terms as f64).sqrt()
}

/// Squared IDF used as the query-time weight of a term.
///
/// `(1 + ln(N / (1 + df)))^2`. The `1 + df` keeps the logarithm finite for a
/// term in every document; an empty collection weighs nothing.
#[inline]
pub fn idf2(doc_count: u64, doc_freq: u64) -> f64 {
    if doc_count == 0 {
        return 0.0;
    }
    let idf = 1.0 + (doc_count as f64 / (1.0 + doc_freq as f64)).ln();
    idf * idf
}

/// Per-term counts of a document, in first-occurrence order
pub fn term_frequencies(ids: &[TermId]) -> Vec<(TermId, u32)> {
    let mut index: FxHashMap<TermId, usize> = FxHashMap::default();
    let mut counts: Vec<(TermId, u32)> = Vec::new();
    for &id in ids {
        match index.get(&id) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(id, counts.len());
                counts.push((id, 1));
            }
        }
    }
    counts
}

/// Stored weight of every distinct term of a document
pub fn document_weights(ids: &[TermId]) -> Vec<(TermId, f64)> {
    let counts = term_frequencies(ids);
    let unique = counts.len();
    counts
        .into_iter()
        .map(|(id, tf)| (id, term_weight(tf, unique)))
        .collect()
}

/// Normalization factor of a query: the sum of each distinct term's squared
/// IDF times the number of times the query uses it
pub fn query_weight(terms: impl IntoIterator<Item = (f64, u32)>) -> f64 {
    terms
        .into_iter()
        .map(|(idf2, uses)| idf2 * uses as f64)
        .sum()
}

/// Okapi BM25 scorer for one query over a fixed collection
#[derive(Debug, Clone, Copy)]
pub struct Bm25 {
    params: OkapiParams,
    doc_count: u64,
    mean_length: f64,
}

impl Bm25 {
    pub fn new(params: OkapiParams, doc_count: u64, total_length: u64) -> Self {
        let mean_length = if doc_count == 0 {
            0.0
        } else {
            total_length as f64 / doc_count as f64
        };
        Self {
            params,
            doc_count,
            mean_length,
        }
    }

    /// `ln(1 + N / df)`
    pub fn idf(&self, doc_freq: u64) -> f64 {
        if doc_freq == 0 || self.doc_count == 0 {
            return 0.0;
        }
        (1.0 + self.doc_count as f64 / doc_freq as f64).ln()
    }

    /// Saturated term frequency of `tf` occurrences in a document of
    /// `length` terms; bounded above by `k1 + 1`
    pub fn tf(&self, tf: u32, length: u64) -> f64 {
        let OkapiParams { k1, b } = self.params;
        let f = tf as f64;
        let relative = if self.mean_length > 0.0 {
            length as f64 / self.mean_length
        } else {
            1.0
        };
        f * (k1 + 1.0) / (f + k1 * (1.0 - b + b * relative))
    }

    /// Largest score a single term can contribute
    pub fn max_term_score(&self, doc_freq: u64) -> f64 {
        self.idf(doc_freq) * (self.params.k1 + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_weight_shape() {
        assert_eq!(term_weight(1, 1), 1.0);
        assert_eq!(term_weight(4, 4), 1.0);
        assert!(term_weight(1, 100) < term_weight(1, 10));
        assert!(term_weight(9, 10) > term_weight(1, 10));
        assert_eq!(term_weight(0, 3), 0.0);
    }

    #[test]
    fn test_idf2_positive_and_decreasing() {
        let rare = idf2(1000, 1);
        let common = idf2(1000, 500);
        assert!(rare > common);
        assert!(common > 0.0);
        // A term in every document still weighs something
        assert!(idf2(10, 10) > 0.0);
        assert_eq!(idf2(0, 0), 0.0);
    }

    #[test]
    fn test_document_weights_counts_repeats() {
        let weights = document_weights(&[7, 3, 7, 7]);
        assert_eq!(weights.len(), 2);
        assert_eq!(weights[0].0, 7);
        assert!((weights[0].1 - (3f64).sqrt() / (2f64).sqrt()).abs() < 1e-12);
        assert!((weights[1].1 - 1.0 / (2f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_query_weight_sums_uses() {
        assert_eq!(query_weight([]), 0.0);
        assert_eq!(query_weight([(2.0, 1), (0.5, 4)]), 4.0);
    }

    #[test]
    fn test_bm25_saturation() {
        let bm25 = Bm25::new(OkapiParams::default(), 100, 1000);
        assert!(bm25.tf(1000, 10) < 1.2 + 1.0);
        assert!(bm25.tf(3, 10) > bm25.tf(1, 10));
        // Longer documents are penalized
        assert!(bm25.tf(2, 5) > bm25.tf(2, 50));
        assert!(bm25.idf(1) > bm25.idf(50));
        assert_eq!(bm25.idf(0), 0.0);
        assert!((bm25.max_term_score(10) - bm25.idf(10) * 2.2).abs() < 1e-12);
    }
}
