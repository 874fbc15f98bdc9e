//! Text indexes.
//!
//! A [`TextIndex`] turns documents into per-term posting trees and answers
//! ranked queries over them. Two strategies exist:
//!
//! - [`RankedIndex`] stores precomputed weights ordered by score and merges
//!   them incrementally, reading only the heads of the posting lists.
//! - [`OkapiIndex`] stores raw term counts and ranks BM25 exhaustively
//!   after prefetching the matching buckets.
//!
//! Both share the [`Lexicon`] and the [`DocWords`] lists.

pub mod build;
pub mod docwords;
pub mod lexicon;
pub mod okapi;
pub mod ranked;
pub mod stats;
pub mod types;

pub use docwords::DocWords;
pub use lexicon::Lexicon;
pub use okapi::OkapiIndex;
pub use ranked::RankedIndex;
pub use types::*;

use crate::error::{Error, Result};
use crate::query::Hits;
use crate::store::{NodeRef, Session};
use crate::tree::prefetch::{batch_lookup, bulk_load};
use crate::tree::{BTree, Counter, TreeConfig};
use crate::utils::{key_u64, u64_key};
use rustc_hash::FxHashMap;
use std::fmt;

/// Ranked full-text index over documents stored in the object store
pub trait TextIndex: fmt::Debug + Send + Sync {
    fn kind(&self) -> ScoringKind;

    /// References needed to reopen the index
    fn roots(&self) -> Vec<NodeRef>;

    /// Index a document; an already indexed one is reindexed.
    /// Returns the number of terms in the text.
    fn index(&self, session: &mut Session, doc: DocId, text: &str) -> Result<usize>;

    /// Replace a document's text, touching only the terms that changed
    fn reindex(&self, session: &mut Session, doc: DocId, text: &str) -> Result<usize>;

    /// Remove a document; does nothing if it is not indexed
    fn unindex(&self, session: &mut Session, doc: DocId) -> Result<()>;

    /// Index many documents, resolving their existing word lists in one batch
    fn index_many(&self, session: &mut Session, docs: &[(DocId, &str)]) -> Result<usize>;

    fn unindex_many(&self, session: &mut Session, docs: &[DocId]) -> Result<()>;

    /// Documents matching any query term, most relevant first
    fn search(&self, session: &mut Session, query: &str) -> Result<Hits>;

    /// Documents matching any term selected by the globs in `pattern`
    fn search_glob(&self, session: &mut Session, pattern: &str) -> Result<Hits>;

    fn search_phrase(&self, _session: &mut Session, _phrase: &str) -> Result<Hits> {
        Err(Error::Unsupported("phrase search"))
    }

    /// Normalization factor of a query; 0 when no term is known
    fn query_weight(&self, session: &mut Session, query: &str) -> Result<f64>;

    fn document_count(&self, session: &mut Session) -> Result<u64>;

    /// Terms with at least one posting
    fn word_count(&self, session: &mut Session) -> Result<u64>;

    fn has_doc(&self, session: &mut Session, doc: DocId) -> Result<bool>;

    /// Documents containing `term`
    fn doc_frequency(&self, session: &mut Session, term: TermId) -> Result<u64>;
}

/// A term's posting tree and its document frequency counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordInfo {
    pub bucket: BTree,
    pub doc_freq: Counter,
}

impl WordInfo {
    fn encode(&self) -> [u8; 16] {
        let mut value = [0u8; 16];
        value[..8].copy_from_slice(&u64_key(self.bucket.root().0));
        value[8..].copy_from_slice(&u64_key(self.doc_freq.node().0));
        value
    }

    fn decode(value: &[u8], config: TreeConfig) -> Option<Self> {
        if value.len() != 16 {
            return None;
        }
        Some(Self {
            bucket: BTree::open(NodeRef(key_u64(&value[..8])?), config),
            doc_freq: Counter::open(NodeRef(key_u64(&value[8..])?)),
        })
    }
}

/// TermId -> [`WordInfo`] tree shared by both strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WordInfoTree {
    tree: BTree,
}

impl WordInfoTree {
    pub(crate) fn create(session: &mut Session, config: TreeConfig) -> Self {
        Self {
            tree: BTree::create(session, config),
        }
    }

    pub(crate) fn open(root: NodeRef, config: TreeConfig) -> Self {
        Self {
            tree: BTree::open(root, config),
        }
    }

    pub(crate) fn root(&self) -> NodeRef {
        self.tree.root()
    }

    pub(crate) fn get(&self, session: &mut Session, term: TermId) -> Result<Option<WordInfo>> {
        match self.tree.get(session, &u64_key(term as u64))? {
            Some(value) => self.decode(&value).map(Some),
            None => Ok(None),
        }
    }

    /// Word infos of many terms, with their counters, in O(depth) + 1 round
    /// trips. Unknown terms are left out.
    pub(crate) fn get_many(
        &self,
        session: &mut Session,
        terms: &[TermId],
    ) -> Result<FxHashMap<TermId, WordInfo>> {
        let keys: Vec<[u8; 8]> = terms.iter().map(|&t| u64_key(t as u64)).collect();
        let lookups: Vec<(NodeRef, &[u8])> =
            keys.iter().map(|k| (self.tree.root(), k.as_slice())).collect();
        batch_lookup(session, &lookups)?;

        let mut infos = FxHashMap::default();
        for &term in terms {
            if let Some(info) = self.get(session, term)? {
                infos.insert(term, info);
            }
        }
        let mut counters: Vec<NodeRef> = infos.values().map(|i| i.doc_freq.node()).collect();
        counters.sort_unstable();
        bulk_load(session, &counters)?;
        Ok(infos)
    }

    /// Create an empty bucket for a term
    pub(crate) fn create_bucket(&self, session: &mut Session, term: TermId) -> Result<WordInfo> {
        let info = WordInfo {
            bucket: BTree::create(session, self.tree.config()),
            doc_freq: Counter::create(session, 0),
        };
        self.tree
            .insert(session, &u64_key(term as u64), &info.encode())?;
        Ok(info)
    }

    /// Delete a term's bucket and counter
    pub(crate) fn drop_bucket(&self, session: &mut Session, term: TermId, info: WordInfo) -> Result<()> {
        info.bucket.destroy(session)?;
        session.delete(info.doc_freq.node());
        self.tree.remove(session, &u64_key(term as u64))?;
        Ok(())
    }

    fn decode(&self, value: &[u8]) -> Result<WordInfo> {
        WordInfo::decode(value, self.tree.config()).ok_or(Error::Corrupt {
            node: self.tree.root(),
            reason: "bad word info".into(),
        })
    }
}

/// Term-level difference between two versions of a document
#[derive(Debug, Default, PartialEq)]
pub(crate) struct TermDiff<T> {
    pub removed: Vec<(TermId, T)>,
    pub added: Vec<(TermId, T)>,
    /// (term, old, new)
    pub changed: Vec<(TermId, T, T)>,
}

impl<T: Copy + PartialEq> TermDiff<T> {
    pub(crate) fn between(old: &[(TermId, T)], new: &[(TermId, T)]) -> Self {
        let old_map: FxHashMap<TermId, T> = old.iter().copied().collect();
        let new_map: FxHashMap<TermId, T> = new.iter().copied().collect();
        let mut diff = Self {
            removed: Vec::new(),
            added: Vec::new(),
            changed: Vec::new(),
        };
        for &(term, value) in old {
            if !new_map.contains_key(&term) {
                diff.removed.push((term, value));
            }
        }
        for &(term, value) in new {
            match old_map.get(&term) {
                None => diff.added.push((term, value)),
                Some(&previous) if previous != value => diff.changed.push((term, previous, value)),
                Some(_) => {}
            }
        }
        diff
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.changed.is_empty()
    }

    /// Every (term, value) pair the diff reads or writes, old and new
    pub(crate) fn touched(&self) -> Vec<(TermId, T)> {
        let capacity = self.removed.len() + self.added.len() + 2 * self.changed.len();
        let mut touched = Vec::with_capacity(capacity);
        touched.extend_from_slice(&self.removed);
        touched.extend_from_slice(&self.added);
        for &(term, old, new) in &self.changed {
            touched.push((term, old));
            touched.push((term, new));
        }
        touched
    }
}

/// Token count of a document and the ids that take part in scoring.
/// Out-of-vocabulary tokens are counted but never stored.
pub(crate) fn scored_terms(ids: Vec<TermId>) -> (usize, Vec<TermId>) {
    let tokens = ids.len();
    let scored = ids.into_iter().filter(|&id| id != UNKNOWN_TERM).collect();
    (tokens, scored)
}

/// Distinct non-zero terms with their number of uses, ascending by id
pub(crate) fn query_terms(ids: &[TermId]) -> Vec<(TermId, u32)> {
    let mut counts: FxHashMap<TermId, u32> = FxHashMap::default();
    for &id in ids.iter().filter(|&&id| id != UNKNOWN_TERM) {
        *counts.entry(id).or_insert(0) += 1;
    }
    let mut terms: Vec<(TermId, u32)> = counts.into_iter().collect();
    terms.sort_unstable_by_key(|(id, _)| *id);
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_diff() {
        let diff = TermDiff::between(&[(1, 1u32), (2, 2), (3, 3)], &[(2, 2), (3, 4), (5, 1)]);
        assert_eq!(diff.removed, vec![(1, 1)]);
        assert_eq!(diff.added, vec![(5, 1)]);
        assert_eq!(diff.changed, vec![(3, 3, 4)]);
        assert!(TermDiff::between(&[(1, 0.5f64)], &[(1, 0.5)]).is_empty());
        assert_eq!(diff.touched(), vec![(1, 1), (5, 1), (3, 3), (3, 4)]);
    }

    #[test]
    fn test_scored_terms_counts_unknown() {
        assert_eq!(scored_terms(vec![3, 0, 3, 7]), (4, vec![3, 3, 7]));
        assert_eq!(scored_terms(vec![0]), (1, vec![]));
    }

    #[test]
    fn test_query_terms() {
        assert_eq!(query_terms(&[4, 0, 2, 4, 0]), vec![(2, 1), (4, 2)]);
        assert!(query_terms(&[0, 0]).is_empty());
    }
}
