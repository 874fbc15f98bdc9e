//! Okapi BM25 index.
//!
//! Buckets map DocId to the raw count of a term in that document, and a
//! separate tree keeps every document's length. Scores depend on the
//! collection's mean length, so nothing can be ranked ahead of time: a
//! query prefetches the matching buckets whole, level by level, and ranks
//! in memory.

use crate::error::{Error, Result};
use crate::index::types::{DocId, EngineConfig, Hit, OkapiParams, ScoringKind, TermId};
use crate::index::{
    DocWords, Lexicon, TermDiff, TextIndex, WordInfo, WordInfoTree, query_terms, scored_terms,
};
use crate::query::Hits;
use crate::query::scorer::{Bm25, term_frequencies};
use crate::store::{NodeRef, Session};
use crate::tree::prefetch::{batch_lookup, prefetch_subtree};
use crate::tree::{BTree, Counter};
use crate::utils::{key_u64, u64_key};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct OkapiIndex {
    lexicon: Lexicon,
    wordinfo: WordInfoTree,
    docwords: DocWords,
    /// DocId -> number of terms
    doclen: BTree,
    word_count: Counter,
    doc_count: Counter,
    total_length: Counter,
    params: OkapiParams,
}

impl OkapiIndex {
    pub fn create(session: &mut Session, lexicon: Lexicon, config: &EngineConfig) -> Self {
        Self {
            lexicon,
            wordinfo: WordInfoTree::create(session, config.tree),
            docwords: DocWords::create(session, config.tree),
            doclen: BTree::create(session, config.tree),
            word_count: Counter::create(session, 0),
            doc_count: Counter::create(session, 0),
            total_length: Counter::create(session, 0),
            params: config.okapi,
        }
    }

    pub fn open(lexicon: Lexicon, roots: &[NodeRef], config: &EngineConfig) -> Option<Self> {
        let &[wordinfo, docwords, doclen, word_count, doc_count, total_length] = roots else {
            return None;
        };
        Some(Self {
            lexicon,
            wordinfo: WordInfoTree::open(wordinfo, config.tree),
            docwords: DocWords::open(docwords, config.tree),
            doclen: BTree::open(doclen, config.tree),
            word_count: Counter::open(word_count),
            doc_count: Counter::open(doc_count),
            total_length: Counter::open(total_length),
            params: config.okapi,
        })
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Read phase of a write: word infos with their counters, the global
    /// counters, and the paths to `doc` in every touched bucket and in the
    /// length tree
    fn prepare(
        &self,
        session: &mut Session,
        doc: DocId,
        terms: &[TermId],
    ) -> Result<FxHashMap<TermId, WordInfo>> {
        let mut terms = terms.to_vec();
        terms.sort_unstable();
        terms.dedup();
        let infos = self.wordinfo.get_many(session, &terms)?;
        session.fetch_many(&[
            self.word_count.node(),
            self.doc_count.node(),
            self.total_length.node(),
        ])?;

        let key = u64_key(doc);
        let mut lookups: Vec<(NodeRef, &[u8])> = infos
            .values()
            .map(|info| (info.bucket.root(), key.as_slice()))
            .collect();
        lookups.push((self.doclen.root(), key.as_slice()));
        batch_lookup(session, &lookups)?;
        Ok(infos)
    }

    fn add_counts(
        &self,
        session: &mut Session,
        doc: DocId,
        counts: &[(TermId, u32)],
        infos: &mut FxHashMap<TermId, WordInfo>,
    ) -> Result<()> {
        for &(term, tf) in counts {
            let info = match infos.get(&term) {
                Some(info) => *info,
                None => {
                    let info = self.wordinfo.create_bucket(session, term)?;
                    self.word_count.change(session, 1)?;
                    infos.insert(term, info);
                    info
                }
            };
            if info
                .bucket
                .insert(session, &u64_key(doc), &tf.to_be_bytes())?
                .is_none()
            {
                info.doc_freq.change(session, 1)?;
            }
        }
        Ok(())
    }

    fn remove_counts(
        &self,
        session: &mut Session,
        doc: DocId,
        terms: &[TermId],
        infos: &FxHashMap<TermId, WordInfo>,
    ) -> Result<()> {
        let mut emptied = Vec::new();
        for term in terms {
            if let Some(info) = infos.get(term)
                && info.doc_freq.value(session)? <= 1
            {
                emptied.push(info.bucket.root());
            }
        }
        prefetch_subtree(session, &emptied, None, true)?;

        for &term in terms {
            let Some(info) = infos.get(&term).copied() else {
                warn!(term, doc, "no posting bucket for indexed term");
                continue;
            };
            if info.bucket.remove(session, &u64_key(doc))?.is_none() {
                warn!(term, doc, "posting missing from bucket");
                continue;
            }
            if info.doc_freq.change(session, -1)? <= 0 {
                self.wordinfo.drop_bucket(session, term, info)?;
                self.word_count.change(session, -1)?;
            }
        }
        Ok(())
    }

    /// Bring a document's counts in line with `text`, indexing it if it is
    /// new. All reads come first; the word list is written last.
    fn write_doc(&self, session: &mut Session, doc: DocId, text: &str) -> Result<usize> {
        let old_ids = self.docwords.get(session, doc)?;
        let (tokens, new_ids) = scored_terms(self.lexicon.source_to_ids(session, text)?);
        let old = old_ids.as_deref().map(term_frequencies).unwrap_or_default();
        let diff = TermDiff::between(&old, &term_frequencies(&new_ids));

        let touched: Vec<TermId> = diff.touched().into_iter().map(|(t, _)| t).collect();
        let mut infos = self.prepare(session, doc, &touched)?;

        let removed: Vec<TermId> = diff.removed.iter().map(|(t, _)| *t).collect();
        self.remove_counts(session, doc, &removed, &infos)?;
        let mut updated = diff.added;
        updated.extend(diff.changed.iter().map(|&(term, _, tf)| (term, tf)));
        self.add_counts(session, doc, &updated, &mut infos)?;

        self.set_length(session, doc, new_ids.len() as u64)?;
        if old_ids.is_none() {
            self.doc_count.change(session, 1)?;
        }
        self.docwords.put(session, doc, &new_ids)?;
        Ok(tokens)
    }

    fn remove_doc(&self, session: &mut Session, doc: DocId) -> Result<()> {
        let Some(ids) = self.docwords.get(session, doc)? else {
            return Ok(());
        };
        let terms: Vec<TermId> = term_frequencies(&ids).into_iter().map(|(t, _)| t).collect();
        let infos = self.prepare(session, doc, &terms)?;
        self.remove_counts(session, doc, &terms, &infos)?;
        if let Some(length) = self.doclen.remove(session, &u64_key(doc))? {
            let length = key_u64(&length).unwrap_or(0);
            self.total_length.change(session, -(length as i64))?;
        }
        self.doc_count.change(session, -1)?;
        self.docwords.remove(session, doc)?;
        Ok(())
    }

    fn set_length(&self, session: &mut Session, doc: DocId, length: u64) -> Result<()> {
        let previous = self
            .doclen
            .insert(session, &u64_key(doc), &u64_key(length))?
            .and_then(|v| key_u64(&v))
            .unwrap_or(0);
        let delta = length as i64 - previous as i64;
        if delta != 0 {
            self.total_length.change(session, delta)?;
        }
        Ok(())
    }

    fn rank(&self, session: &mut Session, terms: &[(TermId, u32)]) -> Result<Hits> {
        if terms.is_empty() {
            return Ok(Hits::empty());
        }
        let ids: Vec<TermId> = terms.iter().map(|(t, _)| *t).collect();
        let infos = self.wordinfo.get_many(session, &ids)?;
        if infos.is_empty() {
            return Ok(Hits::empty());
        }

        let roots: Vec<NodeRef> = infos.values().map(|i| i.bucket.root()).collect();
        prefetch_subtree(session, &roots, None, true)?;

        let docs = self.document_count(session)?;
        let total = self.total_length.value(session)?.max(0) as u64;
        let bm25 = Bm25::new(self.params, docs, total);

        // (term idf * uses, [(doc, tf)]) per known term, in term order
        let mut lists = Vec::with_capacity(infos.len());
        for &(term, uses) in terms {
            let Some(info) = infos.get(&term) else {
                continue;
            };
            let freq = info.doc_freq.value(session)?.max(0) as u64;
            let mut entries = Vec::new();
            for (key, value) in info.bucket.items(session)? {
                entries.push((decode_u64(&key, info.bucket.root())?, decode_tf(&value, info.bucket.root())?));
            }
            lists.push((bm25.idf(freq) * uses as f64, entries));
        }

        // Document lengths for every matching document, one batch
        let mut matched: Vec<DocId> = lists
            .iter()
            .flat_map(|(_, entries)| entries.iter().map(|(doc, _)| *doc))
            .collect();
        matched.sort_unstable();
        matched.dedup();
        let keys: Vec<[u8; 8]> = matched.iter().map(|&d| u64_key(d)).collect();
        let lookups: Vec<(NodeRef, &[u8])> =
            keys.iter().map(|k| (self.doclen.root(), k.as_slice())).collect();
        batch_lookup(session, &lookups)?;

        let mut lengths: FxHashMap<DocId, u64> = FxHashMap::default();
        for doc in matched {
            let length = self
                .doclen
                .get(session, &u64_key(doc))?
                .and_then(|v| key_u64(&v))
                .unwrap_or(0);
            lengths.insert(doc, length);
        }

        let mut scores: FxHashMap<DocId, f64> = FxHashMap::default();
        for (weight, entries) in &lists {
            for &(doc, tf) in entries {
                let length = lengths.get(&doc).copied().unwrap_or(0);
                *scores.entry(doc).or_insert(0.0) += weight * bm25.tf(tf, length);
            }
        }

        let mut hits: Vec<Hit> = scores
            .into_iter()
            .map(|(doc_id, score)| Hit { doc_id, score })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.doc_id.cmp(&b.doc_id))
        });
        debug!(terms = lists.len(), hits = hits.len(), "okapi search");
        Ok(Hits::ranked(hits))
    }
}

fn decode_u64(bytes: &[u8], node: NodeRef) -> Result<u64> {
    key_u64(bytes).ok_or(Error::Corrupt {
        node,
        reason: "bad document key".into(),
    })
}

fn decode_tf(bytes: &[u8], node: NodeRef) -> Result<u32> {
    let raw: [u8; 4] = bytes.try_into().map_err(|_| Error::Corrupt {
        node,
        reason: "term count must be 4 bytes".into(),
    })?;
    Ok(u32::from_be_bytes(raw))
}

impl TextIndex for OkapiIndex {
    fn kind(&self) -> ScoringKind {
        ScoringKind::Okapi
    }

    fn roots(&self) -> Vec<NodeRef> {
        vec![
            self.wordinfo.root(),
            self.docwords.root(),
            self.doclen.root(),
            self.word_count.node(),
            self.doc_count.node(),
            self.total_length.node(),
        ]
    }

    fn index(&self, session: &mut Session, doc: DocId, text: &str) -> Result<usize> {
        session.atomically(|session| self.write_doc(session, doc, text))
    }

    fn reindex(&self, session: &mut Session, doc: DocId, text: &str) -> Result<usize> {
        session.atomically(|session| self.write_doc(session, doc, text))
    }

    fn unindex(&self, session: &mut Session, doc: DocId) -> Result<()> {
        session.atomically(|session| self.remove_doc(session, doc))
    }

    fn index_many(&self, session: &mut Session, docs: &[(DocId, &str)]) -> Result<usize> {
        session.atomically(|session| {
            let ids: Vec<DocId> = docs.iter().map(|(d, _)| *d).collect();
            self.docwords.get_many(session, &ids)?;
            let mut count = 0;
            for &(doc, text) in docs {
                count += self.write_doc(session, doc, text)?;
            }
            Ok(count)
        })
    }

    fn unindex_many(&self, session: &mut Session, docs: &[DocId]) -> Result<()> {
        session.atomically(|session| {
            let lists = self.docwords.get_many(session, docs)?;
            let mut terms: Vec<TermId> = lists.values().flatten().copied().collect();
            terms.sort_unstable();
            terms.dedup();
            self.wordinfo.get_many(session, &terms)?;
            for &doc in docs {
                self.remove_doc(session, doc)?;
            }
            Ok(())
        })
    }

    fn search(&self, session: &mut Session, query: &str) -> Result<Hits> {
        let ids = self.lexicon.term_to_ids(session, query)?;
        self.rank(session, &query_terms(&ids))
    }

    fn search_glob(&self, session: &mut Session, pattern: &str) -> Result<Hits> {
        let ids = self.lexicon.glob_to_ids(session, pattern)?;
        let terms: Vec<(TermId, u32)> = ids.into_iter().map(|id| (id, 1)).collect();
        self.rank(session, &terms)
    }

    /// Sum over known query terms of the largest score each can contribute
    fn query_weight(&self, session: &mut Session, query: &str) -> Result<f64> {
        let ids = self.lexicon.term_to_ids(session, query)?;
        let terms = query_terms(&ids);
        let known: Vec<TermId> = terms.iter().map(|(t, _)| *t).collect();
        let infos = self.wordinfo.get_many(session, &known)?;
        let docs = self.document_count(session)?;
        let total = self.total_length.value(session)?.max(0) as u64;
        let bm25 = Bm25::new(self.params, docs, total);

        let mut weight = 0.0;
        for (term, uses) in terms {
            if let Some(info) = infos.get(&term) {
                let freq = info.doc_freq.value(session)?.max(0) as u64;
                weight += bm25.max_term_score(freq) * uses as f64;
            }
        }
        Ok(weight)
    }

    fn document_count(&self, session: &mut Session) -> Result<u64> {
        Ok(self.doc_count.value(session)?.max(0) as u64)
    }

    fn word_count(&self, session: &mut Session) -> Result<u64> {
        Ok(self.word_count.value(session)?.max(0) as u64)
    }

    fn has_doc(&self, session: &mut Session, doc: DocId) -> Result<bool> {
        self.docwords.contains(session, doc)
    }

    fn doc_frequency(&self, session: &mut Session, term: TermId) -> Result<u64> {
        match self.wordinfo.get(session, term)? {
            Some(info) => Ok(info.doc_freq.value(session)?.max(0) as u64),
            None => Ok(0),
        }
    }
}
