//! Incrementally ranked index.
//!
//! Every term owns a posting tree keyed by (negated weight, DocId), so a
//! scan from the smallest key reads documents from most to least relevant.
//! The weight stored for a (document, term) pair depends only on that
//! document; the query-time IDF multiplies whole lists and so never
//! reorders them.

use crate::error::Result;
use crate::index::types::{DocId, EngineConfig, MergeConfig, ScoringKind, TermId};
use crate::index::{
    DocWords, Lexicon, TermDiff, TextIndex, WordInfo, WordInfoTree, query_terms, scored_terms,
};
use crate::query::merge::{IncrementalMerge, PostingSource};
use crate::query::scorer::{document_weights, idf2, query_weight};
use crate::query::Hits;
use crate::store::{NodeRef, Session};
use crate::tree::Counter;
use crate::tree::prefetch::{batch_lookup, prefetch_subtree};
use crate::utils::{decode_posting_key, posting_key};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RankedIndex {
    lexicon: Lexicon,
    wordinfo: WordInfoTree,
    docwords: DocWords,
    /// Terms with a posting bucket
    word_count: Counter,
    doc_count: Counter,
    merge: MergeConfig,
}

impl RankedIndex {
    pub fn create(session: &mut Session, lexicon: Lexicon, config: &EngineConfig) -> Self {
        Self {
            lexicon,
            wordinfo: WordInfoTree::create(session, config.tree),
            docwords: DocWords::create(session, config.tree),
            word_count: Counter::create(session, 0),
            doc_count: Counter::create(session, 0),
            merge: config.merge,
        }
    }

    /// Reattach from the references returned by [`TextIndex::roots`]
    pub fn open(lexicon: Lexicon, roots: &[NodeRef], config: &EngineConfig) -> Option<Self> {
        let &[wordinfo, docwords, word_count, doc_count] = roots else {
            return None;
        };
        Some(Self {
            lexicon,
            wordinfo: WordInfoTree::open(wordinfo, config.tree),
            docwords: DocWords::open(docwords, config.tree),
            word_count: Counter::open(word_count),
            doc_count: Counter::open(doc_count),
            merge: config.merge,
        })
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn docwords(&self) -> &DocWords {
        &self.docwords
    }

    /// Root of a term's posting tree, if the term has postings
    pub fn bucket_root(&self, session: &mut Session, term: TermId) -> Result<Option<NodeRef>> {
        Ok(self.wordinfo.get(session, term)?.map(|info| info.bucket.root()))
    }

    /// Full posting list of a term as (document, stored weight), best first
    pub fn postings(&self, session: &mut Session, term: TermId) -> Result<Vec<(DocId, f64)>> {
        let Some(info) = self.wordinfo.get(session, term)? else {
            return Ok(Vec::new());
        };
        prefetch_subtree(session, &[info.bucket.root()], None, true)?;
        let mut postings = Vec::new();
        for (key, _) in info.bucket.items(session)? {
            if let Some((score, doc)) = decode_posting_key(&key) {
                postings.push((doc, score));
            }
        }
        Ok(postings)
    }

    /// Squared IDF of a term from the current counters
    pub fn idf2(&self, session: &mut Session, term: TermId) -> Result<f64> {
        let docs = self.document_count(session)?;
        let freq = self.doc_frequency(session, term)?;
        Ok(idf2(docs, freq))
    }

    /// Read phase of a write: word infos with their counters, both global
    /// counters, and the path to every posting key about to change. After
    /// this the write itself only touches resident nodes.
    fn prepare(
        &self,
        session: &mut Session,
        doc: DocId,
        touched: &[(TermId, f64)],
    ) -> Result<FxHashMap<TermId, WordInfo>> {
        let mut terms: Vec<TermId> = touched.iter().map(|(t, _)| *t).collect();
        terms.sort_unstable();
        terms.dedup();
        let infos = self.wordinfo.get_many(session, &terms)?;
        session.fetch_many(&[self.word_count.node(), self.doc_count.node()])?;

        let keys: Vec<(NodeRef, [u8; 16])> = touched
            .iter()
            .filter_map(|(term, weight)| {
                infos
                    .get(term)
                    .map(|info| (info.bucket.root(), posting_key(*weight, doc)))
            })
            .collect();
        let lookups: Vec<(NodeRef, &[u8])> = keys.iter().map(|(r, k)| (*r, k.as_slice())).collect();
        batch_lookup(session, &lookups)?;
        Ok(infos)
    }

    fn add_postings(
        &self,
        session: &mut Session,
        doc: DocId,
        weights: &[(TermId, f64)],
        infos: &mut FxHashMap<TermId, WordInfo>,
    ) -> Result<()> {
        for &(term, weight) in weights {
            let info = match infos.get(&term) {
                Some(info) => *info,
                None => {
                    let info = self.wordinfo.create_bucket(session, term)?;
                    self.word_count.change(session, 1)?;
                    infos.insert(term, info);
                    info
                }
            };
            if info.bucket.insert(session, &posting_key(weight, doc), &[])?.is_none() {
                info.doc_freq.change(session, 1)?;
            }
        }
        Ok(())
    }

    fn remove_postings(
        &self,
        session: &mut Session,
        doc: DocId,
        weights: &[(TermId, f64)],
        infos: &FxHashMap<TermId, WordInfo>,
    ) -> Result<()> {
        // Buckets this removal empties are destroyed whole; load them first
        let mut emptied = Vec::new();
        for (term, _) in weights {
            if let Some(info) = infos.get(term)
                && info.doc_freq.value(session)? <= 1
            {
                emptied.push(info.bucket.root());
            }
        }
        prefetch_subtree(session, &emptied, None, true)?;

        for &(term, weight) in weights {
            let Some(info) = infos.get(&term).copied() else {
                warn!(term, doc, "no posting bucket for indexed term");
                continue;
            };
            if info.bucket.remove(session, &posting_key(weight, doc))?.is_none() {
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

    fn replace_postings(
        &self,
        session: &mut Session,
        doc: DocId,
        changes: &[(TermId, f64, f64)],
        infos: &FxHashMap<TermId, WordInfo>,
    ) -> Result<()> {
        for &(term, old, new) in changes {
            let Some(info) = infos.get(&term) else {
                warn!(term, doc, "no posting bucket for indexed term");
                continue;
            };
            if info.bucket.remove(session, &posting_key(old, doc))?.is_none() {
                warn!(term, doc, "posting missing from bucket");
                info.doc_freq.change(session, 1)?;
            }
            info.bucket.insert(session, &posting_key(new, doc), &[])?;
        }
        Ok(())
    }

    /// Bring a document's postings in line with `text`, indexing it if it
    /// is new. Everything is read before the first change, and the word
    /// list is written last.
    fn write_doc(&self, session: &mut Session, doc: DocId, text: &str) -> Result<usize> {
        let old_ids = self.docwords.get(session, doc)?;
        let (tokens, new_ids) = scored_terms(self.lexicon.source_to_ids(session, text)?);
        let old = old_ids.as_deref().map(document_weights).unwrap_or_default();
        let diff = TermDiff::between(&old, &document_weights(&new_ids));

        let mut infos = self.prepare(session, doc, &diff.touched())?;
        self.remove_postings(session, doc, &diff.removed, &infos)?;
        self.add_postings(session, doc, &diff.added, &mut infos)?;
        self.replace_postings(session, doc, &diff.changed, &infos)?;
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
        let weights = document_weights(&ids);
        let infos = self.prepare(session, doc, &weights)?;
        self.remove_postings(session, doc, &weights, &infos)?;
        self.doc_count.change(session, -1)?;
        self.docwords.remove(session, doc)?;
        Ok(())
    }

    fn search_terms(&self, session: &mut Session, terms: &[(TermId, u32)]) -> Result<Hits> {
        if terms.is_empty() {
            return Ok(Hits::empty());
        }
        let ids: Vec<TermId> = terms.iter().map(|(t, _)| *t).collect();
        let infos = self.wordinfo.get_many(session, &ids)?;
        let docs = self.document_count(session)?;

        let mut sources = Vec::with_capacity(infos.len());
        for &(term, uses) in terms {
            let Some(info) = infos.get(&term) else {
                continue;
            };
            let freq = info.doc_freq.value(session)?.max(0) as u64;
            let weight = idf2(docs, freq) * uses as f64;
            sources.push(PostingSource::new(term, info.bucket, weight, freq));
        }
        debug!(terms = terms.len(), sources = sources.len(), "ranked search");

        Ok(match sources.len() {
            0 => Hits::empty(),
            1 => Hits::direct(sources.remove(0), self.merge.lookahead_leaves),
            _ => Hits::merging(IncrementalMerge::new(sources, self.docwords, self.merge)),
        })
    }
}

impl TextIndex for RankedIndex {
    fn kind(&self) -> ScoringKind {
        ScoringKind::Ranked
    }

    fn roots(&self) -> Vec<NodeRef> {
        vec![
            self.wordinfo.root(),
            self.docwords.root(),
            self.word_count.node(),
            self.doc_count.node(),
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
        self.search_terms(session, &query_terms(&ids))
    }

    fn search_glob(&self, session: &mut Session, pattern: &str) -> Result<Hits> {
        let ids = self.lexicon.glob_to_ids(session, pattern)?;
        let terms: Vec<(TermId, u32)> = ids.into_iter().map(|id| (id, 1)).collect();
        self.search_terms(session, &terms)
    }

    fn query_weight(&self, session: &mut Session, query: &str) -> Result<f64> {
        let ids = self.lexicon.term_to_ids(session, query)?;
        let terms = query_terms(&ids);
        let known: Vec<TermId> = terms.iter().map(|(t, _)| *t).collect();
        let infos = self.wordinfo.get_many(session, &known)?;
        let docs = self.document_count(session)?;

        let mut weighted = Vec::with_capacity(terms.len());
        for (term, uses) in terms {
            if let Some(info) = infos.get(&term) {
                let freq = info.doc_freq.value(session)?.max(0) as u64;
                weighted.push((idf2(docs, freq), uses));
            }
        }
        Ok(query_weight(weighted))
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
