//! Incremental weighted union of ranked posting lists.
//!
//! Every source is one term's posting tree, read in ascending key order,
//! which is descending stored score. A document's aggregate score is the
//! sum over sources of `weight * stored score`. The merge never reads a
//! whole posting list; it reads the heads of the sources and emits a
//! document only once its rank and its exact aggregate are certain:
//!
//! - `known` is the sum of the contributions read so far.
//! - A source that has not yielded a document can still add at most its
//!   unread bound, `weight * last score read`, unless the source is
//!   exhausted or the document is known not to contain the term.
//! - A document never seen at all can score at most the sum of all
//!   unread bounds.
//!
//! A candidate is emitted when every source is settled for it and its
//! `known` beats both bounds. Otherwise the merge either grows a source or
//! looks up, in one batch through the document word lists, which terms the
//! leading candidates contain.
//!
//! Candidates stay ordered by `known` between passes; a pass only looks at
//! the leading window and at rivals whose `known` is within the unseen
//! bound of the candidate being certified.

use crate::error::{Error, Result};
use crate::index::docwords::DocWords;
use crate::index::types::{DocId, Hit, MergeConfig, TermId};
use crate::store::{NodeRef, Session};
use crate::tree::prefetch::{batch_lookup, prefetch_siblings};
use crate::tree::{BTree, TreeCursor};
use crate::utils::decode_posting_key;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};
use std::ops::Bound;
use tracing::trace;

/// One term's ranked posting list, read lazily
#[derive(Debug, Clone)]
pub struct PostingSource {
    term: TermId,
    bucket: BTree,
    weight: f64,
    doc_freq: u64,
    cursor: Option<TreeCursor>,
    last_score: Option<f64>,
    read: u64,
    exhausted: bool,
}

impl PostingSource {
    pub fn new(term: TermId, bucket: BTree, weight: f64, doc_freq: u64) -> Self {
        Self {
            term,
            bucket,
            weight,
            doc_freq,
            cursor: None,
            last_score: None,
            read: 0,
            exhausted: false,
        }
    }

    pub fn term(&self) -> TermId {
        self.term
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Highest weighted score any unread entry can carry
    pub fn unread_bound(&self) -> f64 {
        if self.exhausted {
            return 0.0;
        }
        self.last_score
            .map_or(f64::INFINITY, |score| score * self.weight)
    }

    /// Entries not read yet according to the document frequency
    pub fn remaining(&self) -> u64 {
        self.doc_freq.saturating_sub(self.read)
    }

    /// Read up to `count` entries as (document, stored score)
    pub fn read(
        &mut self,
        session: &mut Session,
        count: usize,
        lookahead: usize,
    ) -> Result<Vec<(DocId, f64)>> {
        let mut entries = Vec::with_capacity(count);
        if self.exhausted || count == 0 {
            return Ok(entries);
        }
        if self.cursor.is_none() {
            self.cursor = Some(self.bucket.cursor(session, None)?);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(entries);
        };

        for _ in 0..count {
            if lookahead > 0 && cursor.buffered(session) == 0 {
                prefetch_siblings(session, cursor, lookahead)?;
            }
            match cursor.next(session)? {
                Some((key, _)) => {
                    let (score, doc) = decode_posting_key(&key).ok_or(Error::Corrupt {
                        node: self.bucket.root(),
                        reason: "bad posting key".into(),
                    })?;
                    self.last_score = Some(score);
                    self.read += 1;
                    entries.push((doc, score));
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Next entry with its weighted score
    pub fn next_weighted(&mut self, session: &mut Session, lookahead: usize) -> Result<Option<Hit>> {
        Ok(self
            .read(session, 1, lookahead)?
            .pop()
            .map(|(doc_id, score)| Hit {
                doc_id,
                score: self.weight * score,
            }))
    }
}

/// Warm the leftmost leaf of every source in one round trip per level
pub fn open_sources(session: &mut Session, sources: &[PostingSource]) -> Result<usize> {
    let lookups: Vec<(NodeRef, &[u8])> = sources
        .iter()
        .map(|source| (source.bucket.root(), &[][..]))
        .collect();
    batch_lookup(session, &lookups)
}

/// What the merge knows about one document
#[derive(Debug, Clone)]
struct Candidate {
    /// Sum of contributions read so far, in source order
    known: f64,
    /// Weighted contribution per source, once read
    scores: Vec<Option<f64>>,
    /// Sources known not to hold the document
    absent: Vec<bool>,
    /// Membership was looked up through the document's word list
    resolved: bool,
}

impl Candidate {
    fn new(sources: usize) -> Self {
        Self {
            known: 0.0,
            scores: vec![None; sources],
            absent: vec![false; sources],
            resolved: false,
        }
    }

    fn record(&mut self, source: usize, score: f64) {
        self.scores[source] = Some(score);
        self.absent[source] = false;
        self.known = self.scores.iter().flatten().sum();
    }

    fn rank(&self, doc: DocId) -> Rank {
        Rank {
            known: self.known,
            doc,
        }
    }

    fn is_pending(&self, source: usize, bounds: &[f64]) -> bool {
        self.scores[source].is_none() && !self.absent[source] && bounds[source] > 0.0
    }

    fn possible(&self, bounds: &[f64]) -> f64 {
        let pending: f64 = (0..bounds.len())
            .filter(|&i| self.is_pending(i, bounds))
            .map(|i| bounds[i])
            .sum();
        self.known + pending
    }

    fn is_complete(&self, bounds: &[f64]) -> bool {
        (0..bounds.len()).all(|i| !self.is_pending(i, bounds))
    }
}

/// Work counters of one merge
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub entries_read: u64,
    pub growths: u64,
    pub resolutions: u64,
    pub emitted: u64,
}

/// Position of a candidate: descending `known`, ties by ascending id
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rank {
    known: f64,
    doc: DocId,
}

impl Eq for Rank {}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .known
            .total_cmp(&self.known)
            .then(self.doc.cmp(&other.doc))
    }
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Certify-before-emit union of many posting sources
#[derive(Debug, Clone)]
pub struct IncrementalMerge {
    sources: Vec<PostingSource>,
    docwords: DocWords,
    config: MergeConfig,
    candidates: FxHashMap<DocId, Candidate>,
    /// Every candidate, in emission order of their current `known`
    ranking: BTreeSet<Rank>,
    emitted: FxHashSet<DocId>,
    ready: VecDeque<Hit>,
    started: bool,
    stats: MergeStats,
}

impl IncrementalMerge {
    pub fn new(sources: Vec<PostingSource>, docwords: DocWords, config: MergeConfig) -> Self {
        Self {
            sources,
            docwords,
            config,
            candidates: FxHashMap::default(),
            ranking: BTreeSet::new(),
            emitted: FxHashSet::default(),
            ready: VecDeque::new(),
            started: false,
            stats: MergeStats::default(),
        }
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    pub fn is_exhausted(&self) -> bool {
        self.started
            && self.ready.is_empty()
            && self.candidates.is_empty()
            && self.sources.iter().all(PostingSource::is_exhausted)
    }

    /// Next document in descending aggregate score, ties by ascending id
    pub fn next(&mut self, session: &mut Session) -> Result<Option<Hit>> {
        loop {
            if let Some(hit) = self.ready.pop_front() {
                self.stats.emitted += 1;
                return Ok(Some(hit));
            }
            if !self.started {
                self.start(session)?;
                continue;
            }
            if self.candidates.is_empty() && self.sources.iter().all(PostingSource::is_exhausted) {
                return Ok(None);
            }
            self.step(session)?;
        }
    }

    fn start(&mut self, session: &mut Session) -> Result<()> {
        open_sources(session, &self.sources)?;
        for source in 0..self.sources.len() {
            self.grow(session, source, self.config.initial_read.max(1))?;
        }
        self.started = true;
        Ok(())
    }

    fn bounds(&self) -> Vec<f64> {
        self.sources.iter().map(PostingSource::unread_bound).collect()
    }

    fn candidate(&self, doc: DocId) -> Result<&Candidate> {
        self.candidates
            .get(&doc)
            .ok_or(Error::Store("merge lost track of a candidate".into()))
    }

    /// Whether `top` is certainly ranked ahead of every document after it,
    /// seen or not
    fn outranks_rest(
        &self,
        top: Rank,
        bounds: &[f64],
        unseen_bound: f64,
        all_exhausted: bool,
    ) -> bool {
        if !all_exhausted && top.known <= unseen_bound {
            return false;
        }
        let rivals = self.ranking.range((Bound::Excluded(top), Bound::Unbounded));
        for rival in rivals {
            // possible <= known + unseen_bound, and `known` only falls from here
            if rival.known + unseen_bound < top.known {
                break;
            }
            let Some(candidate) = self.candidates.get(&rival.doc) else {
                continue;
            };
            let possible = candidate.possible(bounds);
            if possible > top.known || (possible == top.known && rival.doc < top.doc) {
                return false;
            }
        }
        true
    }

    /// One certification pass; emits, resolves or grows
    fn step(&mut self, session: &mut Session) -> Result<()> {
        let bounds = self.bounds();
        let unseen_bound: f64 = bounds.iter().sum();
        let all_exhausted = self.sources.iter().all(PostingSource::is_exhausted);

        if self.ranking.is_empty() {
            let source = self.most_promising(&bounds).ok_or(Error::Store(
                "merge stalled with unread sources".into(),
            ))?;
            return self.grow(session, source, self.config.growth_chunk.max(1));
        }

        let window = self.config.window.max(1);
        let head: Vec<Rank> = self.ranking.iter().take(window).copied().collect();

        let mut certified = 0;
        for &rank in &head {
            if !self.candidate(rank.doc)?.is_complete(&bounds)
                || !self.outranks_rest(rank, &bounds, unseen_bound, all_exhausted)
            {
                break;
            }
            certified += 1;
        }

        if certified > 0 {
            for rank in &head[..certified] {
                self.ranking.remove(rank);
                self.candidates.remove(&rank.doc);
                self.emitted.insert(rank.doc);
                self.ready.push_back(Hit {
                    doc_id: rank.doc,
                    score: rank.known,
                });
            }
            trace!(certified, candidates = self.candidates.len(), "merge emitted");
            return Ok(());
        }

        let top = head[0];
        if self.outranks_rest(top, &bounds, unseen_bound, all_exhausted) {
            // Rank is settled; only the exact score is missing
            let candidate = self.candidate(top.doc)?;
            if !candidate.resolved {
                let unresolved = self.unresolved(&head, &bounds);
                return self.resolve(session, &unresolved);
            }
            let source = (0..self.sources.len())
                .filter(|&i| candidate.is_pending(i, &bounds))
                .max_by(|&a, &b| bounds[a].partial_cmp(&bounds[b]).unwrap_or(Ordering::Equal))
                .ok_or(Error::Store("merge stalled on a settled candidate".into()))?;
            return self.grow(session, source, self.config.growth_chunk.max(1));
        }

        let unresolved = self.unresolved(&head, &bounds);
        if unresolved.len() > self.config.slack {
            return self.resolve(session, &unresolved);
        }
        let source = self
            .most_promising(&bounds)
            .ok_or(Error::Store("merge stalled with unread sources".into()))?;
        self.grow(session, source, self.config.growth_chunk.max(1))
    }

    /// Candidates of `head` still waiting on a source and never resolved
    fn unresolved(&self, head: &[Rank], bounds: &[f64]) -> Vec<DocId> {
        head.iter()
            .filter(|rank| {
                self.candidates
                    .get(&rank.doc)
                    .is_some_and(|c| !c.is_complete(bounds) && !c.resolved)
            })
            .map(|rank| rank.doc)
            .collect()
    }

    /// Unexhausted source with the most score left per unread entry
    fn most_promising(&self, bounds: &[f64]) -> Option<usize> {
        let density = |i: usize| bounds[i] / self.sources[i].remaining().max(1) as f64;
        (0..self.sources.len())
            .filter(|&i| !self.sources[i].is_exhausted())
            .max_by(|&a, &b| density(a).partial_cmp(&density(b)).unwrap_or(Ordering::Equal))
    }

    fn grow(&mut self, session: &mut Session, source: usize, count: usize) -> Result<()> {
        let lookahead = self.config.lookahead_leaves;
        let entries = self.sources[source].read(session, count, lookahead)?;
        let weight = self.sources[source].weight();
        let width = self.sources.len();

        self.stats.growths += 1;
        self.stats.entries_read += entries.len() as u64;
        for (doc, score) in entries {
            if self.emitted.contains(&doc) {
                continue;
            }
            let candidate = self
                .candidates
                .entry(doc)
                .or_insert_with(|| Candidate::new(width));
            self.ranking.remove(&candidate.rank(doc));
            candidate.record(source, weight * score);
            self.ranking.insert(candidate.rank(doc));
        }
        trace!(
            source,
            read = self.sources[source].read,
            exhausted = self.sources[source].is_exhausted(),
            "merge grew source"
        );
        Ok(())
    }

    /// Look up which sources each document belongs to
    fn resolve(&mut self, session: &mut Session, docs: &[DocId]) -> Result<()> {
        let lists = self.docwords.get_many(session, docs)?;
        self.stats.resolutions += 1;

        for doc in docs {
            let Some(candidate) = self.candidates.get_mut(doc) else {
                continue;
            };
            let terms: FxHashSet<TermId> = lists
                .get(doc)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            for (i, source) in self.sources.iter().enumerate() {
                if candidate.scores[i].is_none() {
                    candidate.absent[i] = !terms.contains(&source.term());
                }
            }
            candidate.resolved = true;
        }
        trace!(documents = docs.len(), "merge resolved membership");
        Ok(())
    }
}
