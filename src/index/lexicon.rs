//! Term dictionary.
//!
//! Two trees keep the term <-> id mapping a bijection: `words` maps the
//! normalized term to its id and `ids` maps the id back. A counter holds the
//! last id handed out, so ids are dense and start at 1. Words longer than
//! the token limit never get an id and always map to the unknown term.

use crate::error::{Error, Result};
use crate::index::types::{TermId, UNKNOWN_TERM};
use crate::store::{NodeRef, Session};
use crate::tree::prefetch::{batch_lookup, prefetch_siblings};
use crate::tree::{BTree, Counter, TreeConfig};
use crate::utils::{glob_prefix, has_wildcard, is_indexable, split_globs, split_words, u64_key};
use globset::Glob;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lexicon {
    words: BTree,
    ids: BTree,
    last_id: Counter,
}

impl Lexicon {
    pub fn create(session: &mut Session, config: TreeConfig) -> Self {
        Self {
            words: BTree::create(session, config),
            ids: BTree::create(session, config),
            last_id: Counter::create(session, 0),
        }
    }

    /// Reattach from the references returned by [`Lexicon::roots`]
    pub fn open(roots: [NodeRef; 3], config: TreeConfig) -> Self {
        Self {
            words: BTree::open(roots[0], config),
            ids: BTree::open(roots[1], config),
            last_id: Counter::open(roots[2]),
        }
    }

    pub fn roots(&self) -> [NodeRef; 3] {
        [self.words.root(), self.ids.root(), self.last_id.node()]
    }

    /// Number of distinct terms ever assigned an id
    pub fn word_count(&self, session: &mut Session) -> Result<u64> {
        Ok(self.last_id.value(session)?.max(0) as u64)
    }

    pub fn get_word(&self, session: &mut Session, id: TermId) -> Result<Option<String>> {
        if id == UNKNOWN_TERM {
            return Ok(None);
        }
        Ok(self
            .ids
            .get(session, &u64_key(id as u64))?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Ids of the terms in `text`, in order; unknown terms map to 0.
    /// Never creates ids.
    pub fn term_to_ids(&self, session: &mut Session, text: &str) -> Result<Vec<TermId>> {
        let words = split_words(text);
        self.lookup_words(session, &words)
    }

    /// Ids of the terms in `text`, assigning fresh ids to unseen terms.
    /// Either every unseen term gets its id or the session is left as it was.
    pub fn source_to_ids(&self, session: &mut Session, text: &str) -> Result<Vec<TermId>> {
        let words = split_words(text);
        session.atomically(|session| {
            let known = self.lookup_words(session, &words)?;

            let mut seen: FxHashSet<&str> = FxHashSet::default();
            let mut fresh: Vec<&str> = Vec::new();
            for (word, &id) in words.iter().zip(&known) {
                if id == UNKNOWN_TERM && is_indexable(word) && seen.insert(word.as_str()) {
                    fresh.push(word);
                }
            }
            if fresh.is_empty() {
                return Ok(known);
            }

            let assigned = self.assign(session, &fresh)?;
            Ok(words
                .iter()
                .zip(known)
                .map(|(word, id)| match id {
                    UNKNOWN_TERM => assigned.get(word.as_str()).copied().unwrap_or(UNKNOWN_TERM),
                    id => id,
                })
                .collect())
        })
    }

    /// Ids of every known term matching any of the globs in `pattern`,
    /// ascending and without duplicates
    pub fn glob_to_ids(&self, session: &mut Session, pattern: &str) -> Result<Vec<TermId>> {
        let globs = split_globs(pattern);
        let (wild, exact): (Vec<String>, Vec<String>) =
            globs.into_iter().partition(|g| has_wildcard(g));

        let mut ids: Vec<TermId> = self
            .lookup_words(session, &exact)?
            .into_iter()
            .filter(|&id| id != UNKNOWN_TERM)
            .collect();

        for glob in &wild {
            let matcher = Glob::new(glob)?.compile_matcher();
            let prefix = glob_prefix(glob).as_bytes();
            let mut cursor = self.words.cursor(session, Some(prefix))?;
            loop {
                if cursor.buffered(session) == 0 {
                    prefetch_siblings(session, &cursor, 2)?;
                }
                let Some((term, value)) = cursor.next(session)? else {
                    break;
                };
                if !term.starts_with(prefix) {
                    break;
                }
                if let Ok(term) = std::str::from_utf8(&term)
                    && matcher.is_match(term)
                {
                    ids.push(self.decode_id(&value)?);
                }
            }
        }

        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    fn lookup_words(&self, session: &mut Session, words: &[String]) -> Result<Vec<TermId>> {
        if words.is_empty() {
            return Ok(Vec::new());
        }
        let lookups: Vec<(NodeRef, &[u8])> = words
            .iter()
            .filter(|w| is_indexable(w))
            .map(|w| (self.words.root(), w.as_bytes()))
            .collect();
        batch_lookup(session, &lookups)?;

        words
            .iter()
            .map(|word| {
                if !is_indexable(word) {
                    return Ok(UNKNOWN_TERM);
                }
                match self.words.get(session, word.as_bytes())? {
                    Some(value) => self.decode_id(&value),
                    None => Ok(UNKNOWN_TERM),
                }
            })
            .collect()
    }

    /// Give consecutive ids to `words`, none of which is known yet. The
    /// counter and both insert paths are loaded before any id is taken;
    /// the `words` paths come from the preceding lookup.
    fn assign<'w>(
        &self,
        session: &mut Session,
        words: &[&'w str],
    ) -> Result<FxHashMap<&'w str, TermId>> {
        let last = self.last_id.value(session)?;
        let ids = (1..=words.len() as i64)
            .map(|offset| {
                let id = last + offset;
                TermId::try_from(id).map_err(|_| Error::Corrupt {
                    node: self.last_id.node(),
                    reason: format!("term id {} out of range", id),
                })
            })
            .collect::<Result<Vec<TermId>>>()?;

        let keys: Vec<[u8; 8]> = ids.iter().map(|&id| u64_key(id as u64)).collect();
        let lookups: Vec<(NodeRef, &[u8])> = keys
            .iter()
            .map(|key| (self.ids.root(), key.as_slice()))
            .collect();
        batch_lookup(session, &lookups)?;

        self.last_id.change(session, words.len() as i64)?;
        for (&word, (&id, key)) in words.iter().zip(ids.iter().zip(&keys)) {
            self.words.insert(session, word.as_bytes(), &id.to_be_bytes())?;
            self.ids.insert(session, key, word.as_bytes())?;
        }
        Ok(words.iter().copied().zip(ids).collect())
    }

    fn decode_id(&self, value: &[u8]) -> Result<TermId> {
        let bytes: [u8; 4] = value.try_into().map_err(|_| Error::Corrupt {
            node: self.words.root(),
            reason: "term id must be 4 bytes".into(),
        })?;
        Ok(TermId::from_be_bytes(bytes))
    }
}
