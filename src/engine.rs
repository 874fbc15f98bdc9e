//! Search engine handle.
//!
//! A [`SearchEngine`] ties a [`Lexicon`] to one [`TextIndex`] strategy and
//! persists the references to both in a single record node, so the whole
//! engine can be reopened from one [`NodeRef`].

use crate::error::{Error, Result};
use crate::index::types::{DocId, EngineConfig, ScoringKind, TermId};
use crate::index::{Lexicon, OkapiIndex, RankedIndex, TextIndex};
use crate::query::{Hits, Sliceable};
use crate::store::{NodeRef, NodeState, Session};
use crate::utils::{decode_varint_u64, encode_varint_u64};
use tracing::{debug, warn};

const RANKED_TAG: u8 = 1;
const OKAPI_TAG: u8 = 2;

#[derive(Debug)]
pub struct SearchEngine {
    root: NodeRef,
    config: EngineConfig,
    lexicon: Lexicon,
    index: Box<dyn TextIndex>,
}

impl SearchEngine {
    /// Allocate an empty engine; nothing reaches the store before `commit`
    pub fn create(session: &mut Session, config: EngineConfig) -> Self {
        let lexicon = Lexicon::create(session, config.tree);
        let index: Box<dyn TextIndex> = match config.scoring {
            ScoringKind::Ranked => Box::new(RankedIndex::create(session, lexicon, &config)),
            ScoringKind::Okapi => Box::new(OkapiIndex::create(session, lexicon, &config)),
        };
        let root = session.create(NodeState::Record(encode_roots(&lexicon, index.as_ref())));
        debug!(%root, kind = ?config.scoring, "created search engine");
        Self {
            root,
            config,
            lexicon,
            index,
        }
    }

    /// Reattach to an engine created earlier. The stored strategy wins over
    /// `config.scoring`.
    pub fn open(session: &mut Session, root: NodeRef, mut config: EngineConfig) -> Result<Self> {
        let payload = session.record(root)?.to_vec();
        let corrupt = |reason: &str| Error::Corrupt {
            node: root,
            reason: reason.into(),
        };

        let (&tag, mut rest) = payload.split_first().ok_or_else(|| corrupt("empty engine record"))?;
        let kind = match tag {
            RANKED_TAG => ScoringKind::Ranked,
            OKAPI_TAG => ScoringKind::Okapi,
            _ => return Err(corrupt("unknown scoring kind")),
        };
        if kind != config.scoring {
            warn!(stored = ?kind, requested = ?config.scoring, "engine opened with its stored scoring");
            config.scoring = kind;
        }

        let mut refs = Vec::new();
        while !rest.is_empty() {
            let (value, used) = decode_varint_u64(rest).ok_or_else(|| corrupt("bad root reference"))?;
            refs.push(NodeRef(value));
            rest = &rest[used..];
        }
        let [words, ids, last_id, roots @ ..] = refs.as_slice() else {
            return Err(corrupt("missing lexicon roots"));
        };

        let lexicon = Lexicon::open([*words, *ids, *last_id], config.tree);
        let index: Box<dyn TextIndex> = match kind {
            ScoringKind::Ranked => Box::new(
                RankedIndex::open(lexicon, roots, &config).ok_or_else(|| corrupt("bad ranked index roots"))?,
            ),
            ScoringKind::Okapi => Box::new(
                OkapiIndex::open(lexicon, roots, &config).ok_or_else(|| corrupt("bad okapi index roots"))?,
            ),
        };
        Ok(Self {
            root,
            config,
            lexicon,
            index,
        })
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn kind(&self) -> ScoringKind {
        self.index.kind()
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn index(&self, session: &mut Session, doc: DocId, text: &str) -> Result<usize> {
        self.index.index(session, doc, text)
    }

    pub fn reindex(&self, session: &mut Session, doc: DocId, text: &str) -> Result<usize> {
        self.index.reindex(session, doc, text)
    }

    pub fn unindex(&self, session: &mut Session, doc: DocId) -> Result<()> {
        self.index.unindex(session, doc)
    }

    pub fn index_many(&self, session: &mut Session, docs: &[(DocId, &str)]) -> Result<usize> {
        self.index.index_many(session, docs)
    }

    pub fn unindex_many(&self, session: &mut Session, docs: &[DocId]) -> Result<()> {
        self.index.unindex_many(session, docs)
    }

    pub fn search(&self, session: &mut Session, query: &str) -> Result<Hits> {
        self.index.search(session, query)
    }

    pub fn search_glob(&self, session: &mut Session, pattern: &str) -> Result<Hits> {
        self.index.search_glob(session, pattern)
    }

    pub fn search_phrase(&self, session: &mut Session, phrase: &str) -> Result<Hits> {
        self.index.search_phrase(session, phrase)
    }

    pub fn query_weight(&self, session: &mut Session, query: &str) -> Result<f64> {
        self.index.query_weight(session, query)
    }

    pub fn document_count(&self, session: &mut Session) -> Result<u64> {
        self.index.document_count(session)
    }

    pub fn word_count(&self, session: &mut Session) -> Result<u64> {
        self.index.word_count(session)
    }

    pub fn has_doc(&self, session: &mut Session, doc: DocId) -> Result<bool> {
        self.index.has_doc(session, doc)
    }

    pub fn doc_frequency(&self, session: &mut Session, term: TermId) -> Result<u64> {
        self.index.doc_frequency(session, term)
    }

    /// Random access window over `hits`, sized by `result_cache_size`
    pub fn sliceable(&self, hits: Hits) -> Sliceable {
        Sliceable::new(hits, self.config.result_cache_size)
    }
}

fn encode_roots(lexicon: &Lexicon, index: &dyn TextIndex) -> Vec<u8> {
    let mut payload = vec![match index.kind() {
        ScoringKind::Ranked => RANKED_TAG,
        ScoringKind::Okapi => OKAPI_TAG,
    }];
    for node in lexicon.roots().into_iter().chain(index.roots()) {
        encode_varint_u64(node.0, &mut payload);
    }
    payload
}
