use crate::store::NodeRef;
use crate::tree::TreeConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Caller-assigned document identifier
pub type DocId = u64;

/// Dense identifier of a normalized term
pub type TermId = u32;

/// Id returned for terms missing from the lexicon; never assigned
pub const UNKNOWN_TERM: TermId = 0;

/// Scoring strategy behind a [`crate::SearchEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringKind {
    /// Precomputed per-term weights merged incrementally
    #[default]
    Ranked,
    /// Okapi BM25 ranked exhaustively in memory
    Okapi,
}

/// Knobs of the incremental merge. None of them changes which documents are
/// returned or in what order, only how many nodes are read to get there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Entries read from every source before the first certification
    pub initial_read: usize,
    /// Entries read when a source is grown
    pub growth_chunk: usize,
    /// Candidates considered per certification pass
    pub window: usize,
    /// Unresolved candidates tolerated in the window before their
    /// membership is looked up instead of growing a source
    pub slack: usize,
    /// Following leaves fetched together when a source crosses into a new leaf
    pub lookahead_leaves: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            initial_read: 40,
            growth_chunk: 40,
            window: 15,
            slack: 3,
            lookahead_leaves: 2,
        }
    }
}

/// BM25 parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OkapiParams {
    pub k1: f64,
    pub b: f64,
}

impl Default for OkapiParams {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Everything needed to build or reopen a search engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringKind,
    pub tree: TreeConfig,
    pub merge: MergeConfig,
    pub okapi: OkapiParams,
    /// Hits kept by a [`crate::query::Sliceable`] window
    pub result_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringKind::default(),
            tree: TreeConfig::default(),
            merge: MergeConfig::default(),
            okapi: OkapiParams::default(),
            result_cache_size: 1000,
        }
    }
}

/// One search result
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Hit {
    pub doc_id: DocId,
    pub score: f64,
}

/// Index metadata stored in meta.json next to the store snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: u32,
    pub root_path: PathBuf,
    /// Root node of the engine inside the snapshot
    pub engine_root: u64,
    /// Root node of the DocId -> path tree
    pub documents_root: u64,
    pub scoring: ScoringKind,
    pub doc_count: u64,
    pub word_count: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Default for IndexMeta {
    fn default() -> Self {
        Self {
            version: 1,
            root_path: PathBuf::new(),
            engine_root: 0,
            documents_root: 0,
            scoring: ScoringKind::default(),
            doc_count: 0,
            word_count: 0,
            created_at: 0,
            updated_at: 0,
        }
    }
}

impl IndexMeta {
    pub fn engine_root(&self) -> NodeRef {
        NodeRef(self.engine_root)
    }

    pub fn documents_root(&self) -> NodeRef {
        NodeRef(self.documents_root)
    }
}

/// Configuration for indexing a directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub max_file_size: u64,
    pub ignored_paths: Vec<String>,
    /// Files read per batch before they are indexed and committed
    pub chunk_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            ignored_paths: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
            ],
            chunk_size: 2000,
        }
    }
}
