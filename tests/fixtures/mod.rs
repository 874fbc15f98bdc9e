//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use veilsearch::index::{DocId, EngineConfig, MergeConfig, ScoringKind};
use veilsearch::query::scorer::{idf2, term_weight};
use veilsearch::store::{MemoryStore, Mutation, NodeRef, NodeState, ObjectStore, Session, StoreStats};
use veilsearch::tree::TreeConfig;
use veilsearch::utils::split_words;
use veilsearch::SearchEngine;

/// Small nodes so a few hundred documents already build deep trees
pub fn small_config(scoring: ScoringKind) -> EngineConfig {
    EngineConfig {
        scoring,
        tree: TreeConfig::new(6, 6),
        merge: MergeConfig {
            initial_read: 4,
            growth_chunk: 4,
            ..MergeConfig::default()
        },
        ..EngineConfig::default()
    }
}

pub fn new_engine(scoring: ScoringKind) -> (Arc<MemoryStore>, Session, SearchEngine) {
    let store = Arc::new(MemoryStore::new());
    let mut session = Session::new(store.clone());
    let engine = SearchEngine::create(&mut session, small_config(scoring));
    (store, session, engine)
}

/// Store that fails one chosen bulk load, counting from when it was armed
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    loads: AtomicU64,
    fail_at: AtomicU64,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            loads: AtomicU64::new(0),
            fail_at: AtomicU64::new(0),
        }
    }

    /// Fail the `k`-th load from now on (1-based)
    pub fn arm(&self, k: u64) {
        self.loads.store(0, Ordering::SeqCst);
        self.fail_at.store(k, Ordering::SeqCst);
    }

    /// Whether the armed load was ever attempted
    pub fn tripped(&self) -> bool {
        let fail_at = self.fail_at.load(Ordering::SeqCst);
        fail_at > 0 && self.loads.load(Ordering::SeqCst) >= fail_at
    }
}

impl ObjectStore for FlakyStore {
    fn load_batch(&self, refs: &[NodeRef]) -> veilsearch::Result<Vec<NodeState>> {
        let load = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        if load == self.fail_at.load(Ordering::SeqCst) {
            return Err(veilsearch::Error::Store(format!("load {load} dropped")));
        }
        self.inner.load_batch(refs)
    }

    fn apply(&self, mutations: Vec<(NodeRef, Mutation)>) -> veilsearch::Result<()> {
        self.inner.apply(mutations)
    }

    fn allocate(&self, count: usize) -> Vec<NodeRef> {
        self.inner.allocate(count)
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}

/// Deterministic pseudo-random text over a small vocabulary
pub fn corpus(docs: u64, seed: u64) -> Vec<(DocId, String)> {
    const WORDS: &[&str] = &[
        "river", "stone", "cloud", "ember", "frost", "maple", "orbit", "pixel", "quartz", "sable",
        "tundra", "violet", "willow", "yarrow", "zephyr", "harbor",
    ];
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    (1..=docs)
        .map(|doc| {
            let len = 1 + (next() % 12) as usize;
            let text: Vec<&str> = (0..len)
                .map(|_| WORDS[(next() % WORDS.len() as u64) as usize])
                .collect();
            (doc, text.join(" "))
        })
        .collect()
}

/// Ranking computed the slow way: every document scored in memory
pub fn exhaustive_ranking(
    session: &mut Session,
    engine: &SearchEngine,
    docs: &[(DocId, String)],
    query: &str,
) -> Vec<(DocId, f64)> {
    let mut query_ids = engine.lexicon().term_to_ids(session, query).unwrap();
    query_ids.retain(|&id| id != 0);
    let mut uses: HashMap<u32, u32> = HashMap::new();
    for id in query_ids {
        *uses.entry(id).or_insert(0) += 1;
    }
    let mut terms: Vec<(u32, u32)> = uses.into_iter().collect();
    terms.sort_unstable();

    let words: Vec<(DocId, Vec<u32>)> = docs
        .iter()
        .map(|(doc, text)| {
            let ids = split_words(text)
                .iter()
                .map(|w| engine.lexicon().term_to_ids(session, w).unwrap()[0])
                .filter(|&id| id != 0)
                .collect();
            (*doc, ids)
        })
        .collect();
    let total = docs.len() as u64;

    let mut weights = Vec::new();
    for &(term, count) in &terms {
        let df = words.iter().filter(|(_, ids)| ids.contains(&term)).count() as u64;
        weights.push((term, idf2(total, df) * count as f64));
    }

    let mut ranking: Vec<(DocId, f64)> = words
        .iter()
        .filter_map(|(doc, ids)| {
            let mut unique = ids.clone();
            unique.sort_unstable();
            unique.dedup();
            let parts: Vec<f64> = weights
                .iter()
                .filter_map(|&(term, weight)| {
                    let tf = ids.iter().filter(|&&id| id == term).count() as u32;
                    (tf > 0).then(|| weight * term_weight(tf, unique.len()))
                })
                .collect();
            (!parts.is_empty()).then(|| (*doc, parts.iter().sum()))
        })
        .collect();
    ranking.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
    ranking
}
