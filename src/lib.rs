//! # veilsearch - Ranked full-text search over a lazily-paged object store
//!
//! veilsearch keeps its index in a remote, tree-structured object store in
//! which every node costs a network round trip on first touch. Searches
//! therefore read as few nodes as possible, and the nodes they do need are
//! fetched in batches, one tree level per round trip.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`store`] - Object store boundary, node codec and the per-session cache
//! - [`tree`] - B+trees, cursors and counters living in the store, plus the
//!   batched prefetch planner
//! - [`index`] - Lexicon, document word lists and the two index strategies
//! - [`query`] - Scoring, the incremental ranked merge and result cursors
//! - [`engine`] - The [`SearchEngine`] handle tying it all together
//! - [`output`] - Result formatting for the command line
//! - [`utils`] - Tokenizer, key encodings and app data directories
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use veilsearch::index::EngineConfig;
//! use veilsearch::store::{MemoryStore, Session};
//! use veilsearch::SearchEngine;
//!
//! let mut session = Session::new(Arc::new(MemoryStore::new()));
//! let engine = SearchEngine::create(&mut session, EngineConfig::default());
//! engine.index(&mut session, 1, "paging trees over the network").unwrap();
//! engine.index(&mut session, 2, "trees, trees and more trees").unwrap();
//! session.commit().unwrap();
//!
//! let mut hits = engine.search(&mut session, "trees").unwrap();
//! while let Some(hit) = hits.next_hit(&mut session).unwrap() {
//!     println!("{} {:.3}", hit.doc_id, hit.score);
//! }
//! ```
//!
//! ## Ranking
//!
//! Two strategies implement [`index::TextIndex`]:
//!
//! 1. **Ranked** - per-term posting trees ordered by precomputed weight,
//!    merged incrementally so only the heads of the lists are read
//! 2. **Okapi** - BM25 over raw term counts, ranked in memory after the
//!    matching buckets are prefetched whole

pub mod engine;
pub mod error;
pub mod index;
pub mod output;
pub mod query;
pub mod store;
pub mod tree;
pub mod utils;

pub use engine::SearchEngine;
pub use error::{Error, Result};
