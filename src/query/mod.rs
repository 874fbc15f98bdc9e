//! Query-time scoring and ranked result streams.
//!
//! - [`scorer`] - index-time document weights, idf² and BM25
//! - [`merge`] - certify-before-emit union of per-term posting lists
//! - [`results`] - pull cursors over hits and a sliceable window

pub mod merge;
pub mod results;
pub mod scorer;

pub use merge::{IncrementalMerge, MergeStats, PostingSource};
pub use results::{Hits, Sliceable};
