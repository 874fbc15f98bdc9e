//! Utility functions shared by the engine and the CLI.
//!
//! ## Modules
//!
//! - [`app_data`] - Application data directory and config file (XDG-compliant)
//! - [`encoding`] - Varints, order-preserving keys and posting keys
//! - [`tokenizer`] - Word and glob splitting with stop-word removal
//!
//! ## Key Functions
//!
//! ```no_run
//! use veilsearch::utils::{posting_key, split_words};
//!
//! // Normalized terms, in order
//! let words = split_words("The quick brown Fox");
//! // Returns: ["quick", "brown", "fox"]
//!
//! // Posting keys sort by descending score, then ascending document
//! assert!(posting_key(2.0, 9) < posting_key(1.0, 1));
//! ```

pub mod app_data;
pub mod encoding;
pub mod tokenizer;

pub use app_data::*;
pub use encoding::*;
pub use tokenizer::*;
