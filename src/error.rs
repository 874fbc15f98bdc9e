use crate::store::NodeRef;
use thiserror::Error;

/// Errors raised by the search core and the object store boundary
#[derive(Error, Debug)]
pub enum Error {
    /// The operation exists in the interface but has no implementation
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// A round trip to the object store failed
    #[error("Store error: {0}")]
    Store(String),

    /// The store has no node under this reference
    #[error("Missing node: {0}")]
    MissingNode(NodeRef),

    /// A node payload could not be decoded
    #[error("Corrupt node {node}: {reason}")]
    Corrupt { node: NodeRef, reason: String },

    /// A node had a different shape than the caller expected
    #[error("Unexpected node kind at {node}: expected {expected}")]
    UnexpectedNode { node: NodeRef, expected: &'static str },

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for search core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Store-level failures come from the transport and may succeed on retry.
    /// The core itself never retries.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Io(_))
    }
}
