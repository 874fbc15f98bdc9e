//! Object store boundary.
//!
//! Everything the search core persists lives in a remote store as nodes
//! addressed by [`NodeRef`]. Payloads arrive here already decrypted and
//! decompressed; the transform layer sits below this trait.
//!
//! ## Cost model
//!
//! - [`ObjectStore::load_batch`] costs one round trip regardless of how many
//!   references it carries.
//! - [`ObjectStore::apply`] ships a whole commit in one round trip.
//! - [`ObjectStore::allocate`] hands out references locally.
//!
//! Callers reach the store through a [`session::Session`], which caches every
//! fetched node for the rest of the session.

pub mod codec;
pub mod memory;
pub mod session;

pub use memory::MemoryStore;
pub use session::Session;

use crate::error::Result;
use std::fmt;

/// Reference to a node in the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(pub u64);

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Interior B+tree node. `children.len() == keys.len() + 1`, and `keys[i]`
/// is the smallest key reachable through `children[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Branch {
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<NodeRef>,
}

impl Branch {
    /// Child slot a search for `key` descends into: left on `<`, right on
    /// `>`, and on an exact match into the following child.
    pub fn child_slot(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }
}

/// Leaf B+tree node holding sorted keys and their values
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bucket {
    pub keys: Vec<Vec<u8>>,
    pub values: Vec<Vec<u8>>,
}

impl Bucket {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index of `key` if present, otherwise where it would be inserted
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.keys.binary_search_by(|k| k.as_slice().cmp(key))
    }
}

/// Decoded state of one stored node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Branch(Branch),
    Bucket(Bucket),
    /// Opaque leaf-level payload (document word lists, tree handles)
    Record(Vec<u8>),
    /// Commutative counter; merged additively by the store
    Counter(i64),
}

impl NodeState {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeState::Branch(_) => "branch",
            NodeState::Bucket(_) => "bucket",
            NodeState::Record(_) => "record",
            NodeState::Counter(_) => "counter",
        }
    }

    /// Whether the node has children (used by breadth-first prefetching)
    pub fn is_branch(&self) -> bool {
        matches!(self, NodeState::Branch(_))
    }
}

/// One change shipped to the store on commit
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Put(NodeState),
    Delete,
    /// Add to a counter node, creating it at zero if absent
    Increment(i64),
}

/// Round-trip accounting exposed by a store
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub round_trips: u64,
    pub nodes_loaded: u64,
    pub bytes_loaded: u64,
    pub commits: u64,
    pub node_count: u64,
}

/// The remote object store as seen from the search core
pub trait ObjectStore: Send + Sync {
    /// Fetch many nodes in a single round trip, in request order
    fn load_batch(&self, refs: &[NodeRef]) -> Result<Vec<NodeState>>;

    /// Fetch one node (one round trip)
    fn load(&self, node: NodeRef) -> Result<NodeState> {
        let mut states = self.load_batch(&[node])?;
        states.pop().ok_or(crate::Error::MissingNode(node))
    }

    /// Apply a commit atomically in a single round trip
    fn apply(&self, mutations: Vec<(NodeRef, Mutation)>) -> Result<()>;

    /// Reserve `count` fresh references (no round trip)
    fn allocate(&self, count: usize) -> Vec<NodeRef>;

    fn stats(&self) -> StoreStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(keys: &[u8]) -> Branch {
        Branch {
            keys: keys.iter().map(|&k| vec![k]).collect(),
            children: (0..=keys.len() as u64).map(NodeRef).collect(),
        }
    }

    #[test]
    fn test_child_slot_tie_break() {
        let b = branch(&[10, 20, 30]);
        assert_eq!(b.child_slot(&[5]), 0);
        assert_eq!(b.child_slot(&[10]), 1); // exact match goes right
        assert_eq!(b.child_slot(&[15]), 1);
        assert_eq!(b.child_slot(&[20]), 2);
        assert_eq!(b.child_slot(&[99]), 3);
    }

    #[test]
    fn test_bucket_search() {
        let bucket = Bucket {
            keys: vec![vec![1], vec![3]],
            values: vec![vec![], vec![]],
        };
        assert_eq!(bucket.search(&[3]), Ok(1));
        assert_eq!(bucket.search(&[2]), Err(1));
        assert_eq!(bucket.len(), 2);
    }
}
