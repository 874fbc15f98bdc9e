//! Ordered B+tree whose nodes live in the object store.
//!
//! Keys and values are byte strings compared lexicographically; callers use
//! the order-preserving encoders in [`crate::utils::encoding`]. The root
//! reference of a tree never changes: when the root splits or collapses its
//! contents move, not its reference, so other structures can point at it.
//!
//! All leaves sit at the same depth. Empty non-root leaves are unlinked from
//! their parent immediately, and a root branch left with a single child
//! absorbs it.

pub mod counter;
pub mod cursor;
pub mod prefetch;

pub use counter::Counter;
pub use cursor::TreeCursor;

use crate::error::{Error, Result};
use crate::store::{Branch, Bucket, NodeRef, NodeState, Session};
use serde::{Deserialize, Serialize};

/// Node fan-out limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Entries per bucket before it splits
    pub max_leaf_size: usize,
    /// Children per branch before it splits
    pub max_branch_size: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        // Large buckets mean fewer round trips per scanned entry
        Self {
            max_leaf_size: 870,
            max_branch_size: 1740,
        }
    }
}

impl TreeConfig {
    pub fn new(max_leaf_size: usize, max_branch_size: usize) -> Self {
        Self {
            max_leaf_size: max_leaf_size.max(2),
            max_branch_size: max_branch_size.max(3),
        }
    }

    fn leaf_limit(&self) -> usize {
        self.max_leaf_size.max(2)
    }

    fn branch_limit(&self) -> usize {
        self.max_branch_size.max(3)
    }
}

/// Path from the root to a leaf: each branch with the child slot taken
type Path = Vec<(NodeRef, usize)>;

/// Handle to a tree stored in a session's object store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTree {
    root: NodeRef,
    config: TreeConfig,
}

impl BTree {
    /// Create an empty tree
    pub fn create(session: &mut Session, config: TreeConfig) -> Self {
        let root = session.create(NodeState::Bucket(Bucket::default()));
        Self { root, config }
    }

    /// Attach to an existing tree
    pub fn open(root: NodeRef, config: TreeConfig) -> Self {
        Self { root, config }
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    pub fn get(&self, session: &mut Session, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (_, leaf) = self.descend(session, key)?;
        let bucket = session.bucket(leaf)?;
        Ok(bucket.search(key).ok().map(|i| bucket.values[i].clone()))
    }

    pub fn contains(&self, session: &mut Session, key: &[u8]) -> Result<bool> {
        let (_, leaf) = self.descend(session, key)?;
        Ok(session.bucket(leaf)?.search(key).is_ok())
    }

    /// Insert or replace; returns the previous value. Writing an identical
    /// value leaves the tree untouched.
    pub fn insert(
        &self,
        session: &mut Session,
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let (path, leaf) = self.descend(session, key)?;

        let position = {
            let bucket = session.bucket(leaf)?;
            match bucket.search(key) {
                Ok(i) if bucket.values[i] == value => return Ok(Some(value.to_vec())),
                other => other,
            }
        };

        let bucket = bucket_mut(session, leaf)?;
        let previous = match position {
            Ok(i) => Some(std::mem::replace(&mut bucket.values[i], value.to_vec())),
            Err(i) => {
                bucket.keys.insert(i, key.to_vec());
                bucket.values.insert(i, value.to_vec());
                None
            }
        };

        if bucket.len() > self.config.leaf_limit() {
            self.split_leaf(session, path, leaf)?;
        }
        Ok(previous)
    }

    /// Remove a key; returns its value if it was present
    pub fn remove(&self, session: &mut Session, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (path, leaf) = self.descend(session, key)?;
        let Ok(i) = session.bucket(leaf)?.search(key) else {
            return Ok(None);
        };

        let bucket = bucket_mut(session, leaf)?;
        bucket.keys.remove(i);
        let value = bucket.values.remove(i);

        if bucket.is_empty() && !path.is_empty() {
            self.unlink_child(session, path, leaf)?;
        }
        Ok(Some(value))
    }

    pub fn is_empty(&self, session: &mut Session) -> Result<bool> {
        match session.node(self.root)? {
            NodeState::Bucket(bucket) => Ok(bucket.is_empty()),
            // Branches only survive while they hold a non-empty leaf
            NodeState::Branch(_) => Ok(false),
            _ => Err(Error::UnexpectedNode {
                node: self.root,
                expected: "tree node",
            }),
        }
    }

    /// Number of levels from root to leaves (a lone bucket has depth 1)
    pub fn depth(&self, session: &mut Session) -> Result<usize> {
        let mut depth = 1;
        let mut current = self.root;
        while let NodeState::Branch(branch) = session.node(current)? {
            current = branch.children[0];
            depth += 1;
        }
        Ok(depth)
    }

    /// Cursor positioned at the first key `>= lower` (or the first key)
    pub fn cursor(&self, session: &mut Session, lower: Option<&[u8]>) -> Result<TreeCursor> {
        TreeCursor::seek(session, self.root, lower)
    }

    /// Every entry in key order. Walks leaf by leaf; warm the tree with
    /// [`prefetch::prefetch_subtree`] first to keep round trips bounded.
    pub fn items(&self, session: &mut Session) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut cursor = self.cursor(session, None)?;
        let mut items = Vec::new();
        while let Some(item) = cursor.next(session)? {
            items.push(item);
        }
        Ok(items)
    }

    /// Delete every node of the tree, root included
    pub fn destroy(&self, session: &mut Session) -> Result<()> {
        prefetch::prefetch_subtree(session, &[self.root], None, true)?;
        let mut pending = vec![self.root];
        while let Some(node) = pending.pop() {
            if let NodeState::Branch(branch) = session.node(node)? {
                pending.extend(branch.children.iter().copied());
            }
            session.delete(node);
        }
        Ok(())
    }

    fn descend(&self, session: &mut Session, key: &[u8]) -> Result<(Path, NodeRef)> {
        let mut path = Vec::new();
        let mut current = self.root;
        loop {
            match session.node(current)? {
                NodeState::Branch(branch) => {
                    let slot = branch.child_slot(key);
                    let child = branch.children[slot];
                    path.push((current, slot));
                    current = child;
                }
                NodeState::Bucket(_) => return Ok((path, current)),
                _ => {
                    return Err(Error::UnexpectedNode {
                        node: current,
                        expected: "tree node",
                    });
                }
            }
        }
    }

    fn split_leaf(&self, session: &mut Session, path: Path, leaf: NodeRef) -> Result<()> {
        let bucket = bucket_mut(session, leaf)?;
        let mid = bucket.len() / 2;
        let right = Bucket {
            keys: bucket.keys.split_off(mid),
            values: bucket.values.split_off(mid),
        };
        let separator = right.keys[0].clone();

        if path.is_empty() {
            let left = std::mem::take(bucket);
            self.grow_root(session, NodeState::Bucket(left), NodeState::Bucket(right), separator);
            return Ok(());
        }

        let right = session.create(NodeState::Bucket(right));
        self.insert_into_parent(session, path, separator, right)
    }

    fn insert_into_parent(
        &self,
        session: &mut Session,
        mut path: Path,
        separator: Vec<u8>,
        child: NodeRef,
    ) -> Result<()> {
        let Some((parent, slot)) = path.pop() else {
            return Ok(());
        };
        let branch = branch_mut(session, parent)?;
        branch.keys.insert(slot, separator);
        branch.children.insert(slot + 1, child);

        if branch.children.len() > self.config.branch_limit() {
            let mid = branch.keys.len() / 2;
            let right_keys = branch.keys.split_off(mid + 1);
            let separator = branch.keys.pop().ok_or(Error::UnexpectedNode {
                node: parent,
                expected: "non-empty branch",
            })?;
            let right = Branch {
                keys: right_keys,
                children: branch.children.split_off(mid + 1),
            };

            if path.is_empty() {
                let left = std::mem::take(branch);
                self.grow_root(session, NodeState::Branch(left), NodeState::Branch(right), separator);
                return Ok(());
            }
            let right = session.create(NodeState::Branch(right));
            return self.insert_into_parent(session, path, separator, right);
        }
        Ok(())
    }

    /// Move the root's split halves into two new children
    fn grow_root(
        &self,
        session: &mut Session,
        left: NodeState,
        right: NodeState,
        separator: Vec<u8>,
    ) {
        let left = session.create(left);
        let right = session.create(right);
        session.put(
            self.root,
            NodeState::Branch(Branch {
                keys: vec![separator],
                children: vec![left, right],
            }),
        );
    }

    fn unlink_child(&self, session: &mut Session, mut path: Path, child: NodeRef) -> Result<()> {
        session.delete(child);
        let Some((parent, slot)) = path.pop() else {
            return Ok(());
        };

        let branch = branch_mut(session, parent)?;
        branch.children.remove(slot);
        if !branch.keys.is_empty() {
            branch.keys.remove(slot.saturating_sub(1));
        }
        let remaining = branch.children.len();

        if !path.is_empty() {
            if remaining == 0 {
                return self.unlink_child(session, path, parent);
            }
            return Ok(());
        }

        // parent is the root
        match remaining {
            0 => session.put(self.root, NodeState::Bucket(Bucket::default())),
            1 => {
                let only = branch.children[0];
                let state = session.node(only)?.clone();
                session.put(self.root, state);
                session.delete(only);
            }
            _ => {}
        }
        Ok(())
    }
}

fn bucket_mut(session: &mut Session, node: NodeRef) -> Result<&mut Bucket> {
    match session.node_mut(node)? {
        NodeState::Bucket(bucket) => Ok(bucket),
        _ => Err(Error::UnexpectedNode {
            node,
            expected: "bucket",
        }),
    }
}

fn branch_mut(session: &mut Session, node: NodeRef) -> Result<&mut Branch> {
    match session.node_mut(node)? {
        NodeState::Branch(branch) => Ok(branch),
        _ => Err(Error::UnexpectedNode {
            node,
            expected: "branch",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ObjectStore};
    use crate::utils::u64_key;
    use std::sync::Arc;

    fn session() -> (Arc<MemoryStore>, Session) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Session::new(store))
    }

    fn small() -> TreeConfig {
        TreeConfig::new(4, 4)
    }

    #[test]
    fn test_insert_get_many() {
        let (_store, mut s) = session();
        let tree = BTree::create(&mut s, small());
        for i in (0..200u64).rev() {
            assert!(tree.insert(&mut s, &u64_key(i), &i.to_le_bytes()).unwrap().is_none());
        }
        for i in 0..200u64 {
            assert_eq!(tree.get(&mut s, &u64_key(i)).unwrap(), Some(i.to_le_bytes().to_vec()));
        }
        assert!(tree.get(&mut s, &u64_key(500)).unwrap().is_none());
        assert!(tree.depth(&mut s).unwrap() >= 3);

        let keys: Vec<_> = tree.items(&mut s).unwrap().into_iter().map(|(k, _)| k).collect();
        let expected: Vec<_> = (0..200u64).map(|i| u64_key(i).to_vec()).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_replace_returns_previous() {
        let (_store, mut s) = session();
        let tree = BTree::create(&mut s, small());
        tree.insert(&mut s, b"k", b"1").unwrap();
        assert_eq!(tree.insert(&mut s, b"k", b"2").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.get(&mut s, b"k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_identical_insert_does_not_dirty() {
        let (_store, mut s) = session();
        let tree = BTree::create(&mut s, small());
        tree.insert(&mut s, b"k", b"v").unwrap();
        s.commit().unwrap();
        tree.insert(&mut s, b"k", b"v").unwrap();
        assert!(!s.has_pending_changes());
    }

    #[test]
    fn test_remove_collapses_tree() {
        let (_store, mut s) = session();
        let tree = BTree::create(&mut s, small());
        for i in 0..100u64 {
            tree.insert(&mut s, &u64_key(i), b"").unwrap();
        }
        for i in (0..100u64).step_by(2) {
            assert!(tree.remove(&mut s, &u64_key(i)).unwrap().is_some());
        }
        assert!(tree.remove(&mut s, &u64_key(0)).unwrap().is_none());

        let keys: Vec<_> = tree.items(&mut s).unwrap().into_iter().map(|(k, _)| k).collect();
        let expected: Vec<_> = (1..100u64).step_by(2).map(|i| u64_key(i).to_vec()).collect();
        assert_eq!(keys, expected);

        for i in (1..100u64).step_by(2) {
            tree.remove(&mut s, &u64_key(i)).unwrap();
        }
        assert!(tree.is_empty(&mut s).unwrap());
        assert_eq!(tree.depth(&mut s).unwrap(), 1);
    }

    #[test]
    fn test_persists_across_sessions() {
        let (store, mut s) = session();
        let tree = BTree::create(&mut s, small());
        for i in 0..50u64 {
            tree.insert(&mut s, &u64_key(i), b"x").unwrap();
        }
        s.commit().unwrap();

        let mut fresh = Session::new(store);
        let reopened = BTree::open(tree.root(), small());
        assert_eq!(reopened.items(&mut fresh).unwrap().len(), 50);
        assert!(reopened.contains(&mut fresh, &u64_key(49)).unwrap());
    }

    #[test]
    fn test_destroy() {
        let (store, mut s) = session();
        let tree = BTree::create(&mut s, small());
        for i in 0..30u64 {
            tree.insert(&mut s, &u64_key(i), b"").unwrap();
        }
        s.commit().unwrap();
        tree.destroy(&mut s).unwrap();
        s.commit().unwrap();
        assert_eq!(store.stats().node_count, 0);
    }
}
