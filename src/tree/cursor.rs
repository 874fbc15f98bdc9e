use crate::error::{Error, Result};
use crate::store::{NodeRef, NodeState, Session};

/// Forward iterator over a tree's entries.
///
/// Holds the branch path to its current leaf, so moving to the next leaf
/// never reads more than the nodes on the way down. Readers that know they
/// will keep going can ask for the upcoming leaves and fetch them in one
/// round trip with [`super::prefetch::prefetch_siblings`].
#[derive(Debug, Clone)]
pub struct TreeCursor {
    /// (branch, child slot) pairs from the root down
    path: Vec<(NodeRef, usize)>,
    leaf: Option<NodeRef>,
    pos: usize,
    read: usize,
}

impl TreeCursor {
    /// Position at the first key `>= lower`, or at the first key
    pub fn seek(session: &mut Session, root: NodeRef, lower: Option<&[u8]>) -> Result<Self> {
        let mut path = Vec::new();
        let mut current = root;
        let pos = loop {
            match session.node(current)? {
                NodeState::Branch(branch) => {
                    let slot = lower.map_or(0, |key| branch.child_slot(key));
                    path.push((current, slot));
                    current = branch.children[slot];
                }
                NodeState::Bucket(bucket) => {
                    break lower.map_or(0, |key| match bucket.search(key) {
                        Ok(i) | Err(i) => i,
                    });
                }
                _ => {
                    return Err(Error::UnexpectedNode {
                        node: current,
                        expected: "tree node",
                    });
                }
            }
        };

        Ok(Self {
            path,
            leaf: Some(current),
            pos,
            read: 0,
        })
    }

    /// Next entry in key order, or `None` once past the last key
    pub fn next(&mut self, session: &mut Session) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            let Some(leaf) = self.leaf else {
                return Ok(None);
            };
            let bucket = session.bucket(leaf)?;
            if self.pos < bucket.len() {
                let entry = (bucket.keys[self.pos].clone(), bucket.values[self.pos].clone());
                self.pos += 1;
                self.read += 1;
                return Ok(Some(entry));
            }
            self.advance_leaf(session)?;
        }
    }

    /// Key the next call to [`TreeCursor::next`] will return
    pub fn peek_key(&mut self, session: &mut Session) -> Result<Option<Vec<u8>>> {
        loop {
            let Some(leaf) = self.leaf else {
                return Ok(None);
            };
            let bucket = session.bucket(leaf)?;
            if self.pos < bucket.len() {
                return Ok(Some(bucket.keys[self.pos].clone()));
            }
            self.advance_leaf(session)?;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.leaf.is_none()
    }

    /// Entries returned so far
    pub fn read_count(&self) -> usize {
        self.read
    }

    /// Entries left in the current leaf, if it is resident
    pub fn buffered(&self, session: &Session) -> usize {
        match self.leaf.and_then(|leaf| session.cached(leaf)) {
            Some(NodeState::Bucket(bucket)) => bucket.len().saturating_sub(self.pos),
            _ => 0,
        }
    }

    /// Up to `count` subtrees the cursor will enter next, taken from the
    /// lowest resident branch that still has unvisited children. At the
    /// bottom level these are the following leaves.
    pub fn upcoming(&self, session: &Session, count: usize) -> Vec<NodeRef> {
        if count == 0 {
            return Vec::new();
        }
        for &(branch, slot) in self.path.iter().rev() {
            if let Some(NodeState::Branch(b)) = session.cached(branch)
                && slot + 1 < b.children.len()
            {
                return b.children[slot + 1..]
                    .iter()
                    .take(count)
                    .copied()
                    .collect();
            }
        }
        Vec::new()
    }

    fn advance_leaf(&mut self, session: &mut Session) -> Result<()> {
        // Climb to the nearest branch with a following child
        let next = loop {
            let Some((branch, slot)) = self.path.pop() else {
                self.leaf = None;
                return Ok(());
            };
            let b = session.branch(branch)?;
            if slot + 1 < b.children.len() {
                let child = b.children[slot + 1];
                self.path.push((branch, slot + 1));
                break child;
            }
        };

        // Then down the leftmost edge
        let mut current = next;
        loop {
            match session.node(current)? {
                NodeState::Branch(branch) => {
                    let child = branch.children[0];
                    self.path.push((current, 0));
                    current = child;
                }
                NodeState::Bucket(_) => break,
                _ => {
                    return Err(Error::UnexpectedNode {
                        node: current,
                        expected: "tree node",
                    });
                }
            }
        }
        self.leaf = Some(current);
        self.pos = 0;
        Ok(())
    }
}
