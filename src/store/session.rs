//! Client-side view of the object store.
//!
//! A session owns an arena of decoded nodes keyed by [`NodeRef`]. A node is
//! fetched at most once per session and then shared by every lookup that
//! reaches it; lookups hold references, never copies. Local writes stay in
//! the arena until [`Session::commit`] ships them in one round trip.
//!
//! Index writes run inside [`Session::atomically`]: every node they touch is
//! journaled first, so a failed fetch half way through a write leaves the
//! session exactly as it was before the call and the write can be retried.

use crate::error::{Error, Result};
use crate::store::{Branch, Bucket, Mutation, NodeRef, NodeState, ObjectStore};
use ahash::{AHashMap, AHashSet};
use std::sync::Arc;
use tracing::debug;

pub struct Session {
    store: Arc<dyn ObjectStore>,
    /// Decoded nodes; slots of dropped nodes are reused
    arena: Vec<NodeState>,
    free_slots: Vec<usize>,
    slots: AHashMap<NodeRef, usize>,
    dirty: AHashSet<NodeRef>,
    deleted: AHashSet<NodeRef>,
    /// Pending commutative counter changes
    counter_deltas: AHashMap<NodeRef, i64>,
    round_trips: u64,
    /// Prior state of every node touched by the running atomic write
    journal: Option<AHashMap<NodeRef, Saved>>,
}

/// What a node looked like before the running atomic write touched it
#[derive(Debug)]
struct Saved {
    state: Option<NodeState>,
    dirty: bool,
    deleted: bool,
    delta: Option<i64>,
}

impl Session {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            arena: Vec::new(),
            free_slots: Vec::new(),
            slots: AHashMap::new(),
            dirty: AHashSet::new(),
            deleted: AHashSet::new(),
            counter_deltas: AHashMap::new(),
            round_trips: 0,
            journal: None,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Round trips issued by this session (loads and commits)
    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    pub fn is_cached(&self, node: NodeRef) -> bool {
        self.slots.contains_key(&node)
    }

    /// Number of resident nodes
    pub fn cached_len(&self) -> usize {
        self.slots.len()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.deleted.is_empty() || !self.counter_deltas.is_empty()
    }

    /// Resident node, without fetching
    pub fn cached(&self, node: NodeRef) -> Option<&NodeState> {
        self.slots.get(&node).map(|&slot| &self.arena[slot])
    }

    /// Fetch every uncached node in `refs` in a single round trip.
    /// Duplicates and resident nodes are skipped; returns how many were fetched.
    pub fn fetch_many(&mut self, refs: &[NodeRef]) -> Result<usize> {
        let mut seen = AHashSet::with_capacity(refs.len());
        let missing: Vec<NodeRef> = refs
            .iter()
            .copied()
            .filter(|r| !self.is_cached(*r) && !self.deleted.contains(r) && seen.insert(*r))
            .collect();
        self.load_into_arena(missing)
    }

    /// Re-fetch nodes even if resident. Nodes with local changes keep their
    /// local state.
    pub fn refresh_many(&mut self, refs: &[NodeRef]) -> Result<usize> {
        let mut seen = AHashSet::with_capacity(refs.len());
        let targets: Vec<NodeRef> = refs
            .iter()
            .copied()
            .filter(|r| {
                !self.dirty.contains(r)
                    && !self.deleted.contains(r)
                    && !self.counter_deltas.contains_key(r)
                    && seen.insert(*r)
            })
            .collect();
        self.load_into_arena(targets)
    }

    fn load_into_arena(&mut self, refs: Vec<NodeRef>) -> Result<usize> {
        if refs.is_empty() {
            return Ok(0);
        }
        self.round_trips += 1;
        let states = self.store.load_batch(&refs)?;
        if states.len() != refs.len() {
            return Err(Error::Store(format!(
                "requested {} nodes, received {}",
                refs.len(),
                states.len()
            )));
        }
        for (node, state) in refs.iter().copied().zip(states) {
            self.put_resident(node, state);
        }
        Ok(refs.len())
    }

    fn put_resident(&mut self, node: NodeRef, state: NodeState) {
        match self.slots.get(&node) {
            Some(&slot) => self.arena[slot] = state,
            None => {
                let slot = match self.free_slots.pop() {
                    Some(slot) => {
                        self.arena[slot] = state;
                        slot
                    }
                    None => {
                        self.arena.push(state);
                        self.arena.len() - 1
                    }
                };
                self.slots.insert(node, slot);
            }
        }
    }

    fn evict(&mut self, node: NodeRef) {
        if let Some(slot) = self.slots.remove(&node) {
            self.arena[slot] = NodeState::Record(Vec::new());
            self.free_slots.push(slot);
        }
    }

    /// Node state, fetching it in its own round trip when not resident
    pub fn node(&mut self, node: NodeRef) -> Result<&NodeState> {
        if self.deleted.contains(&node) {
            return Err(Error::MissingNode(node));
        }
        if !self.is_cached(node) {
            self.load_into_arena(vec![node])?;
        }
        let slot = self.slots[&node];
        Ok(&self.arena[slot])
    }

    /// Mutable node state; marks the node dirty
    pub fn node_mut(&mut self, node: NodeRef) -> Result<&mut NodeState> {
        self.node(node)?;
        self.remember(node);
        self.dirty.insert(node);
        let slot = self.slots[&node];
        Ok(&mut self.arena[slot])
    }

    pub fn branch(&mut self, node: NodeRef) -> Result<&Branch> {
        match self.node(node)? {
            NodeState::Branch(branch) => Ok(branch),
            _ => Err(Error::UnexpectedNode {
                node,
                expected: "branch",
            }),
        }
    }

    pub fn bucket(&mut self, node: NodeRef) -> Result<&Bucket> {
        match self.node(node)? {
            NodeState::Bucket(bucket) => Ok(bucket),
            _ => Err(Error::UnexpectedNode {
                node,
                expected: "bucket",
            }),
        }
    }

    pub fn record(&mut self, node: NodeRef) -> Result<&[u8]> {
        match self.node(node)? {
            NodeState::Record(payload) => Ok(payload),
            _ => Err(Error::UnexpectedNode {
                node,
                expected: "record",
            }),
        }
    }

    /// Create a node locally; it reaches the store on commit
    pub fn create(&mut self, state: NodeState) -> NodeRef {
        let node = self.store.allocate(1)[0];
        self.remember(node);
        self.put_resident(node, state);
        self.dirty.insert(node);
        node
    }

    /// Replace a node's state wholesale
    pub fn put(&mut self, node: NodeRef, state: NodeState) {
        self.remember(node);
        self.deleted.remove(&node);
        self.put_resident(node, state);
        self.dirty.insert(node);
    }

    /// Drop a node; the store forgets it on commit
    pub fn delete(&mut self, node: NodeRef) {
        self.remember(node);
        self.evict(node);
        self.dirty.remove(&node);
        self.counter_deltas.remove(&node);
        self.deleted.insert(node);
    }

    /// Current counter value
    pub fn counter(&mut self, node: NodeRef) -> Result<i64> {
        match self.node(node)? {
            NodeState::Counter(value) => Ok(*value),
            _ => Err(Error::UnexpectedNode {
                node,
                expected: "counter",
            }),
        }
    }

    /// Commutative counter change. Counters already sent to the store are
    /// shipped as increments so concurrent writers never overwrite each other.
    pub fn change_counter(&mut self, node: NodeRef, delta: i64) -> Result<i64> {
        if delta == 0 {
            return self.counter(node);
        }
        self.counter(node)?;
        self.remember(node);
        let slot = self.slots[&node];
        let NodeState::Counter(value) = &mut self.arena[slot] else {
            return Err(Error::UnexpectedNode {
                node,
                expected: "counter",
            });
        };
        *value += delta;
        let value = *value;

        // A counter created in this session is shipped whole by its Put
        if !self.dirty.contains(&node) {
            *self.counter_deltas.entry(node).or_insert(0) += delta;
        }
        Ok(value)
    }

    /// Run a write as one unit. If it fails, every node it changed is put
    /// back as it was, so retrying the call is safe. Nested calls join the
    /// outermost one.
    pub fn atomically<T>(&mut self, write: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.journal.is_some() {
            return write(self);
        }
        self.journal = Some(AHashMap::new());
        let result = write(self);
        let journal = self.journal.take().unwrap_or_default();
        if result.is_err() {
            debug!(nodes = journal.len(), "write failed, restoring session");
            self.undo(journal);
        }
        result
    }

    fn remember(&mut self, node: NodeRef) {
        let Some(journal) = self.journal.as_ref() else {
            return;
        };
        if journal.contains_key(&node) {
            return;
        }
        let saved = Saved {
            state: self.cached(node).cloned(),
            dirty: self.dirty.contains(&node),
            deleted: self.deleted.contains(&node),
            delta: self.counter_deltas.get(&node).copied(),
        };
        if let Some(journal) = self.journal.as_mut() {
            journal.insert(node, saved);
        }
    }

    fn undo(&mut self, journal: AHashMap<NodeRef, Saved>) {
        for (node, saved) in journal {
            match saved.state {
                Some(state) => self.put_resident(node, state),
                None => self.evict(node),
            }
            if saved.dirty {
                self.dirty.insert(node);
            } else {
                self.dirty.remove(&node);
            }
            if saved.deleted {
                self.deleted.insert(node);
            } else {
                self.deleted.remove(&node);
            }
            match saved.delta {
                Some(delta) => self.counter_deltas.insert(node, delta),
                None => self.counter_deltas.remove(&node),
            };
        }
    }

    /// Ship all local changes in one round trip. A clean session does nothing.
    pub fn commit(&mut self) -> Result<usize> {
        let mut mutations = Vec::with_capacity(
            self.dirty.len() + self.deleted.len() + self.counter_deltas.len(),
        );
        for &node in &self.dirty {
            if let Some(state) = self.cached(node) {
                mutations.push((node, Mutation::Put(state.clone())));
            }
        }
        for &node in &self.deleted {
            mutations.push((node, Mutation::Delete));
        }
        for (&node, &delta) in &self.counter_deltas {
            if delta != 0 {
                mutations.push((node, Mutation::Increment(delta)));
            }
        }
        // Stable order keeps commits reproducible
        mutations.sort_by_key(|(node, _)| *node);

        let count = mutations.len();
        if count > 0 {
            self.round_trips += 1;
            self.store.apply(mutations)?;
        }
        self.dirty.clear();
        self.deleted.clear();
        self.counter_deltas.clear();
        debug!(mutations = count, "session committed");
        Ok(count)
    }

    /// Discard local changes. Touched nodes are evicted so the next access
    /// sees the store's state.
    pub fn rollback(&mut self) {
        let touched: Vec<NodeRef> = self
            .dirty
            .iter()
            .chain(self.counter_deltas.keys())
            .copied()
            .collect();
        for node in touched {
            self.evict(node);
        }
        self.dirty.clear();
        self.deleted.clear();
        self.counter_deltas.clear();
    }

    /// Forget every clean resident node, as a fresh session would
    pub fn clear_cache(&mut self) {
        let clean: Vec<NodeRef> = self
            .slots
            .keys()
            .copied()
            .filter(|n| !self.dirty.contains(n) && !self.counter_deltas.contains_key(n))
            .collect();
        for node in clean {
            self.evict(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Session) {
        let store = Arc::new(MemoryStore::new());
        let session = Session::new(store.clone());
        (store, session)
    }

    #[test]
    fn test_fetch_once_per_session() {
        let (store, mut session) = setup();
        let a = session.create(NodeState::Record(b"a".to_vec()));
        let b = session.create(NodeState::Record(b"b".to_vec()));
        session.commit().unwrap();
        session.clear_cache();
        store.reset_stats();

        assert_eq!(session.fetch_many(&[a, b, a]).unwrap(), 2);
        assert_eq!(session.fetch_many(&[a, b]).unwrap(), 0);
        assert_eq!(session.record(a).unwrap(), b"a");
        assert_eq!(store.stats().round_trips, 1);
        assert_eq!(store.stats().nodes_loaded, 2);
    }

    #[test]
    fn test_commit_clean_is_noop() {
        let (store, mut session) = setup();
        assert_eq!(session.commit().unwrap(), 0);
        assert_eq!(store.stats().round_trips, 0);
    }

    #[test]
    fn test_counter_deltas_commute() {
        let store = Arc::new(MemoryStore::new());
        let mut setup = Session::new(store.clone());
        let counter = setup.create(NodeState::Counter(10));
        setup.commit().unwrap();

        let mut first = Session::new(store.clone());
        let mut second = Session::new(store.clone());
        first.change_counter(counter, 3).unwrap();
        second.change_counter(counter, -1).unwrap();
        first.commit().unwrap();
        second.commit().unwrap();

        let mut reader = Session::new(store);
        assert_eq!(reader.counter(counter).unwrap(), 12);
    }

    #[test]
    fn test_delete_and_rollback() {
        let (_store, mut session) = setup();
        let node = session.create(NodeState::Record(b"x".to_vec()));
        session.commit().unwrap();

        session.delete(node);
        assert!(matches!(session.node(node), Err(Error::MissingNode(_))));
        session.rollback();
        assert_eq!(session.record(node).unwrap(), b"x");

        session.put(node, NodeState::Record(b"y".to_vec()));
        session.rollback();
        assert_eq!(session.record(node).unwrap(), b"x");
    }

    #[test]
    fn test_failed_write_restores_session() {
        let (store, mut session) = setup();
        let kept = session.create(NodeState::Record(b"kept".to_vec()));
        let counter = session.create(NodeState::Counter(5));
        let cold = session.create(NodeState::Record(b"cold".to_vec()));
        session.commit().unwrap();
        session.clear_cache();

        // Uncommitted work from an earlier write survives a later failure
        session.put(kept, NodeState::Record(b"edited".to_vec()));
        session.change_counter(counter, 1).unwrap();

        let result = session.atomically(|s| {
            s.change_counter(counter, 10)?;
            s.delete(kept);
            s.create(NodeState::Record(b"orphan".to_vec()));
            store.inject_failures(1);
            s.record(cold).map(|_| ())
        });
        assert!(matches!(result, Err(Error::Store(_))));

        assert_eq!(session.record(kept).unwrap(), b"edited");
        assert_eq!(session.counter(counter).unwrap(), 6);
        assert_eq!(session.commit().unwrap(), 2);

        let mut reader = Session::new(store);
        assert_eq!(reader.record(kept).unwrap(), b"edited");
        assert_eq!(reader.counter(counter).unwrap(), 6);
        assert_eq!(reader.record(cold).unwrap(), b"cold");
    }

    #[test]
    fn test_nested_atomic_writes_join() {
        let (_store, mut session) = setup();
        let node = session.create(NodeState::Counter(0));
        session.commit().unwrap();

        let result: Result<()> = session.atomically(|s| {
            s.change_counter(node, 1)?;
            s.atomically(|inner| inner.change_counter(node, 1))?;
            Err(Error::Unsupported("abort"))
        });
        assert!(result.is_err());
        assert_eq!(session.counter(node).unwrap(), 0);
        assert!(!session.has_pending_changes());

        session.atomically(|s| s.change_counter(node, 3)).unwrap();
        assert_eq!(session.commit().unwrap(), 1);
    }

    #[test]
    fn test_unexpected_kind() {
        let (_store, mut session) = setup();
        let node = session.create(NodeState::Counter(0));
        assert!(matches!(
            session.bucket(node),
            Err(Error::UnexpectedNode { expected: "bucket", .. })
        ));
    }
}
