use crate::error::Result;
use crate::store::{NodeRef, NodeState, Session};

/// Integer stored in its own node and merged additively on commit, so
/// concurrent sessions may change it without conflicting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    node: NodeRef,
}

impl Counter {
    pub fn create(session: &mut Session, initial: i64) -> Self {
        Self {
            node: session.create(NodeState::Counter(initial)),
        }
    }

    pub fn open(node: NodeRef) -> Self {
        Self { node }
    }

    pub fn node(&self) -> NodeRef {
        self.node
    }

    pub fn value(&self, session: &mut Session) -> Result<i64> {
        session.counter(self.node)
    }

    /// Add `delta`; returns the new value
    pub fn change(&self, session: &mut Session, delta: i64) -> Result<i64> {
        session.change_counter(self.node, delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_counter_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let mut s = Session::new(store.clone());
        let counter = Counter::create(&mut s, 5);
        assert_eq!(counter.change(&mut s, 2).unwrap(), 7);
        s.commit().unwrap();

        let mut other = Session::new(store);
        let reopened = Counter::open(counter.node());
        assert_eq!(reopened.change(&mut other, -7).unwrap(), 0);
        other.commit().unwrap();
        other.clear_cache();
        assert_eq!(reopened.value(&mut other).unwrap(), 0);
    }
}
