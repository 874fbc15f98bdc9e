//! Round-trip planning for tree reads.
//!
//! A point lookup costs one round trip per tree level when done alone. These
//! routines advance many lookups level by level instead, so a batch of
//! lookups against trees of depth D costs D round trips in total. Nodes
//! already resident in the session are never fetched again, and a call with
//! nothing to fetch never reaches the store.

use crate::error::Result;
use crate::store::{NodeRef, NodeState, Session};
use crate::tree::TreeCursor;
use rustc_hash::FxHashSet;
use tracing::{trace, warn};

/// Load every node on the path from each root to the leaf that would hold
/// its key. Returns the number of round trips issued.
pub fn batch_lookup(session: &mut Session, lookups: &[(NodeRef, &[u8])]) -> Result<usize> {
    let mut frontier: Vec<(NodeRef, &[u8])> = lookups.to_vec();
    let mut round_trips = 0;

    while !frontier.is_empty() {
        let refs: Vec<NodeRef> = frontier.iter().map(|(node, _)| *node).collect();
        if session.fetch_many(&refs)? > 0 {
            round_trips += 1;
        }

        let mut seen = FxHashSet::default();
        let mut next = Vec::new();
        for (node, key) in frontier {
            if let Some(NodeState::Branch(branch)) = session.cached(node) {
                let child = branch.children[branch.child_slot(key)];
                if seen.insert((child, key)) {
                    next.push((child, key));
                }
            }
        }
        frontier = next;
    }

    trace!(lookups = lookups.len(), round_trips, "batch lookup");
    Ok(round_trips)
}

/// Breadth-first load of whole subtrees, one round trip per level, stopping
/// after `max_depth` levels or when a level holds no branches. With
/// `skip_if_cached` unset resident clean nodes are fetched again.
pub fn prefetch_subtree(
    session: &mut Session,
    roots: &[NodeRef],
    max_depth: Option<usize>,
    skip_if_cached: bool,
) -> Result<usize> {
    let mut seen: FxHashSet<NodeRef> = FxHashSet::default();
    let mut level: Vec<NodeRef> = roots.iter().copied().filter(|r| seen.insert(*r)).collect();
    let mut depth = 0;
    let mut round_trips = 0;

    while !level.is_empty() && max_depth.is_none_or(|max| depth < max) {
        let fetched = if skip_if_cached {
            session.fetch_many(&level)?
        } else {
            session.refresh_many(&level)?
        };
        if fetched > 0 {
            round_trips += 1;
        }

        let mut next = Vec::new();
        for node in &level {
            if let Some(NodeState::Branch(branch)) = session.cached(*node) {
                next.extend(branch.children.iter().copied().filter(|c| seen.insert(*c)));
            }
        }
        level = next;
        depth += 1;
    }

    trace!(roots = roots.len(), depth, round_trips, "subtree prefetch");
    Ok(round_trips)
}

/// Fetch an explicit set of nodes in one round trip. Callers are expected to
/// pass each reference once.
pub fn bulk_load(session: &mut Session, refs: &[NodeRef]) -> Result<usize> {
    let mut seen = FxHashSet::default();
    if !refs.iter().all(|r| seen.insert(*r)) {
        warn!(requested = refs.len(), unique = seen.len(), "duplicate references in bulk load");
    }
    let fetched = session.fetch_many(refs)?;
    Ok(usize::from(fetched > 0))
}

/// Load the next `leaves` subtrees a cursor will walk into, descending their
/// leftmost edges until leaves are resident. Costs at most one round trip
/// per level below the cursor's lowest branch with unvisited children.
pub fn prefetch_siblings(session: &mut Session, cursor: &TreeCursor, leaves: usize) -> Result<usize> {
    let mut frontier = cursor.upcoming(session, leaves);
    let mut round_trips = 0;

    while !frontier.is_empty() {
        if session.fetch_many(&frontier)? > 0 {
            round_trips += 1;
        }
        let mut next = Vec::new();
        for node in &frontier {
            if next.len() >= leaves {
                break;
            }
            if let Some(NodeState::Branch(branch)) = session.cached(*node) {
                let room = leaves - next.len();
                next.extend(branch.children.iter().take(room).copied());
            }
        }
        frontier = next;
    }
    Ok(round_trips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ObjectStore};
    use crate::tree::{BTree, TreeConfig};
    use crate::utils::u64_key;
    use std::sync::Arc;

    fn trees(count: usize, entries: u64) -> (Arc<MemoryStore>, Vec<BTree>) {
        let store = Arc::new(MemoryStore::new());
        let mut session = Session::new(store.clone());
        let trees: Vec<BTree> = (0..count)
            .map(|_| {
                let tree = BTree::create(&mut session, TreeConfig::new(4, 4));
                for i in 0..entries {
                    tree.insert(&mut session, &u64_key(i), b"").unwrap();
                }
                tree
            })
            .collect();
        session.commit().unwrap();
        (store, trees)
    }

    #[test]
    fn test_batch_lookup_one_trip_per_level() {
        let (store, trees) = trees(5, 64);
        let mut session = Session::new(store.clone());
        let depth = trees[0].depth(&mut session).unwrap();
        session.clear_cache();
        store.reset_stats();

        let keys: Vec<[u8; 8]> = (0..5u64).map(|i| u64_key(i * 11)).collect();
        let lookups: Vec<(NodeRef, &[u8])> = trees
            .iter()
            .zip(&keys)
            .map(|(t, k)| (t.root(), k.as_slice()))
            .collect();
        assert_eq!(batch_lookup(&mut session, &lookups).unwrap(), depth);
        assert_eq!(store.stats().round_trips as usize, depth);

        // Every lookup now resolves from the session
        for (tree, key) in trees.iter().zip(&keys) {
            assert!(tree.contains(&mut session, key).unwrap());
        }
        assert_eq!(store.stats().round_trips as usize, depth);
    }

    #[test]
    fn test_empty_requests_are_free() {
        let (store, _trees) = trees(1, 4);
        let mut session = Session::new(store.clone());
        store.reset_stats();
        assert_eq!(batch_lookup(&mut session, &[]).unwrap(), 0);
        assert_eq!(prefetch_subtree(&mut session, &[], None, true).unwrap(), 0);
        assert_eq!(bulk_load(&mut session, &[]).unwrap(), 0);
        assert_eq!(store.stats().round_trips, 0);
    }

    #[test]
    fn test_prefetch_subtree_depth_limit() {
        let (store, trees) = trees(2, 100);
        let mut session = Session::new(store.clone());
        let depth = trees[0].depth(&mut session).unwrap();
        session.clear_cache();
        store.reset_stats();

        let roots: Vec<NodeRef> = trees.iter().map(|t| t.root()).collect();
        assert_eq!(prefetch_subtree(&mut session, &roots, Some(1), true).unwrap(), 1);
        assert_eq!(prefetch_subtree(&mut session, &roots, None, true).unwrap(), depth - 1);

        // Whole trees are resident; scanning costs nothing more
        store.reset_stats();
        assert_eq!(trees[1].items(&mut session).unwrap().len(), 100);
        assert_eq!(store.stats().round_trips, 0);
    }

    #[test]
    fn test_prefetch_siblings_warms_next_leaves() {
        let (store, trees) = trees(1, 200);
        let mut session = Session::new(store.clone());
        let mut cursor = trees[0].cursor(&mut session, None).unwrap();
        prefetch_siblings(&mut session, &cursor, 3).unwrap();
        let warmed = cursor.upcoming(&session, 3);
        assert!(warmed.iter().all(|r| session.is_cached(*r)));

        store.reset_stats();
        let first_leaf = cursor.buffered(&session);
        for _ in 0..first_leaf {
            cursor.next(&mut session).unwrap();
        }
        // Crossing into the next leaf is served from the session
        cursor.next(&mut session).unwrap();
        assert_eq!(store.stats().round_trips, 0);
    }
}
