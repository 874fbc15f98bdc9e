//! In-process object store.
//!
//! Holds every node in its encoded wire form, so each load pays the same
//! decode cost a remote fetch would, and counts round trips so callers can
//! verify the batching behaviour of the search core. Snapshots let the CLI
//! persist a store between runs.

use crate::error::{Error, Result};
use crate::store::codec::{decode_node, encode_node};
use crate::store::{Mutation, NodeRef, NodeState, ObjectStore, StoreStats};
use crate::utils::{read_u32_le, read_u64_le, write_u32_le, write_u64_le};
use ahash::AHashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const SNAPSHOT_MAGIC: &[u8; 4] = b"VEIL";
const SNAPSHOT_VERSION: u32 = 1;

/// Object store kept in memory, with optional simulated latency
pub struct MemoryStore {
    nodes: RwLock<AHashMap<u64, Vec<u8>>>,
    /// Next unallocated reference; 0 is never handed out
    next_ref: AtomicU64,
    latency: Duration,
    /// Number of upcoming load round trips that fail
    failures: AtomicU64,
    round_trips: AtomicU64,
    nodes_loaded: AtomicU64,
    bytes_loaded: AtomicU64,
    commits: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every round trip sleeps for `latency`, approximating a remote server
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            nodes: RwLock::new(AHashMap::new()),
            next_ref: AtomicU64::new(1),
            latency,
            failures: AtomicU64::new(0),
            round_trips: AtomicU64::new(0),
            nodes_loaded: AtomicU64::new(0),
            bytes_loaded: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        }
    }

    /// Make the next `count` load round trips fail with a store error
    pub fn inject_failures(&self, count: u64) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Zero the round-trip counters (stored nodes are untouched)
    pub fn reset_stats(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
        self.nodes_loaded.store(0, Ordering::SeqCst);
        self.bytes_loaded.store(0, Ordering::SeqCst);
        self.commits.store(0, Ordering::SeqCst);
    }

    /// Raw encoded payload of a node, if stored
    pub fn raw(&self, node: NodeRef) -> Option<Vec<u8>> {
        self.read_nodes().ok()?.get(&node.0).cloned()
    }

    /// Write every node to a snapshot file
    pub fn save(&self, path: &Path) -> Result<()> {
        let nodes = self.read_nodes()?;
        let mut writer = BufWriter::new(File::create(path)?);

        writer.write_all(SNAPSHOT_MAGIC)?;
        write_u32_le(&mut writer, SNAPSHOT_VERSION)?;
        write_u64_le(&mut writer, self.next_ref.load(Ordering::SeqCst))?;
        write_u64_le(&mut writer, nodes.len() as u64)?;

        // Sorted so identical stores produce identical files
        let mut refs: Vec<_> = nodes.keys().copied().collect();
        refs.sort_unstable();
        for node in refs {
            let payload = &nodes[&node];
            write_u64_le(&mut writer, node)?;
            write_u32_le(&mut writer, payload.len() as u32)?;
            writer.write_all(payload)?;
        }

        writer.flush()?;
        debug!(nodes = nodes.len(), path = %path.display(), "snapshot saved");
        Ok(())
    }

    /// Load a store from a snapshot written by [`MemoryStore::save`]
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(Error::Store(format!("{} is not a snapshot", path.display())));
        }
        let version = read_u32_le(&mut reader)?;
        if version != SNAPSHOT_VERSION {
            return Err(Error::Store(format!("unsupported snapshot version {}", version)));
        }

        let next_ref = read_u64_le(&mut reader)?;
        let count = read_u64_le(&mut reader)?;
        let mut nodes = AHashMap::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            let node = read_u64_le(&mut reader)?;
            let len = read_u32_le(&mut reader)? as usize;
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;
            nodes.insert(node, payload);
        }

        let store = Self::new();
        store.next_ref.store(next_ref.max(1), Ordering::SeqCst);
        *store
            .nodes
            .write()
            .map_err(|_| Error::Store("node map poisoned".into()))? = nodes;
        debug!(nodes = count, path = %path.display(), "snapshot opened");
        Ok(store)
    }

    fn read_nodes(&self) -> Result<std::sync::RwLockReadGuard<'_, AHashMap<u64, Vec<u8>>>> {
        self.nodes
            .read()
            .map_err(|_| Error::Store("node map poisoned".into()))
    }

    fn round_trip(&self) -> Result<()> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::Store("injected round trip failure".into()));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn load_batch(&self, refs: &[NodeRef]) -> Result<Vec<NodeState>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        self.round_trip()?;

        let nodes = self.read_nodes()?;
        let mut states = Vec::with_capacity(refs.len());
        let mut bytes = 0u64;
        for &node in refs {
            let payload = nodes.get(&node.0).ok_or(Error::MissingNode(node))?;
            bytes += payload.len() as u64;
            states.push(decode_node(node, payload)?);
        }

        self.nodes_loaded.fetch_add(refs.len() as u64, Ordering::Relaxed);
        self.bytes_loaded.fetch_add(bytes, Ordering::Relaxed);
        debug!(nodes = refs.len(), bytes, "bulk-loaded nodes");
        Ok(states)
    }

    fn apply(&self, mutations: Vec<(NodeRef, Mutation)>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        self.round_trip()?;

        let mut nodes = self
            .nodes
            .write()
            .map_err(|_| Error::Store("node map poisoned".into()))?;
        for (node, mutation) in mutations {
            match mutation {
                Mutation::Put(state) => {
                    nodes.insert(node.0, encode_node(&state));
                }
                Mutation::Delete => {
                    nodes.remove(&node.0);
                }
                Mutation::Increment(delta) => {
                    let current = match nodes.get(&node.0) {
                        Some(payload) => match decode_node(node, payload)? {
                            NodeState::Counter(value) => value,
                            _ => {
                                return Err(Error::UnexpectedNode {
                                    node,
                                    expected: "counter",
                                });
                            }
                        },
                        None => 0,
                    };
                    nodes.insert(node.0, encode_node(&NodeState::Counter(current + delta)));
                }
            }
        }

        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn allocate(&self, count: usize) -> Vec<NodeRef> {
        let start = self.next_ref.fetch_add(count as u64, Ordering::SeqCst);
        (start..start + count as u64).map(NodeRef).collect()
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            round_trips: self.round_trips.load(Ordering::Relaxed),
            nodes_loaded: self.nodes_loaded.load(Ordering::Relaxed),
            bytes_loaded: self.bytes_loaded.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            node_count: self.read_nodes().map(|n| n.len() as u64).unwrap_or(0),
        }
    }
}
