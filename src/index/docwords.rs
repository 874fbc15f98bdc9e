//! Per-document term lists.
//!
//! The tree maps a DocId to the reference of a record node holding the
//! document's term ids, varint encoded, in text order. Keeping the lists out
//! of the tree's buckets lets many of them be fetched in one bulk load.

use crate::error::{Error, Result};
use crate::index::types::{DocId, TermId};
use crate::store::{NodeRef, NodeState, Session};
use crate::tree::prefetch::{batch_lookup, bulk_load};
use crate::tree::{BTree, TreeConfig};
use crate::utils::{decode_id_sequence, encode_id_sequence, key_u64, u64_key};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocWords {
    tree: BTree,
}

impl DocWords {
    pub fn create(session: &mut Session, config: TreeConfig) -> Self {
        Self {
            tree: BTree::create(session, config),
        }
    }

    pub fn open(root: NodeRef, config: TreeConfig) -> Self {
        Self {
            tree: BTree::open(root, config),
        }
    }

    pub fn root(&self) -> NodeRef {
        self.tree.root()
    }

    pub fn contains(&self, session: &mut Session, doc: DocId) -> Result<bool> {
        self.tree.contains(session, &u64_key(doc))
    }

    /// Term ids of a document, or `None` if it is not indexed
    pub fn get(&self, session: &mut Session, doc: DocId) -> Result<Option<Vec<TermId>>> {
        match self.record_ref(session, doc)? {
            Some(record) => self.decode(session, record).map(Some),
            None => Ok(None),
        }
    }

    /// Term lists of many documents: one round trip per tree level to find
    /// their records, then one to load them all. Absent documents are left
    /// out of the map.
    pub fn get_many(
        &self,
        session: &mut Session,
        docs: &[DocId],
    ) -> Result<FxHashMap<DocId, Vec<TermId>>> {
        let keys: Vec<[u8; 8]> = docs.iter().map(|&d| u64_key(d)).collect();
        let lookups: Vec<(NodeRef, &[u8])> =
            keys.iter().map(|k| (self.tree.root(), k.as_slice())).collect();
        batch_lookup(session, &lookups)?;

        let mut records = Vec::with_capacity(docs.len());
        for &doc in docs {
            if let Some(record) = self.record_ref(session, doc)? {
                records.push((doc, record));
            }
        }
        records.sort_unstable_by_key(|(_, record)| *record);
        records.dedup_by_key(|(_, record)| *record);

        let refs: Vec<NodeRef> = records.iter().map(|(_, record)| *record).collect();
        bulk_load(session, &refs)?;

        let mut lists = FxHashMap::default();
        for (doc, record) in records {
            lists.insert(doc, self.decode(session, record)?);
        }
        Ok(lists)
    }

    /// Store a document's term ids, rewriting its record in place if it
    /// already has one. Unchanged lists are not rewritten.
    pub fn put(&self, session: &mut Session, doc: DocId, ids: &[TermId]) -> Result<()> {
        let payload = encode_id_sequence(ids);
        match self.record_ref(session, doc)? {
            Some(record) => {
                if session.record(record)? != payload.as_slice() {
                    session.put(record, NodeState::Record(payload));
                }
            }
            None => {
                let record = session.create(NodeState::Record(payload));
                self.tree.insert(session, &u64_key(doc), &u64_key(record.0))?;
            }
        }
        Ok(())
    }

    /// Drop a document; returns its term ids if it was present
    pub fn remove(&self, session: &mut Session, doc: DocId) -> Result<Option<Vec<TermId>>> {
        let Some(record) = self.record_ref(session, doc)? else {
            return Ok(None);
        };
        let ids = self.decode(session, record)?;
        self.tree.remove(session, &u64_key(doc))?;
        session.delete(record);
        Ok(Some(ids))
    }

    /// Every indexed DocId in ascending order
    pub fn doc_ids(&self, session: &mut Session) -> Result<Vec<DocId>> {
        crate::tree::prefetch::prefetch_subtree(session, &[self.tree.root()], None, true)?;
        self.tree
            .items(session)?
            .into_iter()
            .map(|(key, _)| key_u64(&key).ok_or_else(|| self.corrupt("bad document key")))
            .collect()
    }

    fn record_ref(&self, session: &mut Session, doc: DocId) -> Result<Option<NodeRef>> {
        match self.tree.get(session, &u64_key(doc))? {
            Some(value) => key_u64(&value)
                .map(|r| Some(NodeRef(r)))
                .ok_or_else(|| self.corrupt("bad record reference")),
            None => Ok(None),
        }
    }

    fn decode(&self, session: &mut Session, record: NodeRef) -> Result<Vec<TermId>> {
        decode_id_sequence(session.record(record)?).ok_or(Error::Corrupt {
            node: record,
            reason: "bad term id sequence".into(),
        })
    }

    fn corrupt(&self, reason: &str) -> Error {
        Error::Corrupt {
            node: self.tree.root(),
            reason: reason.to_string(),
        }
    }
}
