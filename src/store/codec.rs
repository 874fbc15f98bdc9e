//! Binary node format used on the wire and in snapshots.
//!
//! Layout: a one-byte tag followed by varint-framed fields.
//!
//! ```text
//! branch  : 0x01 n:varint (len:varint key)*n child:varint*(n+1)
//! bucket  : 0x02 n:varint (len:varint key)*n (len:varint value)*n
//! record  : 0x03 payload...
//! counter : 0x04 value:i64le
//! ```

use crate::error::{Error, Result};
use crate::store::{Branch, Bucket, NodeRef, NodeState};
use crate::utils::{decode_varint_u64, encode_varint_u64};

const TAG_BRANCH: u8 = 1;
const TAG_BUCKET: u8 = 2;
const TAG_RECORD: u8 = 3;
const TAG_COUNTER: u8 = 4;

/// Encode a node into its wire format
pub fn encode_node(state: &NodeState) -> Vec<u8> {
    let mut buf = Vec::new();
    match state {
        NodeState::Branch(branch) => {
            buf.push(TAG_BRANCH);
            encode_varint_u64(branch.keys.len() as u64, &mut buf);
            for key in &branch.keys {
                put_bytes(key, &mut buf);
            }
            for child in &branch.children {
                encode_varint_u64(child.0, &mut buf);
            }
        }
        NodeState::Bucket(bucket) => {
            buf.push(TAG_BUCKET);
            encode_varint_u64(bucket.keys.len() as u64, &mut buf);
            for key in &bucket.keys {
                put_bytes(key, &mut buf);
            }
            for value in &bucket.values {
                put_bytes(value, &mut buf);
            }
        }
        NodeState::Record(payload) => {
            buf.reserve(payload.len() + 1);
            buf.push(TAG_RECORD);
            buf.extend_from_slice(payload);
        }
        NodeState::Counter(value) => {
            buf.push(TAG_COUNTER);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    buf
}

/// Decode a node previously written by [`encode_node`]
pub fn decode_node(node: NodeRef, bytes: &[u8]) -> Result<NodeState> {
    let corrupt = |reason: &str| Error::Corrupt {
        node,
        reason: reason.to_string(),
    };

    let (&tag, body) = bytes.split_first().ok_or_else(|| corrupt("empty payload"))?;
    let mut reader = Reader { buf: body, pos: 0 };

    let state = match tag {
        TAG_BRANCH => {
            let n = reader.varint().ok_or_else(|| corrupt("bad key count"))? as usize;
            let mut keys = Vec::with_capacity(n.min(body.len()));
            for _ in 0..n {
                keys.push(reader.bytes().ok_or_else(|| corrupt("bad branch key"))?);
            }
            let mut children = Vec::with_capacity(n.min(body.len()) + 1);
            for _ in 0..=n {
                children.push(NodeRef(
                    reader.varint().ok_or_else(|| corrupt("bad child ref"))?,
                ));
            }
            NodeState::Branch(Branch { keys, children })
        }
        TAG_BUCKET => {
            let n = reader.varint().ok_or_else(|| corrupt("bad entry count"))? as usize;
            let mut keys = Vec::with_capacity(n.min(body.len()));
            for _ in 0..n {
                keys.push(reader.bytes().ok_or_else(|| corrupt("bad bucket key"))?);
            }
            let mut values = Vec::with_capacity(n.min(body.len()));
            for _ in 0..n {
                values.push(reader.bytes().ok_or_else(|| corrupt("bad bucket value"))?);
            }
            NodeState::Bucket(Bucket { keys, values })
        }
        TAG_RECORD => return Ok(NodeState::Record(body.to_vec())),
        TAG_COUNTER => {
            let raw: [u8; 8] = body
                .try_into()
                .map_err(|_| corrupt("counter must be 8 bytes"))?;
            return Ok(NodeState::Counter(i64::from_le_bytes(raw)));
        }
        _ => return Err(corrupt("unknown tag")),
    };

    if reader.pos != body.len() {
        return Err(corrupt("trailing bytes"));
    }
    Ok(state)
}

fn put_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    encode_varint_u64(bytes.len() as u64, buf);
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn varint(&mut self) -> Option<u64> {
        let (value, consumed) = decode_varint_u64(&self.buf[self.pos..])?;
        self.pos += consumed;
        Some(value)
    }

    fn bytes(&mut self) -> Option<Vec<u8>> {
        let len = usize::try_from(self.varint()?).ok()?;
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_roundtrip() {
        let state = NodeState::Branch(Branch {
            keys: vec![b"m".to_vec(), b"t".to_vec()],
            children: vec![NodeRef(1), NodeRef(300), NodeRef(u64::MAX)],
        });
        let bytes = encode_node(&state);
        assert_eq!(decode_node(NodeRef(9), &bytes).unwrap(), state);
    }

    #[test]
    fn test_bucket_with_empty_values() {
        let state = NodeState::Bucket(Bucket {
            keys: vec![vec![0; 16], vec![1; 16]],
            values: vec![vec![], vec![]],
        });
        let bytes = encode_node(&state);
        assert_eq!(decode_node(NodeRef(1), &bytes).unwrap(), state);
    }

    #[test]
    fn test_counter_negative() {
        let bytes = encode_node(&NodeState::Counter(-3));
        assert_eq!(decode_node(NodeRef(1), &bytes).unwrap(), NodeState::Counter(-3));
    }

    #[test]
    fn test_corrupt_payloads() {
        assert!(decode_node(NodeRef(1), &[]).is_err());
        assert!(decode_node(NodeRef(1), &[0x7F]).is_err());
        assert!(decode_node(NodeRef(1), &[TAG_COUNTER, 1, 2]).is_err());
        // bucket claiming one entry with a key longer than the payload
        assert!(decode_node(NodeRef(1), &[TAG_BUCKET, 1, 50, 1]).is_err());

        let mut bytes = encode_node(&NodeState::Bucket(Bucket::default()));
        bytes.push(0);
        assert!(matches!(
            decode_node(NodeRef(4), &bytes),
            Err(Error::Corrupt { node: NodeRef(4), .. })
        ));
    }
}
