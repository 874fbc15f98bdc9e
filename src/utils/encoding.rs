use std::io::{self, Read, Write};

/// Encode a u32 as a variable-length integer
pub fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            break;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Decode a variable-length integer from a slice
/// Returns (value, bytes_consumed)
pub fn decode_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let (value, consumed) = decode_varint_u64(buf)?;
    u32::try_from(value).ok().map(|v| (v, consumed))
}

/// Encode a u64 as a variable-length integer
pub fn encode_varint_u64(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            break;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Decode a u64 variable-length integer
pub fn decode_varint_u64(buf: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }

        shift += 7;
    }

    None
}

/// Encode a sequence of term ids, order preserved (duplicates kept)
pub fn encode_id_sequence(ids: &[u32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ids.len() * 2);
    for &id in ids {
        encode_varint(id, &mut buf);
    }
    buf
}

/// Decode a sequence written by [`encode_id_sequence`].
/// Returns None on a truncated or overlong varint.
pub fn decode_id_sequence(buf: &[u8]) -> Option<Vec<u32>> {
    let mut result = Vec::with_capacity(buf.len());
    let mut pos = 0;

    while pos < buf.len() {
        let (id, consumed) = decode_varint(&buf[pos..])?;
        result.push(id);
        pos += consumed;
    }

    Some(result)
}

// Order-preserving key encodings. Tree keys are compared as raw bytes, so
// every encoder below must map numeric order onto lexicographic byte order.

/// Big-endian u64 key
#[inline]
pub fn u64_key(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Inverse of [`u64_key`]
#[inline]
pub fn key_u64(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Map an f64 onto a u64 whose unsigned order matches the float order
#[inline]
pub fn f64_sortable(value: f64) -> u64 {
    // -0.0 and 0.0 must share one key
    let value = if value == 0.0 { 0.0 } else { value };
    let bits = value.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits ^ (1 << 63)
    }
}

/// Inverse of [`f64_sortable`]
#[inline]
pub fn sortable_f64(sortable: u64) -> f64 {
    let bits = if sortable >> 63 == 1 {
        sortable ^ (1 << 63)
    } else {
        !sortable
    };
    f64::from_bits(bits)
}

/// Posting key: negated score then document id, so ascending keys walk
/// documents from most to least relevant.
pub fn posting_key(score: f64, doc_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&f64_sortable(-score).to_be_bytes());
    key[8..].copy_from_slice(&doc_id.to_be_bytes());
    key
}

/// Decode a posting key into (score, doc_id), with the score sign restored
pub fn decode_posting_key(key: &[u8]) -> Option<(f64, u64)> {
    if key.len() != 16 {
        return None;
    }
    let negated = sortable_f64(key_u64(&key[..8])?);
    let doc_id = key_u64(&key[8..])?;
    Some((-negated, doc_id))
}

/// Write a u32 in little-endian format
pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u32 in little-endian format
pub fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Write a u64 in little-endian format
pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u64 in little-endian format
pub fn read_u64_le<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let values = [0, 1, 127, 128, 16383, 16384, u32::MAX];
        for value in values {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            let (decoded, _) = decode_varint(&buf).unwrap();
            assert_eq!(value, decoded);
        }
    }

    #[test]
    fn test_varint_truncated() {
        assert!(decode_varint(&[0x80]).is_none());
        assert!(decode_id_sequence(&[1, 2, 0xFF]).is_none());
    }

    #[test]
    fn test_id_sequence_keeps_order_and_duplicates() {
        let ids = vec![7, 3, 7, 300, 1];
        let decoded = decode_id_sequence(&encode_id_sequence(&ids)).unwrap();
        assert_eq!(ids, decoded);
        assert_eq!(decode_id_sequence(&[]).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_f64_sortable_order() {
        let values = [-1e9, -2.5, -0.1, 0.0, 1e-12, 0.5, 3.0, 1e9];
        let keys: Vec<u64> = values.iter().map(|&v| f64_sortable(v)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(f64_sortable(-0.0), f64_sortable(0.0));
        for v in values {
            assert_eq!(sortable_f64(f64_sortable(v)), v);
        }
    }

    #[test]
    fn test_posting_key_orders_by_descending_score() {
        let high = posting_key(0.9, 5);
        let low = posting_key(0.3, 1);
        let tie = posting_key(0.9, 6);
        assert!(high < low);
        assert!(high < tie);

        let (score, doc) = decode_posting_key(&low).unwrap();
        assert_eq!(score, 0.3);
        assert_eq!(doc, 1);
    }
}
