//! Duplicate-value pool trailer codec.
//!
//! The pool lives after the arena, at the very end of the artifact:
//!
//! ```text
//! [ count: u16 ][ count x len: u32 ][ concatenated value bytes ][ back: u64 ]
//! ```
//!
//! The trailing u64 is the distance from end-of-file back to the start of the
//! pool section, trailer included. An empty pool is the 8-byte zero trailer
//! alone. Records reference pool entries by insertion index.

use strata_types::constants::limit;
use strata_types::{CacheError, Result};

/// Size of the bare trailer written when no pool values exist.
pub const EMPTY_POOL_LEN: usize = 8;

/// Encode the pool section for `values`, in index order.
pub fn encode_pool<S: AsRef<[u8]>>(values: &[S]) -> Result<Vec<u8>> {
    if values.len() > limit::MAX_POOL_VALUES {
        return Err(CacheError::ConfigInvalid(format!(
            "{} duplicate values exceed the pool capacity {}",
            values.len(),
            limit::MAX_POOL_VALUES
        )));
    }

    if values.is_empty() {
        return Ok(0u64.to_le_bytes().to_vec());
    }

    let bytes_total: usize = values.iter().map(|v| v.as_ref().len()).sum();
    let section = 2 + values.len() * 4 + bytes_total + 8;
    let mut out = Vec::with_capacity(section);

    out.extend_from_slice(&(values.len() as u16).to_le_bytes());
    for value in values {
        out.extend_from_slice(&(value.as_ref().len() as u32).to_le_bytes());
    }
    for value in values {
        out.extend_from_slice(value.as_ref());
    }
    out.extend_from_slice(&(section as u64).to_le_bytes());
    Ok(out)
}

/// Decode the pool from a full data region (keyspace + arena + pool).
///
/// Returns `(offset, len)` spans into `data` in index order, so callers can
/// keep zero-copy references without borrowing from a temporary.
pub fn decode_pool(data: &[u8]) -> Result<Vec<(usize, usize)>> {
    if data.len() < EMPTY_POOL_LEN {
        return Err(CacheError::decode("data region shorter than pool trailer"));
    }
    let back = u64::from_le_bytes(data[data.len() - 8..].try_into().unwrap()) as usize;
    if back == 0 {
        return Ok(Vec::new());
    }
    if back > data.len() {
        return Err(CacheError::decode(format!(
            "pool trailer points {back} bytes back in a {}-byte region",
            data.len()
        )));
    }

    let section_start = data.len() - back;
    let mut at = section_start;
    if at + 2 > data.len() {
        return Err(CacheError::decode("pool section shorter than its count"));
    }
    let count = u16::from_le_bytes([data[at], data[at + 1]]) as usize;
    at += 2;

    if at + count * 4 > data.len() {
        return Err(CacheError::decode("pool section truncated at lengths"));
    }
    let mut lengths = Vec::with_capacity(count);
    for _ in 0..count {
        lengths.push(u32::from_le_bytes(data[at..at + 4].try_into().unwrap()) as usize);
        at += 4;
    }

    let mut spans = Vec::with_capacity(count);
    for len in lengths {
        if at + len > data.len() - 8 {
            return Err(CacheError::decode("pool section truncated at values"));
        }
        spans.push((at, len));
        at += len;
    }

    // The section must account for every byte back to the trailer.
    if at + 8 != data.len() {
        return Err(CacheError::decode(format!(
            "pool section size mismatch: ended at {at}, expected {}",
            data.len() - 8
        )));
    }

    Ok(spans)
}

/// Bytes at the end of the data region that belong to the pool section.
pub fn pool_section_len(data: &[u8]) -> Result<usize> {
    if data.len() < EMPTY_POOL_LEN {
        return Err(CacheError::decode("data region shorter than pool trailer"));
    }
    let back = u64::from_le_bytes(data[data.len() - 8..].try_into().unwrap()) as usize;
    if back == 0 {
        Ok(EMPTY_POOL_LEN)
    } else if back <= data.len() {
        Ok(back)
    } else {
        Err(CacheError::decode("pool trailer out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_round_trip() {
        let encoded = encode_pool::<&[u8]>(&[]).unwrap();
        assert_eq!(encoded.len(), EMPTY_POOL_LEN);
        let spans = decode_pool(&encoded).unwrap();
        assert!(spans.is_empty());
        assert_eq!(pool_section_len(&encoded).unwrap(), EMPTY_POOL_LEN);
    }

    #[test]
    fn pool_round_trip() {
        let values: Vec<&[u8]> = vec![b"frequent", b"values", b"", b"again"];
        let mut data = vec![0xAAu8; 64]; // simulated keyspace + arena
        let section = encode_pool(&values).unwrap();
        data.extend_from_slice(&section);

        let spans = decode_pool(&data).unwrap();
        assert_eq!(spans.len(), values.len());
        for (span, expected) in spans.iter().zip(&values) {
            assert_eq!(&data[span.0..span.0 + span.1], *expected);
        }
        assert_eq!(pool_section_len(&data).unwrap(), section.len());
    }

    #[test]
    fn corrupt_trailer_detected() {
        let values: Vec<&[u8]> = vec![b"v"];
        let mut data = encode_pool(&values).unwrap();
        let len = data.len();
        data[len - 8..].copy_from_slice(&(len as u64 + 100).to_le_bytes());
        assert!(decode_pool(&data).is_err());
    }

    #[test]
    fn truncated_section_detected() {
        let values: Vec<&[u8]> = vec![b"abc", b"def"];
        let good = encode_pool(&values).unwrap();
        // Rebuild with a trailer claiming one byte more than the section has.
        let mut bad = good.clone();
        let len = bad.len();
        bad[len - 8..].copy_from_slice(&(len as u64 + 1).to_le_bytes());
        // Pad front so the back-distance lands inside the buffer.
        let mut data = vec![0u8; 1];
        data.extend_from_slice(&bad);
        assert!(decode_pool(&data).is_err());
    }
}
