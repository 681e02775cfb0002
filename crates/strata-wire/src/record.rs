//! Arena record codecs for both table variants.
//!
//! Linear-probe record, 6-byte packed prefix:
//!
//! ```text
//! [ key_len: u16 ][ meta: u8 ][ val_len: u24 ][ key bytes ][ payload ]
//! ```
//!
//! `meta` carries dedup flags in bits 0-4 and the value tag in bits 5-7.
//! The payload is the value bytes inline, or a 1-byte pool index when
//! `DEDUP_FLAG` is set, or a 2-byte LE pool index when
//! `DEDUP_EXTENDED_FLAG` is set. `val_len` always records the logical value
//! length.
//!
//! Bucket-chain record, 14-byte packed prefix:
//!
//! ```text
//! [ next: u64 ][ key_len: u16 ][ (tag << 24) | val_len: u32 ][ key ][ value ]
//! ```
//!
//! `next` is the keyspace-relative offset of the next record in the chain,
//! 0 at the end.

use strata_types::constants::{limit, DEDUP_EXTENDED_FLAG, DEDUP_FLAG};
use strata_types::{CacheError, Result};

/// Linear-probe record prefix width.
pub const LINEAR_RECORD_PREFIX: usize = 6;

/// Bucket-chain record prefix width.
pub const CHAIN_RECORD_PREFIX: usize = 14;

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() > limit::MAX_KEY_LEN {
        return Err(CacheError::ConfigInvalid(format!(
            "key size {} too large, max {}",
            key.len(),
            limit::MAX_KEY_LEN
        )));
    }
    Ok(())
}

fn check_value(len: usize) -> Result<()> {
    if len > limit::MAX_VALUE_LEN {
        return Err(CacheError::ConfigInvalid(format!(
            "value size {len} too large, max {}",
            limit::MAX_VALUE_LEN
        )));
    }
    Ok(())
}

fn push_prefix(buf: &mut Vec<u8>, key_len: usize, meta: u8, val_len: usize) {
    buf.extend_from_slice(&(key_len as u16).to_le_bytes());
    buf.push(meta);
    let len = (val_len as u32).to_le_bytes();
    buf.extend_from_slice(&len[..3]);
}

/// Append an inline linear-probe record; returns its start offset in `buf`.
pub fn append_linear(buf: &mut Vec<u8>, key: &[u8], tag: u8, value: &[u8]) -> Result<u64> {
    check_key(key)?;
    check_value(value.len())?;
    let at = buf.len() as u64;
    push_prefix(buf, key.len(), tag << 5, value.len());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    Ok(at)
}

/// Append a pool-reference linear-probe record; `val_len` is the logical
/// length of the pooled value.
pub fn append_linear_pooled(
    buf: &mut Vec<u8>,
    key: &[u8],
    tag: u8,
    val_len: u32,
    index: u16,
) -> Result<u64> {
    check_key(key)?;
    let at = buf.len() as u64;
    if index < 256 {
        push_prefix(buf, key.len(), tag << 5 | DEDUP_FLAG, val_len as usize);
        buf.extend_from_slice(key);
        buf.push(index as u8);
    } else {
        push_prefix(buf, key.len(), tag << 5 | DEDUP_EXTENDED_FLAG, val_len as usize);
        buf.extend_from_slice(key);
        buf.extend_from_slice(&index.to_le_bytes());
    }
    Ok(at)
}

/// How many bytes `append_linear` will consume for this pair.
pub fn linear_record_len(key_len: usize, val_len: usize) -> u64 {
    (LINEAR_RECORD_PREFIX + key_len + val_len) as u64
}

/// How many bytes `append_linear_pooled` will consume.
pub fn linear_pooled_record_len(key_len: usize, index: u16) -> u64 {
    (LINEAR_RECORD_PREFIX + key_len + if index < 256 { 1 } else { 2 }) as u64
}

/// Decoded view of a linear-probe record.
#[derive(Clone, Copy, Debug)]
pub struct LinearRecord<'a> {
    pub key: &'a [u8],
    pub tag: u8,
    dedup_bits: u8,
    pub val_len: usize,
    payload: &'a [u8],
}

impl<'a> LinearRecord<'a> {
    /// Pool index when this record references the duplicate-value pool.
    pub fn pool_index(&self) -> Option<usize> {
        if self.dedup_bits & DEDUP_FLAG != 0 {
            Some(self.payload[0] as usize)
        } else if self.dedup_bits & DEDUP_EXTENDED_FLAG != 0 {
            Some(u16::from_le_bytes([self.payload[0], self.payload[1]]) as usize)
        } else {
            None
        }
    }

    /// Inline value bytes; meaningless for pooled records.
    pub fn inline_value(&self) -> &'a [u8] {
        self.payload
    }
}

/// Parse the linear-probe record starting at `at`.
pub fn parse_linear(data: &[u8], at: usize) -> Result<LinearRecord<'_>> {
    let prefix_end = at
        .checked_add(LINEAR_RECORD_PREFIX)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| CacheError::decode(format!("truncated record prefix at {at}")))?;
    let prefix = &data[at..prefix_end];

    let key_len = u16::from_le_bytes([prefix[0], prefix[1]]) as usize;
    let meta = prefix[2];
    let tag = meta >> 5;
    let dedup_bits = meta & 0x1F;
    let val_len = u32::from_le_bytes([prefix[3], prefix[4], prefix[5], 0]) as usize;

    let payload_len = if dedup_bits & DEDUP_FLAG != 0 {
        1
    } else if dedup_bits & DEDUP_EXTENDED_FLAG != 0 {
        2
    } else {
        val_len
    };

    let key_end = prefix_end
        .checked_add(key_len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| CacheError::decode(format!("truncated record key at {at}")))?;
    let payload_end = key_end
        .checked_add(payload_len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| CacheError::decode(format!("truncated record value at {at}")))?;

    Ok(LinearRecord {
        key: &data[prefix_end..key_end],
        tag,
        dedup_bits,
        val_len,
        payload: &data[key_end..payload_end],
    })
}

/// Append a bucket-chain record with `next = 0`; returns its start offset.
pub fn append_chain(buf: &mut Vec<u8>, key: &[u8], tag: u8, value: &[u8]) -> Result<u64> {
    check_key(key)?;
    check_value(value.len())?;
    let at = buf.len() as u64;
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
    let size_and_tag = ((tag as u32) << 24) | value.len() as u32;
    buf.extend_from_slice(&size_and_tag.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    Ok(at)
}

/// Point the chain link at `record_at` (a record start or a key slot holding
/// a bare u64 head) to `next`.
pub fn patch_chain_next(data: &mut [u8], link_at: u64, next: u64) {
    let at = link_at as usize;
    data[at..at + 8].copy_from_slice(&next.to_le_bytes());
}

/// Decoded view of a bucket-chain record.
#[derive(Clone, Copy, Debug)]
pub struct ChainRecord<'a> {
    pub next: u64,
    pub key: &'a [u8],
    pub tag: u8,
    pub value: &'a [u8],
}

/// Parse the bucket-chain record starting at `at`.
pub fn parse_chain(data: &[u8], at: usize) -> Result<ChainRecord<'_>> {
    let prefix_end = at
        .checked_add(CHAIN_RECORD_PREFIX)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| CacheError::decode(format!("truncated chain record at {at}")))?;
    let prefix = &data[at..prefix_end];

    let next = u64::from_le_bytes(prefix[0..8].try_into().unwrap());
    let key_len = u16::from_le_bytes([prefix[8], prefix[9]]) as usize;
    let size_and_tag = u32::from_le_bytes(prefix[10..14].try_into().unwrap());
    let tag = (size_and_tag >> 24) as u8;
    let val_len = (size_and_tag & 0x00FF_FFFF) as usize;

    let key_end = prefix_end
        .checked_add(key_len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| CacheError::decode(format!("truncated chain key at {at}")))?;
    let val_end = key_end
        .checked_add(val_len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| CacheError::decode(format!("truncated chain value at {at}")))?;

    Ok(ChainRecord {
        next,
        key: &data[prefix_end..key_end],
        tag,
        value: &data[key_end..val_end],
    })
}
