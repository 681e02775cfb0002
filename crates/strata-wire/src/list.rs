//! Value payload encodings.
//!
//! Strings are stored with one trailing NUL so zero-copy consumers can hand
//! the bytes to C-string APIs; readers trim it. String lists store a u16
//! element count followed by u16-length-prefixed, NUL-terminated elements.
//! Scalars are raw little-endian. Float lists are packed LE f32.

use strata_types::constants::limit;
use strata_types::{CacheError, Result};

/// Encode a string value: raw bytes plus the terminator.
pub fn string_bytes(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 1);
    out.extend_from_slice(value);
    out.push(0);
    out
}

/// Trim the terminator a string value was stored with.
pub fn trim_nul(bytes: &[u8]) -> &[u8] {
    match bytes.last() {
        Some(0) => &bytes[..bytes.len() - 1],
        _ => bytes,
    }
}

/// Truncate at the first NUL, for the legacy no-terminator insert tag.
pub fn truncate_at_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}

/// Encode a string list.
pub fn string_list_bytes<S: AsRef<[u8]>>(items: &[S]) -> Result<Vec<u8>> {
    if items.len() > limit::MAX_LIST_LEN {
        return Err(CacheError::ConfigInvalid(format!(
            "list size {} too large, max {}",
            items.len(),
            limit::MAX_LIST_LEN
        )));
    }

    let mut out = Vec::new();
    out.extend_from_slice(&(items.len() as u16).to_le_bytes());
    for item in items {
        let item = item.as_ref();
        if item.len() > limit::MAX_LIST_ELEM_LEN {
            return Err(CacheError::ConfigInvalid(format!(
                "list element size {} too large, max {}",
                item.len(),
                limit::MAX_LIST_ELEM_LEN
            )));
        }
        out.extend_from_slice(&(item.len() as u16).to_le_bytes());
        out.extend_from_slice(item);
        out.push(0);
    }
    Ok(out)
}

/// Decode a string list into borrowed elements (terminators excluded).
pub fn parse_string_list(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    if bytes.len() < 2 {
        return Err(CacheError::decode("string list shorter than its count"));
    }
    let count = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let mut out = Vec::with_capacity(count);
    let mut at = 2usize;
    for _ in 0..count {
        if at + 2 > bytes.len() {
            return Err(CacheError::decode("string list truncated at element length"));
        }
        let len = u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize;
        at += 2;
        // +1 for the element terminator.
        if at + len + 1 > bytes.len() {
            return Err(CacheError::decode("string list truncated at element body"));
        }
        out.push(&bytes[at..at + len]);
        at += len + 1;
    }
    Ok(out)
}

pub fn bool_bytes(value: bool) -> [u8; 1] {
    [value as u8]
}

pub fn parse_bool(bytes: &[u8]) -> Result<bool> {
    if bytes.len() != 1 {
        return Err(CacheError::decode(format!(
            "bool payload has size {}, expected 1",
            bytes.len()
        )));
    }
    Ok(bytes[0] != 0)
}

pub fn i64_bytes(value: i64) -> [u8; 8] {
    value.to_le_bytes()
}

pub fn parse_i64(bytes: &[u8]) -> Result<i64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CacheError::decode(format!("int64 payload has size {}, expected 8", bytes.len())))?;
    Ok(i64::from_le_bytes(arr))
}

pub fn f64_bytes(value: f64) -> [u8; 8] {
    value.to_le_bytes()
}

pub fn parse_f64(bytes: &[u8]) -> Result<f64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CacheError::decode(format!("double payload has size {}, expected 8", bytes.len())))?;
    Ok(f64::from_le_bytes(arr))
}

pub fn float_list_bytes(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn parse_float_list(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(CacheError::decode(format!(
            "float list payload size {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
