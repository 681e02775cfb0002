//! Artifact header codec.
//!
//! The header is a hand-packed little-endian struct. The name field comes
//! last so future u64 fields can be appended before it without breaking
//! older readers: `name_start` locates the name, and
//! `header_size - name_start` must always equal the fixed name width.

use crate::constants::{
    CACHE_HEADER_MAGIC, FORMAT_VERSION, HEADER_SIZE, MAX_CACHE_NAME_SIZE, NAME_START,
};
use crate::error::{CacheError, Result};
use crate::kind::CacheKind;

/// Parsed artifact header.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheHeader {
    pub magic_number: u16,
    pub header_size: u16,
    pub name_start: u16,
    pub version: u16,

    pub cache_kind: u16,
    pub hashcode_bits: u16,
    pub offset_bits: u16,
    pub hash_func_id: u16,

    pub reserved: u32,
    pub max_collisions: u32,

    pub max_load_factor: f64,
    pub creation_time_ms: u64,
    pub number_of_key_slots: u64,
    pub number_of_entries: u64,
    /// Arena bytes, excluding keyspace and pool trailer.
    pub data_size: u64,
    /// header + keyspace + arena.
    pub size: u64,

    pub cache_name: String,
}

impl CacheHeader {
    /// Serialize to the fixed on-disk layout. The name is truncated to the
    /// field width and NUL-padded.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.magic_number.to_le_bytes());
        buf[2..4].copy_from_slice(&self.header_size.to_le_bytes());
        buf[4..6].copy_from_slice(&self.name_start.to_le_bytes());
        buf[6..8].copy_from_slice(&self.version.to_le_bytes());

        buf[8..10].copy_from_slice(&self.cache_kind.to_le_bytes());
        buf[10..12].copy_from_slice(&self.hashcode_bits.to_le_bytes());
        buf[12..14].copy_from_slice(&self.offset_bits.to_le_bytes());
        buf[14..16].copy_from_slice(&self.hash_func_id.to_le_bytes());

        buf[16..20].copy_from_slice(&self.reserved.to_le_bytes());
        buf[20..24].copy_from_slice(&self.max_collisions.to_le_bytes());

        buf[24..32].copy_from_slice(&self.max_load_factor.to_le_bytes());
        buf[32..40].copy_from_slice(&self.creation_time_ms.to_le_bytes());
        buf[40..48].copy_from_slice(&self.number_of_key_slots.to_le_bytes());
        buf[48..56].copy_from_slice(&self.number_of_entries.to_le_bytes());
        buf[56..64].copy_from_slice(&self.data_size.to_le_bytes());
        buf[64..72].copy_from_slice(&self.size.to_le_bytes());

        let name_bytes = self.cache_name.as_bytes();
        let copy_len = name_bytes.len().min(MAX_CACHE_NAME_SIZE - 1);
        buf[NAME_START..NAME_START + copy_len].copy_from_slice(&name_bytes[..copy_len]);
        buf
    }

    /// Parse and validate a header from the start of a mapped artifact.
    pub fn decode(buf: &[u8]) -> Result<CacheHeader> {
        if buf.len() < HEADER_SIZE {
            return Err(CacheError::decode(format!(
                "file too small for header: {} < {HEADER_SIZE}",
                buf.len()
            )));
        }

        let magic_number = u16::from_le_bytes([buf[0], buf[1]]);
        if magic_number != CACHE_HEADER_MAGIC {
            return Err(CacheError::decode(format!(
                "bad magic number {magic_number}, expected {CACHE_HEADER_MAGIC}"
            )));
        }

        let header_size = u16::from_le_bytes([buf[2], buf[3]]);
        let name_start = u16::from_le_bytes([buf[4], buf[5]]);
        // A malformed file may carry any sizes; the name field is always the
        // fixed-width tail of the header.
        if header_size as usize != HEADER_SIZE
            || (header_size - name_start) as usize != MAX_CACHE_NAME_SIZE
        {
            return Err(CacheError::decode(format!(
                "bad header geometry: header_size {header_size}, name_start {name_start}"
            )));
        }

        let name_field = &buf[NAME_START..NAME_START + MAX_CACHE_NAME_SIZE];
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_CACHE_NAME_SIZE);
        let cache_name = String::from_utf8_lossy(&name_field[..name_len]).into_owned();

        Ok(CacheHeader {
            magic_number,
            header_size,
            name_start,
            version: u16::from_le_bytes([buf[6], buf[7]]),
            cache_kind: u16::from_le_bytes([buf[8], buf[9]]),
            hashcode_bits: u16::from_le_bytes([buf[10], buf[11]]),
            offset_bits: u16::from_le_bytes([buf[12], buf[13]]),
            hash_func_id: u16::from_le_bytes([buf[14], buf[15]]),
            reserved: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            max_collisions: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            max_load_factor: f64::from_le_bytes(buf[24..32].try_into().unwrap()),
            creation_time_ms: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            number_of_key_slots: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            number_of_entries: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
            data_size: u64::from_le_bytes(buf[56..64].try_into().unwrap()),
            size: u64::from_le_bytes(buf[64..72].try_into().unwrap()),
            cache_name,
        })
    }

    /// Parsed cache kind, rejecting values this runtime cannot serve.
    pub fn kind(&self) -> Result<CacheKind> {
        let kind = CacheKind::try_from(self.cache_kind)?;
        match kind {
            CacheKind::None | CacheKind::Map => Err(CacheError::decode(format!(
                "cache kind {kind} is not loadable"
            ))),
            other => Ok(other),
        }
    }

    /// Header/runtime version compatibility check.
    pub fn check_version(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(CacheError::decode(format!(
                "file version {} does not match runtime version {FORMAT_VERSION}",
                self.version
            )));
        }
        Ok(())
    }

    /// Key-value pairs for diagnostics output, in field order.
    pub fn info(&self) -> Vec<(&'static str, String)> {
        vec![
            ("magic_number", self.magic_number.to_string()),
            ("header_size", self.header_size.to_string()),
            ("name_start", self.name_start.to_string()),
            ("version", self.version.to_string()),
            ("cache_kind", self.cache_kind.to_string()),
            ("hashcode_bits", self.hashcode_bits.to_string()),
            ("offset_bits", self.offset_bits.to_string()),
            ("hash_func_id", self.hash_func_id.to_string()),
            ("max_collisions", self.max_collisions.to_string()),
            ("max_load_factor", self.max_load_factor.to_string()),
            ("creation_time_ms", self.creation_time_ms.to_string()),
            ("number_of_key_slots", self.number_of_key_slots.to_string()),
            ("number_of_entries", self.number_of_entries.to_string()),
            ("data_size", self.data_size.to_string()),
            ("size", self.size.to_string()),
            ("cache_name", self.cache_name.clone()),
        ]
    }
}
