//! Zero-copy typed lookups over a mapped data region.
//!
//! A [`CacheView`] borrows the data region of one generation and resolves
//! keys to value slices without copying. Typed access goes through a single
//! tag-checked read; the reader's owned getters and any zero-copy consumers
//! share it. Type policing is strict: a tag mismatch is `NotFound`, never a
//! coercion.

use tracing::debug;

use strata_types::{CacheError, CacheKind, Result, ValueKind};
use strata_wire::hash::key_hash;
use strata_wire::list;
use strata_wire::record::{parse_chain, parse_linear};
use strata_wire::slot::read_slot;

use crate::probe::{BucketProbe, LinearProbe};

/// Table access strategy carried by views and generations.
#[derive(Clone, Copy, Debug)]
pub enum TableProbe {
    Linear(LinearProbe),
    Bucket(BucketProbe),
}

/// Borrowed read view over one generation's data region.
#[derive(Clone, Copy)]
pub struct CacheView<'a> {
    data: &'a [u8],
    kind: CacheKind,
    table: TableProbe,
    /// Duplicate-pool spans into `data`, index order.
    pool: &'a [(usize, usize)],
    /// Chain-walk bound; a corrupt chain must not loop forever.
    max_chain: u64,
}

impl<'a> CacheView<'a> {
    pub fn new(
        data: &'a [u8],
        kind: CacheKind,
        table: TableProbe,
        pool: &'a [(usize, usize)],
        entries: u64,
    ) -> CacheView<'a> {
        CacheView {
            data,
            kind,
            table,
            pool,
            max_chain: entries + 1,
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Key presence, regardless of value type.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Stored tag of `key`.
    pub fn get_type(&self, key: &[u8]) -> Result<ValueKind> {
        match self.lookup(key)? {
            Some((_, tag)) => ValueKind::try_from(tag),
            None => Err(CacheError::NotFound),
        }
    }

    /// The single typed read: raw value bytes if the key exists *and* its
    /// tag matches, `NotFound` otherwise.
    pub fn get_typed(&self, key: &[u8], expected: ValueKind) -> Result<&'a [u8]> {
        match self.lookup(key)? {
            Some((value, tag)) if tag == expected as u8 => Ok(value),
            Some((_, tag)) => {
                debug!(
                    key = %String::from_utf8_lossy(key),
                    expected = %expected,
                    actual = tag,
                    "type mismatch"
                );
                Err(CacheError::NotFound)
            }
            None => Err(CacheError::NotFound),
        }
    }

    /// String value with its stored terminator trimmed.
    pub fn get_string(&self, key: &[u8]) -> Result<&'a [u8]> {
        Ok(list::trim_nul(self.get_typed(key, ValueKind::String)?))
    }

    pub fn get_bool(&self, key: &[u8]) -> Result<bool> {
        list::parse_bool(self.get_typed(key, ValueKind::Bool)?)
    }

    pub fn get_i64(&self, key: &[u8]) -> Result<i64> {
        list::parse_i64(self.get_typed(key, ValueKind::Int64)?)
    }

    pub fn get_f64(&self, key: &[u8]) -> Result<f64> {
        list::parse_f64(self.get_typed(key, ValueKind::Double)?)
    }

    /// String-list elements, terminators excluded, zero-copy.
    pub fn get_string_list(&self, key: &[u8]) -> Result<Vec<&'a [u8]>> {
        list::parse_string_list(self.get_typed(key, ValueKind::StringList)?)
    }

    pub fn get_float_list(&self, key: &[u8]) -> Result<Vec<f32>> {
        list::parse_float_list(self.get_typed(key, ValueKind::FloatList)?)
    }

    /// Locate `key` and resolve its value bytes (through the pool when the
    /// record references it). `None` means absent.
    fn lookup(&self, key: &[u8]) -> Result<Option<(&'a [u8], u8)>> {
        match self.table {
            TableProbe::Linear(probe) => self.lookup_linear(probe, key),
            TableProbe::Bucket(probe) => self.lookup_chain(probe, key),
        }
    }

    fn lookup_linear(&self, probe: LinearProbe, key: &[u8]) -> Result<Option<(&'a [u8], u8)>> {
        let hash = key_hash(key);
        let Some(slot_offset) = probe.find(self.data, key, hash)? else {
            return Ok(None);
        };
        let slot = read_slot(self.data, slot_offset / 8);
        let record = parse_linear(self.data, probe.record_position(slot))?;

        let value = match record.pool_index() {
            Some(index) => {
                let (at, len) = *self.pool.get(index).ok_or_else(|| {
                    CacheError::decode(format!(
                        "record references pool entry {index} but the pool has {}",
                        self.pool.len()
                    ))
                })?;
                &self.data[at..at + len]
            }
            None => record.inline_value(),
        };
        Ok(Some((value, record.tag)))
    }

    fn lookup_chain(&self, probe: BucketProbe, key: &[u8]) -> Result<Option<(&'a [u8], u8)>> {
        let hash = key_hash(key);
        let slot_offset = probe.slot_offset(hash);
        let mut at = read_slot(self.data, slot_offset / 8);
        let mut walked = 0u64;
        while at != 0 {
            if walked > self.max_chain {
                return Err(CacheError::decode("bucket chain longer than entry count"));
            }
            walked += 1;
            let record = parse_chain(self.data, at as usize)?;
            if record.key == key {
                return Ok(Some((record.value, record.tag)));
            }
            at = record.next;
        }
        Ok(None)
    }
}
