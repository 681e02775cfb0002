//! Slot-selection and collision-resolution strategies.
//!
//! The linear-probe variant stores a hash fingerprint in each slot so
//! non-matching keys are rejected without touching the data arena. The
//! bucket-chain variant stores a bare chain-head offset and resolves
//! collisions by walking the chain embedded in the arena.

use strata_types::constants::{MAX_OFFSET_BITS, MIN_OFFSET_BITS, SLOT_WIDTH};
use strata_types::{CacheError, Result};
use strata_wire::hash::{hashcode_mask, offset_mask};
use strata_wire::record::parse_linear;
use strata_wire::slot::read_slot;

/// Outcome of a writer-side probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotSearch {
    /// Empty slot available; byte offset into the keyspace.
    Empty { slot_offset: u64 },
    /// The key is already present at this slot.
    Exists { slot_offset: u64 },
    /// The sweep visited every slot without finding room.
    Saturated,
}

/// Linear-probe geometry and masks. Copyable so read views can carry it.
#[derive(Clone, Copy, Debug)]
pub struct LinearProbe {
    slots: u64,
    offset_bits: u16,
    hashcode_mask: u64,
    offset_mask: u64,
    /// `slots * 8 - 8`: stored offsets are arena offsets biased by +8, so
    /// record position = keyspace_offset + stored + this.
    keyspace_size_offset: u64,
}

impl LinearProbe {
    pub fn new(offset_bits: u16, slots: u64) -> Result<LinearProbe> {
        if !(MIN_OFFSET_BITS..=MAX_OFFSET_BITS).contains(&offset_bits) {
            return Err(CacheError::ConfigInvalid(format!(
                "offset bits must be in range [{MIN_OFFSET_BITS}, {MAX_OFFSET_BITS}], got {offset_bits}"
            )));
        }
        if slots == 0 {
            return Err(CacheError::ConfigInvalid("number of key slots is zero".into()));
        }
        Ok(LinearProbe {
            slots,
            offset_bits,
            hashcode_mask: hashcode_mask(offset_bits),
            offset_mask: offset_mask(offset_bits),
            keyspace_size_offset: slots * SLOT_WIDTH as u64 - SLOT_WIDTH as u64,
        })
    }

    pub fn slots(&self) -> u64 {
        self.slots
    }

    pub fn offset_bits(&self) -> u16 {
        self.offset_bits
    }

    pub fn hashcode_bits(&self) -> u16 {
        64 - self.offset_bits
    }

    pub fn offset_mask(&self) -> u64 {
        self.offset_mask
    }

    pub fn hashcode_mask(&self) -> u64 {
        self.hashcode_mask
    }

    pub fn keyspace_size(&self) -> u64 {
        self.slots * SLOT_WIDTH as u64
    }

    /// Absolute position of a record in the data region given a slot value.
    #[inline]
    pub fn record_position(&self, slot_value: u64) -> usize {
        ((slot_value & self.offset_mask) + self.keyspace_size_offset) as usize
    }

    /// Bias an arena offset (relative to the end of the keyspace) for
    /// storage in a slot. The +8 keeps zero meaning "empty".
    #[inline]
    pub fn bias_arena_offset(&self, arena_offset: u64) -> u64 {
        arena_offset + SLOT_WIDTH as u64
    }

    /// Reader probe: find the byte offset of the slot owning `key`, or
    /// `None`. The sweep is bounded by the slot count.
    pub fn find(&self, data: &[u8], key: &[u8], hash: u64) -> Result<Option<u64>> {
        let fingerprint = hash & self.hashcode_mask;
        let mut slot_id = hash % self.slots;
        for _ in 0..self.slots {
            let slot = read_slot(data, slot_id);
            if slot & self.offset_mask == 0 {
                return Ok(None);
            }
            if slot & self.hashcode_mask == fingerprint {
                let record = parse_linear(data, self.record_position(slot))?;
                if record.key == key {
                    return Ok(Some(slot_id * SLOT_WIDTH as u64));
                }
            }
            slot_id = (slot_id + 1) % self.slots;
        }
        Ok(None)
    }

    /// Writer probe: find an empty slot for `key`, detecting an existing
    /// entry for the same key on the way. Also reports the collision count.
    pub fn find_free(&self, data: &[u8], key: &[u8], hash: u64) -> Result<(SlotSearch, u32)> {
        let fingerprint = hash & self.hashcode_mask;
        let mut slot_id = hash % self.slots;
        let mut collisions = 0u32;
        for _ in 0..self.slots {
            let slot = read_slot(data, slot_id);
            if slot & self.offset_mask == 0 {
                return Ok((
                    SlotSearch::Empty {
                        slot_offset: slot_id * SLOT_WIDTH as u64,
                    },
                    collisions,
                ));
            }
            collisions += 1;
            if slot & self.hashcode_mask == fingerprint {
                let record = parse_linear(data, self.record_position(slot))?;
                if record.key == key {
                    return Ok((
                        SlotSearch::Exists {
                            slot_offset: slot_id * SLOT_WIDTH as u64,
                        },
                        collisions,
                    ));
                }
            }
            slot_id = (slot_id + 1) % self.slots;
        }
        Ok((SlotSearch::Saturated, collisions))
    }
}

/// Bucket-chain geometry: slot count rounded up to a power of two so slot
/// selection is a mask.
#[derive(Clone, Copy, Debug)]
pub struct BucketProbe {
    slots: u64,
    slot_mask: u64,
}

impl BucketProbe {
    pub fn new(slots: u64) -> Result<BucketProbe> {
        if slots == 0 {
            return Err(CacheError::ConfigInvalid("number of key slots is zero".into()));
        }
        let rounded = slots.next_power_of_two();
        Ok(BucketProbe {
            slots: rounded,
            slot_mask: rounded - 1,
        })
    }

    /// Reconstruct from a header whose slot count was already rounded.
    pub fn from_rounded(slots: u64) -> Result<BucketProbe> {
        if slots == 0 || !slots.is_power_of_two() {
            return Err(CacheError::decode(format!(
                "bucket-chain slot count {slots} is not a power of two"
            )));
        }
        Ok(BucketProbe {
            slots,
            slot_mask: slots - 1,
        })
    }

    pub fn slots(&self) -> u64 {
        self.slots
    }

    pub fn keyspace_size(&self) -> u64 {
        self.slots * SLOT_WIDTH as u64
    }

    /// Byte offset of the chain-head slot for `hash`.
    #[inline]
    pub fn slot_offset(&self, hash: u64) -> u64 {
        (hash & self.slot_mask) * SLOT_WIDTH as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::constants::SLOT_WIDTH;
    use strata_wire::hash::key_hash;
    use strata_wire::record::append_linear;
    use strata_wire::slot::{pack_slot, write_slot};

    fn probe_fixture(slots: u64) -> (LinearProbe, Vec<u8>) {
        let probe = LinearProbe::new(16, slots).unwrap();
        let data = vec![0u8; probe.keyspace_size() as usize];
        (probe, data)
    }

    fn insert(probe: &LinearProbe, data: &mut Vec<u8>, key: &[u8], value: &[u8]) {
        let hash = key_hash(key);
        let (search, _) = probe.find_free(data, key, hash).unwrap();
        let slot_offset = match search {
            SlotSearch::Empty { slot_offset } => slot_offset,
            other => panic!("unexpected search outcome {other:?}"),
        };
        let arena_offset = data.len() as u64 - probe.keyspace_size();
        append_linear(data, key, 0, value).unwrap();
        let slot = pack_slot(
            hash,
            probe.bias_arena_offset(arena_offset),
            probe.hashcode_mask(),
        );
        write_slot(data, slot_offset / SLOT_WIDTH as u64, slot);
    }

    #[test]
    fn offset_bits_bounds_enforced() {
        assert!(LinearProbe::new(15, 8).is_err());
        assert!(LinearProbe::new(39, 8).is_err());
        assert!(LinearProbe::new(16, 0).is_err());
        assert!(LinearProbe::new(16, 8).is_ok());
    }

    #[test]
    fn find_after_insert() {
        let (probe, mut data) = probe_fixture(64);
        for i in 0..20 {
            let key = format!("key_{i}");
            insert(&probe, &mut data, key.as_bytes(), b"v\0");
        }
        for i in 0..20 {
            let key = format!("key_{i}");
            let hash = key_hash(key.as_bytes());
            assert!(probe.find(&data, key.as_bytes(), hash).unwrap().is_some(), "{key}");
        }
        let hash = key_hash(b"absent");
        assert!(probe.find(&data, b"absent", hash).unwrap().is_none());
    }

    #[test]
    fn find_free_detects_existing_key() {
        let (probe, mut data) = probe_fixture(64);
        insert(&probe, &mut data, b"dup", b"v\0");
        let hash = key_hash(b"dup");
        let (search, _) = probe.find_free(&data, b"dup", hash).unwrap();
        assert!(matches!(search, SlotSearch::Exists { .. }));
    }

    #[test]
    fn saturated_table_reports_no_room() {
        let (probe, mut data) = probe_fixture(4);
        for i in 0..4 {
            let key = format!("k{i}");
            insert(&probe, &mut data, key.as_bytes(), b"v\0");
        }
        let hash = key_hash(b"one_more");
        let (search, _) = probe.find_free(&data, b"one_more", hash).unwrap();
        assert_eq!(search, SlotSearch::Saturated);
        // Reads over a saturated table terminate too.
        assert!(probe.find(&data, b"one_more", hash).unwrap().is_none());
    }

    #[test]
    fn bucket_probe_rounds_to_power_of_two() {
        let probe = BucketProbe::new(1000).unwrap();
        assert_eq!(probe.slots(), 1024);
        assert!(BucketProbe::from_rounded(1024).is_ok());
        assert!(BucketProbe::from_rounded(1000).is_err());
    }
}
