//! Key hashing and slot-field masks.
//!
//! Keys are hashed with seedless XXH3-64 so writers and readers agree
//! without configuration; the header records the algorithm id. A
//! linear-probe slot packs the upper `64 - offset_bits` hash bits (the
//! fingerprint) above an `offset_bits`-wide arena offset.

use strata_types::constants::hash_func;

/// Hash a key for slot selection and fingerprinting.
#[inline]
pub fn key_hash(key: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(key)
}

/// Algorithm id stored in the header.
pub fn hash_func_id() -> u16 {
    hash_func::XXH3
}

/// Mask keeping the fingerprint bits of a hash.
#[inline]
pub fn hashcode_mask(offset_bits: u16) -> u64 {
    (!0u64 >> offset_bits) << offset_bits
}

/// Mask keeping the arena-offset bits of a slot.
#[inline]
pub fn offset_mask(offset_bits: u16) -> u64 {
    (1u64 << offset_bits) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = key_hash(b"key_1");
        let b = key_hash(b"key_1");
        assert_eq!(a, b);
        assert_ne!(a, key_hash(b"key_2"));
    }

    #[test]
    fn masks_partition_the_word() {
        for bits in [16u16, 35, 38] {
            let hi = hashcode_mask(bits);
            let lo = offset_mask(bits);
            assert_eq!(hi & lo, 0);
            assert_eq!(hi | lo, !0u64);
            assert_eq!(lo.count_ones(), bits as u32);
        }
    }

    #[test]
    fn fingerprint_survives_masking() {
        let hash = key_hash(b"some key");
        let bits = 35;
        let slot = (hash & hashcode_mask(bits)) | 42;
        assert_eq!(slot & hashcode_mask(bits), hash & hashcode_mask(bits));
        assert_eq!(slot & offset_mask(bits), 42);
    }
}
