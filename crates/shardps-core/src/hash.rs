//! Hash functions shared by the hash table and the shard policies.
//!
//! [`murmur_hash2_64`] is MurmurHash64A and is used to place dense tensors on
//! shards by name. [`murmur3_mix`] is the MurmurHash3 64-bit finalizer and is
//! used to scatter sparse row ids across hash buckets.

/// Seed used when hashing tensor names.
pub const NAME_HASH_SEED: u64 = 0xc70f_6907;

/// MurmurHash64A over `data` with the given seed.
///
/// Blocks are read little-endian so the result is the same on every host.
pub fn murmur_hash2_64(data: &[u8], seed: u64) -> u64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let mut h = seed ^ (data.len() as u64).wrapping_mul(M);
    let mut blocks = data.chunks_exact(8);
    for block in &mut blocks {
        let mut k = u64::from_le_bytes([
            block[0], block[1], block[2], block[3], block[4], block[5], block[6], block[7],
        ]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        for (i, &byte) in tail.iter().enumerate().rev() {
            h ^= u64::from(byte) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

/// Hashes a tensor name with [`NAME_HASH_SEED`].
pub fn hash_name(name: &str) -> u64 {
    murmur_hash2_64(name.as_bytes(), NAME_HASH_SEED)
}

/// MurmurHash3 64-bit finalizer.
#[inline]
pub fn murmur3_mix(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur_hash2_known_values() {
        assert_eq!(hash_name(""), 0x553e_9390_1e46_2a6e);
        assert_eq!(hash_name("a"), 0x454d_dee4_88c1_ed6b);
        assert_eq!(hash_name("emb_user"), 0xb8fd_547b_5546_baee);
        assert_eq!(hash_name("dense/w0"), 0x173b_6789_9610_f194);
    }

    #[test]
    fn test_murmur3_mix() {
        assert_eq!(murmur3_mix(0), 0);
        assert_eq!(murmur3_mix(1), 0xb456_bcfc_34c2_cb2c);
    }
}
