//! Fixtures for fingerprints and shared-memory namespaces

use molsift_types::config::{MirrorConfig, MirrorRole};

/// A mirror configuration in a namespace no other test shares.
///
/// Polling is fast so busy scenarios finish quickly.
pub fn unique_mirror_config(role: MirrorRole) -> MirrorConfig {
    MirrorConfig {
        instance: format!("t{}", uuid::Uuid::new_v4().simple()),
        schema: "test".to_string(),
        poll_attempts: 16,
        poll_interval_ms: 1,
        role,
    }
}

/// Builds a fingerprint of `fp_bytes` bytes with the given bit positions set.
///
/// Bit `i` is bit `i % 8` of byte `i / 8`.
pub fn fp_from_bits(fp_bytes: usize, bits: &[usize]) -> Vec<u8> {
    let mut fp = vec![0u8; fp_bytes];
    for &bit in bits {
        if let Some(byte) = fp.get_mut(bit / 8) {
            *byte |= 1 << (bit % 8);
        }
    }
    fp
}

/// Whether every bit of `query` is also set in `fp`.
pub fn contains_all(fp: &[u8], query: &[u8]) -> bool {
    fp.len() == query.len() && fp.iter().zip(query).all(|(f, q)| f & q == *q)
}

/// Ids of every stored fingerprint that contains `query`, in ascending order.
pub fn brute_force_matches(stored: &[Vec<u8>], query: &[u8]) -> Vec<u64> {
    stored
        .iter()
        .enumerate()
        .filter(|(_, fp)| contains_all(fp, query))
        .map(|(i, _)| i as u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp_from_bits_layout() {
        assert_eq!(fp_from_bits(2, &[0, 9, 15]), vec![0b0000_0001, 0b1000_0010]);
        assert!(contains_all(&[0xff, 0x01], &[0x0f, 0x01]));
        assert!(!contains_all(&[0x0f], &[0x10]));
    }
}
