//! Deterministic randomness for reproducible tests

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Deterministic random number generator for tests
pub struct TestRng {
    /// Internal RNG with fixed seed
    rng: StdRng,
}

impl TestRng {
    /// Create a new test RNG with the specified seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create a test RNG with the default seed 12345
    pub fn with_default_seed() -> Self {
        Self::new(12345)
    }

    /// Fill a buffer with random bytes
    pub fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }

    /// Generate a random value
    pub fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    /// Generate a random value below `bound`
    pub fn below(&mut self, bound: usize) -> usize {
        self.rng.gen_range(0..bound.max(1))
    }

    /// Random payload of `len` bytes
    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill_bytes(&mut out);
        out
    }

    /// Random fingerprint of `fp_bytes` bytes where each bit is set with probability `density`
    pub fn fingerprint(&mut self, fp_bytes: usize, density: f64) -> Vec<u8> {
        let mut fp = vec![0u8; fp_bytes];
        for (i, byte) in fp.iter_mut().enumerate() {
            for bit in 0..8 {
                if self.rng.gen_bool(density) {
                    *byte |= 1 << bit;
                }
            }
            // Keep at least one bit so every fingerprint can serve as a query.
            if i == 0 && *byte == 0 {
                *byte = 1;
            }
        }
        fp
    }

    /// Random non-empty subset of the set bits of `fp`
    pub fn sub_fingerprint(&mut self, fp: &[u8]) -> Vec<u8> {
        let mut out: Vec<u8> = fp.iter().map(|b| b & self.rng.gen::<u8>()).collect();
        if out.iter().all(|b| *b == 0) {
            if let Some((i, b)) = fp.iter().enumerate().find(|(_, b)| **b != 0) {
                out[i] = 1 << b.trailing_zeros();
            }
        }
        out
    }
}

impl Default for TestRng {
    fn default() -> Self {
        Self::with_default_seed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_fingerprints() {
        let a = TestRng::new(7).fingerprint(8, 0.3);
        let b = TestRng::new(7).fingerprint(8, 0.3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_sub_fingerprint_is_contained() {
        let mut rng = TestRng::default();
        for _ in 0..32 {
            let fp = rng.fingerprint(4, 0.5);
            let sub = rng.sub_fingerprint(&fp);
            assert!(sub.iter().any(|b| *b != 0));
            assert!(fp.iter().zip(&sub).all(|(f, s)| f & s == *s));
        }
    }
}
