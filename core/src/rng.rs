//! Deterministic random number generation for demo datasets.
//!
//! RULE: demo data never touches a platform RNG.
//! Each concern draws from its own stream, seeded from
//! (master_seed XOR stream_index), so adding a stream never shifts
//! the values another stream produces.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Stable stream slots. Indices must never change once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSlot {
    Catalog = 0,
    Usage   = 1,
    Keys    = 2,
}

pub struct StreamRng {
    inner: Pcg64Mcg,
}

impl StreamRng {
    pub fn new(master_seed: u64, slot: StreamSlot) -> Self {
        let derived_seed = master_seed ^ (slot as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Integer in [0, n). `n` of zero yields zero.
    pub fn next_below(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (self.inner.next_u64() % n as u64) as usize
    }

    /// Float in [low, high).
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    /// Bernoulli trial.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.next_below(items.len())]
    }

    pub fn fill_bytes(&mut self, bytes: &mut [u8]) {
        self.inner.fill_bytes(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = StreamRng::new(7, StreamSlot::Usage);
        let mut b = StreamRng::new(7, StreamSlot::Usage);
        for _ in 0..32 {
            assert_eq!(a.next_f64(), b.next_f64());
        }
    }

    #[test]
    fn streams_are_independent() {
        let mut a = StreamRng::new(7, StreamSlot::Catalog);
        let mut b = StreamRng::new(7, StreamSlot::Usage);
        let xs: Vec<f64> = (0..8).map(|_| a.next_f64()).collect();
        let ys: Vec<f64> = (0..8).map(|_| b.next_f64()).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn uniform_stays_in_range() {
        let mut rng = StreamRng::new(99, StreamSlot::Keys);
        for _ in 0..1000 {
            let v = rng.uniform(5.0, 10.0);
            assert!((5.0..10.0).contains(&v));
        }
    }
}
