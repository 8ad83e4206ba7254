// Minimal PRNG (no external crates).
//
// This is NOT cryptographically secure.
// It drives weight init, mutation noise, synthetic tasks and `Math.random`
// inside scripts, so a fixed seed reproduces a whole run.

use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    /// Seed from the wall clock. Used when no seed is configured.
    pub fn from_entropy() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x2545F4914F6CDD1D);
        Self::new(splitmix64(nanos))
    }

    pub(crate) fn from_state(state: u64) -> Self {
        Self::new(state)
    }

    pub(crate) fn state(&self) -> u64 {
        self.state
    }

    /// Derive an independent generator (e.g. one per network).
    pub fn split(&mut self) -> Prng {
        Prng::new(splitmix64(self.next_u64()))
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    #[inline]
    pub fn next_f32_01(&mut self) -> f32 {
        // Convert to [0,1). 24 bits so the f32 never rounds up to 1.0.
        let x = self.next_u32() >> 8;
        (x as f32) / ((1u32 << 24) as f32)
    }

    #[inline]
    pub fn next_f64_01(&mut self) -> f64 {
        let x = self.next_u64() >> 11;
        (x as f64) / ((1u64 << 53) as f64)
    }

    #[inline]
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32_01()
    }

    #[inline]
    pub fn gen_range_usize(&mut self, low: usize, high: usize) -> usize {
        if high <= low {
            return low;
        }
        let span = (high - low) as u32;
        let v = self.next_u32() % span;
        low + v as usize
    }

    /// True with probability `p`.
    #[inline]
    pub fn chance(&mut self, p: f32) -> bool {
        self.next_f32_01() < p
    }

    /// +1.0 or -1.0 with equal probability.
    #[inline]
    pub fn sign(&mut self) -> f32 {
        if self.next_f32_01() > 0.5 {
            1.0
        } else {
            -1.0
        }
    }

    /// Gaussian sample via Box-Muller.
    pub fn normal(&mut self, mean: f64, std: f64) -> f64 {
        let u = 1.0 - self.next_f64_01();
        let v = self.next_f64_01();
        let z = (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos();
        z * std + mean
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn unit_samples_stay_in_range() {
        let mut rng = Prng::new(42);
        for _ in 0..10_000 {
            let f = rng.next_f32_01();
            assert!((0.0..1.0).contains(&f));
            let d = rng.next_f64_01();
            assert!((0.0..1.0).contains(&d));
        }
    }

    #[test]
    fn split_diverges_from_parent() {
        let mut parent = Prng::new(99);
        let mut child = parent.split();
        let p: Vec<u32> = (0..8).map(|_| parent.next_u32()).collect();
        let c: Vec<u32> = (0..8).map(|_| child.next_u32()).collect();
        assert_ne!(p, c);
    }

    #[test]
    fn normal_is_roughly_centered() {
        let mut rng = Prng::new(3);
        let n = 20_000;
        let mean: f64 = (0..n).map(|_| rng.normal(2.0, 0.5)).sum::<f64>() / n as f64;
        assert!((mean - 2.0).abs() < 0.05, "mean was {}", mean);
    }
}
