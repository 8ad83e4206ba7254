//! Synthetic task generator.
//!
//! Produces fixed-size (10-input, 4-target) training pairs whose structure
//! depends on a difficulty tier. Stateless apart from the caller's generator.

use crate::prng::Prng;

pub const TASK_INPUTS: usize = 10;
pub const TASK_TARGETS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Copy four ±1 bits.
    Copy,
    /// Negate four ±1 bits.
    Negate,
    /// AND / OR of two ±1 bits.
    Logic,
    /// XOR of two ±1 bits.
    Xor,
    /// sin/cos of a phase in, sin of the doubled phase out.
    Wave,
}

impl Tier {
    /// Only the exact values 0, 1, 2, 3 select the first tiers; every other
    /// difficulty (larger, fractional, negative, NaN) is the wave tier.
    pub fn from_difficulty(difficulty: f64) -> Self {
        if difficulty == 0.0 {
            Tier::Copy
        } else if difficulty == 1.0 {
            Tier::Negate
        } else if difficulty == 2.0 {
            Tier::Logic
        } else if difficulty == 3.0 {
            Tier::Xor
        } else {
            Tier::Wave
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub input: Vec<f32>,
    pub target: Vec<f32>,
}

impl Example {
    /// Zero-pad or truncate both vectors to a network's dimensions.
    pub fn fitted(mut self, inputs: usize, targets: usize) -> Self {
        self.input.resize(inputs, 0.0);
        self.target.resize(targets, 0.0);
        self
    }
}

fn encode(bit: bool) -> f32 {
    if bit {
        1.0
    } else {
        -1.0
    }
}

pub fn generate(difficulty: f64, rng: &mut Prng) -> Example {
    let mut input = vec![0.0f32; TASK_INPUTS];
    let mut target = vec![0.0f32; TASK_TARGETS];

    match Tier::from_difficulty(difficulty) {
        Tier::Copy => {
            for i in 0..4 {
                input[i] = rng.sign();
                target[i] = input[i];
            }
        }
        Tier::Negate => {
            for i in 0..4 {
                input[i] = rng.sign();
                target[i] = -input[i];
            }
        }
        Tier::Logic => {
            input[0] = rng.sign();
            input[1] = rng.sign();
            target[0] = encode(input[0] > 0.0 && input[1] > 0.0);
            target[1] = encode(input[0] > 0.0 || input[1] > 0.0);
        }
        Tier::Xor => {
            input[0] = rng.sign();
            input[1] = rng.sign();
            target[0] = encode(input[0] != input[1]);
        }
        Tier::Wave => {
            let phase = rng.next_f32_01() * std::f32::consts::TAU;
            input[0] = phase.sin();
            input[1] = phase.cos();
            target[0] = (phase * 2.0).sin();
        }
    }

    Example { input, target }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_exact_difficulty_values() {
        assert_eq!(Tier::from_difficulty(0.0), Tier::Copy);
        assert_eq!(Tier::from_difficulty(1.0), Tier::Negate);
        assert_eq!(Tier::from_difficulty(2.0), Tier::Logic);
        assert_eq!(Tier::from_difficulty(3.0), Tier::Xor);
        assert_eq!(Tier::from_difficulty(4.0), Tier::Wave);
        assert_eq!(Tier::from_difficulty(1.01), Tier::Wave);
        assert_eq!(Tier::from_difficulty(-1.0), Tier::Wave);
    }

    #[test]
    fn copy_and_negate_shapes() {
        let mut rng = Prng::new(1);
        for _ in 0..20 {
            let ex = generate(0.0, &mut rng);
            assert_eq!(ex.input.len(), TASK_INPUTS);
            assert_eq!(ex.target.len(), TASK_TARGETS);
            assert_eq!(&ex.input[..4], &ex.target[..]);
            assert!(ex.input[4..].iter().all(|&v| v == 0.0));

            let ex = generate(1.0, &mut rng);
            for i in 0..4 {
                assert_eq!(ex.target[i], -ex.input[i]);
            }
        }
    }

    #[test]
    fn logic_tiers_match_truth_tables() {
        let mut rng = Prng::new(2);
        for _ in 0..40 {
            let ex = generate(2.0, &mut rng);
            let (a, b) = (ex.input[0] > 0.0, ex.input[1] > 0.0);
            assert_eq!(ex.target[0], encode(a && b));
            assert_eq!(ex.target[1], encode(a || b));

            let ex = generate(3.0, &mut rng);
            let (a, b) = (ex.input[0] > 0.0, ex.input[1] > 0.0);
            assert_eq!(ex.target[0], encode(a != b));
            assert_eq!(ex.target[1], 0.0);
        }
    }

    #[test]
    fn wave_tier_doubles_the_phase() {
        let mut rng = Prng::new(3);
        let ex = generate(7.0, &mut rng);
        let phase = ex.input[0].atan2(ex.input[1]);
        assert!(((phase * 2.0).sin() - ex.target[0]).abs() < 1e-4);
    }

    #[test]
    fn fitted_pads_and_truncates() {
        let mut rng = Prng::new(4);
        let ex = generate(0.0, &mut rng).fitted(3, 6);
        assert_eq!(ex.input.len(), 3);
        assert_eq!(ex.target.len(), 6);
        assert_eq!(&ex.target[4..], &[0.0, 0.0]);
    }
}
