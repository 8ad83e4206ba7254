use serde::{Deserialize, Serialize};

use crate::error::TensorError;
use crate::prng::Prng;
use crate::tensor::{Tensor, TensorInit};

#[cfg(feature = "simd")]
use wide::f32x4;

/// Per-parameter probability that `mutate` touches a weight or bias.
pub const MUTATION_PROBABILITY: f32 = 0.2;

/// Fully-connected layer with a tanh nonlinearity.
///
/// Weights are stored row-major as `[in_size, out_size]`: the weight from
/// input `i` to output `o` lives at `i * out_size + o`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    in_size: usize,
    out_size: usize,
    weights: Tensor,
    bias: Tensor,
}

/// Pre-mutation copy of a layer's parameters. Restores the layer exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSnapshot {
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl DenseLayer {
    pub fn new(
        in_size: usize,
        out_size: usize,
        init: TensorInit,
        rng: &mut Prng,
    ) -> Result<Self, TensorError> {
        Ok(Self {
            in_size,
            out_size,
            weights: Tensor::new(&[in_size, out_size], init, rng)?,
            bias: Tensor::zeros(&[out_size])?,
        })
    }

    pub(crate) fn from_parts(weights: Tensor, bias: Tensor) -> Result<Self, TensorError> {
        let (in_size, out_size) = match weights.shape() {
            [i, o] => (*i, *o),
            other => {
                return Err(TensorError::InvalidShape {
                    dims: other.iter().map(|&d| d as i64).collect(),
                })
            }
        };
        if bias.len() != out_size {
            return Err(TensorError::DimensionMismatch {
                expected: out_size,
                got: bias.len(),
            });
        }
        Ok(Self {
            in_size,
            out_size,
            weights,
            bias,
        })
    }

    pub fn in_size(&self) -> usize {
        self.in_size
    }

    pub fn out_size(&self) -> usize {
        self.out_size
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, TensorError> {
        if input.len() != self.in_size {
            return Err(TensorError::DimensionMismatch {
                expected: self.in_size,
                got: input.len(),
            });
        }
        let mut output = vec![0.0f32; self.out_size];
        self.forward_into(input, &mut output);
        Ok(output)
    }

    #[cfg(not(feature = "simd"))]
    fn forward_into(&self, input: &[f32], output: &mut [f32]) {
        let w = self.weights.data();
        let b = self.bias.data();
        for (o, out) in output.iter_mut().enumerate() {
            let mut sum = b[o];
            for (i, &x) in input.iter().enumerate() {
                sum += x * w[i * self.out_size + o];
            }
            *out = sum.tanh();
        }
    }

    /// Four output units per lane group; same accumulation order as the scalar path.
    #[cfg(feature = "simd")]
    fn forward_into(&self, input: &[f32], output: &mut [f32]) {
        let w = self.weights.data();
        let b = self.bias.data();
        let n = self.out_size;
        let mut o = 0;
        while o + 4 <= n {
            let mut acc = f32x4::from([b[o], b[o + 1], b[o + 2], b[o + 3]]);
            for (i, &x) in input.iter().enumerate() {
                let row = i * n + o;
                let wv = f32x4::from([w[row], w[row + 1], w[row + 2], w[row + 3]]);
                acc = acc + f32x4::splat(x) * wv;
            }
            let lanes = acc.to_array();
            for k in 0..4 {
                output[o + k] = lanes[k].tanh();
            }
            o += 4;
        }
        for o in o..n {
            let mut sum = b[o];
            for (i, &x) in input.iter().enumerate() {
                sum += x * w[i * n + o];
            }
            output[o] = sum.tanh();
        }
    }

    /// Perturb each parameter with probability [`MUTATION_PROBABILITY`] by
    /// `(u - 0.5) * intensity`. Returns what `revert` needs to undo it.
    pub fn mutate(&mut self, intensity: f32, rng: &mut Prng) -> LayerSnapshot {
        let snapshot = self.snapshot();
        for w in self.weights.data_mut() {
            if rng.chance(MUTATION_PROBABILITY) {
                *w += (rng.next_f32_01() - 0.5) * intensity;
            }
        }
        for b in self.bias.data_mut() {
            if rng.chance(MUTATION_PROBABILITY) {
                *b += (rng.next_f32_01() - 0.5) * intensity;
            }
        }
        snapshot
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot {
            weights: self.weights.data().to_vec(),
            bias: self.bias.data().to_vec(),
        }
    }

    pub fn revert(&mut self, snapshot: &LayerSnapshot) {
        self.weights.copy_from(&snapshot.weights);
        self.bias.copy_from(&snapshot.bias);
    }

    /// Zero every weight with magnitude below `threshold`; returns how many matched.
    pub fn prune(&mut self, threshold: f32) -> usize {
        let mut count = 0;
        for w in self.weights.data_mut() {
            if w.abs() < threshold {
                *w = 0.0;
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(in_size: usize, out_size: usize, seed: u64) -> DenseLayer {
        let mut rng = Prng::new(seed);
        DenseLayer::new(in_size, out_size, TensorInit::Random, &mut rng).unwrap()
    }

    #[test]
    fn forward_output_is_bounded_and_sized() {
        let l = layer(10, 7, 1);
        let mut rng = Prng::new(2);
        for _ in 0..50 {
            let input: Vec<f32> = (0..10).map(|_| rng.gen_range_f32(-1.0, 1.0)).collect();
            let out = l.forward(&input).unwrap();
            assert_eq!(out.len(), 7);
            assert!(out.iter().all(|v| *v > -1.0 && *v < 1.0), "{:?}", out);
        }
    }

    #[test]
    fn oversized_layers_fail_instead_of_allocating() {
        let mut rng = Prng::new(1);
        let err = DenseLayer::new(1 << 20, 1 << 20, TensorInit::Random, &mut rng).unwrap_err();
        assert!(matches!(err, TensorError::TooLarge { .. }));
        assert!(DenseLayer::new(usize::MAX, 2, TensorInit::Zeros, &mut rng).is_err());
    }

    #[test]
    fn forward_rejects_wrong_input_length() {
        let l = layer(4, 2, 1);
        assert_eq!(
            l.forward(&[0.0; 3]).unwrap_err(),
            TensorError::DimensionMismatch {
                expected: 4,
                got: 3
            }
        );
    }

    #[test]
    fn forward_does_not_mutate() {
        let l = layer(5, 5, 3);
        let before = l.clone();
        let _ = l.forward(&[1.0, -1.0, 0.5, 0.0, 2.0]).unwrap();
        assert_eq!(before, l);
    }

    #[test]
    fn identity_layer_is_tanh_of_input() {
        let mut rng = Prng::new(1);
        let l = DenseLayer::new(3, 3, TensorInit::Identity, &mut rng).unwrap();
        let out = l.forward(&[0.5, -0.25, 0.0]).unwrap();
        assert_eq!(out, vec![0.5f32.tanh(), (-0.25f32).tanh(), 0.0]);
    }

    #[test]
    fn mutate_then_revert_is_exact() {
        let mut l = layer(16, 9, 4);
        let original = l.clone();
        let mut rng = Prng::new(77);
        let snap = l.mutate(1.5, &mut rng);
        assert_ne!(l, original, "mutation should change something at this size");
        l.revert(&snap);
        assert_eq!(l, original);
        for (a, b) in l.weights().data().iter().zip(original.weights().data()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn mutation_is_bounded_by_half_intensity() {
        let mut l = layer(8, 8, 6);
        let original = l.clone();
        let mut rng = Prng::new(8);
        l.mutate(0.4, &mut rng);
        for (a, b) in l.weights().data().iter().zip(original.weights().data()) {
            assert!((a - b).abs() <= 0.2 + 1e-6);
        }
    }

    #[test]
    fn prune_counts_small_weights() {
        let weights = Tensor::from_vec(&[2, 2], vec![0.05, -0.5, -0.01, 0.3]).unwrap();
        let bias = Tensor::zeros(&[2]).unwrap();
        let mut l = DenseLayer::from_parts(weights, bias).unwrap();
        assert_eq!(l.prune(0.1), 2);
        assert_eq!(l.weights().data(), &[0.0, -0.5, 0.0, 0.3]);
        // Already-zero weights still satisfy the predicate.
        assert_eq!(l.prune(0.1), 2);
    }
}
