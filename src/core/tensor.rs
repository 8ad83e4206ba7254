use serde::{Deserialize, Serialize};

use crate::error::TensorError;
use crate::prng::Prng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorInit {
    Zeros,
    #[serde(alias = "rand")]
    Random,
    Identity,
}

impl TensorInit {
    /// Parse the script-facing mode names (`"zeros"`, `"rand"`, `"identity"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "zeros" => Some(TensorInit::Zeros),
            "rand" | "random" => Some(TensorInit::Random),
            "identity" | "eye" => Some(TensorInit::Identity),
            _ => None,
        }
    }
}

/// Upper bound on the element count of a single tensor.
pub const MAX_ELEMENTS: usize = 1 << 26;

/// Element count of `shape`, rejecting empty or zero dimensions and products
/// that overflow or pass [`MAX_ELEMENTS`].
pub fn element_count(shape: &[usize]) -> Result<usize, TensorError> {
    if shape.is_empty() || shape.contains(&0) {
        return Err(TensorError::InvalidShape {
            dims: shape.iter().map(|&d| i64::try_from(d).unwrap_or(i64::MAX)).collect(),
        });
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .filter(|&n| n <= MAX_ELEMENTS)
        .ok_or_else(|| TensorError::TooLarge {
            dims: shape.to_vec(),
            limit: MAX_ELEMENTS,
        })
}

/// Fixed-shape numeric buffer. `data.len() == shape.iter().product()` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Identity on anything other than a 2-D square shape falls back to random.
    pub fn new(shape: &[usize], init: TensorInit, rng: &mut Prng) -> Result<Self, TensorError> {
        let size = element_count(shape)?;
        let mut data = vec![0.0f32; size];

        let square = shape.len() == 2 && shape[0] == shape[1];
        match init {
            TensorInit::Zeros => {}
            TensorInit::Identity if square => {
                let n = shape[0];
                for i in 0..n {
                    data[i * n + i] = 1.0;
                }
            }
            TensorInit::Random | TensorInit::Identity => {
                let scale = (2.0 / shape[0] as f32).sqrt();
                for v in data.iter_mut() {
                    *v = rng.gen_range_f32(-1.0, 1.0) * scale;
                }
            }
        }

        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn zeros(shape: &[usize]) -> Result<Self, TensorError> {
        // Zero init never draws from the generator.
        Self::new(shape, TensorInit::Zeros, &mut Prng::new(1))
    }

    /// Wrap an existing buffer; fails if the buffer does not fill the shape.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, TensorError> {
        let size = element_count(shape)?;
        if data.len() != size {
            return Err(TensorError::DimensionMismatch {
                expected: size,
                got: data.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrite the whole buffer from a snapshot of the same length.
    pub(crate) fn copy_from(&mut self, values: &[f32]) {
        self.data.copy_from_slice(values);
    }
}
