//! HiveMind networks: a growable stack of dense layers trained by greedy
//! hill-climbing (mutate, evaluate, keep or revert).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::TensorError;
use crate::layer::DenseLayer;
use crate::prng::Prng;
use crate::tensor::TensorInit;

/// Minimum gap between two automatic expansions, in milliseconds.
pub const EXPANSION_COOLDOWN_MS: u64 = 5_000;

/// `trainTask` mutates with `plasticity * TRAIN_INTENSITY_SCALE`.
pub const TRAIN_INTENSITY_SCALE: f32 = 0.2;

/// Wall-clock milliseconds since the Unix epoch, the clock expansions use.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_input_size", rename = "in")]
    pub input_size: usize,
    #[serde(default = "default_output_size", rename = "out")]
    pub output_size: usize,
    #[serde(default = "default_hidden_size", rename = "hidden")]
    pub hidden_size: usize,
    #[serde(default = "default_capacity")]
    pub capacity: f64,
    #[serde(default = "default_plasticity")]
    pub plasticity: f32,
}

fn default_input_size() -> usize {
    10
}

fn default_output_size() -> usize {
    4
}

fn default_hidden_size() -> usize {
    16
}

fn default_capacity() -> f64 {
    10_000.0
}

fn default_plasticity() -> f32 {
    0.5
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_size: default_input_size(),
            output_size: default_output_size(),
            hidden_size: default_hidden_size(),
            capacity: default_capacity(),
            plasticity: default_plasticity(),
        }
    }
}

impl NetworkConfig {
    pub fn with_sizes(input_size: usize, hidden_size: usize, output_size: usize) -> Self {
        Self {
            input_size,
            hidden_size,
            output_size,
            ..Self::default()
        }
    }

    pub fn with_plasticity(mut self, plasticity: f32) -> Self {
        self.plasticity = plasticity;
        self
    }
}

/// Result of one hill-climbing step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStep {
    pub loss: f32,
    pub accuracy: f32,
    /// False when the mutation made things worse and was reverted.
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    layers: Vec<DenseLayer>,

    pub plasticity: f32,
    pub satisfaction: f32,
    pub capacity: f64,

    ltm: Vec<(String, serde_json::Value)>,
    pub current_goal: Option<serde_json::Value>,
    last_expansion_ms: u64,

    rng: Prng,
}

fn squared_error(pred: &[f32], target: &[f32]) -> f32 {
    pred.iter()
        .enumerate()
        .map(|(i, p)| {
            let t = target.get(i).copied().unwrap_or(0.0);
            (p - t) * (p - t)
        })
        .sum()
}

impl Network {
    pub fn new(name: impl Into<String>, cfg: &NetworkConfig, rng: Prng) -> Result<Self, TensorError> {
        let mut rng = rng;
        let layers = vec![
            DenseLayer::new(cfg.input_size, cfg.hidden_size, TensorInit::Random, &mut rng)?,
            DenseLayer::new(cfg.hidden_size, cfg.output_size, TensorInit::Random, &mut rng)?,
        ];
        Ok(Self {
            name: name.into(),
            layers,
            plasticity: cfg.plasticity,
            satisfaction: 0.5,
            capacity: cfg.capacity,
            ltm: Vec::new(),
            current_goal: None,
            last_expansion_ms: 0,
            rng,
        })
    }

    pub(crate) fn from_parts(name: String, layers: Vec<DenseLayer>, rng: Prng) -> Self {
        Self {
            name,
            layers,
            plasticity: default_plasticity(),
            satisfaction: 0.5,
            capacity: default_capacity(),
            ltm: Vec::new(),
            current_goal: None,
            last_expansion_ms: 0,
            rng,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map(|l| l.in_size()).unwrap_or(0)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map(|l| l.out_size()).unwrap_or(0)
    }

    pub fn last_expansion_ms(&self) -> u64 {
        self.last_expansion_ms
    }

    pub(crate) fn set_last_expansion_ms(&mut self, ms: u64) {
        self.last_expansion_ms = ms;
    }

    pub(crate) fn rng_state(&self) -> u64 {
        self.rng.state()
    }

    /// Learning rate used by `GB.hive.trainTask`.
    pub fn mutation_intensity(&self) -> f32 {
        self.plasticity * TRAIN_INTENSITY_SCALE
    }

    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, TensorError> {
        let mut x = input.to_vec();
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    /// Insert a layer just before the output layer.
    ///
    /// The new layer maps `layers[len-2].out -> layers[len-1].in`; those always
    /// match, so it starts as an identity and the network output barely moves.
    pub fn expand(&mut self, now_ms: u64) -> Result<(), TensorError> {
        let n = self.layers.len();
        let (prev_out, next_in) = match n {
            0 => return Ok(()),
            1 => (self.layers[0].in_size(), self.layers[0].in_size()),
            _ => (self.layers[n - 2].out_size(), self.layers[n - 1].in_size()),
        };
        let init = if prev_out == next_in {
            TensorInit::Identity
        } else {
            TensorInit::Random
        };
        let layer = DenseLayer::new(prev_out, next_in, init, &mut self.rng)?;
        self.layers.insert(n - 1, layer);
        self.last_expansion_ms = now_ms;
        Ok(())
    }

    /// Expand when the cooldown has passed and either the network is unhappy
    /// but plastic, or a 1% random trigger fires.
    pub fn auto_expand_if_ready(&mut self, now_ms: u64) -> Result<bool, TensorError> {
        if now_ms.saturating_sub(self.last_expansion_ms) <= EXPANSION_COOLDOWN_MS {
            return Ok(false);
        }
        let struggling = self.satisfaction < 0.6 && self.plasticity > 0.8;
        let lucky = self.rng.next_f32_01() > 0.99;
        if struggling || lucky {
            self.expand(now_ms)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn prune_weights(&mut self, threshold: f32) -> usize {
        self.layers.iter_mut().map(|l| l.prune(threshold)).sum()
    }

    /// Mutate every layer without evaluating (evolutionary operator).
    pub fn mutate_all(&mut self, rate: f32) {
        let rng = &mut self.rng;
        for layer in &mut self.layers {
            layer.mutate(rate, rng);
        }
    }

    /// One mutate-evaluate-accept/reject cycle. The returned loss is never
    /// larger than the loss before the call.
    pub fn train_step(
        &mut self,
        input: &[f32],
        target: &[f32],
        learning_rate: f32,
    ) -> Result<TrainStep, TensorError> {
        let loss_before = squared_error(&self.forward(input)?, target);

        let rng = &mut self.rng;
        let snapshots: Vec<_> = self
            .layers
            .iter_mut()
            .map(|l| l.mutate(learning_rate, rng))
            .collect();

        let loss_after = squared_error(&self.forward(input)?, target);

        let (loss, accepted) = if loss_after > loss_before {
            for (layer, snap) in self.layers.iter_mut().zip(&snapshots) {
                layer.revert(snap);
            }
            (loss_before, false)
        } else {
            (loss_after, true)
        };

        let mse = loss / self.output_size().max(1) as f32;
        let accuracy = (1.0 - mse).max(0.0);
        self.satisfaction = self.satisfaction * 0.9 + accuracy * 0.1;

        Ok(TrainStep {
            loss,
            accuracy,
            accepted,
        })
    }

    pub fn remember(&mut self, key: &str, value: serde_json::Value) {
        match self.ltm.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.ltm.push((key.to_string(), value)),
        }
    }

    pub fn recall(&self, key: &str) -> Option<&serde_json::Value> {
        self.ltm.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn forget_all(&mut self) {
        self.ltm.clear();
    }

    pub fn memory_len(&self) -> usize {
        self.ltm.len()
    }

    pub fn memory_entries(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.ltm.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks;

    fn net(seed: u64) -> Network {
        Network::new("test", &NetworkConfig::default(), Prng::new(seed)).unwrap()
    }

    #[test]
    fn new_builds_two_layers_with_defaults() {
        let n = net(1);
        assert_eq!(n.depth(), 2);
        assert_eq!(n.input_size(), 10);
        assert_eq!(n.layers()[0].out_size(), 16);
        assert_eq!(n.output_size(), 4);
        assert_eq!(n.plasticity, 0.5);
        assert_eq!(n.satisfaction, 0.5);
    }

    #[test]
    fn expand_adds_one_layer_and_keeps_io() {
        let mut n = net(2);
        let input = vec![0.3f32; 10];
        for k in 0..3 {
            n.expand(1_000 * (k + 1)).unwrap();
            assert_eq!(n.depth(), 3 + k as usize);
            assert_eq!(n.input_size(), 10);
            assert_eq!(n.output_size(), 4);
            assert_eq!(n.forward(&input).unwrap().len(), 4);
        }
        assert_eq!(n.last_expansion_ms(), 3_000);
        for pair in n.layers().windows(2) {
            assert_eq!(pair[0].out_size(), pair[1].in_size());
        }
    }

    #[test]
    fn expanded_layer_starts_as_identity() {
        let mut n = net(3);
        n.expand(10).unwrap();
        let inserted = &n.layers()[1];
        assert_eq!(inserted.in_size(), 16);
        assert_eq!(inserted.out_size(), 16);
        assert_eq!(inserted.weights().data()[0], 1.0);
        assert_eq!(inserted.weights().data()[1], 0.0);
    }

    #[test]
    fn train_step_never_increases_loss() {
        let mut n = net(4);
        let mut rng = Prng::new(5);
        for step in 0..200 {
            let ex = tasks::generate((step % 5) as f64, &mut rng);
            let before = squared_error(&n.forward(&ex.input).unwrap(), &ex.target);
            let result = n.train_step(&ex.input, &ex.target, 0.3).unwrap();
            assert!(result.loss <= before, "step {step}: {} > {}", result.loss, before);
            assert!((0.0..=1.0).contains(&result.accuracy));
        }
    }

    #[test]
    fn rejected_step_leaves_weights_untouched() {
        let mut n = net(6);
        let mut rng = Prng::new(7);
        for _ in 0..50 {
            let ex = tasks::generate(0.0, &mut rng);
            let before = n.layers().to_vec();
            let result = n.train_step(&ex.input, &ex.target, 0.5).unwrap();
            if !result.accepted {
                assert_eq!(n.layers(), before.as_slice());
            }
        }
    }

    #[test]
    fn satisfaction_is_an_ema_of_accuracy() {
        let mut n = net(8);
        let s0 = n.satisfaction;
        let ex = tasks::generate(0.0, &mut Prng::new(9));
        let r = n.train_step(&ex.input, &ex.target, 0.1).unwrap();
        assert!((n.satisfaction - (0.9 * s0 + 0.1 * r.accuracy)).abs() < 1e-6);
    }

    #[test]
    fn auto_expand_deterministic_branch() {
        let mut n = net(10);
        n.plasticity = 0.9;
        n.satisfaction = 0.2;
        assert!(n.auto_expand_if_ready(10_000).unwrap());
        assert_eq!(n.depth(), 3);
        // Within the cooldown nothing happens, regardless of the random trigger.
        assert!(!n.auto_expand_if_ready(12_000).unwrap());
        assert!(!n.auto_expand_if_ready(15_000).unwrap());
        assert_eq!(n.depth(), 3);
        assert!(n.auto_expand_if_ready(15_001).unwrap());
        assert_eq!(n.depth(), 4);
    }

    #[test]
    fn prune_sums_over_layers() {
        let mut n = net(11);
        let expected: usize = n
            .layers()
            .iter()
            .map(|l| l.weights().data().iter().filter(|w| w.abs() < 0.1).count())
            .sum();
        assert_eq!(n.prune_weights(0.1), expected);
    }

    #[test]
    fn long_term_memory_upserts() {
        let mut n = net(12);
        n.remember("a", serde_json::json!(1));
        n.remember("a", serde_json::json!(2));
        assert_eq!(n.recall("a"), Some(&serde_json::json!(2)));
        assert_eq!(n.memory_len(), 1);
        n.forget_all();
        assert_eq!(n.recall("a"), None);
    }
}
