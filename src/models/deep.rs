//! Feed-forward branch over the flattened slot embeddings

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::nn::{dropout_mask, Activation, Linear, Module, Param};

#[derive(Debug, Clone)]
pub struct DeepCache {
    inputs: Vec<Array2<f64>>,
    pre_activations: Vec<Array2<f64>>,
    masks: Vec<Option<Array2<f64>>>,
}

/// MLP whose output is concatenated with the attention output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepBranch {
    layers: Vec<Linear>,
    activation: Activation,
    dropout: f64,
}

impl DeepBranch {
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        hidden: &[usize],
        activation: Activation,
        dropout: f64,
        rng: &mut R,
    ) -> Self {
        let mut sizes = vec![input_dim];
        sizes.extend_from_slice(hidden);
        let layers = sizes
            .windows(2)
            .map(|w| Linear::new(w[0], w[1], rng))
            .collect();
        Self {
            layers,
            activation,
            dropout,
        }
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, Linear::out_features)
    }

    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut h = x.clone();
        for layer in &self.layers {
            h = self.activation.apply(&layer.forward(&h));
        }
        h
    }

    pub fn forward_train<R: Rng + ?Sized>(&self, x: &Array2<f64>, rng: &mut R) -> (Array2<f64>, DeepCache) {
        let mut cache = DeepCache {
            inputs: Vec::with_capacity(self.layers.len()),
            pre_activations: Vec::with_capacity(self.layers.len()),
            masks: Vec::with_capacity(self.layers.len()),
        };
        let mut h = x.clone();
        for layer in &self.layers {
            let z = layer.forward(&h);
            let mut a = self.activation.apply(&z);
            let mask = (self.dropout > 0.0).then(|| dropout_mask(a.dim(), self.dropout, rng));
            if let Some(m) = &mask {
                a *= m;
            }
            cache.inputs.push(h);
            cache.pre_activations.push(z);
            cache.masks.push(mask);
            h = a;
        }
        (h, cache)
    }

    pub fn backward(&mut self, cache: &DeepCache, grad_out: &Array2<f64>) -> Array2<f64> {
        let mut grad = grad_out.clone();
        for (i, layer) in self.layers.iter_mut().enumerate().rev() {
            if let Some(m) = &cache.masks[i] {
                grad *= m;
            }
            grad *= &self.activation.derivative(&cache.pre_activations[i]);
            grad = layer.backward(&cache.inputs[i], &grad);
        }
        grad
    }
}

impl Module for DeepBranch {
    fn params(&self) -> Vec<&Param> {
        self.layers.iter().flat_map(|l| l.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.layers.iter_mut().flat_map(|l| l.params_mut()).collect()
    }
}
