//! Activation functions

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Activation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    /// Rectified Linear Unit
    #[default]
    ReLU,
    /// ReLU with a 0.01 slope for negative inputs
    LeakyReLU,
    /// Sigmoid
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Linear (identity)
    Linear,
}

impl Activation {
    /// Apply the activation elementwise
    pub fn apply(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| v.max(0.0)),
            Activation::LeakyReLU => z.mapv(|v| if v > 0.0 { v } else { 0.01 * v }),
            Activation::Sigmoid => z.mapv(sigmoid),
            Activation::Tanh => z.mapv(f64::tanh),
            Activation::Linear => z.clone(),
        }
    }

    /// Derivative with respect to the pre-activation `z`
    pub fn derivative(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::LeakyReLU => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.01 }),
            Activation::Sigmoid => z.mapv(|v| {
                let s = sigmoid(v);
                s * (1.0 - s)
            }),
            Activation::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
            Activation::Linear => Array2::ones(z.raw_dim()),
        }
    }
}

/// Numerically stable logistic function
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Softmax over the rows of a 2D array
pub fn softmax_rows(x: ArrayView2<f64>) -> Array2<f64> {
    let mut result = x.to_owned();
    for mut row in result.rows_mut() {
        let max_val = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max_val).exp());
        let sum = row.sum();
        row /= sum;
    }
    result
}

/// Backward of a row softmax given its output `a` and upstream gradient `da`
pub fn softmax_rows_backward(a: &Array2<f64>, da: &Array2<f64>) -> Array2<f64> {
    let dot = (da * a).sum_axis(Axis(1)).insert_axis(Axis(1));
    (da - &dot) * a
}
