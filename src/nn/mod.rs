//! Neural network primitives
//!
//! A deliberately small set of layers with explicit backward passes, enough
//! to assemble the AutoInt topology:
//! - [`Param`] and the [`Module`] trait for parameter traversal
//! - [`Linear`], [`Embedding`], [`BatchNorm1d`] and inverted dropout
//! - activations, softmax and the two supervised losses

mod activation;
mod layers;
mod loss;
mod param;

pub use activation::{sigmoid, softmax_rows, softmax_rows_backward, Activation};
pub use layers::{dropout_mask, BatchNorm1d, BatchNormCache, Embedding, Linear};
pub use loss::{accuracy, argmax_rows, cross_entropy, mse};
pub use param::{Module, Param};

use ndarray::{Array2, Array3};

/// Reshape `[batch, slots, dim]` into `[batch * slots, dim]`
pub fn slots_to_rows(x: &Array3<f64>) -> Array2<f64> {
    let (b, s, d) = x.dim();
    Array2::from_shape_fn((b * s, d), |(r, c)| x[[r / s, r % s, c]])
}

/// Inverse of [`slots_to_rows`]
pub fn rows_to_slots(x: &Array2<f64>, batch: usize, slots: usize) -> Array3<f64> {
    let d = x.ncols();
    Array3::from_shape_fn((batch, slots, d), |(i, j, c)| x[[i * slots + j, c]])
}

/// Reshape `[batch, slots, dim]` into `[batch, slots * dim]`
pub fn flatten_slots(x: &Array3<f64>) -> Array2<f64> {
    let (b, s, d) = x.dim();
    Array2::from_shape_fn((b, s * d), |(i, k)| x[[i, k / d, k % d]])
}

/// Inverse of [`flatten_slots`]
pub fn unflatten_slots(x: &Array2<f64>, slots: usize, dim: usize) -> Array3<f64> {
    Array3::from_shape_fn((x.nrows(), slots, dim), |(i, j, c)| x[[i, j * dim + c]])
}
