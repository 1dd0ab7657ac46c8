//! Dense building blocks with hand-written backward passes
//!
//! Layers are stateless during the forward pass; whatever the backward pass
//! needs is either the layer input (passed back in by the caller) or an
//! explicit cache struct returned by `forward_train`.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::param::{Module, Param};

/// Fully connected layer: `y = x W + b`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    /// `in_features x out_features`
    pub weight: Param,
    /// `1 x out_features`
    pub bias: Param,
}

impl Linear {
    /// Glorot-initialized weights, zero bias
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        Self {
            weight: Param::glorot(in_features, out_features, rng),
            bias: Param::zeros(1, out_features),
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.value.nrows()
    }

    pub fn out_features(&self) -> usize {
        self.weight.value.ncols()
    }

    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.weight.value) + &self.bias.value
    }

    /// Accumulate parameter gradients and return the gradient w.r.t. `x`
    pub fn backward(&mut self, x: &Array2<f64>, grad_out: &Array2<f64>) -> Array2<f64> {
        self.weight.accumulate(&x.t().dot(grad_out));
        self.bias
            .accumulate(&grad_out.sum_axis(Axis(0)).insert_axis(Axis(0)));
        grad_out.dot(&self.weight.value.t())
    }
}

impl Module for Linear {
    fn params(&self) -> Vec<&Param> {
        vec![&self.weight, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weight, &mut self.bias]
    }
}

/// Lookup table mapping an index to a learned row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub table: Param,
}

impl Embedding {
    /// Table with `num_embeddings` rows of width `dim`
    pub fn new<R: Rng + ?Sized>(num_embeddings: usize, dim: usize, rng: &mut R) -> Self {
        Self {
            table: Param::uniform(num_embeddings, dim, (1.0 / dim as f64).sqrt(), rng),
        }
    }

    pub fn num_embeddings(&self) -> usize {
        self.table.value.nrows()
    }

    pub fn dim(&self) -> usize {
        self.table.value.ncols()
    }

    /// Gather rows; indices past the table end use the last row
    pub fn forward(&self, indices: ArrayView1<usize>) -> Array2<f64> {
        let last = self.num_embeddings().saturating_sub(1);
        let mut out = Array2::zeros((indices.len(), self.dim()));
        for (mut row, &idx) in out.rows_mut().into_iter().zip(indices.iter()) {
            row.assign(&self.table.value.row(idx.min(last)));
        }
        out
    }

    /// Scatter-add the row gradients back into the table
    pub fn backward(&mut self, indices: ArrayView1<usize>, grad_out: &Array2<f64>) {
        let last = self.num_embeddings().saturating_sub(1);
        let grad = self.table.grad_mut();
        for (&idx, g) in indices.iter().zip(grad_out.rows()) {
            let mut row = grad.row_mut(idx.min(last));
            row += &g;
        }
    }
}

impl Module for Embedding {
    fn params(&self) -> Vec<&Param> {
        vec![&self.table]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.table]
    }
}

/// Values kept from a training-mode batch norm pass
#[derive(Debug, Clone)]
pub struct BatchNormCache {
    x_hat: Array2<f64>,
    inv_std: Array1<f64>,
}

/// Batch normalization over the rows of a 2D input
///
/// Uses batch statistics while training and running statistics otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm1d {
    pub gamma: Param,
    pub beta: Param,
    running_mean: Array1<f64>,
    running_var: Array1<f64>,
    momentum: f64,
    eps: f64,
}

impl BatchNorm1d {
    pub fn new(num_features: usize) -> Self {
        Self {
            gamma: Param::ones(1, num_features),
            beta: Param::zeros(1, num_features),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            momentum: 0.1,
            eps: 1e-5,
        }
    }

    pub fn num_features(&self) -> usize {
        self.running_mean.len()
    }

    /// Normalize with batch statistics and update the running estimates
    pub fn forward_train(&mut self, x: &Array2<f64>) -> (Array2<f64>, BatchNormCache) {
        let n = x.nrows().max(1) as f64;
        let mean = x.sum_axis(Axis(0)) / n;
        let centered = x - &mean;
        let var = centered.mapv(|v| v * v).sum_axis(Axis(0)) / n;

        self.running_mean = &self.running_mean * (1.0 - self.momentum) + &mean * self.momentum;
        self.running_var = &self.running_var * (1.0 - self.momentum) + &var * self.momentum;

        let inv_std = var.mapv(|v| 1.0 / (v + self.eps).sqrt());
        let x_hat = centered * &inv_std;
        let out = &x_hat * &self.gamma.value + &self.beta.value;
        (out, BatchNormCache { x_hat, inv_std })
    }

    /// Normalize with the running statistics
    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let inv_std = self.running_var.mapv(|v| 1.0 / (v + self.eps).sqrt());
        let x_hat = (x - &self.running_mean) * &inv_std;
        &x_hat * &self.gamma.value + &self.beta.value
    }

    pub fn backward(&mut self, cache: &BatchNormCache, grad_out: &Array2<f64>) -> Array2<f64> {
        let n = grad_out.nrows().max(1) as f64;
        self.gamma.accumulate(
            &(grad_out * &cache.x_hat)
                .sum_axis(Axis(0))
                .insert_axis(Axis(0)),
        );
        self.beta
            .accumulate(&grad_out.sum_axis(Axis(0)).insert_axis(Axis(0)));

        let dx_hat = grad_out * &self.gamma.value;
        let sum_dx_hat = dx_hat.sum_axis(Axis(0));
        let sum_dx_hat_xhat = (&dx_hat * &cache.x_hat).sum_axis(Axis(0));

        let mut dx = &dx_hat * n - &sum_dx_hat - &cache.x_hat * &sum_dx_hat_xhat;
        dx *= &(&cache.inv_std / n);
        dx
    }
}

impl Module for BatchNorm1d {
    fn params(&self) -> Vec<&Param> {
        vec![&self.gamma, &self.beta]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.gamma, &mut self.beta]
    }
}

/// Inverted dropout mask: zeros with probability `p`, else `1 / (1 - p)`
pub fn dropout_mask<R: Rng + ?Sized>(shape: (usize, usize), p: f64, rng: &mut R) -> Array2<f64> {
    if p <= 0.0 {
        return Array2::ones(shape);
    }
    let keep = 1.0 / (1.0 - p);
    Array2::from_shape_simple_fn(shape, || if rng.gen::<f64>() < p { 0.0 } else { keep })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn rng() -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(42)
    }

    #[test]
    fn test_linear_shapes() {
        let layer = Linear::new(3, 5, &mut rng());
        let x = Array2::ones((4, 3));
        assert_eq!(layer.forward(&x).shape(), &[4, 5]);
        assert_eq!(layer.num_parameters(), 3 * 5 + 5);
    }

    #[test]
    fn test_linear_gradient_check() {
        let mut layer = Linear::new(3, 2, &mut rng());
        let x = array![[0.5, -1.0, 2.0], [1.5, 0.3, -0.7]];
        let upstream = array![[1.0, -0.5], [0.25, 2.0]];

        let dx = layer.backward(&x, &upstream);
        let objective = |l: &Linear, x: &Array2<f64>| (l.forward(x) * &upstream).sum();

        let h = 1e-6;
        for i in 0..3 {
            for j in 0..2 {
                let mut plus = layer.clone();
                plus.weight.value[[i, j]] += h;
                let mut minus = layer.clone();
                minus.weight.value[[i, j]] -= h;
                let numeric = (objective(&plus, &x) - objective(&minus, &x)) / (2.0 * h);
                assert!((numeric - layer.weight.grad()[[i, j]]).abs() < 1e-5);
            }
        }
        for r in 0..2 {
            for c in 0..3 {
                let mut xp = x.clone();
                xp[[r, c]] += h;
                let mut xm = x.clone();
                xm[[r, c]] -= h;
                let numeric = (objective(&layer, &xp) - objective(&layer, &xm)) / (2.0 * h);
                assert!((numeric - dx[[r, c]]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_embedding_lookup_and_scatter() {
        let mut emb = Embedding::new(3, 4, &mut rng());
        let idx = array![2usize, 0, 2, 7];
        let out = emb.forward(idx.view());
        assert_eq!(out.row(0), emb.table.value.row(2));
        // out of range falls back to the last row
        assert_eq!(out.row(3), emb.table.value.row(2));

        emb.backward(idx.view(), &Array2::ones((4, 4)));
        assert_eq!(emb.table.grad()[[2, 0]], 3.0);
        assert_eq!(emb.table.grad()[[0, 0]], 1.0);
        assert_eq!(emb.table.grad()[[1, 0]], 0.0);
    }

    #[test]
    fn test_batch_norm_train_output_is_standardized() {
        let mut bn = BatchNorm1d::new(2);
        let x = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let (out, _) = bn.forward_train(&x);
        for col in out.columns() {
            assert!(col.mean().unwrap().abs() < 1e-9);
        }
        assert!(bn.running_mean[1] > 0.0);
    }

    #[test]
    fn test_batch_norm_gradient_check() {
        let mut bn = BatchNorm1d::new(2);
        bn.gamma.value = array![[1.5, 0.5]];
        let x = array![[0.2, 1.0], [1.1, -0.4], [-0.6, 0.3]];
        let upstream = array![[0.3, -1.0], [1.2, 0.4], [-0.5, 0.9]];

        let (_, cache) = bn.forward_train(&x);
        let dx = bn.backward(&cache, &upstream);

        let h = 1e-6;
        for r in 0..3 {
            for c in 0..2 {
                let mut xp = x.clone();
                xp[[r, c]] += h;
                let mut xm = x.clone();
                xm[[r, c]] -= h;
                let fp = (bn.clone().forward_train(&xp).0 * &upstream).sum();
                let fm = (bn.clone().forward_train(&xm).0 * &upstream).sum();
                let numeric = (fp - fm) / (2.0 * h);
                assert!((numeric - dx[[r, c]]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_dropout_mask() {
        let mask = dropout_mask((100, 10), 0.5, &mut rng());
        assert!(mask.iter().all(|&v| v == 0.0 || v == 2.0));
        assert!(mask.iter().any(|&v| v == 0.0));
        assert_eq!(dropout_mask((2, 2), 0.0, &mut rng()), Array2::<f64>::ones((2, 2)));
    }
}
