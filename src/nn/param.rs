//! Trainable parameters

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A trainable matrix with its accumulated gradient
///
/// Biases and per-feature vectors are stored as `1 x n` matrices so every
/// parameter has the same shape type and broadcasts over batch rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub value: Array2<f64>,
    #[serde(skip)]
    grad: Array2<f64>,
}

impl Param {
    /// Wrap an initial value
    pub fn new(value: Array2<f64>) -> Self {
        let grad = Array2::zeros(value.raw_dim());
        Self { value, grad }
    }

    /// All-zero parameter
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::new(Array2::zeros((rows, cols)))
    }

    /// All-one parameter
    pub fn ones(rows: usize, cols: usize) -> Self {
        Self::new(Array2::ones((rows, cols)))
    }

    /// Xavier/Glorot uniform initialization
    pub fn glorot<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Self {
        Self::uniform(rows, cols, (6.0 / (rows + cols) as f64).sqrt(), rng)
    }

    /// Uniform initialization in `[-scale, scale]`
    pub fn uniform<R: Rng + ?Sized>(rows: usize, cols: usize, scale: f64, rng: &mut R) -> Self {
        let value = Array2::from_shape_simple_fn((rows, cols), || rng.gen::<f64>() * 2.0 * scale - scale);
        Self::new(value)
    }

    /// Gradient buffer, re-allocated if it does not match the value
    /// (e.g. after deserialization)
    pub fn grad_mut(&mut self) -> &mut Array2<f64> {
        if self.grad.raw_dim() != self.value.raw_dim() {
            self.grad = Array2::zeros(self.value.raw_dim());
        }
        &mut self.grad
    }

    /// Current gradient
    pub fn grad(&self) -> &Array2<f64> {
        &self.grad
    }

    /// Add to the accumulated gradient
    pub fn accumulate(&mut self, g: &Array2<f64>) {
        *self.grad_mut() += g;
    }

    /// Reset the gradient to zero
    pub fn zero_grad(&mut self) {
        self.grad_mut().fill(0.0);
    }

    /// Number of scalar entries
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Anything that owns trainable parameters
///
/// Parameter order must be stable across calls; optimizers key their
/// state on it.
pub trait Module {
    fn params(&self) -> Vec<&Param>;

    fn params_mut(&mut self) -> Vec<&mut Param>;

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.zero_grad();
        }
    }

    fn num_parameters(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_glorot_bounds() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let p = Param::glorot(8, 4, &mut rng);
        let bound = (6.0 / 12.0f64).sqrt();
        assert_eq!(p.value.shape(), &[8, 4]);
        assert!(p.value.iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_grad_accumulate_and_reset() {
        let mut p = Param::zeros(2, 2);
        p.accumulate(&Array2::ones((2, 2)));
        p.accumulate(&Array2::ones((2, 2)));
        assert_eq!(p.grad()[[1, 1]], 2.0);
        p.zero_grad();
        assert_eq!(p.grad().sum(), 0.0);
    }

    #[test]
    fn test_grad_realloc_after_deserialize() {
        let p = Param::ones(3, 2);
        let json = serde_json::to_string(&p).unwrap();
        let mut restored: Param = serde_json::from_str(&json).unwrap();
        assert!(restored.grad().is_empty());
        restored.accumulate(&Array2::ones((3, 2)));
        assert_eq!(restored.grad().shape(), &[3, 2]);
    }
}
