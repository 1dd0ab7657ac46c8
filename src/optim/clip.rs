//! Gradient clipping

use crate::nn::Param;

/// Scale all gradients so their global L2 norm is at most `max_norm`
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(params: &mut [&mut Param], max_norm: f64) -> f64 {
    let total_norm = params
        .iter()
        .map(|p| p.grad().iter().map(|g| g * g).sum::<f64>())
        .sum::<f64>()
        .sqrt();

    if total_norm.is_finite() && total_norm > max_norm && total_norm > 0.0 {
        let coef = max_norm / total_norm;
        for p in params.iter_mut() {
            p.grad_mut().mapv_inplace(|g| g * coef);
        }
    }
    total_norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn param_with_grad(grad: ndarray::Array2<f64>) -> Param {
        let mut p = Param::zeros(grad.nrows(), grad.ncols());
        p.accumulate(&grad);
        p
    }

    #[test]
    fn test_clip_scales_to_max_norm() {
        let mut a = param_with_grad(array![[3.0]]);
        let mut b = param_with_grad(array![[4.0]]);
        let norm = clip_grad_norm(&mut [&mut a, &mut b], 1.0);
        assert!((norm - 5.0).abs() < 1e-12);
        assert!((a.grad()[[0, 0]] - 0.6).abs() < 1e-12);
        assert!((b.grad()[[0, 0]] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_small_gradients_untouched() {
        let mut a = param_with_grad(array![[0.1, 0.2]]);
        clip_grad_norm(&mut [&mut a], 10.0);
        assert_eq!(a.grad(), &array![[0.1, 0.2]]);
    }
}
