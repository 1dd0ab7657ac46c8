//! Standard scaling of continuous features

use serde::{Deserialize, Serialize};

/// Fitted mean / standard deviation of one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: f64,
    /// Sample standard deviation; 1.0 for constant columns
    pub std: f64,
}

impl Default for ScalerParams {
    fn default() -> Self {
        Self { mean: 0.0, std: 1.0 }
    }
}

impl ScalerParams {
    /// Fit on the non-null training values of a column
    pub fn fit(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self::default();
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            let ss = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>();
            (ss / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        Self {
            mean,
            std: if std == 0.0 || !std.is_finite() { 1.0 } else { std },
        }
    }

    pub fn scale(&self, x: f64) -> f64 {
        (x - self.mean) / self.std
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_scaler() {
        let params = ScalerParams::fit(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((params.mean - 3.0).abs() < 1e-12);
        assert!(params.scale(3.0).abs() < 1e-12);
        assert!((params.scale(4.2) * params.std + params.mean - 4.2).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_uses_unit_scale() {
        let params = ScalerParams::fit(&[7.0, 7.0, 7.0]);
        assert_eq!(params.std, 1.0);
        assert_eq!(params.scale(7.0), 0.0);
    }

    #[test]
    fn test_empty_column() {
        assert_eq!(ScalerParams::fit(&[]), ScalerParams::default());
    }
}
