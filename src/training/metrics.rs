//! Evaluation metrics

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::nn::accuracy;

/// Metrics of one evaluated dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Model loss (MSE or cross-entropy)
    pub loss: f64,
    /// Mean squared error over all targets (regression)
    pub mse: Option<f64>,
    /// Mean absolute error over all targets (regression)
    pub mae: Option<f64>,
    /// Mean squared error per target, in target order (regression)
    pub per_target_mse: Vec<f64>,
    /// Accuracy (classification)
    pub accuracy: Option<f64>,
    /// Number of evaluated rows
    pub n_samples: usize,
}

impl ModelMetrics {
    /// Compute regression metrics from `[rows, targets]` matrices
    pub fn compute_regression(loss: f64, y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Self {
        let errors = y_pred - y_true;
        let squared = errors.mapv(|e| e * e);
        let n = errors.len().max(1) as f64;

        let per_target_mse = squared
            .mean_axis(Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_default();

        Self {
            loss,
            mse: Some(squared.sum() / n),
            mae: Some(errors.mapv(f64::abs).sum() / n),
            per_target_mse,
            accuracy: None,
            n_samples: y_true.nrows(),
        }
    }

    /// Compute classification metrics from class probabilities
    pub fn compute_classification(loss: f64, labels: &Array1<usize>, probs: &Array2<f64>) -> Self {
        Self {
            loss,
            accuracy: Some(accuracy(probs, labels.view())),
            n_samples: labels.len(),
            ..Default::default()
        }
    }

    /// Flatten into `test_*` keys
    ///
    /// Per-target errors are reported only when there is more than one target.
    pub fn to_report(&self, targets: &[String]) -> BTreeMap<String, f64> {
        let mut report = BTreeMap::new();
        report.insert("test_loss".to_string(), self.loss);
        if let Some(mse) = self.mse {
            report.insert("test_mean_squared_error".to_string(), mse);
        }
        if let Some(mae) = self.mae {
            report.insert("test_mean_absolute_error".to_string(), mae);
        }
        if targets.len() > 1 {
            for (name, mse) in targets.iter().zip(&self.per_target_mse) {
                report.insert(format!("test_mean_squared_error_{}", name), *mse);
            }
        }
        if let Some(acc) = self.accuracy {
            report.insert("test_accuracy".to_string(), acc);
        }
        report
    }
}
