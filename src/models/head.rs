//! Prediction head and target range handling

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{TargetRange, TargetRangeMode, TaskType};
use crate::nn::{sigmoid, softmax_rows, Linear, Module, Param};

#[derive(Debug, Clone)]
pub struct HeadCache {
    input: Array2<f64>,
    logits: Array2<f64>,
}

/// Linear output layer with optional per-target range squashing
///
/// With a range in [`TargetRangeMode::TrainAndPredict`] the output is
/// `min + (max - min) * sigmoid(z)` for both loss and prediction. In
/// [`TargetRangeMode::PredictOnly`] the raw output is trained and only
/// clamped when predicting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionHead {
    linear: Linear,
    task: TaskType,
    target_range: Option<Vec<TargetRange>>,
    range_mode: TargetRangeMode,
}

impl PredictionHead {
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        output_dim: usize,
        task: TaskType,
        target_range: Option<Vec<TargetRange>>,
        range_mode: TargetRangeMode,
        rng: &mut R,
    ) -> Self {
        let target_range = match task {
            TaskType::Regression => target_range,
            TaskType::Classification => None,
        };
        Self {
            linear: Linear::new(input_dim, output_dim, rng),
            task,
            target_range,
            range_mode,
        }
    }

    pub fn output_dim(&self) -> usize {
        self.linear.out_features()
    }

    pub fn target_range(&self) -> Option<&[TargetRange]> {
        self.target_range.as_deref()
    }

    fn squashes(&self) -> bool {
        self.target_range.is_some() && self.range_mode == TargetRangeMode::TrainAndPredict
    }

    fn squash(&self, logits: &Array2<f64>) -> Array2<f64> {
        let mut out = logits.clone();
        if let (true, Some(ranges)) = (self.squashes(), &self.target_range) {
            for (mut col, range) in out.columns_mut().into_iter().zip(ranges) {
                col.mapv_inplace(|z| range.min + range.span() * sigmoid(z));
            }
        }
        out
    }

    /// Output seen by the loss: squashed regression values or raw logits
    pub fn forward(&self, x: &Array2<f64>) -> (Array2<f64>, HeadCache) {
        let logits = self.linear.forward(x);
        let out = match self.task {
            TaskType::Regression => self.squash(&logits),
            TaskType::Classification => logits.clone(),
        };
        (
            out,
            HeadCache {
                input: x.clone(),
                logits,
            },
        )
    }

    /// Turn [`PredictionHead::forward`] output into predictions: clamped
    /// regression values or class probabilities
    pub fn finalize(&self, out: Array2<f64>) -> Array2<f64> {
        match self.task {
            TaskType::Regression => self.clamp(out),
            TaskType::Classification => softmax_rows(out.view()),
        }
    }

    /// Hard clamp into the configured ranges
    fn clamp(&self, mut out: Array2<f64>) -> Array2<f64> {
        if let Some(ranges) = &self.target_range {
            for (mut col, range) in out.columns_mut().into_iter().zip(ranges) {
                col.mapv_inplace(|v| range.clamp(v));
            }
        }
        out
    }

    /// Backward from the gradient of the loss w.r.t. [`PredictionHead::forward`]'s output
    pub fn backward(&mut self, cache: &HeadCache, grad_out: &Array2<f64>) -> Array2<f64> {
        let mut grad = grad_out.clone();
        if let (true, Some(ranges)) = (self.squashes(), &self.target_range) {
            for ((mut g, z), range) in grad
                .columns_mut()
                .into_iter()
                .zip(cache.logits.columns())
                .zip(ranges)
            {
                g.zip_mut_with(&z, |g, &z| {
                    let s = sigmoid(z);
                    *g *= range.span() * s * (1.0 - s);
                });
            }
        }
        self.linear.backward(&cache.input, &grad)
    }
}

impl Module for PredictionHead {
    fn params(&self) -> Vec<&Param> {
        self.linear.params()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.linear.params_mut()
    }
}
