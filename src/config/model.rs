//! AutoInt model configuration

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TabularError};
use crate::nn::Activation;

/// Type of supervised task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// One or more continuous targets
    Regression,
    /// A single categorical target
    Classification,
}

/// Self-supervised pretext task run before supervised training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SslTask {
    #[default]
    #[serde(rename = "none", alias = "None")]
    None,
    /// Reconstruct the original slot values from an augmented sample
    #[serde(rename = "Denoising", alias = "denoising")]
    Denoising,
}

/// Augmentation used by the pretext task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AugTask {
    #[default]
    #[serde(rename = "none", alias = "None")]
    None,
    /// Swap a random subset of slots with a paired sample
    #[serde(rename = "cutmix", alias = "Cutmix")]
    Cutmix,
}

/// Where a configured target range is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRangeMode {
    /// Sigmoid squash inside the forward pass, seen by the loss and by predictions
    #[default]
    TrainAndPredict,
    /// Train on the raw output, clamp only when predicting
    PredictOnly,
}

/// Inclusive bounds for one regression target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub min: f64,
    pub max: f64,
}

impl TargetRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Observed (min, max) of each target column, in target order
    pub fn from_frame(df: &DataFrame, targets: &[String]) -> Result<Vec<TargetRange>> {
        targets
            .iter()
            .map(|name| {
                let column = df.column(name).map_err(|_| TabularError::MissingColumn {
                    column: name.clone(),
                    role: "target".to_string(),
                })?;
                let values = column.cast(&DataType::Float64)?;
                let ca = values.f64()?;
                match (ca.min(), ca.max()) {
                    (Some(min), Some(max)) => Ok(TargetRange::new(min, max)),
                    _ => Err(TabularError::DataError(format!(
                        "target column '{}' has no values",
                        name
                    ))),
                }
            })
            .collect()
    }

    /// Width of the range
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Hard clamp into the range
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Configuration for the AutoInt model and its pretext task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Supervised task
    pub task: TaskType,

    /// Pretext task run before supervised training
    pub ssl_task: SslTask,

    /// Augmentation applied during the pretext task
    pub aug_task: AugTask,

    /// Per-target (min, max) bounds for regression outputs
    pub target_range: Option<Vec<TargetRange>>,

    /// Where the target range is enforced
    pub target_range_mode: TargetRangeMode,

    /// Add a feed-forward branch over the fused embeddings
    pub deep_layers: bool,

    /// Hidden sizes of the deep branch, dash separated
    pub layers: String,

    /// Activation of the deep branch
    pub activation: Activation,

    /// Dropout inside the deep branch
    pub dropout: f64,

    /// Batch-normalize continuous inputs before projecting them
    pub batch_norm_continuous_input: bool,

    /// Mean-pool slot representations instead of flattening them
    pub attention_pooling: bool,

    /// Width of every feature slot
    pub embedding_dim: usize,

    /// Attention heads per block; must divide `embedding_dim`
    pub num_heads: usize,

    /// Number of stacked attention blocks
    pub num_attn_blocks: usize,

    /// Add a projected residual around each attention block
    pub has_residuals: bool,

    /// Dropout on the fused embeddings
    pub embedding_dropout: f64,

    /// Per-slot swap probability for cutmix
    pub cutmix_probability: f64,

    /// Loss weight for slots the augmentation left untouched
    pub denoising_unmasked_weight: f64,

    /// Pretext epochs; defaults to the trainer's `max_epochs`
    pub ssl_epochs: Option<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            task: TaskType::Regression,
            ssl_task: SslTask::None,
            aug_task: AugTask::None,
            target_range: None,
            target_range_mode: TargetRangeMode::TrainAndPredict,
            deep_layers: false,
            layers: "128-64-32".to_string(),
            activation: Activation::ReLU,
            dropout: 0.0,
            batch_norm_continuous_input: false,
            attention_pooling: false,
            embedding_dim: 16,
            num_heads: 2,
            num_attn_blocks: 3,
            has_residuals: true,
            embedding_dropout: 0.0,
            cutmix_probability: 0.3,
            denoising_unmasked_weight: 0.1,
            ssl_epochs: None,
        }
    }
}

impl ModelConfig {
    /// Create a configuration for the given task
    pub fn new(task: TaskType) -> Self {
        Self {
            task,
            ..Default::default()
        }
    }

    pub fn with_ssl(mut self, ssl_task: SslTask, aug_task: AugTask) -> Self {
        self.ssl_task = ssl_task;
        self.aug_task = aug_task;
        self
    }

    pub fn with_target_range(mut self, ranges: Vec<TargetRange>) -> Self {
        self.target_range = Some(ranges);
        self
    }

    pub fn with_target_range_mode(mut self, mode: TargetRangeMode) -> Self {
        self.target_range_mode = mode;
        self
    }

    pub fn with_deep_layers(mut self, enabled: bool) -> Self {
        self.deep_layers = enabled;
        self
    }

    pub fn with_layers(mut self, layers: impl Into<String>) -> Self {
        self.layers = layers.into();
        self
    }

    pub fn with_batch_norm_continuous_input(mut self, enabled: bool) -> Self {
        self.batch_norm_continuous_input = enabled;
        self
    }

    pub fn with_attention_pooling(mut self, enabled: bool) -> Self {
        self.attention_pooling = enabled;
        self
    }

    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn with_num_heads(mut self, heads: usize) -> Self {
        self.num_heads = heads;
        self
    }

    pub fn with_num_attn_blocks(mut self, blocks: usize) -> Self {
        self.num_attn_blocks = blocks;
        self
    }

    pub fn with_ssl_epochs(mut self, epochs: usize) -> Self {
        self.ssl_epochs = Some(epochs);
        self
    }

    /// Parse the deep branch hidden sizes
    pub fn deep_layer_sizes(&self) -> Result<Vec<usize>> {
        self.layers
            .split('-')
            .map(|part| {
                part.trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|&size| size > 0)
                    .ok_or_else(|| {
                        TabularError::invalid_parameter(
                            "layers",
                            &self.layers,
                            "expected dash separated positive integers such as \"128-64-32\"",
                        )
                    })
            })
            .collect()
    }

    /// Check every option against the number of targets
    pub fn validate(&self, n_targets: usize) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(TabularError::invalid_parameter(
                "embedding_dim",
                self.embedding_dim,
                "must be positive",
            ));
        }
        if self.num_heads == 0 || self.embedding_dim % self.num_heads != 0 {
            return Err(TabularError::invalid_parameter(
                "num_heads",
                self.num_heads,
                format!("must evenly divide embedding_dim ({})", self.embedding_dim),
            ));
        }
        if self.num_attn_blocks == 0 {
            return Err(TabularError::invalid_parameter(
                "num_attn_blocks",
                self.num_attn_blocks,
                "at least one attention block is required",
            ));
        }
        for (name, value) in [
            ("dropout", self.dropout),
            ("embedding_dropout", self.embedding_dropout),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(TabularError::invalid_parameter(name, value, "must be in [0, 1)"));
            }
        }
        if !(0.0..=1.0).contains(&self.cutmix_probability) {
            return Err(TabularError::invalid_parameter(
                "cutmix_probability",
                self.cutmix_probability,
                "must be in [0, 1]",
            ));
        }
        if !(self.denoising_unmasked_weight >= 0.0 && self.denoising_unmasked_weight.is_finite()) {
            return Err(TabularError::invalid_parameter(
                "denoising_unmasked_weight",
                self.denoising_unmasked_weight,
                "must be a non-negative number",
            ));
        }
        if self.aug_task != AugTask::None && self.ssl_task == SslTask::None {
            return Err(TabularError::ConfigError(
                "aug_task is only used by a pretext task; set ssl_task as well".to_string(),
            ));
        }
        if self.ssl_epochs == Some(0) {
            return Err(TabularError::invalid_parameter(
                "ssl_epochs",
                0,
                "must be positive; use ssl_task \"none\" to skip pretraining",
            ));
        }
        if self.deep_layers {
            self.deep_layer_sizes()?;
        }

        match self.task {
            TaskType::Classification => {
                if n_targets != 1 {
                    return Err(TabularError::ConfigError(format!(
                        "classification supports exactly one target, got {}",
                        n_targets
                    )));
                }
                if self.target_range.is_some() {
                    return Err(TabularError::ConfigError(
                        "target_range only applies to regression".to_string(),
                    ));
                }
            }
            TaskType::Regression => {
                if let Some(ranges) = &self.target_range {
                    if ranges.len() != n_targets {
                        return Err(TabularError::ConfigError(format!(
                            "target_range has {} entries but there are {} targets",
                            ranges.len(),
                            n_targets
                        )));
                    }
                    for (i, range) in ranges.iter().enumerate() {
                        if !(range.min.is_finite() && range.max.is_finite() && range.min < range.max) {
                            return Err(TabularError::ConfigError(format!(
                                "target_range[{}] = ({}, {}) must satisfy min < max",
                                i, range.min, range.max
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
