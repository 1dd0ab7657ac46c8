//! Trainer and optimizer configuration

use serde::{Deserialize, Serialize};

use crate::error::{Result, TabularError};

/// Quantity watched by early stopping and checkpointing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    ValidLoss,
    TrainLoss,
}

/// Direction of improvement for the monitored quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    Min,
    Max,
}

/// Early stopping policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EarlyStoppingConfig {
    pub monitor: Monitor,
    pub mode: MonitorMode,
    /// Epochs without improvement before stopping
    pub patience: usize,
    /// Smallest change that counts as an improvement
    pub min_delta: f64,
    /// Stop as soon as the training loss becomes NaN or infinite
    pub stop_on_divergence: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            monitor: Monitor::ValidLoss,
            mode: MonitorMode::Min,
            patience: 3,
            min_delta: 1e-4,
            stop_on_divergence: false,
        }
    }
}

/// Best-model tracking policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    pub monitor: Monitor,
    pub mode: MonitorMode,
    /// Restore the best weights once training ends
    pub load_best: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            monitor: Monitor::ValidLoss,
            mode: MonitorMode::Min,
            load_best: true,
        }
    }
}

/// Compute device selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    #[default]
    Cpu,
    Auto,
}

/// Configuration of the epoch loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainerConfig {
    /// Maximum supervised epochs
    pub max_epochs: usize,
    /// Rows per mini-batch
    pub batch_size: usize,
    /// Run a single batch of training and validation, then stop
    pub fast_dev_run: bool,
    pub early_stopping: Option<EarlyStoppingConfig>,
    pub checkpoints: Option<CheckpointConfig>,
    /// Clip the global gradient norm to this value
    pub gradient_clip_val: Option<f64>,
    /// Batches assembled ahead of the model; 0 disables prefetching
    pub prefetch_batches: usize,
    pub accelerator: Accelerator,
    /// Seed for initialization, shuffling, dropout and augmentation
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            batch_size: 64,
            fast_dev_run: false,
            early_stopping: Some(EarlyStoppingConfig::default()),
            checkpoints: Some(CheckpointConfig::default()),
            gradient_clip_val: None,
            prefetch_batches: 2,
            accelerator: Accelerator::Cpu,
            seed: 42,
        }
    }
}

impl TrainerConfig {
    pub fn new(max_epochs: usize) -> Self {
        Self {
            max_epochs,
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_fast_dev_run(mut self, enabled: bool) -> Self {
        self.fast_dev_run = enabled;
        self
    }

    pub fn with_early_stopping(mut self, early_stopping: Option<EarlyStoppingConfig>) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Option<CheckpointConfig>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_gradient_clip(mut self, max_norm: f64) -> Self {
        self.gradient_clip_val = Some(max_norm);
        self
    }

    pub fn with_prefetch(mut self, batches: usize) -> Self {
        self.prefetch_batches = batches;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_epochs == 0 {
            return Err(TabularError::invalid_parameter("max_epochs", 0, "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(TabularError::invalid_parameter("batch_size", 0, "must be positive"));
        }
        if let Some(clip) = self.gradient_clip_val {
            if !(clip > 0.0 && clip.is_finite()) {
                return Err(TabularError::invalid_parameter(
                    "gradient_clip_val",
                    clip,
                    "must be a positive number",
                ));
            }
        }
        if let Some(early) = &self.early_stopping {
            if early.min_delta < 0.0 {
                return Err(TabularError::invalid_parameter(
                    "early_stopping.min_delta",
                    early.min_delta,
                    "must be non-negative",
                ));
            }
        }
        Ok(())
    }
}

/// Optimizer algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    /// Stochastic gradient descent with momentum
    Sgd,
}

/// Learning rate schedule, stepped once per epoch
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrScheduler {
    #[default]
    None,
    /// Multiply the rate by `gamma` every `step_size` epochs
    Step { step_size: usize, gamma: f64 },
    /// Multiply the rate by `gamma` every epoch
    Exponential { gamma: f64 },
}

/// Optimizer hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    /// Decoupled L2 penalty
    pub weight_decay: f64,
    /// Momentum for SGD
    pub momentum: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub lr_scheduler: LrScheduler,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adam,
            learning_rate: 1e-3,
            weight_decay: 0.0,
            momentum: 0.9,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            lr_scheduler: LrScheduler::None,
        }
    }
}

impl OptimizerConfig {
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_optimizer(mut self, kind: OptimizerKind) -> Self {
        self.optimizer = kind;
        self
    }

    pub fn with_scheduler(mut self, scheduler: LrScheduler) -> Self {
        self.lr_scheduler = scheduler;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(TabularError::invalid_parameter(
                "learning_rate",
                self.learning_rate,
                "must be a positive number",
            ));
        }
        if self.weight_decay < 0.0 {
            return Err(TabularError::invalid_parameter(
                "weight_decay",
                self.weight_decay,
                "must be non-negative",
            ));
        }
        for (name, value) in [("momentum", self.momentum), ("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&value) {
                return Err(TabularError::invalid_parameter(name, value, "must be in [0, 1)"));
            }
        }
        match self.lr_scheduler {
            LrScheduler::Step { step_size: 0, .. } => Err(TabularError::invalid_parameter(
                "lr_scheduler.step_size",
                0,
                "must be positive",
            )),
            LrScheduler::Step { gamma, .. } | LrScheduler::Exponential { gamma } if gamma <= 0.0 => {
                Err(TabularError::invalid_parameter("lr_scheduler.gamma", gamma, "must be positive"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trainer_defaults() {
        let config = TrainerConfig::default();
        assert_eq!(config.max_epochs, 10);
        assert!(config.early_stopping.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trainer_rejects_zero_batch() {
        assert!(TrainerConfig::new(3).with_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_optimizer_validation() {
        assert!(OptimizerConfig::default().validate().is_ok());
        assert!(OptimizerConfig::default().with_learning_rate(0.0).validate().is_err());
        let step = LrScheduler::Step { step_size: 0, gamma: 0.5 };
        assert!(OptimizerConfig::default().with_scheduler(step).validate().is_err());
    }

    #[test]
    fn test_scheduler_serde() {
        let json = r#"{"lr_scheduler": {"kind": "step", "step_size": 2, "gamma": 0.5}}"#;
        let config: OptimizerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.lr_scheduler, LrScheduler::Step { step_size: 2, gamma: 0.5 });
    }
}
