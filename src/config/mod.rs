//! Pipeline configuration
//!
//! Every recognized option is a named field of one of four records:
//! - [`DataConfig`] - columns and preprocessing
//! - [`ModelConfig`] - AutoInt architecture and pretext task
//! - [`TrainerConfig`] - epoch loop, early stopping, checkpoints
//! - [`OptimizerConfig`] - optimizer and learning rate schedule

mod data;
mod model;
mod trainer;

pub use data::DataConfig;
pub use model::{AugTask, ModelConfig, SslTask, TargetRange, TargetRangeMode, TaskType};
pub use trainer::{
    Accelerator, CheckpointConfig, EarlyStoppingConfig, LrScheduler, Monitor, MonitorMode,
    OptimizerConfig, OptimizerKind, TrainerConfig,
};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The four configuration records of a pipeline, loadable as one JSON document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub optimizer: OptimizerConfig,
    pub trainer: TrainerConfig,
}

impl PipelineConfig {
    pub fn new(
        data: DataConfig,
        model: ModelConfig,
        optimizer: OptimizerConfig,
        trainer: TrainerConfig,
    ) -> Self {
        Self {
            data,
            model,
            optimizer,
            trainer,
        }
    }

    /// Validate all records together
    pub fn validate(&self) -> Result<()> {
        self.data.validate()?;
        self.model.validate(self.data.target.len())?;
        self.optimizer.validate()?;
        self.trainer.validate()?;
        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_from_json() {
        let json = r#"{
            "data": {"target": ["y"], "continuous_cols": ["a", "b"], "categorical_cols": ["c"]},
            "model": {"task": "regression", "attention_pooling": true},
            "trainer": {"max_epochs": 3, "early_stopping": null, "checkpoints": null}
        }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        assert_eq!(config.trainer.max_epochs, 3);
        assert!(config.model.attention_pooling);
        assert!(config.trainer.early_stopping.is_none());
    }

    #[test]
    fn test_pipeline_validation_runs_all_records() {
        let json = r#"{
            "data": {"target": ["y"], "continuous_cols": ["a"]},
            "model": {"embedding_dim": 10, "num_heads": 4}
        }"#;
        assert!(PipelineConfig::from_json_str(json).is_err());
    }

    #[test]
    fn test_pipeline_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");

        let mut config = PipelineConfig::default();
        config.data = DataConfig::new(["y"]).with_continuous(["x"]);
        config.save(&path).unwrap();

        let loaded = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
