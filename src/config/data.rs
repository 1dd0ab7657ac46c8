//! Data configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Result, TabularError};
use crate::preprocessing::TransformType;

/// Columns and preprocessing choices for a tabular dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Target column names, in prediction column order
    pub target: Vec<String>,

    /// Continuous feature columns, in slot order
    pub continuous_cols: Vec<String>,

    /// Categorical feature columns, in slot order
    pub categorical_cols: Vec<String>,

    /// Transform applied to continuous columns before normalization
    pub continuous_feature_transform: TransformType,

    /// Whether to standardize continuous columns after the transform
    pub normalize_continuous_features: bool,

    /// Fraction of training rows held out for validation when no
    /// validation frame is passed to `fit`
    pub validation_split: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            target: Vec::new(),
            continuous_cols: Vec::new(),
            categorical_cols: Vec::new(),
            continuous_feature_transform: TransformType::Identity,
            normalize_continuous_features: true,
            validation_split: 0.2,
        }
    }
}

impl DataConfig {
    /// Create a configuration for the given targets
    pub fn new<S: Into<String>>(target: impl IntoIterator<Item = S>) -> Self {
        Self {
            target: target.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set continuous feature columns
    pub fn with_continuous<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.continuous_cols = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Set categorical feature columns
    pub fn with_categorical<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.categorical_cols = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Set the continuous feature transform
    pub fn with_transform(mut self, transform: TransformType) -> Self {
        self.continuous_feature_transform = transform;
        self
    }

    /// Enable or disable continuous feature normalization
    pub fn with_normalization(mut self, normalize: bool) -> Self {
        self.normalize_continuous_features = normalize;
        self
    }

    /// Set the held-out validation fraction
    pub fn with_validation_split(mut self, split: f64) -> Self {
        self.validation_split = split;
        self
    }

    /// Number of feature slots the model will see
    pub fn n_features(&self) -> usize {
        self.continuous_cols.len() + self.categorical_cols.len()
    }

    /// Check column lists before any data is touched
    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(TabularError::ConfigError(
                "at least one target column is required".to_string(),
            ));
        }
        if self.n_features() == 0 {
            return Err(TabularError::ConfigError(
                "at least one continuous or categorical column is required".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(TabularError::invalid_parameter(
                "validation_split",
                self.validation_split,
                "must be in [0, 1)",
            ));
        }

        let mut seen = HashSet::new();
        let all = self
            .target
            .iter()
            .chain(&self.continuous_cols)
            .chain(&self.categorical_cols);
        for name in all {
            if !seen.insert(name.as_str()) {
                return Err(TabularError::ConfigError(format!(
                    "column '{}' appears more than once across target, continuous and categorical lists",
                    name
                )));
            }
        }

        Ok(())
    }
}
