//! Fitted preprocessing from a dataframe to encoded model inputs

use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::continuous::ContinuousTransformer;
use super::encoder::{CategoricalEncoder, Codebook};
use super::schema::{
    check_schema, f64_values, is_numeric, require_column, string_values, CategoricalFeature,
    FeatureSpec,
};
use crate::config::{DataConfig, TaskType};
use crate::data::{EncodedData, Targets};
use crate::error::{Result, TabularError};

/// Categorical and continuous preprocessing fitted on a training frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularPreprocessor {
    config: DataConfig,
    spec: FeatureSpec,
    categorical: CategoricalEncoder,
    continuous: ContinuousTransformer,
    /// Class label codebook for classification targets
    classes: Option<Codebook>,
}

impl TabularPreprocessor {
    /// Resolve the feature spec and fit every encoder on `train`
    pub fn fit(train: &DataFrame, config: &DataConfig, task: TaskType) -> Result<Self> {
        check_schema(train, config, task, true)?;
        if train.height() == 0 {
            return Err(TabularError::DataError("training frame has no rows".to_string()));
        }

        let categorical = CategoricalEncoder::fit(train, &config.categorical_cols)?;
        let continuous = ContinuousTransformer::fit(
            train,
            &config.continuous_cols,
            config.continuous_feature_transform,
            config.normalize_continuous_features,
        )?;

        let classes = match task {
            TaskType::Classification => {
                let name = &config.target[0];
                let mut labels: Vec<String> = string_values(train, name, "target")?
                    .into_iter()
                    .map(|v| {
                        v.ok_or_else(|| {
                            TabularError::DataError(format!("target column '{}' has nulls", name))
                        })
                    })
                    .collect::<Result<_>>()?;
                let numeric = is_numeric(require_column(train, name, "target")?.dtype());
                sort_labels(&mut labels, numeric);
                labels.dedup();
                Some(Codebook::from(labels))
            }
            TaskType::Regression => None,
        };

        let spec = FeatureSpec {
            categorical: categorical
                .codebooks()
                .map(|(name, cb)| CategoricalFeature {
                    name: name.to_string(),
                    cardinality: cb.len(),
                })
                .collect(),
            continuous: config.continuous_cols.clone(),
            targets: config.target.clone(),
            task,
            classes: classes
                .as_ref()
                .map(Codebook::labels)
                .unwrap_or_default(),
        };

        debug!(
            rows = train.height(),
            categorical = spec.n_categorical(),
            continuous = spec.n_continuous(),
            "Fitted tabular preprocessor"
        );

        Ok(Self {
            config: config.clone(),
            spec,
            categorical,
            continuous,
            classes,
        })
    }

    pub fn feature_spec(&self) -> &FeatureSpec {
        &self.spec
    }

    pub fn categorical_encoder(&self) -> &CategoricalEncoder {
        &self.categorical
    }

    pub fn continuous_transformer(&self) -> &ContinuousTransformer {
        &self.continuous
    }

    /// Encode features, and targets when `with_targets` is set
    pub fn transform(&self, df: &DataFrame, with_targets: bool) -> Result<EncodedData> {
        check_schema(df, &self.config, self.spec.task, with_targets)?;

        let categorical = self.categorical.transform(df)?;
        let continuous = self.continuous.transform(df)?;
        let targets = if with_targets {
            Some(self.encode_targets(df)?)
        } else {
            None
        };
        EncodedData::new(categorical, continuous, targets)
    }

    fn encode_targets(&self, df: &DataFrame) -> Result<Targets> {
        match &self.classes {
            Some(codebook) => {
                let name = &self.spec.targets[0];
                let labels = string_values(df, name, "target")?
                    .into_iter()
                    .map(|value| {
                        value
                            .as_deref()
                            .and_then(|v| codebook.get(v))
                            .ok_or_else(|| {
                                TabularError::DataError(format!(
                                    "target column '{}' has label {:?} not seen during fit",
                                    name, value
                                ))
                            })
                    })
                    .collect::<Result<Array1<usize>>>()?;
                Ok(Targets::Classes(labels))
            }
            None => {
                let mut y = Array2::zeros((df.height(), self.spec.n_targets()));
                for (j, name) in self.spec.targets.iter().enumerate() {
                    for (i, value) in f64_values(df, name, "target")?.into_iter().enumerate() {
                        y[[i, j]] = value.filter(|v| v.is_finite()).ok_or_else(|| {
                            TabularError::DataError(format!(
                                "target column '{}' has a missing value at row {}",
                                name, i
                            ))
                        })?;
                    }
                }
                Ok(Targets::Regression(y))
            }
        }
    }
}

/// Order class labels: numerically for numeric target columns, lexically otherwise
fn sort_labels(labels: &mut [String], numeric: bool) {
    if numeric {
        labels.sort_by(|a, b| match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => x.total_cmp(&y),
            _ => a.cmp(b),
        });
    } else {
        labels.sort();
    }
}
