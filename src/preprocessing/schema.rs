//! Feature specification and dataframe schema checks

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{DataConfig, TaskType};
use crate::error::{Result, TabularError};

/// A categorical feature and the size of its fitted vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalFeature {
    pub name: String,
    /// Distinct categories seen during fit, excluding the unknown slot
    pub cardinality: usize,
}

impl CategoricalFeature {
    /// Rows needed in the embedding table, including the unknown row
    pub fn num_embeddings(&self) -> usize {
        self.cardinality + 1
    }
}

/// Resolved, immutable description of the model inputs and outputs
///
/// Slot order is categorical features first, then continuous features, each
/// in configured order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub categorical: Vec<CategoricalFeature>,
    pub continuous: Vec<String>,
    pub targets: Vec<String>,
    pub task: TaskType,
    /// Ordered class labels; empty for regression
    pub classes: Vec<String>,
}

impl FeatureSpec {
    pub fn n_categorical(&self) -> usize {
        self.categorical.len()
    }

    pub fn n_continuous(&self) -> usize {
        self.continuous.len()
    }

    /// Total number of feature slots
    pub fn n_slots(&self) -> usize {
        self.n_categorical() + self.n_continuous()
    }

    pub fn n_targets(&self) -> usize {
        self.targets.len()
    }

    /// Width of the prediction head
    pub fn output_dim(&self) -> usize {
        match self.task {
            TaskType::Regression => self.targets.len(),
            TaskType::Classification => self.classes.len(),
        }
    }

    /// Feature names in slot order
    pub fn slot_names(&self) -> Vec<&str> {
        self.categorical
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.continuous.iter().map(String::as_str))
            .collect()
    }

    /// Embedding table sizes, in categorical slot order
    pub fn embedding_sizes(&self) -> Vec<usize> {
        self.categorical.iter().map(CategoricalFeature::num_embeddings).collect()
    }
}

pub(crate) fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Boolean
            | DataType::Null
    )
}

/// Look up a column, reporting the role it was configured for
pub fn require_column<'a>(df: &'a DataFrame, name: &str, role: &str) -> Result<&'a Column> {
    df.column(name).map_err(|_| TabularError::MissingColumn {
        column: name.to_string(),
        role: role.to_string(),
    })
}

/// Check that every configured column is present with a usable dtype
pub fn check_schema(
    df: &DataFrame,
    config: &DataConfig,
    task: TaskType,
    require_targets: bool,
) -> Result<()> {
    for name in &config.continuous_cols {
        let column = require_column(df, name, "continuous")?;
        if !is_numeric(column.dtype()) {
            return Err(TabularError::ConfigError(format!(
                "continuous column '{}' has non-numeric dtype {}",
                name,
                column.dtype()
            )));
        }
    }
    for name in &config.categorical_cols {
        require_column(df, name, "categorical")?;
    }
    if require_targets {
        for name in &config.target {
            let column = require_column(df, name, "target")?;
            if task == TaskType::Regression && !is_numeric(column.dtype()) {
                return Err(TabularError::ConfigError(format!(
                    "regression target '{}' has non-numeric dtype {}",
                    name,
                    column.dtype()
                )));
            }
        }
    }
    Ok(())
}

/// Column values as `f64`, nulls preserved
pub fn f64_values(df: &DataFrame, name: &str, role: &str) -> Result<Vec<Option<f64>>> {
    let column = require_column(df, name, role)?;
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

/// Column values rendered as strings, nulls preserved
pub fn string_values(df: &DataFrame, name: &str, role: &str) -> Result<Vec<Option<String>>> {
    let column = require_column(df, name, role)?;
    let series = column.as_materialized_series().cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}
