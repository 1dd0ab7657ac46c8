//! Continuous feature imputation, transformation and normalization

use ndarray::Array2;
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::scaler::ScalerParams;
use super::schema::f64_values;
use super::transforms::{TransformParams, TransformType};
use crate::error::Result;

/// Frozen parameters for one continuous column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousColumn {
    pub name: String,
    /// Replacement for nulls and non-finite values (training mean)
    pub fill_value: f64,
    pub transform: TransformParams,
    pub scaler: Option<ScalerParams>,
}

impl ContinuousColumn {
    fn fit(name: &str, raw: &[Option<f64>], kind: TransformType, normalize: bool) -> Self {
        let observed: Vec<f64> = raw.iter().flatten().copied().filter(|v| v.is_finite()).collect();
        let fill_value = if observed.is_empty() {
            0.0
        } else {
            observed.iter().sum::<f64>() / observed.len() as f64
        };

        let filled: Vec<f64> = raw.iter().map(|v| fill(*v, fill_value)).collect();
        let transform = TransformParams::fit(kind, &filled);
        let scaler = normalize.then(|| {
            let transformed: Vec<f64> = filled.iter().map(|&v| transform.apply(v)).collect();
            ScalerParams::fit(&transformed)
        });

        Self {
            name: name.to_string(),
            fill_value,
            transform,
            scaler,
        }
    }

    /// Apply the frozen fill, transform and scaling to one value
    pub fn apply(&self, value: Option<f64>) -> f64 {
        let transformed = self.transform.apply(fill(value, self.fill_value));
        match &self.scaler {
            Some(scaler) => scaler.scale(transformed),
            None => transformed,
        }
    }
}

fn fill(value: Option<f64>, fill_value: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => fill_value,
    }
}

/// Per-column continuous preprocessing, fitted on the training split only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuousTransformer {
    columns: Vec<ContinuousColumn>,
}

impl ContinuousTransformer {
    /// Fit every column in parallel; output order follows `columns`
    pub fn fit(
        df: &DataFrame,
        columns: &[String],
        kind: TransformType,
        normalize: bool,
    ) -> Result<Self> {
        let raw = columns
            .iter()
            .map(|name| f64_values(df, name, "continuous"))
            .collect::<Result<Vec<_>>>()?;

        let columns = columns
            .par_iter()
            .zip(raw.par_iter())
            .map(|(name, values)| ContinuousColumn::fit(name, values, kind, normalize))
            .collect();

        Ok(Self { columns })
    }

    /// Transform the configured columns into a `[rows, columns]` matrix
    pub fn transform(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let raw = self
            .columns
            .iter()
            .map(|col| f64_values(df, &col.name, "continuous"))
            .collect::<Result<Vec<_>>>()?;

        let transformed: Vec<Vec<f64>> = self
            .columns
            .par_iter()
            .zip(raw.par_iter())
            .map(|(col, values)| values.iter().map(|&v| col.apply(v)).collect())
            .collect();

        let mut out = Array2::zeros((df.height(), self.columns.len()));
        for (j, values) in transformed.iter().enumerate() {
            for (i, &v) in values.iter().enumerate() {
                out[[i, j]] = v;
            }
        }
        Ok(out)
    }

    pub fn columns(&self) -> &[ContinuousColumn] {
        &self.columns
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }
}
