//! Replace categorical columns by their learned embeddings

use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TabularError};
use crate::preprocessing::{string_values, Codebook};
use crate::tabular_model::TabularModel;

/// Embedding table of one categorical column
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddedColumn {
    name: String,
    codebook: Codebook,
    /// `(k + 1) x d`, the last row embeds unseen values
    table: Array2<f64>,
}

/// Turns each categorical column into `<col>_embed_dim_<i>` float columns
///
/// Built from a fitted [`TabularModel`]; it copies the codebooks and
/// embedding tables and never changes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalEmbeddingTransformer {
    columns: Vec<EmbeddedColumn>,
}

impl CategoricalEmbeddingTransformer {
    pub fn new(model: &TabularModel) -> Result<Self> {
        let fitted = model.fitted()?;
        let fusion = &fitted.model.backbone.fusion;
        let columns = fitted
            .preprocessor
            .categorical_encoder()
            .codebooks()
            .enumerate()
            .map(|(slot, (name, codebook))| {
                let embedding = fusion.embedding(slot).ok_or_else(|| {
                    TabularError::ShapeError {
                        expected: format!("embedding table for '{}'", name),
                        actual: format!("{} tables", fusion.n_categorical()),
                    }
                })?;
                Ok(EmbeddedColumn {
                    name: name.to_string(),
                    codebook: codebook.clone(),
                    table: embedding.table.value.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }

    /// Names of the generated columns for `column`
    pub fn output_names(&self, column: &str) -> Vec<String> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| {
                (0..c.table.ncols())
                    .map(|i| format!("{}_embed_dim_{}", c.name, i))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copy of `df` with every categorical column replaced by its embedding
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut out = df.clone();
        for column in &self.columns {
            let values = string_values(df, &column.name, "categorical")?;
            let indices: Vec<usize> = values
                .iter()
                .map(|v| column.codebook.encode(v.as_deref()).min(column.table.nrows() - 1))
                .collect();

            out = out.drop(&column.name)?;
            for (i, name) in self.output_names(&column.name).into_iter().enumerate() {
                let dim: Vec<f64> = indices.iter().map(|&row| column.table[[row, i]]).collect();
                out.with_column(Series::new(name.into(), dim))?;
            }
            debug!(column = %column.name, dims = column.table.ncols(), "Embedded categorical column");
        }
        Ok(out)
    }
}
