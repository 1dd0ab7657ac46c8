//! Categorical encoding to dense embedding indices

use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::schema::string_values;
use crate::error::Result;

/// Display label of the null category
///
/// Nulls are tracked apart from string values, so a literal category with
/// this text keeps its own index.
pub const MISSING_CATEGORY: &str = "NA";

/// Mapping from observed categories to dense indices
///
/// Categories get indices `0..k` in first-seen order, null being one of them
/// when the training column had nulls; index `k` is reserved for values never
/// seen during fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Option<String>>", into = "Vec<Option<String>>")]
pub struct Codebook {
    categories: Vec<Option<String>>,
    lookup: HashMap<String, usize>,
    missing: Option<usize>,
}

impl From<Vec<Option<String>>> for Codebook {
    fn from(categories: Vec<Option<String>>) -> Self {
        let mut codebook = Self {
            categories: Vec::with_capacity(categories.len()),
            lookup: HashMap::with_capacity(categories.len()),
            missing: None,
        };
        for category in categories {
            codebook.insert(category);
        }
        codebook
    }
}

impl From<Vec<String>> for Codebook {
    fn from(categories: Vec<String>) -> Self {
        Self::from(categories.into_iter().map(Some).collect::<Vec<_>>())
    }
}

impl From<Codebook> for Vec<Option<String>> {
    fn from(codebook: Codebook) -> Self {
        codebook.categories
    }
}

impl Codebook {
    /// Build a codebook from training values, nulls included
    pub fn fit<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        let mut codebook = Self::from(Vec::<Option<String>>::new());
        for value in values {
            codebook.insert(value.map(str::to_string));
        }
        codebook
    }

    fn insert(&mut self, category: Option<String>) {
        let index = self.categories.len();
        match &category {
            Some(value) if !self.lookup.contains_key(value) => {
                self.lookup.insert(value.clone(), index);
            }
            None if self.missing.is_none() => self.missing = Some(index),
            _ => return,
        }
        self.categories.push(category);
    }

    /// Number of known categories `k`
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Index reserved for unseen values
    pub fn unknown_index(&self) -> usize {
        self.categories.len()
    }

    /// Index of a value; unseen values, and nulls when none were seen in fit,
    /// map to [`Codebook::unknown_index`]
    pub fn encode(&self, value: Option<&str>) -> usize {
        match value {
            Some(value) => self.lookup.get(value).copied(),
            None => self.missing,
        }
        .unwrap_or_else(|| self.unknown_index())
    }

    /// Index of a known non-null value, `None` when unseen
    pub fn get(&self, value: &str) -> Option<usize> {
        self.lookup.get(value).copied()
    }

    /// Known categories in index order, `None` standing for null
    pub fn categories(&self) -> &[Option<String>] {
        &self.categories
    }

    /// Category names in index order, nulls shown as [`MISSING_CATEGORY`]
    pub fn labels(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|c| c.as_deref().unwrap_or(MISSING_CATEGORY).to_string())
            .collect()
    }
}

/// Fitted codebooks for every categorical column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    columns: Vec<(String, Codebook)>,
}

impl CategoricalEncoder {
    /// Fit one codebook per column on the training frame
    pub fn fit(df: &DataFrame, columns: &[String]) -> Result<Self> {
        let columns = columns
            .iter()
            .map(|name| {
                let values = string_values(df, name, "categorical")?;
                let codebook = Codebook::fit(values.iter().map(Option::as_deref));
                Ok((name.clone(), codebook))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }

    /// Encode the configured columns into a `[rows, columns]` index matrix
    pub fn transform(&self, df: &DataFrame) -> Result<Array2<usize>> {
        let mut out = Array2::zeros((df.height(), self.columns.len()));
        for (j, (name, codebook)) in self.columns.iter().enumerate() {
            let values = string_values(df, name, "categorical")?;
            for (i, value) in values.iter().enumerate() {
                out[[i, j]] = codebook.encode(value.as_deref());
            }
        }
        Ok(out)
    }

    pub fn codebook(&self, name: &str) -> Option<&Codebook> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, codebook)| codebook)
    }

    /// Column names and codebooks in slot order
    pub fn codebooks(&self) -> impl Iterator<Item = (&str, &Codebook)> {
        self.columns.iter().map(|(name, cb)| (name.as_str(), cb))
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }
}
