//! Encoded tensors and mini-batch iteration

mod loader;

pub use loader::{train_validation_split, BatchLoader};

use ndarray::{Array1, Array2, Axis};

use crate::error::{Result, TabularError};

/// Supervised targets in model space
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// `[rows, n_targets]` regression values
    Regression(Array2<f64>),
    /// `[rows]` class indices
    Classes(Array1<usize>),
}

impl Targets {
    pub fn len(&self) -> usize {
        match self {
            Targets::Regression(y) => y.nrows(),
            Targets::Classes(y) => y.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, indices: &[usize]) -> Self {
        match self {
            Targets::Regression(y) => Targets::Regression(y.select(Axis(0), indices)),
            Targets::Classes(y) => Targets::Classes(y.select(Axis(0), indices)),
        }
    }
}

/// Preprocessed rows ready for the model
///
/// The categorical matrix holds embedding indices, the continuous matrix
/// transformed values; both share the row dimension with `targets`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedData {
    pub categorical: Array2<usize>,
    pub continuous: Array2<f64>,
    pub targets: Option<Targets>,
}

/// A mini-batch is a row subset of [`EncodedData`]
pub type EncodedBatch = EncodedData;

impl EncodedData {
    /// Assemble and check row counts
    pub fn new(
        categorical: Array2<usize>,
        continuous: Array2<f64>,
        targets: Option<Targets>,
    ) -> Result<Self> {
        let n = categorical.nrows();
        if continuous.nrows() != n {
            return Err(TabularError::ShapeError {
                expected: format!("{} continuous rows", n),
                actual: continuous.nrows().to_string(),
            });
        }
        if let Some(t) = &targets {
            if t.len() != n {
                return Err(TabularError::ShapeError {
                    expected: format!("{} target rows", n),
                    actual: t.len().to_string(),
                });
            }
        }
        if categorical.ncols() + continuous.ncols() == 0 {
            return Err(TabularError::DataError("no feature columns".to_string()));
        }
        Ok(Self {
            categorical,
            continuous,
            targets,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.categorical.nrows()
    }

    pub fn n_slots(&self) -> usize {
        self.categorical.ncols() + self.continuous.ncols()
    }

    /// Rows at `indices`, in that order
    pub fn gather(&self, indices: &[usize]) -> Self {
        Self {
            categorical: self.categorical.select(Axis(0), indices),
            continuous: self.continuous.select(Axis(0), indices),
            targets: self.targets.as_ref().map(|t| t.select(indices)),
        }
    }

    /// Same rows without targets
    pub fn features_only(&self) -> Self {
        Self {
            categorical: self.categorical.clone(),
            continuous: self.continuous.clone(),
            targets: None,
        }
    }

    pub fn regression_targets(&self) -> Result<&Array2<f64>> {
        match &self.targets {
            Some(Targets::Regression(y)) => Ok(y),
            _ => Err(TabularError::DataError(
                "batch carries no regression targets".to_string(),
            )),
        }
    }

    pub fn class_targets(&self) -> Result<&Array1<usize>> {
        match &self.targets {
            Some(Targets::Classes(y)) => Ok(y),
            _ => Err(TabularError::DataError(
                "batch carries no class targets".to_string(),
            )),
        }
    }
}
