//! Error types for the tabular pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, TabularError>;

/// Main error type for the tabular pipeline
#[derive(Error, Debug)]
pub enum TabularError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Column '{column}' configured as {role} is missing from the data")]
    MissingColumn { column: String, role: String },

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl TabularError {
    /// Shorthand for an invalid parameter error
    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        TabularError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<polars::error::PolarsError> for TabularError {
    fn from(err: polars::error::PolarsError) -> Self {
        TabularError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for TabularError {
    fn from(err: serde_json::Error) -> Self {
        TabularError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for TabularError {
    fn from(err: ndarray::ShapeError) -> Self {
        TabularError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TabularError::ConfigError("bad config".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad config");
    }

    #[test]
    fn test_missing_column_display() {
        let err = TabularError::MissingColumn {
            column: "AveRooms".to_string(),
            role: "continuous".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Column 'AveRooms' configured as continuous is missing from the data"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TabularError = io_err.into();
        assert!(matches!(err, TabularError::IoError(_)));
    }
}
