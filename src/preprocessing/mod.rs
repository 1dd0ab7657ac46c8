//! Data preprocessing module
//!
//! Turns a dataframe into encoded model inputs:
//! - Feature spec resolution and schema checks
//! - Categorical encoding with a reserved unknown index
//! - Continuous imputation, power/quantile transforms and standard scaling
//!
//! Every parameter is fitted on the training split only and frozen afterwards.

mod continuous;
mod encoder;
mod pipeline;
mod scaler;
mod schema;
pub mod transforms;

pub use continuous::{ContinuousColumn, ContinuousTransformer};
pub use encoder::{CategoricalEncoder, Codebook, MISSING_CATEGORY};
pub use pipeline::TabularPreprocessor;
pub use scaler::ScalerParams;
pub use schema::{check_schema, f64_values, require_column, string_values, CategoricalFeature, FeatureSpec};
pub use transforms::{normal_ppf, TransformParams, TransformType};
