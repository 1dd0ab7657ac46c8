//! Kolosal Tabular - AutoInt deep learning for tabular data
//!
//! A configuration-driven pipeline that preprocesses a dataframe, learns
//! feature interactions with multi-head self-attention (AutoInt), optionally
//! pretrains on a denoising pretext task, and exposes fit / evaluate /
//! predict for regression and classification.
//!
//! # Modules
//!
//! ## Pipeline
//! - [`config`] - Data, model, optimizer and trainer configuration
//! - [`preprocessing`] - Categorical codebooks, continuous transforms, scaling
//! - [`data`] - Encoded tensors, batching and validation splits
//! - [`tabular_model`] - The fit / evaluate / predict orchestrator
//! - [`embedding_transformer`] - Categorical columns to learned embeddings
//!
//! ## Model
//! - [`nn`] - Parameters, layers, activations and losses
//! - [`models`] - Embedding fusion, attention stack, deep branch, head
//! - [`ssl`] - Cutmix augmentation and the denoising pretext task
//!
//! ## Training
//! - [`optim`] - Adam, SGD, schedules and gradient clipping
//! - [`training`] - Generic trainer, early stopping, callbacks, metrics

// Core error handling
pub mod error;

// Configuration and data
pub mod config;
pub mod data;
pub mod preprocessing;

// Model
pub mod models;
pub mod nn;
pub mod ssl;

// Training
pub mod optim;
pub mod training;

// Pipeline surfaces
pub mod embedding_transformer;
pub mod tabular_model;

pub use error::{Result, TabularError};
pub use tabular_model::TabularModel;

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{Result, TabularError};

    // Configuration
    pub use crate::config::{
        Accelerator, AugTask, CheckpointConfig, DataConfig, EarlyStoppingConfig, LrScheduler, ModelConfig,
        Monitor, MonitorMode, OptimizerConfig, OptimizerKind, PipelineConfig, SslTask, TargetRange,
        TargetRangeMode, TaskType, TrainerConfig,
    };

    // Preprocessing
    pub use crate::preprocessing::{Codebook, FeatureSpec, TabularPreprocessor, TransformType};

    // Model
    pub use crate::models::{AutoIntModel, SlotReduction, Topology};

    // Training
    pub use crate::training::{
        CallbackAction, EpochCallback, EpochRecord, StopHandle, StopReason, TrainingHistory, TrainingPhase,
    };

    // Pipeline
    pub use crate::embedding_transformer::CategoricalEmbeddingTransformer;
    pub use crate::tabular_model::{FittedPipeline, TabularModel, TrainingStage};
}
