//! Model training
//!
//! - [`Trainer`]: the generic epoch loop over any [`TrainableModel`]
//! - [`EarlyStopping`], [`EpochCallback`] and [`StopHandle`] for stopping
//!   and checkpointing
//! - [`ModelMetrics`] for evaluation reports

mod callback;
mod metrics;
mod trainer;

pub use callback::{CallbackAction, EarlyStopping, EpochCallback, StopHandle};
pub use metrics::ModelMetrics;
pub use trainer::{EpochRecord, StopReason, TrainableModel, Trainer, TrainingHistory, TrainingPhase};
