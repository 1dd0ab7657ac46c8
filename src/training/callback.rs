//! Epoch callbacks, early stopping and external cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{EarlyStoppingConfig, MonitorMode};
use crate::error::Result;

use super::trainer::EpochRecord;

/// Action requested by a callback after an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Hook invoked by the trainer at epoch boundaries
///
/// All methods have no-op defaults. Checkpoints are only produced for
/// callbacks that ask for them, since serializing the model each time the
/// monitored value improves is not free.
pub trait EpochCallback {
    fn on_epoch_end(&mut self, _record: &EpochRecord) -> CallbackAction {
        CallbackAction::Continue
    }

    fn wants_checkpoints(&self) -> bool {
        false
    }

    /// Receives the serialized model whenever the monitored value improves
    fn on_checkpoint(&mut self, _epoch: usize, _state: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}

/// Cooperative cancellation flag checked after every completed epoch
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running fit to stop after the current epoch
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Tracks the best value of a monitored quantity
///
/// # Example
///
/// ```
/// use kolosal_tabular::training::EarlyStopping;
///
/// let mut early_stop = EarlyStopping::new(2, false);
/// assert!(!early_stop.should_stop(1.0));
/// assert!(!early_stop.should_stop(1.1));
/// assert!(early_stop.should_stop(1.2));
/// ```
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    /// Epochs without improvement before stopping
    patience: usize,
    /// Smallest change that counts as an improvement
    min_delta: f64,
    best_value: Option<f64>,
    best_round: usize,
    current_round: usize,
    higher_is_better: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize, higher_is_better: bool) -> Self {
        Self {
            patience,
            min_delta: 0.0,
            best_value: None,
            best_round: 0,
            current_round: 0,
            higher_is_better,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    pub fn from_config(config: &EarlyStoppingConfig) -> Self {
        Self::new(config.patience, config.mode == MonitorMode::Max).with_min_delta(config.min_delta)
    }

    /// Record a value; returns whether it improved on the best so far
    ///
    /// Non-finite values never count as an improvement.
    pub fn update(&mut self, value: f64) -> bool {
        let improved = value.is_finite()
            && match self.best_value {
                None => true,
                Some(best) if self.higher_is_better => value > best + self.min_delta,
                Some(best) => value < best - self.min_delta,
            };
        if improved {
            self.best_value = Some(value);
            self.best_round = self.current_round;
        }
        self.current_round += 1;
        improved
    }

    /// Record a value and check whether patience is exhausted
    pub fn should_stop(&mut self, value: f64) -> bool {
        self.update(value);
        self.exhausted()
    }

    /// True once `patience` rounds passed without improvement
    pub fn exhausted(&self) -> bool {
        self.current_round - self.best_round > self.patience
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    pub fn best_round(&self) -> usize {
        self.best_round
    }

    pub fn current_round(&self) -> usize {
        self.current_round
    }

    pub fn reset(&mut self) {
        self.best_value = None;
        self.best_round = 0;
        self.current_round = 0;
    }
}
