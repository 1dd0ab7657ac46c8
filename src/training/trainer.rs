//! Generic epoch loop
//!
//! The trainer knows nothing about AutoInt: it drives any
//! [`TrainableModel`] through shuffled mini-batches, steps the optimizer,
//! tracks the best epoch and applies early stopping. Both the pretext phase
//! and the supervised phase run through it with their own optimizer state.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::callback::{CallbackAction, EarlyStopping, EpochCallback, StopHandle};
use crate::config::{Monitor, MonitorMode, OptimizerConfig, TrainerConfig};
use crate::data::{BatchLoader, EncodedBatch, EncodedData};
use crate::error::{Result, TabularError};
use crate::nn::Module;
use crate::optim::{build_optimizer, clip_grad_norm};

/// A model the trainer can fit
pub trait TrainableModel: Module + Clone + Serialize {
    /// Forward and backward pass on one batch, accumulating gradients
    ///
    /// Returns the batch loss. A non-finite loss means the step is skipped.
    fn train_step<R: Rng + ?Sized>(&mut self, batch: &EncodedBatch, rng: &mut R) -> Result<f64>;

    /// Loss of one batch in inference mode
    fn eval_loss(&self, batch: &EncodedBatch) -> Result<f64>;
}

/// Which part of the two-phase protocol a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    Pretraining,
    Supervised,
}

impl TrainingPhase {
    pub fn name(&self) -> &'static str {
        match self {
            TrainingPhase::Pretraining => "pretraining",
            TrainingPhase::Supervised => "supervised",
        }
    }

    /// Offset mixed into the seed so each phase draws its own streams
    fn stream(&self) -> u64 {
        match self {
            TrainingPhase::Pretraining => 0x5EED_0001,
            TrainingPhase::Supervised => 0x5EED_0002,
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopReason {
    #[default]
    Completed,
    EarlyStopping,
    Diverged,
    Cancelled,
    Callback,
}

/// Summary of one completed epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Row-weighted mean of the finite batch losses, NaN if there were none
    pub train_loss: f64,
    pub valid_loss: Option<f64>,
    pub learning_rate: f64,
    /// At least one batch produced a non-finite loss
    pub diverged: bool,
}

impl EpochRecord {
    /// Value of the monitored quantity, falling back to the training loss
    /// when there is no validation set
    pub fn monitored(&self, monitor: Monitor) -> f64 {
        match monitor {
            Monitor::ValidLoss => self.valid_loss.unwrap_or(self.train_loss),
            Monitor::TrainLoss => self.train_loss,
        }
    }
}

/// Epoch records of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub phase: TrainingPhase,
    pub epochs: Vec<EpochRecord>,
    /// Epoch with the best monitored value, when checkpointing is enabled
    pub best_epoch: Option<usize>,
    pub stop_reason: StopReason,
}

impl TrainingHistory {
    fn new(phase: TrainingPhase) -> Self {
        Self {
            phase,
            epochs: Vec::new(),
            best_epoch: None,
            stop_reason: StopReason::Completed,
        }
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn diverged(&self) -> bool {
        self.epochs.iter().any(|e| e.diverged)
    }
}

/// Drives a [`TrainableModel`] through epochs
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainerConfig,
    optimizer: OptimizerConfig,
    phase: TrainingPhase,
    max_epochs: usize,
    stop: StopHandle,
}

impl Trainer {
    pub fn new(config: TrainerConfig, optimizer: OptimizerConfig, phase: TrainingPhase) -> Self {
        let max_epochs = config.max_epochs;
        Self {
            config,
            optimizer,
            phase,
            max_epochs,
            stop: StopHandle::default(),
        }
    }

    /// Override the epoch count of the trainer configuration
    pub fn with_max_epochs(mut self, epochs: usize) -> Self {
        self.max_epochs = epochs;
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn batch_limit(&self) -> Option<usize> {
        self.config.fast_dev_run.then_some(1)
    }

    /// Row-weighted mean loss over `data` in inference mode
    pub fn evaluate<M: TrainableModel>(&self, model: &M, data: &EncodedData) -> Result<f64> {
        let loader = BatchLoader::new(data, self.config.batch_size)
            .with_shuffle(false)
            .with_prefetch(self.config.prefetch_batches);
        // batch order is fixed, the generator is never drawn from
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);
        let mut total = 0.0;
        let mut rows = 0usize;
        loader.for_each_batch(&mut rng, self.batch_limit(), |batch| {
            let n = batch.n_rows();
            total += model.eval_loss(&batch)? * n as f64;
            rows += n;
            Ok(())
        })?;
        Ok(if rows > 0 { total / rows as f64 } else { f64::NAN })
    }

    /// Fit `model` in place
    ///
    /// With checkpoints enabled and `load_best` set, the model ends up with
    /// the weights of its best epoch.
    pub fn fit<M: TrainableModel>(
        &self,
        model: &mut M,
        train: &EncodedData,
        valid: Option<&EncodedData>,
        callbacks: &mut [&mut dyn EpochCallback],
    ) -> Result<TrainingHistory> {
        if train.n_rows() == 0 {
            return Err(TabularError::TrainingError("training data is empty".to_string()));
        }
        let valid = valid.filter(|v| v.n_rows() > 0);
        let phase = self.phase.name();

        let mut shuffle_rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed ^ self.phase.stream());
        let mut step_rng = shuffle_rng.clone();
        step_rng.jump();

        let mut optimizer = build_optimizer(&self.optimizer);
        let loader = BatchLoader::new(train, self.config.batch_size)
            .with_shuffle(true)
            .with_prefetch(self.config.prefetch_batches);
        let epochs = if self.config.fast_dev_run { 1 } else { self.max_epochs };
        let limit = self.batch_limit();

        let mut early_stopping = self.config.early_stopping.as_ref().map(EarlyStopping::from_config);
        let checkpoints = self.config.checkpoints.clone();
        let mut best_tracker = checkpoints
            .as_ref()
            .map(|c| EarlyStopping::new(usize::MAX, c.mode == MonitorMode::Max));
        let mut best_model: Option<M> = None;
        let mut history = TrainingHistory::new(self.phase);

        info!(
            phase,
            epochs,
            rows = train.n_rows(),
            batches = loader.num_batches(),
            validation_rows = valid.map_or(0, EncodedData::n_rows),
            parameters = model.num_parameters(),
            "Starting training"
        );

        for epoch in 0..epochs {
            let learning_rate = self
                .optimizer
                .lr_scheduler
                .lr_at(self.optimizer.learning_rate, epoch);
            optimizer.set_learning_rate(learning_rate);

            let mut total = 0.0;
            let mut rows = 0usize;
            let mut diverged = false;
            let mut step = 0usize;
            loader.for_each_batch(&mut shuffle_rng, limit, |batch| {
                let n = batch.n_rows();
                model.zero_grad();
                let loss = model.train_step(&batch, &mut step_rng)?;
                step += 1;
                if !loss.is_finite() {
                    diverged = true;
                    warn!(phase, epoch, step, loss, "Non-finite loss, skipping update");
                    return Ok(());
                }

                let mut params = model.params_mut();
                if let Some(max_norm) = self.config.gradient_clip_val {
                    let norm = clip_grad_norm(&mut params, max_norm);
                    debug!(phase, epoch, step, norm, "Gradient norm");
                }
                optimizer.step(&mut params);

                total += loss * n as f64;
                rows += n;
                debug!(phase, epoch, step, rows = n, loss, "Batch complete");
                Ok(())
            })?;

            let train_loss = if rows > 0 { total / rows as f64 } else { f64::NAN };
            let valid_loss = match valid {
                Some(v) => Some(self.evaluate(model, v)?),
                None => None,
            };
            let record = EpochRecord {
                epoch,
                train_loss,
                valid_loss,
                learning_rate,
                diverged,
            };
            info!(
                phase,
                epoch,
                train_loss,
                valid_loss = ?valid_loss,
                learning_rate,
                diverged,
                "Epoch complete"
            );

            if let (Some(tracker), Some(cfg)) = (best_tracker.as_mut(), checkpoints.as_ref()) {
                if tracker.update(record.monitored(cfg.monitor)) {
                    history.best_epoch = Some(epoch);
                    if cfg.load_best {
                        best_model = Some(model.clone());
                    }
                    if callbacks.iter().any(|c| c.wants_checkpoints()) {
                        let state = serde_json::to_value(&*model)?;
                        for callback in callbacks.iter_mut().filter(|c| c.wants_checkpoints()) {
                            callback.on_checkpoint(epoch, &state)?;
                        }
                    }
                }
            }

            let mut stop = None;
            for callback in callbacks.iter_mut() {
                if callback.on_epoch_end(&record) == CallbackAction::Stop {
                    stop = Some(StopReason::Callback);
                }
            }
            let stop_on_divergence = self
                .config
                .early_stopping
                .as_ref()
                .is_some_and(|c| c.stop_on_divergence);
            if diverged && stop_on_divergence {
                stop = Some(StopReason::Diverged);
            }
            if let (Some(es), Some(cfg)) = (early_stopping.as_mut(), self.config.early_stopping.as_ref()) {
                if es.should_stop(record.monitored(cfg.monitor)) {
                    stop = stop.or(Some(StopReason::EarlyStopping));
                }
            }
            if self.stop.is_stopped() {
                stop = Some(StopReason::Cancelled);
            }

            history.epochs.push(record);
            if let Some(reason) = stop {
                info!(phase, epoch, reason = ?reason, "Stopping training");
                history.stop_reason = reason;
                break;
            }
        }

        if let Some(best) = best_model {
            info!(phase, best_epoch = ?history.best_epoch, "Restoring best model");
            *model = best;
        }
        Ok(history)
    }
}
