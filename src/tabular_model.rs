//! Training orchestrator
//!
//! [`TabularModel`] owns the whole pipeline: it fits the preprocessor on the
//! training frame, builds the AutoInt model for the resolved feature spec,
//! optionally pretrains the backbone on the denoising pretext task and then
//! runs supervised training.

use ndarray::{concatenate, Array2, Axis};
use polars::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{info, warn};

use crate::config::{
    Accelerator, DataConfig, ModelConfig, OptimizerConfig, PipelineConfig, SslTask, TaskType, TrainerConfig,
};
use crate::data::{train_validation_split, EncodedData, Targets};
use crate::error::{Result, TabularError};
use crate::models::AutoIntModel;
use crate::nn::{argmax_rows, cross_entropy, mse};
use crate::preprocessing::{FeatureSpec, TabularPreprocessor};
use crate::ssl::DenoisingPretext;
use crate::training::{EpochCallback, ModelMetrics, StopHandle, Trainer, TrainingHistory, TrainingPhase};

/// Seed offset of the pretext head initialization
const PRETEXT_HEAD_STREAM: u64 = 0x55AA_0001;
/// Seed offset of the validation holdout shuffle
const HOLDOUT_STREAM: u64 = 0x55AA_0002;

/// Lifecycle of a [`TabularModel`]
///
/// Without a pretext task the model goes straight from `Untrained` to
/// `SupervisedFit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrainingStage {
    #[default]
    Untrained,
    Pretraining,
    PretrainedBackbone,
    SupervisedFit,
    Fitted,
}

/// Everything needed to turn a dataframe into predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub preprocessor: TabularPreprocessor,
    pub model: AutoIntModel,
}

impl FittedPipeline {
    pub fn feature_spec(&self) -> &FeatureSpec {
        self.preprocessor.feature_spec()
    }

    /// Model output for every row, computed in parallel batches
    fn forward_rows(&self, data: &EncodedData, batch_size: usize) -> Result<Array2<f64>> {
        let n = data.n_rows();
        if n == 0 {
            return Ok(Array2::zeros((0, self.model.output_dim())));
        }
        let starts: Vec<usize> = (0..n).step_by(batch_size.max(1)).collect();
        let parts = starts
            .par_iter()
            .map(|&start| {
                let rows: Vec<usize> = (start..(start + batch_size).min(n)).collect();
                self.model.forward(&data.gather(&rows))
            })
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = parts.iter().map(Array2::view).collect();
        Ok(concatenate(Axis(0), &views)?)
    }
}

/// AutoInt pipeline with fit / evaluate / predict
///
/// # Example
///
/// ```no_run
/// use kolosal_tabular::prelude::*;
/// use polars::prelude::*;
///
/// # fn main() -> kolosal_tabular::Result<()> {
/// let train = df!(
///     "rooms" => &[3.0, 4.0, 5.0, 6.0, 7.0],
///     "zone" => &["a", "b", "a", "c", "b"],
///     "price" => &[100.0, 150.0, 210.0, 260.0, 300.0]
/// )?;
/// let data = DataConfig::new(["price"]).with_continuous(["rooms"]).with_categorical(["zone"]);
/// let mut model = TabularModel::new(
///     data,
///     ModelConfig::new(TaskType::Regression),
///     OptimizerConfig::default(),
///     TrainerConfig::new(5),
/// )?;
/// model.fit(&train, None)?;
/// let predictions = model.predict(&train)?;
/// assert!(predictions.column("price_prediction").is_ok());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct TabularModel {
    config: PipelineConfig,
    stage: TrainingStage,
    fitted: Option<FittedPipeline>,
    /// One entry per run of the last fit; not persisted
    #[serde(skip)]
    history: Vec<TrainingHistory>,
    #[serde(skip)]
    stop: StopHandle,
}

impl TabularModel {
    /// Validate the configuration and create an untrained model
    pub fn new(
        data: DataConfig,
        model: ModelConfig,
        optimizer: OptimizerConfig,
        trainer: TrainerConfig,
    ) -> Result<Self> {
        Self::from_config(PipelineConfig::new(data, model, optimizer, trainer))
    }

    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stage: TrainingStage::Untrained,
            fitted: None,
            history: Vec::new(),
            stop: StopHandle::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stage(&self) -> TrainingStage {
        self.stage
    }

    /// Histories of the last fit, pretraining first when it ran
    pub fn history(&self) -> &[TrainingHistory] {
        &self.history
    }

    /// Handle that cancels a running fit after the current epoch
    ///
    /// The flag is cleared whenever a new fit starts.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn feature_spec(&self) -> Option<&FeatureSpec> {
        self.fitted.as_ref().map(FittedPipeline::feature_spec)
    }

    pub fn fitted(&self) -> Result<&FittedPipeline> {
        self.fitted.as_ref().ok_or(TabularError::ModelNotFitted)
    }

    /// Fit on `train`, validating on `validation` or on a seeded holdout
    pub fn fit(&mut self, train: &DataFrame, validation: Option<&DataFrame>) -> Result<()> {
        self.fit_with_callbacks(train, validation, &mut [])
    }

    /// [`TabularModel::fit`] with epoch callbacks for both phases
    pub fn fit_with_callbacks(
        &mut self,
        train: &DataFrame,
        validation: Option<&DataFrame>,
        callbacks: &mut [&mut dyn EpochCallback],
    ) -> Result<()> {
        self.fitted = None;
        self.history.clear();
        self.stop.reset();
        let result = self.run_fit(train, validation, callbacks);
        if result.is_err() {
            self.stage = TrainingStage::Untrained;
            self.fitted = None;
        }
        result
    }

    fn log_accelerator(&self) {
        match self.config.trainer.accelerator {
            Accelerator::Cpu => info!(accelerator = "cpu", "Training on CPU"),
            Accelerator::Auto => {
                info!(accelerator = "auto", "No accelerator backend available, training on CPU")
            }
        }
    }

    /// Split off validation rows when no validation frame is given
    fn holdout(&self, train: &DataFrame) -> Result<(DataFrame, Option<DataFrame>)> {
        let fraction = self.config.data.validation_split;
        if fraction <= 0.0 || train.height() < 2 {
            return Ok((train.clone(), None));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.trainer.seed ^ HOLDOUT_STREAM);
        let (_, valid_idx) = train_validation_split(train.height(), fraction, &mut rng);
        if valid_idx.is_empty() {
            return Ok((train.clone(), None));
        }

        let mut in_valid = vec![false; train.height()];
        for i in valid_idx {
            in_valid[i] = true;
        }
        let mask = BooleanChunked::from_slice("validation".into(), &in_valid);
        let valid = train.filter(&mask)?;
        let rest = train.filter(&!&mask)?;
        info!(
            train_rows = rest.height(),
            validation_rows = valid.height(),
            "Held out validation rows"
        );
        Ok((rest, Some(valid)))
    }

    fn run_fit(
        &mut self,
        train: &DataFrame,
        validation: Option<&DataFrame>,
        callbacks: &mut [&mut dyn EpochCallback],
    ) -> Result<()> {
        self.log_accelerator();
        let split;
        let (train_df, valid_df) = match validation {
            Some(v) => (train, Some(v)),
            None => {
                split = self.holdout(train)?;
                (&split.0, split.1.as_ref())
            }
        };

        let model_config = &self.config.model;
        let trainer_config = &self.config.trainer;
        let preprocessor = TabularPreprocessor::fit(train_df, &self.config.data, model_config.task)?;
        let spec = preprocessor.feature_spec().clone();
        let train_data = preprocessor.transform(train_df, true)?;
        let valid_data = valid_df
            .map(|v| preprocessor.transform(v, true))
            .transpose()?;

        let mut init_rng = Xoshiro256PlusPlus::seed_from_u64(trainer_config.seed);
        let mut model = AutoIntModel::new(&spec, model_config, &mut init_rng)?;

        if model_config.ssl_task == SslTask::Denoising {
            self.stage = TrainingStage::Pretraining;
            let mut head_rng = Xoshiro256PlusPlus::seed_from_u64(trainer_config.seed ^ PRETEXT_HEAD_STREAM);
            let mut pretext = DenoisingPretext::new(model.backbone.clone(), model_config, &mut head_rng);
            let epochs = model_config.ssl_epochs.unwrap_or(trainer_config.max_epochs);
            info!(epochs, augmentation = ?model_config.aug_task, "Pretraining backbone");

            let trainer = Trainer::new(
                trainer_config.clone(),
                self.config.optimizer.clone(),
                TrainingPhase::Pretraining,
            )
            .with_max_epochs(epochs)
            .with_stop_handle(self.stop.clone());
            let history = trainer.fit(&mut pretext, &train_data.features_only(), None, callbacks)?;
            if history.diverged() {
                warn!("Pretext loss diverged during pretraining");
            }
            self.history.push(history);

            model.backbone = pretext.into_backbone();
            self.stage = TrainingStage::PretrainedBackbone;
        }

        self.stage = TrainingStage::SupervisedFit;
        let trainer = Trainer::new(
            trainer_config.clone(),
            self.config.optimizer.clone(),
            TrainingPhase::Supervised,
        )
        .with_stop_handle(self.stop.clone());
        let history = trainer.fit(&mut model, &train_data, valid_data.as_ref(), callbacks)?;
        info!(
            epochs = history.epochs.len(),
            best_epoch = ?history.best_epoch,
            stop_reason = ?history.stop_reason,
            "Supervised training finished"
        );
        self.history.push(history);

        self.fitted = Some(FittedPipeline { preprocessor, model });
        self.stage = TrainingStage::Fitted;
        Ok(())
    }

    /// Loss and task metrics on a labelled frame
    ///
    /// Returns one map per evaluated frame with `test_*` keys.
    pub fn evaluate(&self, df: &DataFrame) -> Result<Vec<BTreeMap<String, f64>>> {
        let fitted = self.fitted()?;
        let spec = fitted.feature_spec();
        let data = fitted.preprocessor.transform(df, true)?;
        let output = fitted.forward_rows(&data, self.config.trainer.batch_size)?;

        let metrics = match &data.targets {
            Some(Targets::Regression(y)) => {
                let (loss, _) = mse(&output, y, None);
                ModelMetrics::compute_regression(loss, y, &fitted.model.finalize(output))
            }
            Some(Targets::Classes(labels)) => {
                let (loss, _, probs) = cross_entropy(&output, labels.view(), None);
                ModelMetrics::compute_classification(loss, labels, &probs)
            }
            None => return Err(TabularError::DataError("evaluation frame has no targets".to_string())),
        };
        info!(rows = df.height(), loss = metrics.loss, "Evaluated model");
        Ok(vec![metrics.to_report(&spec.targets)])
    }

    /// Predictions as a `[rows, outputs]` matrix
    ///
    /// Regression columns follow target order; classification columns hold
    /// class probabilities in class order.
    pub fn predict_array(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let fitted = self.fitted()?;
        let data = fitted.preprocessor.transform(df, false)?;
        let output = fitted.forward_rows(&data, self.config.trainer.batch_size)?;
        Ok(fitted.model.finalize(output))
    }

    /// The input frame with prediction columns appended
    pub fn predict(&self, df: &DataFrame) -> Result<DataFrame> {
        let fitted = self.fitted()?;
        let spec = fitted.feature_spec();
        let predictions = self.predict_array(df)?;
        let mut result = df.clone();

        match spec.task {
            TaskType::Regression => {
                for (j, target) in spec.targets.iter().enumerate() {
                    let name = format!("{}_prediction", target);
                    result.with_column(Series::new(name.into(), predictions.column(j).to_vec()))?;
                }
            }
            TaskType::Classification => {
                for (j, class) in spec.classes.iter().enumerate() {
                    let name = format!("{}_probability", class);
                    result.with_column(Series::new(name.into(), predictions.column(j).to_vec()))?;
                }
                let labels: Vec<String> = argmax_rows(&predictions)
                    .iter()
                    .map(|&c| spec.classes.get(c).cloned().unwrap_or_default())
                    .collect();
                result.with_column(Series::new("prediction".into(), labels))?;
            }
        }
        Ok(result)
    }

    /// Mean attention each feature receives in the last attention block
    ///
    /// Scores are in slot order (categorical features first) and sum to one.
    pub fn feature_importance(&self, df: &DataFrame) -> Result<Vec<(String, f64)>> {
        let fitted = self.fitted()?;
        let spec = fitted.feature_spec();
        let data = fitted.preprocessor.transform(df, false)?;
        let n = data.n_rows();
        let slots = spec.n_slots();
        let batch_size = self.config.trainer.batch_size.max(1);

        let mut received = vec![0.0; slots];
        for start in (0..n).step_by(batch_size) {
            let rows: Vec<usize> = (start..(start + batch_size).min(n)).collect();
            let maps = fitted.model.feature_attention(&data.gather(&rows));
            if let Some(last) = maps.last() {
                // [batch, query, key] -> attention received per key
                let per_key = last.sum_axis(Axis(0)).sum_axis(Axis(0));
                for (total, value) in received.iter_mut().zip(per_key.iter()) {
                    *total += value;
                }
            }
        }

        let norm = received.iter().sum::<f64>();
        Ok(spec
            .slot_names()
            .into_iter()
            .zip(received)
            .map(|(name, total)| {
                let score = if norm > 0.0 { total / norm } else { 0.0 };
                (name.to_string(), score)
            })
            .collect())
    }

    /// Write the configuration and fitted pipeline as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.fitted()?;
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        info!(path = %path.as_ref().display(), "Saved model");
        Ok(())
    }

    /// Load a model written by [`TabularModel::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let model: Self = serde_json::from_reader(reader)?;
        model.config.validate()?;
        if model.fitted.is_none() {
            return Err(TabularError::SerializationError(
                "saved model carries no fitted pipeline".to_string(),
            ));
        }
        info!(path = %path.as_ref().display(), "Loaded model");
        Ok(model)
    }
}
