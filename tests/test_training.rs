//! Training behaviour: determinism, phases, stopping and output ranges

mod common;

use kolosal_tabular::prelude::*;
use kolosal_tabular::training::Trainer;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use common::{housing, HOUSING_CONTINUOUS};

fn data_config() -> DataConfig {
    DataConfig::new(["MedHouseVal"])
        .with_continuous(HOUSING_CONTINUOUS)
        .with_categorical(["HouseAgeBin"])
}

fn model_config() -> ModelConfig {
    ModelConfig::new(TaskType::Regression)
        .with_embedding_dim(8)
        .with_num_attn_blocks(1)
}

fn fit(model: ModelConfig, trainer: TrainerConfig) -> TabularModel {
    let mut tabular =
        TabularModel::new(data_config(), model, OptimizerConfig::default(), trainer).unwrap();
    tabular.fit(&housing(160, 21), None).unwrap();
    tabular
}

#[test]
fn test_same_seed_same_predictions() {
    let config = model_config().with_ssl(SslTask::Denoising, AugTask::Cutmix);
    let trainer = TrainerConfig::new(2).with_seed(7);
    let first = fit(config.clone(), trainer.clone());
    let second = fit(config, trainer);

    let test = housing(25, 22);
    assert_eq!(
        first.predict_array(&test).unwrap(),
        second.predict_array(&test).unwrap()
    );
}

#[test]
fn test_different_seed_different_predictions() {
    let first = fit(model_config(), TrainerConfig::new(1).with_seed(1));
    let second = fit(model_config(), TrainerConfig::new(1).with_seed(2));

    let test = housing(25, 23);
    assert_ne!(
        first.predict_array(&test).unwrap(),
        second.predict_array(&test).unwrap()
    );
}

#[test]
fn test_no_pretext_skips_pretraining() {
    let train = housing(160, 21);
    let test = housing(25, 24);
    let data = data_config().with_validation_split(0.0);
    let trainer = TrainerConfig::new(2).with_seed(11);
    let optimizer = OptimizerConfig::default();

    let mut tabular =
        TabularModel::new(data.clone(), model_config(), optimizer.clone(), trainer.clone()).unwrap();
    tabular.fit(&train, None).unwrap();
    let history = tabular.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].phase, TrainingPhase::Supervised);

    // The same seed trained without the pipeline: no pretext step may touch
    // the backbone before supervised training
    let preprocessor = TabularPreprocessor::fit(&train, &data, TaskType::Regression).unwrap();
    let encoded = preprocessor.transform(&train, true).unwrap();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
    let mut model = AutoIntModel::new(preprocessor.feature_spec(), &model_config(), &mut rng).unwrap();
    Trainer::new(trainer, optimizer, TrainingPhase::Supervised)
        .fit(&mut model, &encoded, None, &mut [])
        .unwrap();

    let direct = model
        .predict(&preprocessor.transform(&test, false).unwrap())
        .unwrap();
    assert_eq!(tabular.predict_array(&test).unwrap(), direct);
}

#[test]
fn test_augmentation_requires_pretext() {
    let result = TabularModel::new(
        data_config(),
        model_config().with_ssl(SslTask::None, AugTask::Cutmix),
        OptimizerConfig::default(),
        TrainerConfig::new(1),
    );
    assert!(matches!(result, Err(TabularError::ConfigError(_))));
}

#[test]
fn test_pretraining_changes_backbone() {
    let trainer = TrainerConfig::new(2).with_seed(3);
    let plain = fit(model_config(), trainer.clone());
    let pretrained = fit(
        model_config()
            .with_ssl(SslTask::Denoising, AugTask::None)
            .with_ssl_epochs(1),
        trainer,
    );

    assert_eq!(pretrained.history()[0].phase, TrainingPhase::Pretraining);
    let test = housing(25, 25);
    assert_ne!(
        plain.predict_array(&test).unwrap(),
        pretrained.predict_array(&test).unwrap()
    );
}

#[test]
fn test_target_range_modes_bound_predictions() {
    let range = TargetRange::new(1.0, 2.0);
    for mode in [TargetRangeMode::TrainAndPredict, TargetRangeMode::PredictOnly] {
        let model = fit(
            model_config()
                .with_target_range(vec![range])
                .with_target_range_mode(mode),
            TrainerConfig::new(1),
        );
        let predictions = model.predict_array(&housing(50, 26)).unwrap();
        assert!(
            predictions.iter().all(|&v| (1.0..=2.0).contains(&v)),
            "{:?} produced values outside the range",
            mode
        );
    }
}

#[test]
fn test_attention_pooling_and_deep_layers() {
    let model = fit(
        model_config()
            .with_attention_pooling(true)
            .with_deep_layers(true)
            .with_layers("16-8")
            .with_batch_norm_continuous_input(true),
        TrainerConfig::new(1),
    );
    let fitted = model.fitted().unwrap();
    assert_eq!(fitted.model.reduction(), SlotReduction::MeanPool);
    assert!(matches!(fitted.model.topology(), Topology::AttentionPlusDeep(_)));

    let predictions = model.predict_array(&housing(12, 27)).unwrap();
    assert_eq!(predictions.dim(), (12, 1));
}

#[test]
fn test_fast_dev_run_single_epoch() {
    let model = fit(
        model_config().with_ssl(SslTask::Denoising, AugTask::Cutmix),
        TrainerConfig::new(50).with_fast_dev_run(true),
    );
    let history = model.history();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.epochs.len() == 1));
}

#[test]
fn test_early_stopping_bounds_epochs() {
    let early = EarlyStoppingConfig {
        patience: 0,
        min_delta: 1e3,
        ..Default::default()
    };
    let model = fit(
        model_config(),
        TrainerConfig::new(20).with_early_stopping(Some(early)),
    );
    let history = &model.history()[0];
    assert_eq!(history.stop_reason, StopReason::EarlyStopping);
    assert!(history.epochs.len() < 20);
}

struct StopAfterFirstEpoch {
    handle: StopHandle,
    seen: usize,
}

impl EpochCallback for StopAfterFirstEpoch {
    fn on_epoch_end(&mut self, _record: &EpochRecord) -> CallbackAction {
        self.seen += 1;
        self.handle.stop();
        CallbackAction::Continue
    }
}

#[test]
fn test_stop_handle_cancels_fit() {
    let mut model = TabularModel::new(
        data_config(),
        model_config(),
        OptimizerConfig::default(),
        TrainerConfig::new(10),
    )
    .unwrap();
    let mut callback = StopAfterFirstEpoch {
        handle: model.stop_handle(),
        seen: 0,
    };
    model
        .fit_with_callbacks(&housing(96, 28), None, &mut [&mut callback as &mut dyn EpochCallback])
        .unwrap();

    assert_eq!(callback.seen, 1);
    assert_eq!(model.stage(), TrainingStage::Fitted);
    assert_eq!(model.history()[0].stop_reason, StopReason::Cancelled);

    // A new fit starts with a cleared flag
    model.fit(&housing(96, 28), None).unwrap();
    assert_ne!(model.history()[0].stop_reason, StopReason::Cancelled);
}

struct StopOnCallback;

impl EpochCallback for StopOnCallback {
    fn on_epoch_end(&mut self, record: &EpochRecord) -> CallbackAction {
        if record.epoch >= 1 {
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }
}

#[test]
fn test_callback_stop() {
    let mut model = TabularModel::new(
        data_config(),
        model_config(),
        OptimizerConfig::default(),
        TrainerConfig::new(10).with_early_stopping(None),
    )
    .unwrap();
    let mut callback = StopOnCallback;
    model
        .fit_with_callbacks(&housing(96, 29), None, &mut [&mut callback as &mut dyn EpochCallback])
        .unwrap();
    let history = &model.history()[0];
    assert_eq!(history.stop_reason, StopReason::Callback);
    assert_eq!(history.epochs.len(), 2);
}

#[test]
fn test_failed_fit_resets_stage() {
    let mut model = TabularModel::new(
        data_config(),
        model_config(),
        OptimizerConfig::default(),
        TrainerConfig::new(1),
    )
    .unwrap();
    let broken = housing(40, 30).drop("Longitude").unwrap();
    assert!(matches!(
        model.fit(&broken, None),
        Err(TabularError::MissingColumn { .. })
    ));
    assert_eq!(model.stage(), TrainingStage::Untrained);
    assert!(model.fitted().is_err());
}
