//! Housing price regression with denoising pretraining
//!
//! Run with `RUST_LOG=kolosal_tabular=debug` to see per-batch losses.

use kolosal_tabular::prelude::*;
use polars::prelude::*;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

const CONTINUOUS: [&str; 4] = ["MedInc", "AveRooms", "Population", "Latitude"];

fn create_housing_data(n_rows: usize, seed: u64) -> PolarsResult<DataFrame> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut income = Vec::with_capacity(n_rows);
    let mut rooms = Vec::with_capacity(n_rows);
    let mut population = Vec::with_capacity(n_rows);
    let mut latitude = Vec::with_capacity(n_rows);
    let mut age_bin = Vec::with_capacity(n_rows);
    let mut value = Vec::with_capacity(n_rows);

    for _ in 0..n_rows {
        let inc: f64 = rng.gen_range(0.5..10.0);
        let rms: f64 = rng.gen_range(2.0..9.0);
        let lat: f64 = rng.gen_range(32.5..42.0);
        let bin = ["new", "recent", "old", "historic"][rng.gen_range(0..4)];
        let bonus = if bin == "historic" { 0.5 } else { 0.0 };

        value.push(0.4 * inc + 0.1 * rms - 0.05 * (lat - 37.0) + bonus + rng.gen_range(-0.2..0.2));
        income.push(inc);
        rooms.push(rms);
        population.push(rng.gen_range(100.0..3000.0));
        latitude.push(lat);
        age_bin.push(bin);
    }

    df!(
        CONTINUOUS[0] => income,
        CONTINUOUS[1] => rooms,
        CONTINUOUS[2] => population,
        CONTINUOUS[3] => latitude,
        "HouseAgeBin" => age_bin,
        "MedHouseVal" => value
    )
}

fn main() -> kolosal_tabular::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_tabular=info".into()),
        )
        .init();

    let train = create_housing_data(2000, 1)?;
    let test = create_housing_data(500, 2)?;

    let data = DataConfig::new(["MedHouseVal"])
        .with_continuous(CONTINUOUS)
        .with_categorical(["HouseAgeBin"])
        .with_transform(TransformType::YeoJohnson);
    let model = ModelConfig::new(TaskType::Regression)
        .with_ssl(SslTask::Denoising, AugTask::Cutmix)
        .with_ssl_epochs(3)
        .with_target_range(TargetRange::from_frame(&train, &["MedHouseVal".to_string()])?)
        .with_deep_layers(true)
        .with_layers("64-32");
    let optimizer = OptimizerConfig::default()
        .with_learning_rate(1e-3)
        .with_scheduler(LrScheduler::Exponential { gamma: 0.95 });
    let trainer = TrainerConfig::new(10).with_batch_size(128).with_gradient_clip(5.0);

    let mut tabular = TabularModel::new(data, model, optimizer, trainer)?;
    tabular.fit(&train, None)?;

    for history in tabular.history() {
        println!(
            "{:?}: {} epochs, best {:?}, stopped by {:?}",
            history.phase,
            history.epochs.len(),
            history.best_epoch,
            history.stop_reason
        );
    }

    for report in tabular.evaluate(&test)? {
        for (metric, value) in report {
            println!("{:<32} {:.4}", metric, value);
        }
    }

    println!("\nFeature importance:");
    for (feature, score) in tabular.feature_importance(&test)? {
        println!("  {:<12} {:.3}", feature, score);
    }

    let predictions = tabular.predict(&test)?;
    println!("\n{}", predictions.head(Some(5)));

    let embedder = CategoricalEmbeddingTransformer::new(&tabular)?;
    let embedded = embedder.transform(&test)?;
    println!("Embedded columns: {:?}", embedder.output_names("HouseAgeBin"));
    println!("Embedded frame shape: {:?}", embedded.shape());

    Ok(())
}
