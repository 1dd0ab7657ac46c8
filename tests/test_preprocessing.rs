//! Preprocessing through the public pipeline: codebooks, schema checks and
//! the categorical embedding transformer

mod common;

use kolosal_tabular::prelude::*;
use polars::prelude::*;

use common::{housing, HOUSING_CONTINUOUS};

fn fitted_housing_model() -> TabularModel {
    let mut model = TabularModel::new(
        DataConfig::new(["MedHouseVal"])
            .with_continuous(HOUSING_CONTINUOUS)
            .with_categorical(["HouseAgeBin"])
            .with_transform(TransformType::QuantileNormal),
        ModelConfig::new(TaskType::Regression)
            .with_embedding_dim(4)
            .with_num_attn_blocks(1),
        OptimizerConfig::default(),
        TrainerConfig::new(1),
    )
    .unwrap();
    model.fit(&housing(120, 31), None).unwrap();
    model
}

#[test]
fn test_codebook_reserves_unknown_index() {
    let codebook = Codebook::fit([Some("b"), Some("a"), None, Some("b")]);
    assert_eq!(
        codebook.categories(),
        &[Some("b".to_string()), Some("a".to_string()), None]
    );
    assert_eq!(codebook.labels(), vec!["b", "a", "NA"]);
    assert_eq!(codebook.encode(Some("a")), 1);
    assert_eq!(codebook.encode(None), 2);
    assert_eq!(codebook.encode(Some("zzz")), codebook.unknown_index());
    assert_eq!(codebook.unknown_index(), 3);
}

#[test]
fn test_literal_na_category_distinct_from_null() {
    let train = df!(
        "zone" => &[Some("NA"), None, Some("north"), Some("NA"), None],
        "rooms" => &[3.0, 4.0, 5.0, 6.0, 7.0],
        "price" => &[1.0, 2.0, 3.0, 4.0, 5.0]
    )
    .unwrap();
    let config = DataConfig::new(["price"])
        .with_continuous(["rooms"])
        .with_categorical(["zone"]);
    let preprocessor = TabularPreprocessor::fit(&train, &config, TaskType::Regression).unwrap();
    assert_eq!(preprocessor.feature_spec().categorical[0].cardinality, 3);

    let encoded = preprocessor.transform(&train, false).unwrap();
    assert_eq!(encoded.categorical.column(0).to_vec(), vec![0, 1, 2, 0, 1]);
}

#[test]
fn test_feature_spec_after_fit() {
    let model = fitted_housing_model();
    let spec = model.feature_spec().unwrap();
    assert_eq!(spec.n_categorical(), 1);
    assert_eq!(spec.n_continuous(), 6);
    assert_eq!(spec.categorical[0].name, "HouseAgeBin");
    assert_eq!(spec.categorical[0].cardinality, 4);
    assert_eq!(spec.embedding_sizes(), vec![5]);
    assert!(spec.classes.is_empty());
}

#[test]
fn test_unseen_and_null_categories_at_predict() {
    let model = fitted_housing_model();
    let mut test = housing(6, 32);
    let bins: Vec<Option<&str>> = vec![
        Some("new"),
        Some("brand-new"),
        None,
        Some("old"),
        Some("ancient"),
        Some("recent"),
    ];
    test.with_column(Series::new("HouseAgeBin".into(), bins)).unwrap();

    let predictions = model.predict_array(&test).unwrap();
    assert_eq!(predictions.nrows(), 6);
    assert!(predictions.iter().all(|v| v.is_finite()));
}

#[test]
fn test_missing_column_at_predict() {
    let model = fitted_housing_model();
    let test = housing(5, 33).drop("HouseAgeBin").unwrap();
    match model.predict(&test) {
        Err(TabularError::MissingColumn { column, role }) => {
            assert_eq!(column, "HouseAgeBin");
            assert_eq!(role, "categorical");
        }
        other => panic!("expected a missing column error, got {:?}", other.map(|df| df.shape())),
    }
}

#[test]
fn test_non_numeric_continuous_rejected() {
    let mut model = TabularModel::new(
        DataConfig::new(["MedHouseVal"]).with_continuous(["HouseAgeBin"]),
        ModelConfig::new(TaskType::Regression).with_embedding_dim(4),
        OptimizerConfig::default(),
        TrainerConfig::new(1),
    )
    .unwrap();
    assert!(matches!(
        model.fit(&housing(20, 34), None),
        Err(TabularError::ConfigError(_))
    ));
}

#[test]
fn test_unseen_class_label_rejected() {
    let train = df!(
        "x" => &[0.1, 0.5, 0.9, 0.3, 0.7, 0.2],
        "label" => &["a", "b", "a", "b", "a", "b"]
    )
    .unwrap();
    let mut model = TabularModel::new(
        DataConfig::new(["label"])
            .with_continuous(["x"])
            .with_validation_split(0.0),
        ModelConfig::new(TaskType::Classification).with_embedding_dim(4),
        OptimizerConfig::default(),
        TrainerConfig::new(1),
    )
    .unwrap();
    model.fit(&train, None).unwrap();

    let test = df!("x" => &[0.4], "label" => &["c"]).unwrap();
    assert!(matches!(model.evaluate(&test), Err(TabularError::DataError(_))));
}

#[test]
fn test_embedding_transformer_columns() {
    let model = fitted_housing_model();
    let transformer = CategoricalEmbeddingTransformer::new(&model).unwrap();

    let names = transformer.output_names("HouseAgeBin");
    assert_eq!(
        names,
        vec![
            "HouseAgeBin_embed_dim_0",
            "HouseAgeBin_embed_dim_1",
            "HouseAgeBin_embed_dim_2",
            "HouseAgeBin_embed_dim_3",
        ]
    );
    assert!(transformer.output_names("MedInc").is_empty());

    let input = housing(10, 35);
    let output = transformer.transform(&input).unwrap();
    assert_eq!(output.height(), 10);
    assert_eq!(output.width(), input.width() - 1 + 4);
    assert!(output.column("HouseAgeBin").is_err());
    assert!(output.column("MedInc").is_ok());

    // Rows of the same category share one embedding
    let bins = input.column("HouseAgeBin").unwrap().str().unwrap();
    let first_dim = output.column("HouseAgeBin_embed_dim_0").unwrap().f64().unwrap();
    let pairs: Vec<(Option<&str>, Option<f64>)> = bins.into_iter().zip(first_dim.into_iter()).collect();
    for (bin_a, value_a) in &pairs {
        for (bin_b, value_b) in &pairs {
            if bin_a == bin_b {
                assert_eq!(value_a, value_b);
            }
        }
    }
}

#[test]
fn test_embedding_transformer_requires_fit() {
    let model = TabularModel::new(
        DataConfig::new(["MedHouseVal"]).with_categorical(["HouseAgeBin"]),
        ModelConfig::new(TaskType::Regression),
        OptimizerConfig::default(),
        TrainerConfig::new(1),
    )
    .unwrap();
    assert!(matches!(
        CategoricalEmbeddingTransformer::new(&model),
        Err(TabularError::ModelNotFitted)
    ));
}
