//! Synthetic datasets shared by the integration tests

#![allow(dead_code)]

use polars::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

pub const HOUSING_CONTINUOUS: [&str; 6] = [
    "AveRooms",
    "AveBedrms",
    "Population",
    "AveOccup",
    "Latitude",
    "Longitude",
];

/// Regression target of the housing frame
pub const HOUSING_TARGET: &str = "MedHouseVal";

/// Income column, present in the frame but used only as a second target
pub const HOUSING_INCOME: &str = "MedInc";

/// California-housing shaped regression data with a binned house age
///
/// Columns: `MedInc`, the [`HOUSING_CONTINUOUS`] features, `HouseAgeBin`
/// and `MedHouseVal`.
pub fn housing(n: usize, seed: u64) -> DataFrame {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut income = Vec::with_capacity(n);
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n); HOUSING_CONTINUOUS.len()];
    let mut age_bin = Vec::with_capacity(n);
    let mut value = Vec::with_capacity(n);

    for _ in 0..n {
        let rooms: f64 = rng.gen_range(2.0..9.0);
        let bedrooms = rooms * rng.gen_range(0.15..0.3);
        let population = rng.gen_range(100.0..3000.0);
        let occupancy: f64 = rng.gen_range(1.0..5.0);
        let latitude = rng.gen_range(32.5..42.0);
        let longitude = rng.gen_range(-124.3..-114.3);
        let med_inc = (0.8 * rooms - 0.3 * occupancy + rng.gen_range(-1.0..1.0)).max(0.5);
        let age: f64 = rng.gen_range(1.0..52.0);
        let bin = match age as u32 {
            0..=10 => "new",
            11..=25 => "recent",
            26..=40 => "old",
            _ => "historic",
        };
        let bin_effect = match bin {
            "new" => 0.4,
            "recent" => 0.2,
            "old" => 0.0,
            _ => 0.3,
        };

        let target = 0.45 * med_inc + 0.1 * rooms - 0.05 * (latitude - 37.0)
            - 0.04 * (longitude + 119.0)
            + bin_effect
            + rng.gen_range(-0.2..0.2);
        for (col, v) in columns
            .iter_mut()
            .zip([rooms, bedrooms, population, occupancy, latitude, longitude])
        {
            col.push(v);
        }
        income.push(med_inc);
        age_bin.push(bin);
        value.push(target);
    }

    let mut frame = vec![Column::new(HOUSING_INCOME.into(), income)];
    frame.extend(
        HOUSING_CONTINUOUS
            .iter()
            .zip(columns)
            .map(|(name, values)| Column::new((*name).into(), values)),
    );
    frame.push(Column::new("HouseAgeBin".into(), age_bin));
    frame.push(Column::new(HOUSING_TARGET.into(), value));
    DataFrame::new(frame).unwrap()
}

/// Forest-cover shaped classification data: 54 continuous features and one
/// categorical wilderness area
pub fn covertype(n: usize, seed: u64) -> DataFrame {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let n_features = 54;
    let mut features: Vec<Vec<f64>> = vec![Vec::with_capacity(n); n_features];
    let mut area = Vec::with_capacity(n);
    let mut label = Vec::with_capacity(n);

    for _ in 0..n {
        let row: Vec<f64> = (0..n_features).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let zone = ["rawah", "neota", "comanche"][rng.gen_range(0..3)];
        let score = row[0] + 0.5 * row[1] + if zone == "neota" { 0.8 } else { 0.0 };
        let class = if score > 0.6 {
            "spruce"
        } else if score > -0.4 {
            "pine"
        } else {
            "aspen"
        };
        for (col, v) in features.iter_mut().zip(row) {
            col.push(v);
        }
        area.push(zone);
        label.push(class);
    }

    let mut frame: Vec<Column> = features
        .into_iter()
        .enumerate()
        .map(|(i, values)| Column::new(format!("feature_{}", i).into(), values))
        .collect();
    frame.push(Column::new("Wilderness_Area".into(), area));
    frame.push(Column::new("Cover_Type".into(), label));
    DataFrame::new(frame).unwrap()
}

pub fn covertype_continuous() -> Vec<String> {
    (0..54).map(|i| format!("feature_{}", i)).collect()
}
