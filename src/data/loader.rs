//! Deterministic mini-batching with optional prefetching

use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::mpsc;
use std::thread;

use super::EncodedData;
use crate::error::Result;

/// Iterates an [`EncodedData`] in mini-batches
///
/// With `prefetch > 0` a scoped producer thread gathers upcoming batches into
/// a bounded channel while the consumer trains. Batches arrive in plan order
/// either way.
#[derive(Debug, Clone, Copy)]
pub struct BatchLoader<'a> {
    data: &'a EncodedData,
    batch_size: usize,
    shuffle: bool,
    prefetch: usize,
}

impl<'a> BatchLoader<'a> {
    pub fn new(data: &'a EncodedData, batch_size: usize) -> Self {
        Self {
            data,
            batch_size: batch_size.max(1),
            shuffle: false,
            prefetch: 0,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_prefetch(mut self, batches: usize) -> Self {
        self.prefetch = batches;
        self
    }

    pub fn num_batches(&self) -> usize {
        self.data.n_rows().div_ceil(self.batch_size)
    }

    /// Row indices of every batch for one epoch
    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.data.n_rows()).collect();
        if self.shuffle {
            indices.shuffle(rng);
        }
        indices
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Run `f` on each batch of one epoch, stopping at the first error
    ///
    /// `limit` caps the number of batches (used by fast dev runs).
    pub fn for_each_batch<R, F>(&self, rng: &mut R, limit: Option<usize>, mut f: F) -> Result<()>
    where
        R: Rng + ?Sized,
        F: FnMut(EncodedData) -> Result<()>,
    {
        let mut plan = self.plan(rng);
        if let Some(limit) = limit {
            plan.truncate(limit);
        }

        if self.prefetch == 0 {
            for indices in plan {
                f(self.data.gather(&indices))?;
            }
            return Ok(());
        }

        let data = self.data;
        thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel(self.prefetch);
            scope.spawn(move || {
                for indices in plan {
                    if tx.send(data.gather(&indices)).is_err() {
                        break;
                    }
                }
            });
            for batch in rx {
                f(batch)?;
            }
            Ok(())
        })
    }
}

/// Seeded split of `0..n` into (train, validation) row indices
///
/// Both index lists are returned in ascending order so the split frames keep
/// the original row order.
pub fn train_validation_split<R: Rng + ?Sized>(
    n: usize,
    validation_fraction: f64,
    rng: &mut R,
) -> (Vec<usize>, Vec<usize>) {
    let n_valid = ((n as f64) * validation_fraction).round() as usize;
    let n_valid = if n > 1 { n_valid.min(n - 1) } else { 0 };

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let mut valid = indices[..n_valid].to_vec();
    let mut train = indices[n_valid..].to_vec();
    valid.sort_unstable();
    train.sort_unstable();
    (train, valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Targets;
    use ndarray::{Array1, Array2};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn data(n: usize) -> EncodedData {
        let cont = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        EncodedData::new(
            Array2::zeros((n, 0)),
            cont,
            Some(Targets::Classes(Array1::zeros(n))),
        )
        .unwrap()
    }

    fn collect(loader: &BatchLoader, seed: u64, limit: Option<usize>) -> Vec<Vec<f64>> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut seen = Vec::new();
        loader
            .for_each_batch(&mut rng, limit, |batch| {
                seen.push(batch.continuous.column(0).to_vec());
                Ok(())
            })
            .unwrap();
        seen
    }

    #[test]
    fn test_batches_cover_all_rows() {
        let d = data(10);
        let loader = BatchLoader::new(&d, 4).with_shuffle(true);
        assert_eq!(loader.num_batches(), 3);
        let batches = collect(&loader, 1, None);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        let mut all: Vec<f64> = batches.concat();
        all.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(all, (0..10).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_prefetch_preserves_order() {
        let d = data(25);
        let plain = BatchLoader::new(&d, 3).with_shuffle(true);
        let prefetched = plain.with_prefetch(2);
        assert_eq!(collect(&plain, 9, None), collect(&prefetched, 9, None));
    }

    #[test]
    fn test_limit_and_error_stop_iteration() {
        let d = data(20);
        let loader = BatchLoader::new(&d, 5).with_prefetch(1);
        assert_eq!(collect(&loader, 0, Some(1)).len(), 1);

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let mut calls = 0;
        let result = loader.for_each_batch(&mut rng, None, |_| {
            calls += 1;
            Err(crate::error::TabularError::TrainingError("stop".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let (train, valid) = train_validation_split(10, 0.2, &mut rng);
        assert_eq!(valid.len(), 2);
        assert_eq!(train.len(), 8);
        assert!(valid.iter().all(|v| !train.contains(v)));

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        assert_eq!(train_validation_split(10, 0.2, &mut rng).1, valid);
    }
}
