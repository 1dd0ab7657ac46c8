//! Embedding fusion: every feature becomes one `d`-dimensional slot

use ndarray::{s, Array2, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::EncodedBatch;
use crate::nn::{dropout_mask, unflatten_slots, BatchNorm1d, BatchNormCache, Embedding, Module, Param};
use crate::preprocessing::FeatureSpec;

/// Intermediate values of a training forward pass
#[derive(Debug, Clone)]
pub struct FusionCache {
    /// Continuous inputs as projected (after batch norm when enabled)
    continuous: Array2<f64>,
    batch_norm: Option<BatchNormCache>,
    dropout: Option<Array3<f64>>,
}

/// Maps categorical indices and continuous values to `[batch, slots, d]`
///
/// Categorical slot `j` is a row of its own embedding table; continuous slot
/// `j` is `x_j * w_j + b_j` with learned `w_j, b_j` of width `d`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingFusion {
    embeddings: Vec<Embedding>,
    /// `n_continuous x d`, one row per continuous slot
    continuous_weight: Param,
    /// `n_continuous x d`
    continuous_bias: Param,
    batch_norm: Option<BatchNorm1d>,
    dropout: f64,
    dim: usize,
}

impl EmbeddingFusion {
    pub fn new<R: Rng + ?Sized>(
        spec: &FeatureSpec,
        dim: usize,
        batch_norm_continuous: bool,
        dropout: f64,
        rng: &mut R,
    ) -> Self {
        let embeddings = spec
            .embedding_sizes()
            .into_iter()
            .map(|rows| Embedding::new(rows, dim, rng))
            .collect();
        let n_cont = spec.n_continuous();
        let batch_norm = (batch_norm_continuous && n_cont > 0).then(|| BatchNorm1d::new(n_cont));

        Self {
            embeddings,
            continuous_weight: Param::glorot(n_cont, dim, rng),
            continuous_bias: Param::zeros(n_cont, dim),
            batch_norm,
            dropout,
            dim,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_categorical(&self) -> usize {
        self.embeddings.len()
    }

    pub fn n_continuous(&self) -> usize {
        self.continuous_weight.value.nrows()
    }

    pub fn n_slots(&self) -> usize {
        self.n_categorical() + self.n_continuous()
    }

    /// Embedding table of a categorical slot
    pub fn embedding(&self, slot: usize) -> Option<&Embedding> {
        self.embeddings.get(slot)
    }

    fn project(&self, batch: &EncodedBatch, continuous: &Array2<f64>) -> Array3<f64> {
        let n = batch.n_rows();
        let n_cat = self.n_categorical();
        let mut out = Array3::zeros((n, self.n_slots(), self.dim));

        for (j, emb) in self.embeddings.iter().enumerate() {
            let rows = emb.forward(batch.categorical.column(j));
            out.slice_mut(s![.., j, ..]).assign(&rows);
        }
        for j in 0..self.n_continuous() {
            let x = continuous.column(j).insert_axis(Axis(1));
            let w = self.continuous_weight.value.row(j).insert_axis(Axis(0));
            let b = self.continuous_bias.value.row(j);
            let slot = x.dot(&w) + &b;
            out.slice_mut(s![.., n_cat + j, ..]).assign(&slot);
        }
        out
    }

    /// Inference pass: running batch norm statistics, no dropout
    pub fn forward(&self, batch: &EncodedBatch) -> Array3<f64> {
        let continuous = match &self.batch_norm {
            Some(bn) => bn.forward(&batch.continuous),
            None => batch.continuous.clone(),
        };
        self.project(batch, &continuous)
    }

    /// Training pass: batch statistics and dropout
    pub fn forward_train<R: Rng + ?Sized>(
        &mut self,
        batch: &EncodedBatch,
        rng: &mut R,
    ) -> (Array3<f64>, FusionCache) {
        let (continuous, batch_norm) = match &mut self.batch_norm {
            Some(bn) => {
                let (x, cache) = bn.forward_train(&batch.continuous);
                (x, Some(cache))
            }
            None => (batch.continuous.clone(), None),
        };
        let mut out = self.project(batch, &continuous);

        let dropout = (self.dropout > 0.0).then(|| {
            let (n, slots, dim) = out.dim();
            unflatten_slots(&dropout_mask((n, slots * dim), self.dropout, rng), slots, dim)
        });
        if let Some(mask) = &dropout {
            out *= mask;
        }

        (
            out,
            FusionCache {
                continuous,
                batch_norm,
                dropout,
            },
        )
    }

    /// Accumulate parameter gradients from the gradient of the fused output
    pub fn backward(&mut self, batch: &EncodedBatch, cache: &FusionCache, grad: &Array3<f64>) {
        let masked;
        let grad = match &cache.dropout {
            Some(mask) => {
                masked = grad * mask;
                &masked
            }
            None => grad,
        };

        for (j, emb) in self.embeddings.iter_mut().enumerate() {
            let g = grad.slice(s![.., j, ..]).to_owned();
            emb.backward(batch.categorical.column(j), &g);
        }

        let n_cat = self.n_categorical();
        let n_cont = self.n_continuous();
        if n_cont == 0 {
            return;
        }
        let mut grad_x = Array2::zeros((batch.n_rows(), n_cont));
        for j in 0..n_cont {
            let g = grad.slice(s![.., n_cat + j, ..]);
            let x = cache.continuous.column(j);
            let gw = x.dot(&g);
            let gb = g.sum_axis(Axis(0));
            {
                let mut row = self.continuous_weight.grad_mut().row_mut(j);
                row += &gw;
            }
            {
                let mut row = self.continuous_bias.grad_mut().row_mut(j);
                row += &gb;
            }
            grad_x
                .column_mut(j)
                .assign(&g.dot(&self.continuous_weight.value.row(j)));
        }

        if let (Some(bn), Some(bn_cache)) = (&mut self.batch_norm, &cache.batch_norm) {
            bn.backward(bn_cache, &grad_x);
        }
    }
}

impl Module for EmbeddingFusion {
    fn params(&self) -> Vec<&Param> {
        let mut params: Vec<&Param> = self.embeddings.iter().flat_map(|e| e.params()).collect();
        params.push(&self.continuous_weight);
        params.push(&self.continuous_bias);
        if let Some(bn) = &self.batch_norm {
            params.extend(bn.params());
        }
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params: Vec<&mut Param> = self
            .embeddings
            .iter_mut()
            .flat_map(|e| e.params_mut())
            .collect();
        params.push(&mut self.continuous_weight);
        params.push(&mut self.continuous_bias);
        if let Some(bn) = &mut self.batch_norm {
            params.extend(bn.params_mut());
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskType;
    use crate::data::EncodedData;
    use crate::preprocessing::CategoricalFeature;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn spec() -> FeatureSpec {
        FeatureSpec {
            categorical: vec![CategoricalFeature {
                name: "zone".to_string(),
                cardinality: 2,
            }],
            continuous: vec!["a".to_string(), "b".to_string()],
            targets: vec!["y".to_string()],
            task: TaskType::Regression,
            classes: Vec::new(),
        }
    }

    fn batch() -> EncodedData {
        EncodedData::new(
            array![[0usize], [2], [1]],
            array![[0.5, -1.0], [1.5, 0.2], [-0.3, 0.8]],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_slot_layout() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let fusion = EmbeddingFusion::new(&spec(), 4, false, 0.0, &mut rng);
        let out = fusion.forward(&batch());
        assert_eq!(out.dim(), (3, 3, 4));

        // categorical slot first, unknown index uses its own row
        let table = &fusion.embedding(0).unwrap().table.value;
        assert_eq!(out.slice(s![1, 0, ..]), table.row(2));

        // continuous slot: x * w + b
        let expected = &fusion.continuous_weight.value.row(1) * 0.2;
        assert_eq!(out.slice(s![1, 2, ..]), expected);
    }

    #[test]
    fn test_gradient_check() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut fusion = EmbeddingFusion::new(&spec(), 3, true, 0.0, &mut rng);
        let b = batch();
        let upstream = Array3::from_shape_fn((3, 3, 3), |(i, j, k)| ((i + 2 * j + 3 * k) as f64).sin());

        let (_, cache) = fusion.clone().forward_train(&b, &mut rng);
        fusion.backward(&b, &cache, &upstream);

        let objective = |f: &EmbeddingFusion| {
            let mut f = f.clone();
            let mut r = Xoshiro256PlusPlus::seed_from_u64(0);
            (f.forward_train(&b, &mut r).0 * &upstream).sum()
        };

        let h = 1e-6;
        for (p_idx, rows, cols) in [(0usize, 3usize, 3usize), (1, 2, 3), (2, 2, 3), (3, 1, 2)] {
            for r in 0..rows {
                for c in 0..cols {
                    let mut plus = fusion.clone();
                    plus.params_mut()[p_idx].value[[r, c]] += h;
                    let mut minus = fusion.clone();
                    minus.params_mut()[p_idx].value[[r, c]] -= h;
                    let numeric = (objective(&plus) - objective(&minus)) / (2.0 * h);
                    let analytic = fusion.params()[p_idx].grad()[[r, c]];
                    assert!(
                        (numeric - analytic).abs() < 1e-5,
                        "param {} [{}, {}]: {} vs {}",
                        p_idx,
                        r,
                        c,
                        numeric,
                        analytic
                    );
                }
            }
        }
    }

    #[test]
    fn test_dropout_only_in_training() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mut fusion = EmbeddingFusion::new(&spec(), 8, false, 0.5, &mut rng);
        let (train_out, _) = fusion.forward_train(&batch(), &mut rng);
        assert!(train_out.iter().any(|&v| v == 0.0));
        assert!(fusion.forward(&batch()).iter().all(|&v| v != 0.0));
    }
}
