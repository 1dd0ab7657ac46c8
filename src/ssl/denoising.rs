//! Denoising pretext task
//!
//! The backbone sees an augmented batch and a per-slot reconstruction head
//! recovers the original values from each slot's final attention
//! representation.

use ndarray::{s, Array1, Array2, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::cutmix::cutmix;
use crate::config::{AugTask, ModelConfig};
use crate::data::EncodedBatch;
use crate::error::{Result, TabularError};
use crate::models::Backbone;
use crate::nn::{cross_entropy, mse, Embedding, Linear, Module, Param};
use crate::training::TrainableModel;

/// One output layer per slot, reading `attended[:, slot, :]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionHead {
    /// `d -> k + 1` classifiers, one per categorical slot
    categorical: Vec<Linear>,
    /// `d -> 1` regressors, one per continuous slot
    continuous: Vec<Linear>,
}

impl ReconstructionHead {
    pub fn new<R: Rng + ?Sized>(backbone: &Backbone, rng: &mut R) -> Self {
        let dim = backbone.dim();
        let fusion = &backbone.fusion;
        let categorical = (0..fusion.n_categorical())
            .map(|j| {
                let classes = fusion.embedding(j).map_or(1, Embedding::num_embeddings);
                Linear::new(dim, classes, rng)
            })
            .collect();
        let continuous = (0..fusion.n_continuous())
            .map(|_| Linear::new(dim, 1, rng))
            .collect();
        Self {
            categorical,
            continuous,
        }
    }

    fn check(&self, attended: &Array3<f64>, original: &EncodedBatch) -> Result<()> {
        let slots = self.categorical.len() + self.continuous.len();
        if attended.len_of(Axis(1)) != slots || original.n_slots() != slots {
            return Err(TabularError::ShapeError {
                expected: format!("{} slots", slots),
                actual: format!("{} attended, {} in batch", attended.len_of(Axis(1)), original.n_slots()),
            });
        }
        Ok(())
    }

    /// Weighted reconstruction loss summed over slots
    ///
    /// With `backward` set, parameter gradients are accumulated and the
    /// gradient w.r.t. `attended` is returned.
    fn run(
        &mut self,
        attended: &Array3<f64>,
        original: &EncodedBatch,
        weights: &Array2<f64>,
        backward: bool,
    ) -> Result<(f64, Array3<f64>)> {
        self.check(attended, original)?;
        let n_cat = self.categorical.len();
        let mut grad = Array3::zeros(attended.raw_dim());
        let mut total = 0.0;

        for (j, layer) in self.categorical.iter_mut().enumerate() {
            let x = attended.slice(s![.., j, ..]).to_owned();
            let last = layer.out_features() - 1;
            let labels: Array1<usize> = original.categorical.column(j).mapv(|c| c.min(last));
            let (loss, grad_logits, _) = cross_entropy(&layer.forward(&x), labels.view(), Some(weights.column(j)));
            total += loss;
            if backward {
                let dx = layer.backward(&x, &grad_logits);
                grad.slice_mut(s![.., j, ..]).assign(&dx);
            }
        }
        for (j, layer) in self.continuous.iter_mut().enumerate() {
            let slot = n_cat + j;
            let x = attended.slice(s![.., slot, ..]).to_owned();
            let target = original.continuous.column(j).to_owned().insert_axis(Axis(1));
            let (loss, grad_out) = mse(&layer.forward(&x), &target, Some(weights.column(slot)));
            total += loss;
            if backward {
                let dx = layer.backward(&x, &grad_out);
                grad.slice_mut(s![.., slot, ..]).assign(&dx);
            }
        }
        Ok((total, grad))
    }
}

impl Module for ReconstructionHead {
    fn params(&self) -> Vec<&Param> {
        self.categorical
            .iter()
            .chain(&self.continuous)
            .flat_map(|l| l.params())
            .collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.categorical
            .iter_mut()
            .chain(self.continuous.iter_mut())
            .flat_map(|l| l.params_mut())
            .collect()
    }
}

/// Backbone plus reconstruction head, trained without labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenoisingPretext {
    pub backbone: Backbone,
    head: ReconstructionHead,
    augmentation: AugTask,
    cutmix_probability: f64,
    unmasked_weight: f64,
}

impl DenoisingPretext {
    pub fn new<R: Rng + ?Sized>(backbone: Backbone, config: &ModelConfig, rng: &mut R) -> Self {
        let head = ReconstructionHead::new(&backbone, rng);
        Self {
            backbone,
            head,
            augmentation: config.aug_task,
            cutmix_probability: config.cutmix_probability,
            unmasked_weight: config.denoising_unmasked_weight,
        }
    }

    /// Drop the reconstruction head, keeping the pretrained backbone
    pub fn into_backbone(self) -> Backbone {
        self.backbone
    }

    /// Augment a batch and weight its slots
    ///
    /// Swapped slots get weight 1, untouched slots the unmasked weight.
    /// Without augmentation every slot is a plain reconstruction target.
    fn augment<R: Rng + ?Sized>(&self, batch: &EncodedBatch, rng: &mut R) -> (EncodedBatch, Array2<f64>) {
        match self.augmentation {
            AugTask::Cutmix => {
                let (mixed, mask) = cutmix(batch, self.cutmix_probability, rng);
                let unmasked = self.unmasked_weight;
                let weights = mask.mapv(|swapped| if swapped { 1.0 } else { unmasked });
                (mixed, weights)
            }
            AugTask::None => (
                batch.features_only(),
                Array2::ones((batch.n_rows(), batch.n_slots())),
            ),
        }
    }

    pub fn train_step<R: Rng + ?Sized>(&mut self, batch: &EncodedBatch, rng: &mut R) -> Result<f64> {
        let (input, weights) = self.augment(batch, rng);
        let (_, attended, cache) = self.backbone.forward_train(&input, rng);
        let (loss, grad) = self.head.run(&attended, batch, &weights, true)?;
        if loss.is_finite() {
            self.backbone.backward(&input, &cache, &grad, None);
        }
        Ok(loss)
    }

    /// Unweighted reconstruction loss of a clean batch
    pub fn eval_loss(&self, batch: &EncodedBatch) -> Result<f64> {
        let (_, attended, _) = self.backbone.forward(batch);
        let weights = Array2::ones((batch.n_rows(), batch.n_slots()));
        let mut head = self.head.clone();
        Ok(head.run(&attended, batch, &weights, false)?.0)
    }
}

impl Module for DenoisingPretext {
    fn params(&self) -> Vec<&Param> {
        let mut params = self.backbone.params();
        params.extend(self.head.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.backbone.params_mut();
        params.extend(self.head.params_mut());
        params
    }
}

impl TrainableModel for DenoisingPretext {
    fn train_step<R: Rng + ?Sized>(&mut self, batch: &EncodedBatch, rng: &mut R) -> Result<f64> {
        DenoisingPretext::train_step(self, batch, rng)
    }

    fn eval_loss(&self, batch: &EncodedBatch) -> Result<f64> {
        DenoisingPretext::eval_loss(self, batch)
    }
}
