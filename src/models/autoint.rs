//! AutoInt model assembly
//!
//! The architecture is a closed set chosen once at construction:
//! [`Topology`] decides whether a deep branch runs next to the attention
//! stack and [`SlotReduction`] how slot representations reach the head.

use ndarray::{concatenate, s, Array2, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::attention::{BlockCache, InteractionStack};
use super::deep::{DeepBranch, DeepCache};
use super::embedding::{EmbeddingFusion, FusionCache};
use super::head::{HeadCache, PredictionHead};
use crate::config::{ModelConfig, TaskType};
use crate::data::{EncodedBatch, Targets};
use crate::error::{Result, TabularError};
use crate::nn::{cross_entropy, flatten_slots, mse, unflatten_slots, Module, Param};
use crate::preprocessing::FeatureSpec;
use crate::training::TrainableModel;

/// How slot representations are reduced before the head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotReduction {
    /// Concatenate all slots: `[batch, slots * d]`
    Flatten,
    /// Average over slots: `[batch, d]`
    MeanPool,
}

impl SlotReduction {
    pub fn output_dim(&self, slots: usize, dim: usize) -> usize {
        match self {
            SlotReduction::Flatten => slots * dim,
            SlotReduction::MeanPool => dim,
        }
    }

    pub fn forward(&self, x: &Array3<f64>) -> Array2<f64> {
        match self {
            SlotReduction::Flatten => flatten_slots(x),
            SlotReduction::MeanPool => x.sum_axis(Axis(1)) / x.len_of(Axis(1)).max(1) as f64,
        }
    }

    pub fn backward(&self, grad: &Array2<f64>, slots: usize, dim: usize) -> Array3<f64> {
        match self {
            SlotReduction::Flatten => unflatten_slots(grad, slots, dim),
            SlotReduction::MeanPool => {
                let scaled = grad / slots.max(1) as f64;
                Array3::from_shape_fn((grad.nrows(), slots, dim), |(b, _, c)| scaled[[b, c]])
            }
        }
    }
}

/// Model branches next to the attention stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Topology {
    AttentionOnly,
    /// Deep branch over the flattened fused embeddings
    AttentionPlusDeep(DeepBranch),
}

/// Intermediate values of the shared embedding + attention trunk
#[derive(Debug, Clone)]
pub struct BackboneCache {
    fusion: FusionCache,
    blocks: Vec<BlockCache>,
}

/// Embedding fusion followed by the attention stack
///
/// This is the part of the model shared with the pretext task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backbone {
    pub fusion: EmbeddingFusion,
    pub interaction: InteractionStack,
}

impl Backbone {
    pub fn new<R: Rng + ?Sized>(spec: &FeatureSpec, config: &ModelConfig, rng: &mut R) -> Result<Self> {
        let fusion = EmbeddingFusion::new(
            spec,
            config.embedding_dim,
            config.batch_norm_continuous_input,
            config.embedding_dropout,
            rng,
        );
        let interaction = InteractionStack::new(
            config.embedding_dim,
            config.num_heads,
            config.num_attn_blocks,
            config.has_residuals,
            rng,
        )?;
        Ok(Self { fusion, interaction })
    }

    pub fn dim(&self) -> usize {
        self.fusion.dim()
    }

    pub fn n_slots(&self) -> usize {
        self.fusion.n_slots()
    }

    /// Inference pass returning the fused input and the attention output
    pub fn forward(&self, batch: &EncodedBatch) -> (Array3<f64>, Array3<f64>, Vec<BlockCache>) {
        let fused = self.fusion.forward(batch);
        let (attended, blocks) = self.interaction.forward(&fused);
        (fused, attended, blocks)
    }

    pub fn forward_train<R: Rng + ?Sized>(
        &mut self,
        batch: &EncodedBatch,
        rng: &mut R,
    ) -> (Array3<f64>, Array3<f64>, BackboneCache) {
        let (fused, fusion) = self.fusion.forward_train(batch, rng);
        let (attended, blocks) = self.interaction.forward(&fused);
        (fused, attended, BackboneCache { fusion, blocks })
    }

    /// Backward from gradients on the attention output and, optionally,
    /// directly on the fused input
    pub fn backward(
        &mut self,
        batch: &EncodedBatch,
        cache: &BackboneCache,
        grad_attended: &Array3<f64>,
        grad_fused: Option<&Array3<f64>>,
    ) {
        let mut grad = self.interaction.backward(&cache.blocks, grad_attended);
        if let Some(extra) = grad_fused {
            grad += extra;
        }
        self.fusion.backward(batch, &cache.fusion, &grad);
    }
}

impl Module for Backbone {
    fn params(&self) -> Vec<&Param> {
        let mut params = self.fusion.params();
        params.extend(self.interaction.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.fusion.params_mut();
        params.extend(self.interaction.params_mut());
        params
    }
}

/// AutoInt: attention over feature slots with an optional deep branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoIntModel {
    pub backbone: Backbone,
    topology: Topology,
    reduction: SlotReduction,
    head: PredictionHead,
    task: TaskType,
}

impl AutoIntModel {
    /// Build the model for a resolved feature spec
    pub fn new<R: Rng + ?Sized>(spec: &FeatureSpec, config: &ModelConfig, rng: &mut R) -> Result<Self> {
        if spec.n_slots() == 0 {
            return Err(TabularError::ConfigError(
                "model needs at least one feature slot".to_string(),
            ));
        }
        let backbone = Backbone::new(spec, config, rng)?;
        let dim = config.embedding_dim;
        let slots = spec.n_slots();

        let reduction = if config.attention_pooling {
            SlotReduction::MeanPool
        } else {
            SlotReduction::Flatten
        };
        let topology = if config.deep_layers {
            let hidden = config.deep_layer_sizes()?;
            Topology::AttentionPlusDeep(DeepBranch::new(
                slots * dim,
                &hidden,
                config.activation,
                config.dropout,
                rng,
            ))
        } else {
            Topology::AttentionOnly
        };

        let head_input = reduction.output_dim(slots, dim)
            + match &topology {
                Topology::AttentionOnly => 0,
                Topology::AttentionPlusDeep(deep) => deep.output_dim(),
            };
        let head = PredictionHead::new(
            head_input,
            spec.output_dim(),
            spec.task,
            config.target_range.clone(),
            config.target_range_mode,
            rng,
        );

        let model = Self {
            backbone,
            topology,
            reduction,
            head,
            task: spec.task,
        };
        debug!(
            slots,
            dim,
            head_input,
            parameters = model.num_parameters(),
            reduction = ?model.reduction,
            deep = matches!(model.topology, Topology::AttentionPlusDeep(_)),
            "Built AutoInt model"
        );
        Ok(model)
    }

    pub fn task(&self) -> TaskType {
        self.task
    }

    pub fn reduction(&self) -> SlotReduction {
        self.reduction
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn output_dim(&self) -> usize {
        self.head.output_dim()
    }

    fn head_features(&self, fused: &Array3<f64>, attended: &Array3<f64>) -> Result<Array2<f64>> {
        let reduced = self.reduction.forward(attended);
        match &self.topology {
            Topology::AttentionOnly => Ok(reduced),
            Topology::AttentionPlusDeep(deep) => {
                let deep_out = deep.forward(&flatten_slots(fused));
                Ok(concatenate(Axis(1), &[reduced.view(), deep_out.view()])?)
            }
        }
    }

    /// Head output used by the loss (squashed regression values or logits)
    pub fn forward(&self, batch: &EncodedBatch) -> Result<Array2<f64>> {
        let (fused, attended, _) = self.backbone.forward(batch);
        let features = self.head_features(&fused, &attended)?;
        Ok(self.head.forward(&features).0)
    }

    /// Final predictions: clamped regression values or class probabilities
    pub fn predict(&self, batch: &EncodedBatch) -> Result<Array2<f64>> {
        Ok(self.finalize(self.forward(batch)?))
    }

    /// Turn [`AutoIntModel::forward`] output into predictions
    pub fn finalize(&self, output: Array2<f64>) -> Array2<f64> {
        self.head.finalize(output)
    }

    /// Head-averaged attention maps `[batch, slots, slots]`, one per block
    pub fn feature_attention(&self, batch: &EncodedBatch) -> Vec<Array3<f64>> {
        let (_, _, blocks) = self.backbone.forward(batch);
        InteractionStack::attention_maps(&blocks)
    }

    fn loss(&self, output: &Array2<f64>, batch: &EncodedBatch) -> Result<(f64, Array2<f64>)> {
        match (&batch.targets, self.task) {
            (Some(Targets::Regression(y)), TaskType::Regression) => {
                if y.ncols() != output.ncols() {
                    return Err(TabularError::ShapeError {
                        expected: format!("{} target columns", output.ncols()),
                        actual: y.ncols().to_string(),
                    });
                }
                Ok(mse(output, y, None))
            }
            (Some(Targets::Classes(y)), TaskType::Classification) => {
                if let Some(&bad) = y.iter().find(|&&c| c >= output.ncols()) {
                    return Err(TabularError::DataError(format!(
                        "class index {} out of range for {} classes",
                        bad,
                        output.ncols()
                    )));
                }
                let (loss, grad, _) = cross_entropy(output, y.view(), None);
                Ok((loss, grad))
            }
            (None, _) => Err(TabularError::DataError("batch has no targets".to_string())),
            _ => Err(TabularError::DataError(
                "target kind does not match the model task".to_string(),
            )),
        }
    }

    /// Loss of a batch in inference mode
    pub fn eval_loss(&self, batch: &EncodedBatch) -> Result<f64> {
        let output = self.forward(batch)?;
        Ok(self.loss(&output, batch)?.0)
    }

    /// Forward and backward pass accumulating gradients; returns the loss
    pub fn train_step<R: Rng + ?Sized>(&mut self, batch: &EncodedBatch, rng: &mut R) -> Result<f64> {
        let (fused, attended, backbone_cache) = self.backbone.forward_train(batch, rng);
        let reduced = self.reduction.forward(&attended);

        let (features, deep_cache): (Array2<f64>, Option<DeepCache>) = match &self.topology {
            Topology::AttentionOnly => (reduced, None),
            Topology::AttentionPlusDeep(deep) => {
                let (deep_out, cache) = deep.forward_train(&flatten_slots(&fused), rng);
                (
                    concatenate(Axis(1), &[reduced.view(), deep_out.view()])?,
                    Some(cache),
                )
            }
        };

        let (output, head_cache): (Array2<f64>, HeadCache) = self.head.forward(&features);
        let (loss, grad_output) = self.loss(&output, batch)?;
        if !loss.is_finite() {
            return Ok(loss);
        }

        let grad_features = self.head.backward(&head_cache, &grad_output);
        let slots = self.backbone.n_slots();
        let dim = self.backbone.dim();
        let reduced_dim = self.reduction.output_dim(slots, dim);

        let grad_reduced = grad_features.slice(s![.., ..reduced_dim]).to_owned();
        let grad_attended = self.reduction.backward(&grad_reduced, slots, dim);

        let grad_fused = match (&mut self.topology, deep_cache) {
            (Topology::AttentionPlusDeep(deep), Some(cache)) => {
                let grad_deep = grad_features.slice(s![.., reduced_dim..]).to_owned();
                let grad_flat = deep.backward(&cache, &grad_deep);
                Some(unflatten_slots(&grad_flat, slots, dim))
            }
            _ => None,
        };

        self.backbone
            .backward(batch, &backbone_cache, &grad_attended, grad_fused.as_ref());
        Ok(loss)
    }
}

impl Module for AutoIntModel {
    fn params(&self) -> Vec<&Param> {
        let mut params = self.backbone.params();
        if let Topology::AttentionPlusDeep(deep) = &self.topology {
            params.extend(deep.params());
        }
        params.extend(self.head.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.backbone.params_mut();
        if let Topology::AttentionPlusDeep(deep) = &mut self.topology {
            params.extend(deep.params_mut());
        }
        params.extend(self.head.params_mut());
        params
    }
}

impl TrainableModel for AutoIntModel {
    fn train_step<R: Rng + ?Sized>(&mut self, batch: &EncodedBatch, rng: &mut R) -> Result<f64> {
        AutoIntModel::train_step(self, batch, rng)
    }

    fn eval_loss(&self, batch: &EncodedBatch) -> Result<f64> {
        AutoIntModel::eval_loss(self, batch)
    }
}
