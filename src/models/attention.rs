//! Multi-head self-attention across feature slots
//!
//! Each block computes scaled dot-product attention between all slots of a
//! sample, adds a learned projection of its input as a residual and applies
//! ReLU. Stacking blocks lets the model represent higher-order interactions.

use ndarray::{s, Array2, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TabularError};
use crate::nn::{rows_to_slots, slots_to_rows, softmax_rows, softmax_rows_backward, Linear, Module, Param};

/// Intermediate values of one block's forward pass
#[derive(Debug, Clone)]
pub struct BlockCache {
    input: Array2<f64>,
    q: Array2<f64>,
    k: Array2<f64>,
    v: Array2<f64>,
    context: Array2<f64>,
    pre_activation: Array2<f64>,
    /// Softmax weights, indexed `b * heads + h`, each `[slots, slots]`
    attention: Vec<Array2<f64>>,
    batch: usize,
    slots: usize,
}

/// One attention block: `ReLU(MHA(x) + x W_res)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionBlock {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    residual: Option<Linear>,
    num_heads: usize,
}

impl AttentionBlock {
    pub fn new<R: Rng + ?Sized>(dim: usize, num_heads: usize, residual: bool, rng: &mut R) -> Result<Self> {
        if num_heads == 0 || dim % num_heads != 0 {
            return Err(TabularError::invalid_parameter(
                "num_heads",
                num_heads,
                format!("must evenly divide embedding_dim ({})", dim),
            ));
        }
        Ok(Self {
            query: Linear::new(dim, dim, rng),
            key: Linear::new(dim, dim, rng),
            value: Linear::new(dim, dim, rng),
            output: Linear::new(dim, dim, rng),
            residual: residual.then(|| Linear::new(dim, dim, rng)),
            num_heads,
        })
    }

    fn head_dim(&self) -> usize {
        self.query.out_features() / self.num_heads
    }

    /// Forward pass over `[batch, slots, dim]`
    pub fn forward(&self, x: &Array3<f64>) -> (Array3<f64>, BlockCache) {
        let (batch, slots, _) = x.dim();
        let input = slots_to_rows(x);
        let q = self.query.forward(&input);
        let k = self.key.forward(&input);
        let v = self.value.forward(&input);

        let hd = self.head_dim();
        let scale = 1.0 / (hd as f64).sqrt();
        let mut context = Array2::zeros(q.raw_dim());
        let mut attention = Vec::with_capacity(batch * self.num_heads);

        for b in 0..batch {
            let rows = b * slots..(b + 1) * slots;
            for h in 0..self.num_heads {
                let cols = h * hd..(h + 1) * hd;
                let qb = q.slice(s![rows.clone(), cols.clone()]);
                let kb = k.slice(s![rows.clone(), cols.clone()]);
                let vb = v.slice(s![rows.clone(), cols.clone()]);

                let scores = qb.dot(&kb.t()) * scale;
                let weights = softmax_rows(scores.view());
                context
                    .slice_mut(s![rows.clone(), cols])
                    .assign(&weights.dot(&vb));
                attention.push(weights);
            }
        }

        let mut pre_activation = self.output.forward(&context);
        if let Some(res) = &self.residual {
            pre_activation += &res.forward(&input);
        }
        let out = pre_activation.mapv(|v| v.max(0.0));

        (
            rows_to_slots(&out, batch, slots),
            BlockCache {
                input,
                q,
                k,
                v,
                context,
                pre_activation,
                attention,
                batch,
                slots,
            },
        )
    }

    /// Accumulate gradients and return the gradient w.r.t. the block input
    pub fn backward(&mut self, cache: &BlockCache, grad_out: &Array3<f64>) -> Array3<f64> {
        let grad_rows = slots_to_rows(grad_out);
        let grad_pre = &grad_rows * &cache.pre_activation.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });

        let mut grad_input = match &mut self.residual {
            Some(res) => res.backward(&cache.input, &grad_pre),
            None => Array2::zeros(cache.input.raw_dim()),
        };
        let grad_context = self.output.backward(&cache.context, &grad_pre);

        let hd = self.head_dim();
        let scale = 1.0 / (hd as f64).sqrt();
        let mut grad_q = Array2::zeros(cache.q.raw_dim());
        let mut grad_k = Array2::zeros(cache.k.raw_dim());
        let mut grad_v = Array2::zeros(cache.v.raw_dim());

        for b in 0..cache.batch {
            let rows = b * cache.slots..(b + 1) * cache.slots;
            for h in 0..self.num_heads {
                let cols = h * hd..(h + 1) * hd;
                let weights = &cache.attention[b * self.num_heads + h];
                let qb = cache.q.slice(s![rows.clone(), cols.clone()]);
                let kb = cache.k.slice(s![rows.clone(), cols.clone()]);
                let vb = cache.v.slice(s![rows.clone(), cols.clone()]);
                let d_ctx = grad_context.slice(s![rows.clone(), cols.clone()]);

                let d_weights = d_ctx.dot(&vb.t());
                let d_scores = softmax_rows_backward(weights, &d_weights);

                grad_v
                    .slice_mut(s![rows.clone(), cols.clone()])
                    .assign(&weights.t().dot(&d_ctx));
                grad_q
                    .slice_mut(s![rows.clone(), cols.clone()])
                    .assign(&(d_scores.dot(&kb) * scale));
                grad_k
                    .slice_mut(s![rows.clone(), cols])
                    .assign(&(d_scores.t().dot(&qb) * scale));
            }
        }

        grad_input += &self.query.backward(&cache.input, &grad_q);
        grad_input += &self.key.backward(&cache.input, &grad_k);
        grad_input += &self.value.backward(&cache.input, &grad_v);

        rows_to_slots(&grad_input, cache.batch, cache.slots)
    }
}

impl Module for AttentionBlock {
    fn params(&self) -> Vec<&Param> {
        let mut params = Vec::new();
        for layer in [&self.query, &self.key, &self.value, &self.output] {
            params.extend(layer.params());
        }
        if let Some(res) = &self.residual {
            params.extend(res.params());
        }
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = Vec::new();
        for layer in [&mut self.query, &mut self.key, &mut self.value, &mut self.output] {
            params.extend(layer.params_mut());
        }
        if let Some(res) = &mut self.residual {
            params.extend(res.params_mut());
        }
        params
    }
}

/// Stack of attention blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionStack {
    blocks: Vec<AttentionBlock>,
}

impl InteractionStack {
    pub fn new<R: Rng + ?Sized>(
        dim: usize,
        num_heads: usize,
        num_blocks: usize,
        residual: bool,
        rng: &mut R,
    ) -> Result<Self> {
        if num_blocks == 0 {
            return Err(TabularError::invalid_parameter(
                "num_attn_blocks",
                0,
                "at least one attention block is required",
            ));
        }
        let blocks = (0..num_blocks)
            .map(|_| AttentionBlock::new(dim, num_heads, residual, rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn forward(&self, x: &Array3<f64>) -> (Array3<f64>, Vec<BlockCache>) {
        let mut caches = Vec::with_capacity(self.blocks.len());
        let mut h = x.clone();
        for block in &self.blocks {
            let (out, cache) = block.forward(&h);
            caches.push(cache);
            h = out;
        }
        (h, caches)
    }

    pub fn backward(&mut self, caches: &[BlockCache], grad_out: &Array3<f64>) -> Array3<f64> {
        let mut grad = grad_out.clone();
        for (block, cache) in self.blocks.iter_mut().zip(caches).rev() {
            grad = block.backward(cache, &grad);
        }
        grad
    }

    /// Head-averaged attention weights `[batch, slots, slots]` of every block
    pub fn attention_maps(caches: &[BlockCache]) -> Vec<Array3<f64>> {
        caches
            .iter()
            .map(|cache| {
                let heads = cache.attention.len() / cache.batch.max(1);
                let mut maps = Array3::zeros((cache.batch, cache.slots, cache.slots));
                for (idx, weights) in cache.attention.iter().enumerate() {
                    let mut target = maps.index_axis_mut(Axis(0), idx / heads.max(1));
                    target.scaled_add(1.0 / heads as f64, weights);
                }
                maps
            })
            .collect()
    }
}

impl Module for InteractionStack {
    fn params(&self) -> Vec<&Param> {
        self.blocks.iter().flat_map(|b| b.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.blocks.iter_mut().flat_map(|b| b.params_mut()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn input() -> Array3<f64> {
        Array3::from_shape_fn((2, 3, 4), |(i, j, k)| ((i * 7 + j * 3 + k) as f64 * 0.37).cos())
    }

    #[test]
    fn test_heads_must_divide_dim() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        assert!(AttentionBlock::new(6, 4, true, &mut rng).is_err());
        assert!(InteractionStack::new(4, 2, 0, true, &mut rng).is_err());
    }

    #[test]
    fn test_shapes_and_attention_rows() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let stack = InteractionStack::new(4, 2, 3, true, &mut rng).unwrap();
        let (out, caches) = stack.forward(&input());
        assert_eq!(out.dim(), (2, 3, 4));
        assert!(out.iter().all(|&v| v >= 0.0));

        let maps = InteractionStack::attention_maps(&caches);
        assert_eq!(maps.len(), 3);
        for row in maps[2].index_axis(Axis(0), 1).rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_gradient_check() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut stack = InteractionStack::new(4, 2, 2, true, &mut rng).unwrap();
        let x = input();
        let upstream = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| ((i + j * 2 + k * 5) as f64).sin());

        let (_, caches) = stack.forward(&x);
        let grad_x = stack.backward(&caches, &upstream);

        let objective = |s: &InteractionStack, x: &Array3<f64>| (s.forward(x).0 * &upstream).sum();
        let h = 1e-6;

        for (idx, _) in x.indexed_iter().step_by(5) {
            let mut xp = x.clone();
            xp[idx] += h;
            let mut xm = x.clone();
            xm[idx] -= h;
            let numeric = (objective(&stack, &xp) - objective(&stack, &xm)) / (2.0 * h);
            assert!((numeric - grad_x[idx]).abs() < 1e-5, "input {:?}", idx);
        }

        let n_params = stack.params().len();
        for p in 0..n_params {
            let shape = stack.params()[p].value.raw_dim();
            for (r, c) in [(0, 0), (shape[0] - 1, shape[1] - 1)] {
                let mut plus = stack.clone();
                plus.params_mut()[p].value[[r, c]] += h;
                let mut minus = stack.clone();
                minus.params_mut()[p].value[[r, c]] -= h;
                let numeric = (objective(&plus, &x) - objective(&minus, &x)) / (2.0 * h);
                let analytic = stack.params()[p].grad()[[r, c]];
                assert!((numeric - analytic).abs() < 1e-5, "param {} [{}, {}]", p, r, c);
            }
        }
    }

    #[test]
    fn test_without_residual() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let with = InteractionStack::new(4, 1, 1, true, &mut rng).unwrap();
        let without = InteractionStack::new(4, 1, 1, false, &mut rng).unwrap();
        assert_eq!(with.num_parameters(), without.num_parameters() + 4 * 4 + 4);
    }
}
