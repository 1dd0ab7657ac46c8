//! First-order optimizers over [`Param`] lists
//!
//! State is kept per parameter position, so the parameter order of a model
//! must not change between steps.

use ndarray::Array2;

use crate::config::{OptimizerConfig, OptimizerKind};
use crate::nn::Param;

/// A gradient-based update rule
pub trait Optimizer: Send {
    /// Apply one update using the accumulated gradients
    fn step(&mut self, params: &mut [&mut Param]);

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

/// Build the optimizer selected in the configuration, with fresh state
pub fn build_optimizer(config: &OptimizerConfig) -> Box<dyn Optimizer> {
    match config.optimizer {
        OptimizerKind::Adam => Box::new(Adam::new(
            config.learning_rate,
            config.beta1,
            config.beta2,
            config.eps,
            config.weight_decay,
        )),
        OptimizerKind::Sgd => Box::new(Sgd::new(
            config.learning_rate,
            config.momentum,
            config.weight_decay,
        )),
    }
}

fn decay(param: &mut Param, lr: f64, weight_decay: f64) {
    if weight_decay > 0.0 {
        param.value.mapv_inplace(|w| w - lr * weight_decay * w);
    }
}

/// Adam with decoupled weight decay
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
    t: i32,
    m: Vec<Array2<f64>>,
    v: Vec<Array2<f64>>,
}

impl Adam {
    pub fn new(lr: f64, beta1: f64, beta2: f64, eps: f64, weight_decay: f64) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn with_lr(lr: f64) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8, 0.0)
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Param]) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(|p| Array2::zeros(p.value.raw_dim())).collect();
            self.v = params.iter().map(|p| Array2::zeros(p.value.raw_dim())).collect();
            self.t = 0;
        }
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        for ((param, m), v) in params.iter_mut().zip(&mut self.m).zip(&mut self.v) {
            let grad = param.grad_mut().clone();
            m.zip_mut_with(&grad, |m, &g| *m = self.beta1 * *m + (1.0 - self.beta1) * g);
            v.zip_mut_with(&grad, |v, &g| *v = self.beta2 * *v + (1.0 - self.beta2) * g * g);

            decay(param, self.lr, self.weight_decay);
            let (lr, eps) = (self.lr, self.eps);
            ndarray::Zip::from(&mut param.value)
                .and(&*m)
                .and(&*v)
                .for_each(|w, &m, &v| {
                    *w -= lr * (m / bias1) / ((v / bias2).sqrt() + eps);
                });
        }
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }
}

/// Stochastic gradient descent with momentum
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f64,
    momentum: f64,
    weight_decay: f64,
    velocity: Vec<Array2<f64>>,
}

impl Sgd {
    pub fn new(lr: f64, momentum: f64, weight_decay: f64) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            velocity: Vec::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut Param]) {
        if self.velocity.len() != params.len() {
            self.velocity = params.iter().map(|p| Array2::zeros(p.value.raw_dim())).collect();
        }
        for (param, velocity) in params.iter_mut().zip(&mut self.velocity) {
            let grad = param.grad_mut().clone();
            velocity.zip_mut_with(&grad, |v, &g| *v = self.momentum * *v + g);
            decay(param, self.lr, self.weight_decay);
            param.value.scaled_add(-self.lr, velocity);
        }
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }
}
