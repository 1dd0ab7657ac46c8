//! Optimizers, learning rate schedules and gradient clipping

mod clip;
mod optimizer;
mod scheduler;

pub use clip::clip_grad_norm;
pub use optimizer::{build_optimizer, Adam, Optimizer, Sgd};
