//! Per-epoch learning rate schedules

use crate::config::LrScheduler;

impl LrScheduler {
    /// Learning rate for a zero-based epoch
    pub fn lr_at(&self, base_lr: f64, epoch: usize) -> f64 {
        match *self {
            LrScheduler::None => base_lr,
            LrScheduler::Step { step_size, gamma } => {
                base_lr * gamma.powi((epoch / step_size.max(1)) as i32)
            }
            LrScheduler::Exponential { gamma } => base_lr * gamma.powi(epoch as i32),
        }
    }
}
