//! Self-supervised pretraining
//!
//! [`cutmix`] corrupts a batch by swapping slots between paired rows and
//! [`DenoisingPretext`] trains the backbone to undo it. Only the backbone is
//! kept afterwards.

mod cutmix;
mod denoising;

pub use cutmix::{cutmix, pair_rows};
pub use denoising::{DenoisingPretext, ReconstructionHead};
