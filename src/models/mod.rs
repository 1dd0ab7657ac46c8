//! AutoInt model components
//!
//! - [`EmbeddingFusion`] turns encoded features into `[batch, slots, d]`
//! - [`InteractionStack`] applies multi-head self-attention over slots
//! - [`DeepBranch`] is the optional feed-forward path
//! - [`PredictionHead`] maps to targets, squashing into target ranges
//! - [`AutoIntModel`] wires them together

mod attention;
mod autoint;
mod deep;
mod embedding;
mod head;

pub use attention::{AttentionBlock, BlockCache, InteractionStack};
pub use autoint::{AutoIntModel, Backbone, BackboneCache, SlotReduction, Topology};
pub use deep::{DeepBranch, DeepCache};
pub use embedding::{EmbeddingFusion, FusionCache};
pub use head::{HeadCache, PredictionHead};
