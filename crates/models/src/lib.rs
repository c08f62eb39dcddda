//! Burn modules for the U-KAN segmentation network.
//!
//! - `kan`: KAN projections (`KanLinear`), the tokenized `KanLayer`/`KanBlock`.
//! - `ukan`: the full encoder/decoder (`UKan`) built from conv stages and KAN blocks.
//!
//! These are pure Burn modules; training concerns (parameter groups, losses,
//! checkpoints) live in the `training` crate.

pub mod kan;
pub mod ukan;

pub use kan::{KanBlock, KanGridConfig, KanLayer, KanLinear, KanLinearConfig};
pub use ukan::{UKan, UKanConfig, UKAN_STRIDE};
