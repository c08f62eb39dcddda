//! Image/mask dataset loading, splitting, and Burn-compatible batching for
//! segmentation training.
//!
//! This crate provides utilities for:
//! - Resolving the `images/` + `masks/<class>/` layout of a dataset
//! - Deterministic train/val splitting
//! - Geometric/photometric augmentation applied jointly to image and masks
//! - Parallel batch iteration yielding Burn tensors

pub mod aug;
pub mod batch;
pub mod index;
pub mod splits;
pub mod types;
pub mod validation;

pub use aug::{FlipKind, TransformPipeline, IMAGENET_MEAN, IMAGENET_STD};
pub use batch::{collate, BatchConfig, BatchIter, SegBatch, SegLoader};
pub use index::{index_ids, known_mask_ext, load_sample, DEFAULT_IMG_EXT};
pub use splits::train_test_split;
pub use types::*;
pub use validation::{summarize_layout, validate_layout, validate_summary};
