//! Core types, error definitions, and data structures for seg_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, SegDatasetError>;

#[derive(Debug, Error)]
pub enum SegDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("mask missing for {id}: {path}")]
    MissingMask { id: String, path: PathBuf },
    #[error("image file missing for {id}: {path}")]
    MissingImage { id: String, path: PathBuf },
    #[error("mask {path} is {mask:?} but image {id} is {image:?}")]
    SizeMismatch {
        id: String,
        path: PathBuf,
        image: (u32, u32),
        mask: (u32, u32),
    },
    #[error("unknown dataset '{name}'; pass an explicit mask extension")]
    UnknownDataset { name: String },
    #[error("no images with extension '{ext}' under {dir}")]
    Empty { dir: PathBuf, ext: String },
    #[error("failed to build loader thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("{0}")]
    Other(String),
}

/// One image and its per-class masks after the transform pipeline.
#[derive(Debug, Clone)]
pub struct SegSample {
    pub id: String,
    /// Normalized image in CHW layout (3 channels).
    pub image_chw: Vec<f32>,
    /// Binary masks in CHW layout (`num_classes` channels), values in {0, 1}.
    pub mask_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub num_classes: usize,
}

/// Paths for one sample: the image and one mask per class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    pub id: String,
    pub image_path: PathBuf,
    pub mask_paths: Vec<PathBuf>,
}

/// On-disk dataset layout:
/// `<root>/images/<id><img_ext>` and `<root>/masks/<class>/<id><mask_ext>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLayout {
    pub root: PathBuf,
    pub img_ext: String,
    pub mask_ext: String,
    pub num_classes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub images: usize,
    pub complete: usize,
    pub missing_masks: usize,
    /// First few missing mask paths, for error messages.
    pub missing_examples: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: DatasetSummary,
}
