//! Dataset layout resolution, id indexing and sample loading.

use crate::aug::TransformPipeline;
use crate::types::{DatasetLayout, DatasetResult, SampleIndex, SegDatasetError, SegSample};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_IMG_EXT: &str = ".png";

/// Mask file suffix for the datasets the driver knows about.
pub fn known_mask_ext(dataset: &str) -> Option<&'static str> {
    match dataset {
        "busi" => Some("_mask.png"),
        "glas" | "cvc" => Some(".png"),
        _ => None,
    }
}

impl DatasetLayout {
    /// Resolve `<data_dir>/<dataset>` with the dataset's mask suffix; an
    /// explicit `mask_ext` wins over the built-in table.
    pub fn resolve(
        data_dir: &Path,
        dataset: &str,
        num_classes: usize,
        mask_ext: Option<&str>,
    ) -> DatasetResult<Self> {
        let mask_ext = match mask_ext {
            Some(ext) => ext.to_string(),
            None => known_mask_ext(dataset)
                .ok_or_else(|| SegDatasetError::UnknownDataset {
                    name: dataset.to_string(),
                })?
                .to_string(),
        };
        Ok(Self {
            root: data_dir.join(dataset),
            img_ext: DEFAULT_IMG_EXT.to_string(),
            mask_ext,
            num_classes: num_classes.max(1),
        })
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn masks_dir(&self) -> PathBuf {
        self.root.join("masks")
    }

    pub fn image_path(&self, id: &str) -> PathBuf {
        self.images_dir().join(format!("{id}{}", self.img_ext))
    }

    pub fn mask_path(&self, class: usize, id: &str) -> PathBuf {
        self.masks_dir()
            .join(class.to_string())
            .join(format!("{id}{}", self.mask_ext))
    }

    pub fn sample_index(&self, id: &str) -> SampleIndex {
        SampleIndex {
            id: id.to_string(),
            image_path: self.image_path(id),
            mask_paths: (0..self.num_classes)
                .map(|class| self.mask_path(class, id))
                .collect(),
        }
    }

    pub fn indices_for(&self, ids: &[String]) -> Vec<SampleIndex> {
        ids.iter().map(|id| self.sample_index(id)).collect()
    }

    /// Sorted ids of every image in the layout.
    pub fn index_ids(&self) -> DatasetResult<Vec<String>> {
        index_ids(&self.images_dir(), &self.img_ext)
    }
}

/// Sorted file stems of `<dir>/*<ext>`.
pub fn index_ids(dir: &Path, ext: &str) -> DatasetResult<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| SegDatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut ids = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(stem) = name.strip_suffix(ext) {
            if !stem.is_empty() {
                ids.push(stem.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// Load an image and its masks and run them through `pipeline`.
pub fn load_sample(
    idx: &SampleIndex,
    pipeline: &TransformPipeline,
    rng: &mut dyn rand::RngCore,
) -> DatasetResult<SegSample> {
    if !idx.image_path.exists() {
        return Err(SegDatasetError::MissingImage {
            id: idx.id.clone(),
            path: idx.image_path.clone(),
        });
    }
    let image = image::open(&idx.image_path)
        .map_err(|e| SegDatasetError::Image {
            path: idx.image_path.clone(),
            source: e,
        })?
        .to_rgb8();

    let mut masks = Vec::with_capacity(idx.mask_paths.len());
    for path in &idx.mask_paths {
        if !path.exists() {
            return Err(SegDatasetError::MissingMask {
                id: idx.id.clone(),
                path: path.clone(),
            });
        }
        let mask = image::open(path)
            .map_err(|e| SegDatasetError::Image {
                path: path.clone(),
                source: e,
            })?
            .to_luma8();
        if mask.dimensions() != image.dimensions() {
            return Err(SegDatasetError::SizeMismatch {
                id: idx.id.clone(),
                path: path.clone(),
                image: image.dimensions(),
                mask: mask.dimensions(),
            });
        }
        masks.push(mask);
    }

    Ok(pipeline.apply(&idx.id, image, masks, rng))
}
