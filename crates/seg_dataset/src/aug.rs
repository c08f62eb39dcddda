//! Image/mask augmentation and transformation pipeline.
//!
//! Geometric ops (rotate, flip, resize) are applied identically to the image
//! and every mask channel; photometric normalization only touches the image.

use crate::types::SegSample;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use rand::Rng;

/// ImageNet statistics used by the normalization step.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Mask pixels above this value (0-255) count as foreground.
pub const MASK_THRESHOLD: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipKind {
    Horizontal,
    Vertical,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformPipeline {
    /// Output (width, height).
    pub target_size: (u32, u32),
    /// Probability of a random 90-degree rotation (k uniform in 0..=3).
    pub rotate90_prob: f32,
    /// Probability of a random flip (horizontal, vertical or both).
    pub flip_prob: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl TransformPipeline {
    /// RandomRotate90 -> Flip -> Resize -> Normalize.
    pub fn train(width: u32, height: u32) -> Self {
        Self {
            target_size: (width, height),
            rotate90_prob: 0.5,
            flip_prob: 0.5,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Resize -> Normalize.
    pub fn eval(width: u32, height: u32) -> Self {
        Self {
            rotate90_prob: 0.0,
            flip_prob: 0.0,
            ..Self::train(width, height)
        }
    }

    pub fn apply(
        &self,
        id: &str,
        mut image: RgbImage,
        mut masks: Vec<GrayImage>,
        rng: &mut dyn rand::RngCore,
    ) -> SegSample {
        if self.rotate90_prob > 0.0 && rng.random_range(0.0..1.0) < self.rotate90_prob {
            let k = rng.random_range(0..4u8);
            rotate90(&mut image, &mut masks, k);
        }
        if self.flip_prob > 0.0 && rng.random_range(0.0..1.0) < self.flip_prob {
            let kind = match rng.random_range(0..3u8) {
                0 => FlipKind::Both,
                1 => FlipKind::Vertical,
                _ => FlipKind::Horizontal,
            };
            flip(&mut image, &mut masks, kind);
        }

        let (w, h) = self.target_size;
        let image = if image.dimensions() == (w, h) {
            image
        } else {
            imageops::resize(&image, w, h, FilterType::Triangle)
        };
        let masks: Vec<GrayImage> = masks
            .into_iter()
            .map(|m| {
                if m.dimensions() == (w, h) {
                    m
                } else {
                    imageops::resize(&m, w, h, FilterType::Nearest)
                }
            })
            .collect();

        SegSample {
            id: id.to_string(),
            image_chw: normalize_chw(&image, self.mean, self.std),
            mask_chw: masks_to_chw(&masks, w, h),
            width: w,
            height: h,
            num_classes: masks.len(),
        }
    }
}

/// Rotate image and masks by `k` quarter turns counter-clockwise.
pub fn rotate90(image: &mut RgbImage, masks: &mut [GrayImage], k: u8) {
    match k % 4 {
        0 => {}
        1 => {
            *image = imageops::rotate270(image);
            for m in masks.iter_mut() {
                *m = imageops::rotate270(m);
            }
        }
        2 => {
            imageops::rotate180_in_place(image);
            for m in masks.iter_mut() {
                imageops::rotate180_in_place(m);
            }
        }
        _ => {
            *image = imageops::rotate90(image);
            for m in masks.iter_mut() {
                *m = imageops::rotate90(m);
            }
        }
    }
}

pub fn flip(image: &mut RgbImage, masks: &mut [GrayImage], kind: FlipKind) {
    if matches!(kind, FlipKind::Horizontal | FlipKind::Both) {
        imageops::flip_horizontal_in_place(image);
        for m in masks.iter_mut() {
            imageops::flip_horizontal_in_place(m);
        }
    }
    if matches!(kind, FlipKind::Vertical | FlipKind::Both) {
        imageops::flip_vertical_in_place(image);
        for m in masks.iter_mut() {
            imageops::flip_vertical_in_place(m);
        }
    }
}

/// `(pixel / 255 - mean) / std` per channel, CHW layout.
pub fn normalize_chw(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut out = vec![0.0f32; plane * 3];
    for (x, y, pixel) in image.enumerate_pixels() {
        let base = (y * width + x) as usize;
        for c in 0..3 {
            out[c * plane + base] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }
    out
}

fn masks_to_chw(masks: &[GrayImage], width: u32, height: u32) -> Vec<f32> {
    let plane = (width * height) as usize;
    let mut out = vec![0.0f32; plane * masks.len()];
    for (c, mask) in masks.iter().enumerate() {
        for (x, y, pixel) in mask.enumerate_pixels() {
            if pixel[0] > MASK_THRESHOLD {
                out[c * plane + (y * width + x) as usize] = 1.0;
            }
        }
    }
    out
}

#[cfg(test)]
mod aug_tests {
    use super::*;
    use image::{Luma, Rgb};
    use rand::SeedableRng;

    fn marked_pair() -> (RgbImage, Vec<GrayImage>) {
        // 4x2 image with a single foreground pixel at (0, 0).
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(0, 0, Rgb([255, 255, 255]));
        let mut mask = GrayImage::new(4, 2);
        mask.put_pixel(0, 0, Luma([255]));
        (image, vec![mask])
    }

    #[test]
    fn rotation_moves_image_and_mask_together() {
        for k in 0..4u8 {
            let (mut image, mut masks) = marked_pair();
            rotate90(&mut image, &mut masks, k);
            assert_eq!(image.dimensions(), masks[0].dimensions());
            for (x, y, p) in image.enumerate_pixels() {
                assert_eq!(p[0] == 255, masks[0].get_pixel(x, y)[0] == 255, "k={k}");
            }
        }
    }

    #[test]
    fn quarter_turn_swaps_dimensions() {
        let (mut image, mut masks) = marked_pair();
        rotate90(&mut image, &mut masks, 1);
        assert_eq!(image.dimensions(), (2, 4));
        // counter-clockwise: top-left goes to bottom-left
        assert_eq!(masks[0].get_pixel(0, 3)[0], 255);
    }

    #[test]
    fn flip_both_moves_corner_to_opposite_corner() {
        let (mut image, mut masks) = marked_pair();
        flip(&mut image, &mut masks, FlipKind::Both);
        assert_eq!(masks[0].get_pixel(3, 1)[0], 255);
        assert_eq!(image.get_pixel(3, 1)[0], 255);
    }

    #[test]
    fn eval_pipeline_resizes_and_normalizes() {
        let (image, masks) = marked_pair();
        let pipeline = TransformPipeline::eval(8, 4);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let sample = pipeline.apply("a", image, masks, &mut rng);
        assert_eq!((sample.width, sample.height), (8, 4));
        assert_eq!(sample.image_chw.len(), 3 * 8 * 4);
        assert_eq!(sample.mask_chw.len(), 8 * 4);
        assert!(sample.mask_chw.iter().all(|v| *v == 0.0 || *v == 1.0));
        // black pixel, red channel
        let expected = (0.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((sample.image_chw[8 * 4 - 1] - expected).abs() < 1e-5);
        // nearest resize keeps the foreground block at the top-left corner
        assert_eq!(sample.mask_chw[0], 1.0);
        assert_eq!(sample.mask_chw[8 * 4 - 1], 0.0);
    }
}
