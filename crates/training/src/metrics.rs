//! Overlap metrics on binarized predictions and running averages.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::Serialize;

const SMOOTH: f64 = 1e-5;

/// Pixel confusion counts of `sigmoid(logits) > 0.5` against `target > 0.5`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Confusion {
    pub tp: f64,
    pub fp: f64,
    pub fn_: f64,
    pub tn: f64,
}

impl Confusion {
    pub fn from_logits<B: Backend>(logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Self {
        // sigmoid(x) > 0.5  <=>  x > 0
        let pred = logits.into_data().to_vec::<f32>().unwrap_or_default();
        let target = target.into_data().to_vec::<f32>().unwrap_or_default();
        Self::from_values(&pred, &target)
    }

    pub fn from_values(logits: &[f32], target: &[f32]) -> Self {
        let mut c = Confusion::default();
        for (&x, &t) in logits.iter().zip(target) {
            match (x > 0.0, t > 0.5) {
                (true, true) => c.tp += 1.0,
                (true, false) => c.fp += 1.0,
                (false, true) => c.fn_ += 1.0,
                (false, false) => c.tn += 1.0,
            }
        }
        c
    }

    pub fn iou(&self) -> f64 {
        (self.tp + SMOOTH) / (self.tp + self.fp + self.fn_ + SMOOTH)
    }
}

/// IoU and Dice of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IouScore {
    pub iou: f64,
    pub dice: f64,
}

pub fn iou_score<B: Backend>(logits: Tensor<B, 4>, target: Tensor<B, 4>) -> IouScore {
    let iou = Confusion::from_logits(logits, target).iou();
    IouScore {
        iou,
        dice: 2.0 * iou / (iou + 1.0),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Indicators {
    pub iou: f64,
    pub dice: f64,
    pub recall: f64,
    pub specificity: f64,
    pub precision: f64,
}

impl Indicators {
    pub fn from_confusion(c: &Confusion) -> Self {
        let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };
        Self {
            iou: ratio(c.tp, c.tp + c.fp + c.fn_),
            dice: ratio(2.0 * c.tp, 2.0 * c.tp + c.fp + c.fn_),
            recall: ratio(c.tp, c.tp + c.fn_),
            specificity: ratio(c.tn, c.tn + c.fp),
            precision: ratio(c.tp, c.tp + c.fp),
        }
    }
}

pub fn indicators<B: Backend>(logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Indicators {
    Indicators::from_confusion(&Confusion::from_logits(logits, target))
}

/// Running weighted mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageMeter {
    pub val: f64,
    pub sum: f64,
    pub count: usize,
    pub avg: f64,
}

impl AverageMeter {
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
        self.avg = if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
