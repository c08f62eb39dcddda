//! Segmentation losses on raw logits.
//!
//! All losses take logits and binary targets of shape `[B, K, H, W]` and
//! return a scalar tensor `[1]`.

use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

use crate::config::LossKind;

const DICE_SMOOTH: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegLoss {
    kind: LossKind,
}

impl SegLoss {
    pub fn new(kind: LossKind) -> Self {
        Self { kind }
    }

    pub fn forward<B: Backend>(&self, logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
        match self.kind {
            LossKind::BceWithLogits => bce_with_logits(logits, target),
            LossKind::BceDice => bce_dice(logits, target),
            LossKind::LovaszHinge => lovasz_hinge(logits, target),
        }
    }

    /// Mean of the loss over every prediction head.
    pub fn forward_heads<B: Backend>(
        &self,
        heads: &[Tensor<B, 4>],
        target: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let count = heads.len().max(1) as f32;
        heads
            .iter()
            .map(|head| self.forward(head.clone(), target.clone()))
            .reduce(|acc, loss| acc + loss)
            .map(|total| total.div_scalar(count))
            .unwrap_or_else(|| Tensor::zeros([1], &target.device()))
    }
}

/// Mean binary cross-entropy on logits,
/// `max(x, 0) - x * y + log(1 + exp(-|x|))`.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    let softplus_neg_abs = logits.clone().abs().neg().exp().log1p();
    (relu(logits.clone()) - logits * target + softplus_neg_abs).mean()
}

/// `1 - mean_b(dice_b)` with sigmoid probabilities, one dice per sample.
pub fn soft_dice_loss<B: Backend>(logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    let [batch, channels, height, width] = logits.dims();
    let flat = channels * height * width;
    let probs = sigmoid(logits).reshape([batch, flat]);
    let target = target.reshape([batch, flat]);

    let intersection = (probs.clone() * target.clone()).sum_dim(1);
    let denom = probs.sum_dim(1) + target.sum_dim(1);
    let dice = intersection
        .mul_scalar(2.0)
        .add_scalar(DICE_SMOOTH)
        .div(denom.add_scalar(DICE_SMOOTH));
    dice.mean().neg().add_scalar(1.0)
}

/// `0.5 * BCE + dice loss`.
pub fn bce_dice<B: Backend>(logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    bce_with_logits(logits.clone(), target.clone()).mul_scalar(0.5) + soft_dice_loss(logits, target)
}

/// Per-image Lovász hinge, averaged over the batch.
///
/// The error ordering and the Lovász gradient are computed on the host; the
/// sorted errors are gathered with `select` so gradients flow to the logits.
pub fn lovasz_hinge<B: Backend>(logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    let [batch, channels, height, width] = logits.dims();
    let flat = channels * height * width;
    let device = logits.device();
    let logits = logits.reshape([batch, flat]);
    let target = target.reshape([batch, flat]);
    let labels = target
        .clone()
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default();

    let mut total: Option<Tensor<B, 1>> = None;
    for b in 0..batch {
        let row_logits = logits.clone().slice([b..b + 1, 0..flat]).reshape([flat]);
        let row_target = target.clone().slice([b..b + 1, 0..flat]).reshape([flat]);
        let signs = row_target.mul_scalar(2.0).sub_scalar(1.0);
        let errors = (row_logits * signs).neg().add_scalar(1.0);

        let host_errors = errors
            .clone()
            .detach()
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default();
        let row_labels = labels.get(b * flat..(b + 1) * flat).unwrap_or(&[]);
        if host_errors.len() != flat || row_labels.len() != flat {
            continue;
        }

        let mut order: Vec<usize> = (0..flat).collect();
        order.sort_by(|&i, &j| host_errors[j].total_cmp(&host_errors[i]));
        let gt_sorted: Vec<f32> = order.iter().map(|&i| row_labels[i]).collect();
        let grad = lovasz_grad(&gt_sorted);

        let perm: Vec<i32> = order.iter().map(|&i| i as i32).collect();
        let perm = Tensor::<B, 1, Int>::from_data(TensorData::new(perm, [flat]), &device);
        let grad = Tensor::<B, 1>::from_data(TensorData::new(grad, [flat]), &device);
        let sorted = errors.select(0, perm);
        let loss = (relu(sorted) * grad).sum();
        total = Some(match total {
            Some(acc) => acc + loss,
            None => loss,
        });
    }

    match total {
        Some(total) => total.div_scalar(batch.max(1) as f32),
        None => Tensor::zeros([1], &device),
    }
}

/// Gradient of the Lovász extension of the Jaccard loss w.r.t. errors
/// sorted in decreasing order.
pub fn lovasz_grad(gt_sorted: &[f32]) -> Vec<f32> {
    let gts: f32 = gt_sorted.iter().sum();
    let mut cum_pos = 0.0f32;
    let mut cum_neg = 0.0f32;
    let mut jaccard = Vec::with_capacity(gt_sorted.len());
    for &gt in gt_sorted {
        cum_pos += gt;
        cum_neg += 1.0 - gt;
        let intersection = gts - cum_pos;
        let union = gts + cum_neg;
        jaccard.push(if union > 0.0 {
            1.0 - intersection / union
        } else {
            0.0
        });
    }
    for i in (1..jaccard.len()).rev() {
        jaccard[i] -= jaccard[i - 1];
    }
    jaccard
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TB = NdArray<f32>;

    fn scalar(t: Tensor<TB, 1>) -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    }

    fn tensor(values: [f32; 4]) -> Tensor<TB, 4> {
        Tensor::<TB, 1>::from_floats(values, &Default::default()).reshape([1, 1, 2, 2])
    }

    #[test]
    fn bce_matches_closed_form() {
        let logits = tensor([0.0, 2.0, -1.0, 3.0]);
        let target = tensor([1.0, 0.0, 0.0, 1.0]);
        let expected = [
            (1.0f32 + 0.0f32.exp()).ln(),
            2.0 + (1.0 + (-2.0f32).exp()).ln(),
            (1.0 + (-1.0f32).exp()).ln(),
            (1.0 + (-3.0f32).exp()).ln(),
        ]
        .iter()
        .sum::<f32>()
            / 4.0;
        assert!((scalar(bce_with_logits(logits, target)) - expected).abs() < 1e-5);
    }

    #[test]
    fn dice_loss_is_near_zero_for_confident_match() {
        let logits = tensor([20.0, -20.0, 20.0, -20.0]);
        let target = tensor([1.0, 0.0, 1.0, 0.0]);
        assert!(scalar(soft_dice_loss(logits, target)) < 1e-4);
    }

    #[test]
    fn dice_loss_is_near_one_for_disjoint_prediction() {
        let logits = tensor([-20.0, 20.0, -20.0, 20.0]);
        let target = tensor([1.0, 0.0, 1.0, 0.0]);
        assert!(scalar(soft_dice_loss(logits, target)) > 0.99);
    }

    #[test]
    fn lovasz_grad_sums_to_final_jaccard() {
        let grad = lovasz_grad(&[1.0, 0.0, 1.0, 0.0]);
        // telescoping sum equals 1 - 0/(2+2)
        let sum: f32 = grad.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!((grad[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn lovasz_hinge_is_zero_for_large_margin() {
        let logits = tensor([5.0, -5.0, 5.0, -5.0]);
        let target = tensor([1.0, 0.0, 1.0, 0.0]);
        assert!(scalar(lovasz_hinge(logits, target)).abs() < 1e-6);
    }

    #[test]
    fn lovasz_hinge_penalizes_wrong_signs() {
        let logits = tensor([-1.0, 1.0, -1.0, 1.0]);
        let target = tensor([1.0, 0.0, 1.0, 0.0]);
        assert!(scalar(lovasz_hinge(logits, target)) > 1.0);
    }

    #[test]
    fn head_mean_averages_losses() {
        let loss = SegLoss::new(LossKind::BceWithLogits);
        let target = tensor([1.0, 0.0, 1.0, 0.0]);
        let a = tensor([0.0; 4]);
        let b = tensor([2.0, -2.0, 2.0, -2.0]);
        let mean = scalar(loss.forward_heads(&[a.clone(), b.clone()], target.clone()));
        let expected = (scalar(loss.forward(a, target.clone())) + scalar(loss.forward(b, target))) / 2.0;
        assert!((mean - expected).abs() < 1e-6);
    }
}
