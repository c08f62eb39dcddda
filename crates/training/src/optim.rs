//! Two-group optimization: KAN projections and everything else step with
//! their own learning rate and weight decay.

use burn::module::{AutodiffModule, Module};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use models::{KanLinear, UKan};

use crate::config::TrainArgs;
use crate::scheduler::GroupLr;

pub const ADAM_BETAS: (f32, f32) = (0.9, 0.999);
pub const ADAM_EPSILON: f32 = 1e-8;

/// One optimizer per parameter group, both of the same kind.
pub struct GroupedOptimizer<O> {
    base: O,
    kan: O,
}

impl<O> GroupedOptimizer<O> {
    pub fn new(base: O, kan: O) -> Self {
        Self { base, kan }
    }

    /// Backpropagate `loss` once, split the gradients by group and apply
    /// each group's optimizer with its current learning rate.
    pub fn step<B>(&mut self, lr: GroupLr, model: UKan<B>, loss: Tensor<B, 1>) -> UKan<B>
    where
        B: AutodiffBackend,
        O: Optimizer<UKan<B>, B>,
    {
        let mut grads = loss.backward();
        let kan_grads = GradientsParams::from_module(&mut grads, &kan_modules(&model));
        let base_grads = GradientsParams::from_grads(grads, &model);
        let model = self.kan.step(lr.kan, model, kan_grads);
        self.base.step(lr.base, model, base_grads)
    }
}

/// The KAN parameter group as a standalone module sharing parameter ids with
/// `model`.
pub fn kan_modules<B: AutodiffBackend>(model: &UKan<B>) -> Vec<KanLinear<B>> {
    model.kan_projections().into_iter().cloned().collect()
}

/// Parameter counts `(base, kan)`.
pub fn group_sizes<B: AutodiffBackend>(model: &UKan<B>) -> (usize, usize) {
    let kan: usize = model
        .kan_projections()
        .into_iter()
        .map(|m| m.num_params())
        .sum();
    (model.num_params().saturating_sub(kan), kan)
}

fn adam_config(weight_decay: f64) -> AdamConfig {
    AdamConfig::new()
        .with_beta_1(ADAM_BETAS.0)
        .with_beta_2(ADAM_BETAS.1)
        .with_epsilon(ADAM_EPSILON)
        .with_weight_decay(weight_decay_config(weight_decay))
}

fn sgd_config(weight_decay: f64, momentum: f64, nesterov: bool) -> SgdConfig {
    let momentum = (momentum > 0.0).then(|| {
        MomentumConfig::new()
            .with_momentum(momentum)
            .with_dampening(0.0)
            .with_nesterov(nesterov)
    });
    SgdConfig::new()
        .with_weight_decay(weight_decay_config(weight_decay))
        .with_momentum(momentum)
}

fn weight_decay_config(penalty: f64) -> Option<WeightDecayConfig> {
    (penalty > 0.0).then(|| WeightDecayConfig::new(penalty as f32))
}

pub fn adam<B>(args: &TrainArgs) -> GroupedOptimizer<impl Optimizer<UKan<B>, B>>
where
    B: AutodiffBackend,
    UKan<B>: AutodiffModule<B>,
{
    GroupedOptimizer::new(
        adam_config(args.weight_decay).init::<B, UKan<B>>(),
        adam_config(args.kan_weight_decay).init::<B, UKan<B>>(),
    )
}

pub fn sgd<B>(args: &TrainArgs) -> GroupedOptimizer<impl Optimizer<UKan<B>, B>>
where
    B: AutodiffBackend,
    UKan<B>: AutodiffModule<B>,
{
    GroupedOptimizer::new(
        sgd_config(args.weight_decay, args.momentum, args.nesterov).init::<B, UKan<B>>(),
        sgd_config(args.kan_weight_decay, args.momentum, args.nesterov).init::<B, UKan<B>>(),
    )
}
