//! The KAN group and the base group step independently.

use burn::backend::Autodiff;
use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use models::{UKan, UKanConfig};
use training::config::LossKind;
use training::losses::SegLoss;
use training::optim::{adam, group_sizes};
use training::scheduler::GroupLr;
use training::TrainArgs;

type AD = Autodiff<NdArray<f32>>;

fn tiny_model(device: &<AD as burn::tensor::backend::Backend>::Device) -> UKan<AD> {
    UKan::new(
        UKanConfig {
            embed_dims: [16, 24, 32],
            ..Default::default()
        },
        device,
    )
}

/// Outputs of every KAN projection on a fixed probe input.
fn kan_outputs(model: &UKan<AD>, device: &<AD as burn::tensor::backend::Backend>::Device) -> Vec<Vec<f32>> {
    model
        .kan_projections()
        .into_iter()
        .map(|fc| {
            let dim = fc.in_features();
            let probe = Tensor::<AD, 2>::ones([2, dim], device).mul_scalar(0.3);
            fc.forward(probe).into_data().to_vec::<f32>().unwrap()
        })
        .collect()
}

fn one_step(lr: GroupLr) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let device = Default::default();
    let model = tiny_model(&device);
    let before = kan_outputs(&model, &device);

    let mut args = TrainArgs::defaults();
    args.weight_decay = 0.0;
    args.kan_weight_decay = 0.0;
    let mut optim = adam::<AD>(&args);

    let input = Tensor::<AD, 4>::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
    let target = Tensor::<AD, 4>::random([2, 1, 32, 32], Distribution::Bernoulli(0.3), &device);
    let heads = model.forward_all(input);
    let loss = SegLoss::new(LossKind::BceDice).forward_heads(&heads, target);
    let model = optim.step(lr, model, loss);

    (before, kan_outputs(&model, &device))
}

#[test]
fn zero_kan_lr_freezes_kan_projections() {
    let (before, after) = one_step(GroupLr { base: 1e-2, kan: 0.0 });
    assert_eq!(before, after);
}

#[test]
fn kan_lr_moves_kan_projections() {
    let (before, after) = one_step(GroupLr { base: 0.0, kan: 1e-2 });
    assert_ne!(before, after);
}

#[test]
fn every_parameter_belongs_to_one_group() {
    let device = Default::default();
    let model = tiny_model(&device);
    let (base, kan) = group_sizes(&model);
    assert!(kan > 0);
    assert_eq!(base + kan, burn::module::Module::num_params(&model));
}
