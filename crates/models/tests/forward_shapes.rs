use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use models::{UKan, UKanConfig};

type TB = NdArray<f32>;

fn tiny_config() -> UKanConfig {
    UKanConfig {
        embed_dims: [16, 24, 32],
        ..Default::default()
    }
}

#[test]
fn forward_returns_full_resolution_logits() {
    let device = Default::default();
    let model = UKan::<TB>::new(tiny_config(), &device);
    let input = Tensor::<TB, 4>::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
    let logits = model.forward(input);
    assert_eq!(logits.dims(), [2, 1, 32, 32]);
}

#[test]
fn deep_supervision_adds_two_aux_heads() {
    let device = Default::default();
    let cfg = UKanConfig {
        deep_supervision: true,
        num_classes: 2,
        ..tiny_config()
    };
    let model = UKan::<TB>::new(cfg, &device);
    let input = Tensor::<TB, 4>::random([1, 3, 64, 32], Distribution::Normal(0.0, 1.0), &device);
    let outputs = model.forward_all(input);
    assert_eq!(outputs.len(), 3);
    for out in outputs {
        assert_eq!(out.dims(), [1, 2, 64, 32]);
    }
}

#[test]
fn kan_projections_cover_every_tokenized_block() {
    let device = Default::default();
    let model = UKan::<TB>::new(tiny_config(), &device);
    let projections = model.kan_projections();
    assert_eq!(projections.len(), 12);
    assert!(projections.iter().all(|p| p.is_kan()));

    let plain = UKan::<TB>::new(
        UKanConfig {
            no_kan: true,
            ..tiny_config()
        },
        &device,
    );
    assert!(plain.kan_projections().iter().all(|p| !p.is_kan()));
}
