//! Kolmogorov-Arnold layers used by the tokenized stages of U-KAN.
//!
//! Shapes:
//! - `KanLinear`: `[N, in] -> [N, out]`
//! - `KanLayer` / `KanBlock`: tokens `[B, H*W, C] -> [B, H*W, C]`

use burn::module::{Ignored, Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{
    BatchNorm, BatchNormConfig, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
    PaddingConfig2d,
};
use burn::tensor::activation::{relu, silu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Spline grid hyperparameters shared by every KAN projection of a network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KanGridConfig {
    /// Number of grid intervals over `[grid_min, grid_max]`.
    pub grid_size: usize,
    /// B-spline order (3 = cubic).
    pub spline_order: usize,
    pub grid_min: f32,
    pub grid_max: f32,
    /// Std of the normal init for spline coefficients.
    pub spline_init_std: f64,
}

impl Default for KanGridConfig {
    fn default() -> Self {
        Self {
            grid_size: 5,
            spline_order: 3,
            grid_min: -1.0,
            grid_max: 1.0,
            spline_init_std: 0.1,
        }
    }
}

impl KanGridConfig {
    /// Spline coefficients per input feature.
    pub fn coefficients(&self) -> usize {
        self.grid_size + self.spline_order
    }

    fn step(&self) -> f32 {
        (self.grid_max - self.grid_min) / self.grid_size.max(1) as f32
    }

    /// Uniform knot vector extended by `spline_order` knots on each side.
    pub fn knots(&self) -> Vec<f32> {
        let h = self.step();
        let order = self.spline_order as f32;
        (0..self.grid_size + 2 * self.spline_order + 1)
            .map(|j| self.grid_min + (j as f32 - order) * h)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KanLinearConfig {
    pub in_features: usize,
    pub out_features: usize,
    pub grid: KanGridConfig,
    /// Replace the spline path with a plain linear projection.
    pub no_kan: bool,
}

impl KanLinearConfig {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            grid: KanGridConfig::default(),
            no_kan: false,
        }
    }

    pub fn with_grid(mut self, grid: KanGridConfig) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_no_kan(mut self, no_kan: bool) -> Self {
        self.no_kan = no_kan;
        self
    }
}

/// KAN projection: `base(silu(x)) + spline(B(x))`, or `base(x)` with `no_kan`.
#[derive(Module, Debug)]
pub struct KanLinear<B: Backend> {
    base: Linear<B>,
    /// Spline coefficients laid out as `[in * coefficients, out]`.
    spline_weight: Option<Param<Tensor<B, 2>>>,
    grid: Ignored<KanGridConfig>,
}

impl<B: Backend> KanLinear<B> {
    pub fn new(cfg: KanLinearConfig, device: &B::Device) -> Self {
        let base = LinearConfig::new(cfg.in_features, cfg.out_features).init(device);
        let spline_weight = (!cfg.no_kan).then(|| {
            Initializer::Normal {
                mean: 0.0,
                std: cfg.grid.spline_init_std,
            }
            .init(
                [cfg.in_features * cfg.grid.coefficients(), cfg.out_features],
                device,
            )
        });
        Self {
            base,
            spline_weight,
            grid: Ignored(cfg.grid),
        }
    }

    pub fn is_kan(&self) -> bool {
        self.spline_weight.is_some()
    }

    pub fn in_features(&self) -> usize {
        self.base.weight.val().dims()[0]
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match &self.spline_weight {
            None => self.base.forward(x),
            Some(weight) => {
                let base = self.base.forward(silu(x.clone()));
                let spline = self.b_splines(x).matmul(weight.val());
                base + spline
            }
        }
    }

    /// B-spline bases of every input feature, flattened to `[N, in * coefficients]`.
    ///
    /// Cox-de Boor recursion on the uniform knot vector; inputs outside the
    /// extended grid get all-zero bases.
    pub fn b_splines(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, in_features] = x.dims();
        let grid = self.grid.0;
        let knots = grid.knots();
        let h = grid.step();

        let mut bases: Vec<Tensor<B, 2>> = knots
            .windows(2)
            .map(|w| {
                x.clone().greater_equal_elem(w[0]).float() * x.clone().lower_elem(w[1]).float()
            })
            .collect();

        for order in 1..=grid.spline_order {
            let denom = order as f32 * h;
            bases = (0..bases.len() - 1)
                .map(|j| {
                    let left = x.clone().sub_scalar(knots[j]).div_scalar(denom) * bases[j].clone();
                    let right = x
                        .clone()
                        .neg()
                        .add_scalar(knots[j + order + 1])
                        .div_scalar(denom)
                        * bases[j + 1].clone();
                    left + right
                })
                .collect();
        }

        Tensor::stack::<3>(bases, 2).reshape([n, in_features * grid.coefficients()])
    }
}

/// Depthwise 3x3 conv + batch norm + ReLU applied on the token grid.
#[derive(Module, Debug)]
pub struct DwConv<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> DwConv<B> {
    pub fn new(dim: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([dim, dim], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_groups(dim)
            .init(device);
        let norm = BatchNormConfig::new(dim).init(device);
        Self { conv, norm }
    }

    pub fn forward(&self, tokens: Tensor<B, 3>, height: usize, width: usize) -> Tensor<B, 3> {
        let x = tokens_to_image(tokens, height, width);
        let x = relu(self.norm.forward(self.conv.forward(x)));
        image_to_tokens(x)
    }
}

/// `fc1 -> dw -> fc2 -> dw -> fc3 -> dw` over tokens.
#[derive(Module, Debug)]
pub struct KanLayer<B: Backend> {
    fc1: KanLinear<B>,
    fc2: KanLinear<B>,
    fc3: KanLinear<B>,
    dw1: DwConv<B>,
    dw2: DwConv<B>,
    dw3: DwConv<B>,
}

impl<B: Backend> KanLayer<B> {
    pub fn new(dim: usize, grid: KanGridConfig, no_kan: bool, device: &B::Device) -> Self {
        let fc = || {
            KanLinear::new(
                KanLinearConfig::new(dim, dim)
                    .with_grid(grid)
                    .with_no_kan(no_kan),
                device,
            )
        };
        Self {
            fc1: fc(),
            fc2: fc(),
            fc3: fc(),
            dw1: DwConv::new(dim, device),
            dw2: DwConv::new(dim, device),
            dw3: DwConv::new(dim, device),
        }
    }

    /// The three token projections; these form the KAN parameter group.
    pub fn projections(&self) -> [&KanLinear<B>; 3] {
        [&self.fc1, &self.fc2, &self.fc3]
    }

    pub fn forward(&self, tokens: Tensor<B, 3>, height: usize, width: usize) -> Tensor<B, 3> {
        let x = project(&self.fc1, tokens);
        let x = self.dw1.forward(x, height, width);
        let x = project(&self.fc2, x);
        let x = self.dw2.forward(x, height, width);
        let x = project(&self.fc3, x);
        self.dw3.forward(x, height, width)
    }
}

fn project<B: Backend>(fc: &KanLinear<B>, tokens: Tensor<B, 3>) -> Tensor<B, 3> {
    let [batch, n, dim] = tokens.dims();
    let out = fc.forward(tokens.reshape([batch * n, dim]));
    let out_dim = out.dims()[1];
    out.reshape([batch, n, out_dim])
}

/// Pre-norm residual KAN block.
#[derive(Module, Debug)]
pub struct KanBlock<B: Backend> {
    norm: LayerNorm<B>,
    layer: KanLayer<B>,
}

impl<B: Backend> KanBlock<B> {
    pub fn new(dim: usize, grid: KanGridConfig, no_kan: bool, device: &B::Device) -> Self {
        Self {
            norm: LayerNormConfig::new(dim).init(device),
            layer: KanLayer::new(dim, grid, no_kan, device),
        }
    }

    pub fn layer(&self) -> &KanLayer<B> {
        &self.layer
    }

    pub fn forward(&self, tokens: Tensor<B, 3>, height: usize, width: usize) -> Tensor<B, 3> {
        let residual = tokens.clone();
        residual + self.layer.forward(self.norm.forward(tokens), height, width)
    }
}

/// `[B, H*W, C] -> [B, C, H, W]`
pub fn tokens_to_image<B: Backend>(tokens: Tensor<B, 3>, height: usize, width: usize) -> Tensor<B, 4> {
    let [batch, _, dim] = tokens.dims();
    tokens.swap_dims(1, 2).reshape([batch, dim, height, width])
}

/// `[B, C, H, W] -> [B, H*W, C]`
pub fn image_to_tokens<B: Backend>(image: Tensor<B, 4>) -> Tensor<B, 3> {
    image.flatten::<3>(2, 3).swap_dims(1, 2)
}
