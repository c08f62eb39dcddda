//! U-KAN: a convolutional U-Net whose two deepest stages run on tokens
//! through KAN blocks.
//!
//! Spatial sizes for an `H x W` input (both divisible by 32):
//!
//! | stage      | channels          | size        |
//! |------------|-------------------|-------------|
//! | encoder1   | `embed_dims[0]/8` | `H/2`       |
//! | encoder2   | `embed_dims[0]/4` | `H/4`       |
//! | encoder3   | `embed_dims[0]`   | `H/8`       |
//! | tokens 1   | `embed_dims[1]`   | `H/16`      |
//! | bottleneck | `embed_dims[2]`   | `H/32`      |

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, LayerNorm, LayerNormConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Tensor;

use crate::kan::{image_to_tokens, tokens_to_image, KanBlock, KanGridConfig, KanLinear};

/// Total downsampling factor of the network.
pub const UKAN_STRIDE: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct UKanConfig {
    pub num_classes: usize,
    pub input_channels: usize,
    pub deep_supervision: bool,
    pub embed_dims: [usize; 3],
    pub no_kan: bool,
    pub grid: KanGridConfig,
}

impl Default for UKanConfig {
    fn default() -> Self {
        Self {
            num_classes: 1,
            input_channels: 3,
            deep_supervision: false,
            embed_dims: [128, 160, 256],
            no_kan: false,
            grid: KanGridConfig::default(),
        }
    }
}

/// Two 3x3 conv + BN + ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_ch: usize, mid_ch: usize, out_ch: usize, device: &B::Device) -> Self {
        Self {
            conv1: conv3x3(in_ch, mid_ch, 1, device),
            norm1: BatchNormConfig::new(mid_ch).init(device),
            conv2: conv3x3(mid_ch, out_ch, 1, device),
            norm2: BatchNormConfig::new(out_ch).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(x)));
        relu(self.norm2.forward(self.conv2.forward(x)))
    }
}

/// Overlapping patch embedding: stride-2 3x3 conv, then LayerNorm on tokens.
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    proj: Conv2d<B>,
    norm: LayerNorm<B>,
}

impl<B: Backend> PatchEmbed<B> {
    pub fn new(in_ch: usize, embed_dim: usize, device: &B::Device) -> Self {
        Self {
            proj: conv3x3(in_ch, embed_dim, 2, device),
            norm: LayerNormConfig::new(embed_dim).init(device),
        }
    }

    /// Returns tokens `[B, h*w, C]` and the token grid `(h, w)`.
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 3>, usize, usize) {
        let x = self.proj.forward(x);
        let [_, _, h, w] = x.dims();
        (self.norm.forward(image_to_tokens(x)), h, w)
    }
}

#[derive(Module, Debug)]
pub struct UKan<B: Backend> {
    encoder1: ConvBlock<B>,
    encoder2: ConvBlock<B>,
    encoder3: ConvBlock<B>,
    pool: MaxPool2d,

    patch_embed3: PatchEmbed<B>,
    patch_embed4: PatchEmbed<B>,
    block1: KanBlock<B>,
    block2: KanBlock<B>,
    norm3: LayerNorm<B>,
    norm4: LayerNorm<B>,

    decoder1: ConvBlock<B>,
    decoder2: ConvBlock<B>,
    decoder3: ConvBlock<B>,
    decoder4: ConvBlock<B>,
    decoder5: ConvBlock<B>,
    dblock1: KanBlock<B>,
    dblock2: KanBlock<B>,
    dnorm3: LayerNorm<B>,
    dnorm4: LayerNorm<B>,

    final_conv: Conv2d<B>,
    /// Auxiliary heads on decoder3/decoder4 outputs (deep supervision only).
    aux_heads: Vec<Conv2d<B>>,
    config: Ignored<UKanConfig>,
}

impl<B: Backend> UKan<B> {
    pub fn new(cfg: UKanConfig, device: &B::Device) -> Self {
        let [c0, c1, c2] = cfg.embed_dims;
        let c_eighth = (c0 / 8).max(1);
        let c_quarter = (c0 / 4).max(1);
        let grid = cfg.grid;
        let no_kan = cfg.no_kan;

        let aux_heads = if cfg.deep_supervision {
            vec![
                conv1x1(c_quarter, cfg.num_classes, device),
                conv1x1(c_eighth, cfg.num_classes, device),
            ]
        } else {
            Vec::new()
        };

        Self {
            encoder1: ConvBlock::new(cfg.input_channels, c_eighth, c_eighth, device),
            encoder2: ConvBlock::new(c_eighth, c_quarter, c_quarter, device),
            encoder3: ConvBlock::new(c_quarter, c0, c0, device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            patch_embed3: PatchEmbed::new(c0, c1, device),
            patch_embed4: PatchEmbed::new(c1, c2, device),
            block1: KanBlock::new(c1, grid, no_kan, device),
            block2: KanBlock::new(c2, grid, no_kan, device),
            norm3: LayerNormConfig::new(c1).init(device),
            norm4: LayerNormConfig::new(c2).init(device),

            decoder1: ConvBlock::new(c2, c2, c1, device),
            decoder2: ConvBlock::new(c1, c1, c0, device),
            decoder3: ConvBlock::new(c0, c0, c_quarter, device),
            decoder4: ConvBlock::new(c_quarter, c_quarter, c_eighth, device),
            decoder5: ConvBlock::new(c_eighth, c_eighth, c_eighth, device),
            dblock1: KanBlock::new(c1, grid, no_kan, device),
            dblock2: KanBlock::new(c0, grid, no_kan, device),
            dnorm3: LayerNormConfig::new(c1).init(device),
            dnorm4: LayerNormConfig::new(c0).init(device),

            final_conv: conv1x1(c_eighth, cfg.num_classes, device),
            aux_heads,
            config: Ignored(cfg),
        }
    }

    pub fn config(&self) -> &UKanConfig {
        &self.config.0
    }

    /// KAN projections of every tokenized block (encoder and decoder).
    pub fn kan_projections(&self) -> Vec<&KanLinear<B>> {
        [&self.block1, &self.block2, &self.dblock1, &self.dblock2]
            .into_iter()
            .flat_map(|block| block.layer().projections())
            .collect()
    }

    /// Final segmentation logits `[B, num_classes, H, W]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let (_, _, d5) = self.decode(input);
        self.final_conv.forward(d5)
    }

    /// Every prediction head at full resolution; the final head is last.
    pub fn forward_all(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let [_, _, height, width] = input.dims();
        let (d3, d4, d5) = self.decode(input);

        let mut outputs = Vec::with_capacity(self.aux_heads.len() + 1);
        for (head, feature) in self.aux_heads.iter().zip([d3, d4]) {
            outputs.push(resize_to(head.forward(feature), height, width));
        }
        outputs.push(self.final_conv.forward(d5));
        outputs
    }

    /// Runs encoder, tokenized stages and decoder; returns the decoder3,
    /// decoder4 and decoder5 feature maps.
    fn decode(&self, input: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) {
        let t1 = self.pool.forward(self.encoder1.forward(input));
        let t2 = self.pool.forward(self.encoder2.forward(t1.clone()));
        let t3 = self.pool.forward(self.encoder3.forward(t2.clone()));

        let (tokens, h, w) = self.patch_embed3.forward(t3.clone());
        let tokens = self.norm3.forward(self.block1.forward(tokens, h, w));
        let t4 = tokens_to_image(tokens, h, w);

        let (tokens, h, w) = self.patch_embed4.forward(t4.clone());
        let tokens = self.norm4.forward(self.block2.forward(tokens, h, w));
        let out = tokens_to_image(tokens, h, w);

        let out = relu(upsample(self.decoder1.forward(out), 2)) + t4;
        let out = self.token_stage(&self.dblock1, &self.dnorm3, out);

        let out = relu(upsample(self.decoder2.forward(out), 2)) + t3;
        let out = self.token_stage(&self.dblock2, &self.dnorm4, out);

        let d3 = relu(upsample(self.decoder3.forward(out), 2)) + t2;
        let d4 = relu(upsample(self.decoder4.forward(d3.clone()), 2)) + t1;
        let d5 = relu(upsample(self.decoder5.forward(d4.clone()), 2));
        (d3, d4, d5)
    }

    fn token_stage(&self, block: &KanBlock<B>, norm: &LayerNorm<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = x.dims();
        let tokens = norm.forward(block.forward(image_to_tokens(x), h, w));
        tokens_to_image(tokens, h, w)
    }
}

fn conv3x3<B: Backend>(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_ch, out_ch], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

fn conv1x1<B: Backend>(in_ch: usize, out_ch: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_ch, out_ch], [1, 1])
        .with_padding(PaddingConfig2d::Valid)
        .init(device)
}

fn upsample<B: Backend>(x: Tensor<B, 4>, factor: usize) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    resize_to(x, h * factor, w * factor)
}

// Nearest keeps the backward pass available on every backend, ndarray included.
fn resize_to<B: Backend>(x: Tensor<B, 4>, height: usize, width: usize) -> Tensor<B, 4> {
    interpolate(
        x,
        [height, width],
        InterpolateOptions::new(InterpolateMode::Nearest),
    )
}
