//! Batch iteration for training and validation.

use crate::aug::TransformPipeline;
use crate::index::load_sample;
use crate::types::{DatasetResult, SampleIndex, SegDatasetError, SegSample};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    /// Loader threads; 0 loads on the calling thread.
    pub num_workers: usize,
    /// Seeds shuffling and per-sample augmentation. `None` draws from the OS.
    pub seed: Option<u64>,
}

impl BatchConfig {
    pub fn train(batch_size: usize, num_workers: usize, seed: Option<u64>) -> Self {
        Self {
            batch_size,
            shuffle: true,
            drop_last: true,
            num_workers,
            seed,
        }
    }

    pub fn eval(batch_size: usize, num_workers: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            drop_last: false,
            num_workers,
            seed: None,
        }
    }
}

pub struct SegBatch<B: Backend> {
    /// `[B, 3, H, W]`
    pub images: Tensor<B, 4>,
    /// `[B, num_classes, H, W]`, values in {0, 1}.
    pub masks: Tensor<B, 4>,
    pub ids: Vec<String>,
}

impl<B: Backend> SegBatch<B> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A fixed set of samples plus the transform and batching policy applied to
/// them every epoch.
pub struct SegLoader {
    indices: Vec<SampleIndex>,
    pipeline: TransformPipeline,
    cfg: BatchConfig,
    pool: Option<rayon::ThreadPool>,
}

impl SegLoader {
    pub fn new(
        indices: Vec<SampleIndex>,
        pipeline: TransformPipeline,
        cfg: BatchConfig,
    ) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(SegDatasetError::Other("batch_size must be >= 1".into()));
        }
        let pool = if cfg.num_workers > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(cfg.num_workers)
                    .thread_name(|i| format!("seg-loader-{i}"))
                    .build()?,
            )
        } else {
            None
        };
        Ok(Self {
            indices,
            pipeline,
            cfg,
            pool,
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Batches one epoch yields.
    pub fn num_batches(&self) -> usize {
        let n = self.indices.len();
        let bs = self.cfg.batch_size;
        if self.cfg.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    /// Iterator over one epoch. Order and augmentation are reproducible for
    /// a given `(seed, epoch)`.
    pub fn epoch(&self, epoch: usize) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.indices.len()).collect();
        if self.cfg.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        BatchIter {
            loader: self,
            order,
            cursor: 0,
            epoch,
            processed_samples: 0,
            load_time: Duration::ZERO,
        }
    }

    fn sample_rng(&self, epoch: usize, ordinal: usize) -> StdRng {
        match self.cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ ((epoch as u64) << 32) ^ ordinal as u64),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }

    fn load(&self, epoch: usize, ordinal: usize) -> DatasetResult<SegSample> {
        let mut rng = self.sample_rng(epoch, ordinal);
        load_sample(&self.indices[ordinal], &self.pipeline, &mut rng)
    }
}

pub struct BatchIter<'a> {
    loader: &'a SegLoader,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    processed_samples: usize,
    load_time: Duration,
}

impl BatchIter<'_> {
    pub fn processed_samples(&self) -> usize {
        self.processed_samples
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<SegBatch<B>>> {
        let cfg = &self.loader.cfg;
        let remaining = self.order.len().saturating_sub(self.cursor);
        if remaining == 0 || (cfg.drop_last && remaining < cfg.batch_size) {
            if self.processed_samples > 0 {
                log::debug!(
                    "epoch {} loaded {} samples in {:.2}s",
                    self.epoch,
                    self.processed_samples,
                    self.load_time.as_secs_f64()
                );
            }
            return Ok(None);
        }
        let end = (self.cursor + cfg.batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        let t_load = Instant::now();
        let epoch = self.epoch;
        let loader = self.loader;
        let samples: Vec<SegSample> = match &loader.pool {
            Some(pool) => pool.install(|| {
                slice
                    .par_iter()
                    .map(|&ordinal| loader.load(epoch, ordinal))
                    .collect::<DatasetResult<Vec<_>>>()
            })?,
            None => slice
                .iter()
                .map(|&ordinal| loader.load(epoch, ordinal))
                .collect::<DatasetResult<Vec<_>>>()?,
        };
        self.load_time += t_load.elapsed();
        self.processed_samples += samples.len();

        Ok(Some(collate(samples, device)?))
    }
}

/// Stack samples of identical size into batch tensors.
pub fn collate<B: Backend>(
    samples: Vec<SegSample>,
    device: &B::Device,
) -> DatasetResult<SegBatch<B>> {
    let Some(first) = samples.first() else {
        return Err(SegDatasetError::Other("cannot collate an empty batch".into()));
    };
    let (width, height, classes) = (first.width, first.height, first.num_classes);
    let batch_len = samples.len();
    let plane = width as usize * height as usize;

    let mut images = Vec::with_capacity(batch_len * 3 * plane);
    let mut masks = Vec::with_capacity(batch_len * classes * plane);
    let mut ids = Vec::with_capacity(batch_len);
    for sample in samples {
        if (sample.width, sample.height, sample.num_classes) != (width, height, classes) {
            return Err(SegDatasetError::Other(format!(
                "sample {} is {}x{} with {} masks, batch expects {}x{} with {}",
                sample.id, sample.width, sample.height, sample.num_classes, width, height, classes
            )));
        }
        images.extend_from_slice(&sample.image_chw);
        masks.extend_from_slice(&sample.mask_chw);
        ids.push(sample.id);
    }

    let (h, w) = (height as usize, width as usize);
    let images = Tensor::<B, 1>::from_floats(images.as_slice(), device).reshape([batch_len, 3, h, w]);
    let masks =
        Tensor::<B, 1>::from_floats(masks.as_slice(), device).reshape([batch_len, classes, h, w]);
    Ok(SegBatch { images, masks, ids })
}
