//! Train/validation loaders for a run.

use anyhow::Context;
use seg_dataset::{
    train_test_split, validate_layout, BatchConfig, DatasetLayout, SegLoader, TransformPipeline,
};

use crate::config::TrainArgs;

pub struct SegData {
    pub layout: DatasetLayout,
    pub train: SegLoader,
    pub val: SegLoader,
}

impl SegData {
    pub fn from_args(args: &TrainArgs) -> anyhow::Result<Self> {
        let layout = resolve_layout(args)?;
        let report = validate_layout(&layout)
            .with_context(|| format!("invalid dataset at {}", layout.root.display()))?;
        let ids = layout.index_ids()?;
        let (train_ids, val_ids) = train_test_split(&ids, args.val_split, args.dataseed);
        log::info!(
            "dataset {}: {} images ({} train / {} val), {} class(es)",
            layout.root.display(),
            report.summary.images,
            train_ids.len(),
            val_ids.len(),
            layout.num_classes
        );
        if train_ids.len() < args.batch_size {
            anyhow::bail!(
                "{} training images cannot fill one batch of {} (drop_last)",
                train_ids.len(),
                args.batch_size
            );
        }

        let (w, h) = (args.input_w as u32, args.input_h as u32);
        let train = SegLoader::new(
            layout.indices_for(&train_ids),
            TransformPipeline::train(w, h),
            BatchConfig::train(args.batch_size, args.num_workers, Some(args.seed)),
        )?;
        let val = SegLoader::new(
            layout.indices_for(&val_ids),
            TransformPipeline::eval(w, h),
            BatchConfig::eval(args.batch_size, args.num_workers),
        )?;
        Ok(Self { layout, train, val })
    }
}

pub fn resolve_layout(args: &TrainArgs) -> anyhow::Result<DatasetLayout> {
    Ok(DatasetLayout::resolve(
        &args.data_dir,
        &args.dataset,
        args.num_classes,
        args.mask_ext.as_deref(),
    )?)
}

/// Validation split of a finished run, rebuilt from its config.
pub fn val_loader(args: &TrainArgs, batch_size: usize) -> anyhow::Result<SegLoader> {
    let layout = resolve_layout(args)?;
    let ids = layout.index_ids()?;
    let (_, val_ids) = train_test_split(&ids, args.val_split, args.dataseed);
    Ok(SegLoader::new(
        layout.indices_for(&val_ids),
        TransformPipeline::eval(args.input_w as u32, args.input_h as u32),
        BatchConfig::eval(batch_size, args.num_workers),
    )?)
}
