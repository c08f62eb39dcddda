//! End-to-end seg_dataset workflows on a synthetic on-disk dataset:
//! layout resolution, validation, splitting and batch iteration.

use burn_ndarray::NdArray;
use image::{GrayImage, Luma, Rgb, RgbImage};
use seg_dataset::{
    train_test_split, validate_layout, BatchConfig, DatasetLayout, SegDatasetError, SegLoader,
    TransformPipeline, ValidationOutcome,
};
use std::fs;
use std::path::Path;

type TB = NdArray<f32>;

/// `<root>/<dataset>/images/case_NNN.png` plus one mask per class.
fn create_synthetic_dataset(
    root: &Path,
    dataset: &str,
    count: usize,
    classes: usize,
    mask_ext: &str,
) -> anyhow::Result<()> {
    let base = root.join(dataset);
    fs::create_dir_all(base.join("images"))?;
    for class in 0..classes {
        fs::create_dir_all(base.join("masks").join(class.to_string()))?;
    }
    for i in 0..count {
        let id = format!("case_{i:03}");
        let mut img = RgbImage::new(40, 24);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(i * 20) as u8, (x * 6) as u8, 90]);
        }
        img.save(base.join("images").join(format!("{id}.png")))?;
        for class in 0..classes {
            let mut mask = GrayImage::new(40, 24);
            for (x, y, p) in mask.enumerate_pixels_mut() {
                if x < 20 && y < 12 {
                    *p = Luma([255]);
                }
            }
            mask.save(
                base.join("masks")
                    .join(class.to_string())
                    .join(format!("{id}{mask_ext}")),
            )?;
        }
    }
    Ok(())
}

#[test]
fn known_dataset_resolves_mask_suffix() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), "busi", 4, 1, "_mask.png")?;
    let layout = DatasetLayout::resolve(tmp.path(), "busi", 1, None)?;
    assert_eq!(layout.mask_ext, "_mask.png");
    let report = validate_layout(&layout)?;
    assert_eq!(report.outcome, ValidationOutcome::Pass);
    assert_eq!(report.summary.images, 4);
    assert_eq!(report.summary.complete, 4);
    Ok(())
}

#[test]
fn unknown_dataset_needs_explicit_mask_ext() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let err = DatasetLayout::resolve(tmp.path(), "kvasir", 1, None).unwrap_err();
    assert!(matches!(err, SegDatasetError::UnknownDataset { .. }));
    let layout = DatasetLayout::resolve(tmp.path(), "kvasir", 1, Some(".jpg"))?;
    assert_eq!(layout.mask_ext, ".jpg");
    Ok(())
}

#[test]
fn missing_mask_fails_validation() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), "glas", 3, 2, ".png")?;
    fs::remove_file(tmp.path().join("glas/masks/1/case_001.png"))?;
    let layout = DatasetLayout::resolve(tmp.path(), "glas", 2, None)?;
    let err = validate_layout(&layout).unwrap_err();
    assert!(err.to_string().contains("case_001"), "{err}");
    Ok(())
}

#[test]
fn loader_yields_batches_with_expected_shapes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), "cvc", 10, 2, ".png")?;
    let layout = DatasetLayout::resolve(tmp.path(), "cvc", 2, None)?;
    let ids = layout.index_ids()?;
    let (train_ids, val_ids) = train_test_split(&ids, 0.2, 2981);
    assert_eq!((train_ids.len(), val_ids.len()), (8, 2));

    let train = SegLoader::new(
        layout.indices_for(&train_ids),
        TransformPipeline::train(32, 32),
        BatchConfig::train(3, 2, Some(7)),
    )?;
    assert_eq!(train.num_batches(), 2);

    let device = Default::default();
    let mut iter = train.epoch(0);
    let mut batches = 0;
    while let Some(batch) = iter.next_batch::<TB>(&device)? {
        assert_eq!(batch.images.dims(), [3, 3, 32, 32]);
        assert_eq!(batch.masks.dims(), [3, 2, 32, 32]);
        let values = batch.masks.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| *v == 0.0 || *v == 1.0));
        batches += 1;
    }
    // drop_last drops the trailing partial batch of 2
    assert_eq!(batches, 2);
    assert_eq!(iter.processed_samples(), 6);

    let val = SegLoader::new(
        layout.indices_for(&val_ids),
        TransformPipeline::eval(32, 32),
        BatchConfig::eval(4, 0),
    )?;
    assert_eq!(val.num_batches(), 1);
    let mut iter = val.epoch(0);
    let batch = iter.next_batch::<TB>(&device)?.expect("one val batch");
    assert_eq!(batch.len(), 2);
    assert!(iter.next_batch::<TB>(&device)?.is_none());
    Ok(())
}

#[test]
fn seeded_epochs_are_reproducible() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path(), "busi", 6, 1, "_mask.png")?;
    let layout = DatasetLayout::resolve(tmp.path(), "busi", 1, None)?;
    let indices = layout.indices_for(&layout.index_ids()?);
    let make = || {
        SegLoader::new(
            indices.clone(),
            TransformPipeline::train(32, 32),
            BatchConfig::train(6, 0, Some(11)),
        )
    };
    let (a, b) = (make()?, make()?);
    let device = Default::default();
    let first = a.epoch(3).next_batch::<TB>(&device)?.expect("batch");
    let second = b.epoch(3).next_batch::<TB>(&device)?.expect("batch");
    assert_eq!(first.ids, second.ids);
    assert_eq!(
        first.masks.into_data().to_vec::<f32>().unwrap(),
        second.masks.into_data().to_vec::<f32>().unwrap()
    );
    Ok(())
}
