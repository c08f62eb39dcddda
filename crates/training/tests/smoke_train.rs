//! End-to-end training on a tiny synthetic dataset.

use std::fs;
use std::path::Path;

use image::{GrayImage, Luma, Rgb, RgbImage};
use training::checkpoint::{checkpoint_path, load_ukan, BEST_MODEL, LAST_MODEL};
use training::config::CONFIG_FILE;
use training::history::{RunHistory, LOG_CSV, SCALARS_JSONL};
use training::{run_train, TrainArgs, TrainBackend};

/// Bright square on a dark background; the mask marks the square.
fn create_dataset(root: &Path, count: usize) -> anyhow::Result<()> {
    let images = root.join("busi/images");
    let masks = root.join("busi/masks/0");
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&masks)?;
    for i in 0..count {
        let offset = (i % 4) as u32 * 4;
        let mut img = RgbImage::from_pixel(48, 48, Rgb([20, 20, 20]));
        let mut mask = GrayImage::new(48, 48);
        for y in offset..offset + 16 {
            for x in offset..offset + 16 {
                img.put_pixel(x, y, Rgb([230, 230, 230]));
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        img.save(images.join(format!("case_{i:02}.png")))?;
        mask.save(masks.join(format!("case_{i:02}_mask.png")))?;
    }
    Ok(())
}

fn tiny_args(
    data_dir: &Path,
    output_dir: &Path,
    epochs: usize,
    extra: &[&str],
) -> anyhow::Result<TrainArgs> {
    let mut argv = vec![
        "train".to_string(),
        "--name".into(),
        "smoke".into(),
        "--epochs".into(),
        epochs.to_string(),
        "-b".into(),
        "2".into(),
        "--input-w".into(),
        "32".into(),
        "--input-h".into(),
        "32".into(),
        "--input-list".into(),
        "16,24,32".into(),
        "--num-workers".into(),
        "0".into(),
        "--data-dir".into(),
        data_dir.display().to_string(),
        "--output-dir".into(),
        output_dir.display().to_string(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    TrainArgs::try_from_iter(argv)
}

#[test]
fn two_epochs_write_every_artifact() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("inputs");
    let out_dir = tmp.path().join("outputs");
    create_dataset(&data_dir, 10)?;

    let summary = run_train(tiny_args(&data_dir, &out_dir, 2, &[])?)?;
    let run_dir = out_dir.join("smoke");
    assert_eq!(summary.run_dir, run_dir);
    assert_eq!(summary.epochs_run, 2);
    assert!(!summary.stopped_early);
    assert!(summary.best_iou > 0.0);

    assert!(run_dir.join(CONFIG_FILE).is_file());
    let history = RunHistory::read_csv(&run_dir.join(LOG_CSV))?;
    assert_eq!(history.len(), 2);
    assert!(history.records().iter().all(|r| r.loss.is_finite()));
    let scalar_lines = fs::read_to_string(run_dir.join(SCALARS_JSONL))?.lines().count();
    assert_eq!(scalar_lines, 2 * 7);

    assert!(checkpoint_path(&run_dir, BEST_MODEL).is_file());
    assert!(checkpoint_path(&run_dir, LAST_MODEL).is_file());

    let saved = TrainArgs::load(&run_dir.join(CONFIG_FILE))?;
    assert_eq!(saved.input_list, vec![16, 24, 32]);
    let device = Default::default();
    load_ukan::<TrainBackend, _>(
        checkpoint_path(&run_dir, LAST_MODEL),
        saved.model_config(),
        &device,
    )?;
    Ok(())
}

#[test]
fn rerun_into_same_directory_replaces_logs() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("inputs");
    let out_dir = tmp.path().join("outputs");
    create_dataset(&data_dir, 10)?;

    for _ in 0..2 {
        run_train(tiny_args(&data_dir, &out_dir, 1, &[])?)?;
    }
    let run_dir = out_dir.join("smoke");
    assert_eq!(RunHistory::read_csv(&run_dir.join(LOG_CSV))?.len(), 1);
    let scalar_lines = fs::read_to_string(run_dir.join(SCALARS_JSONL))?.lines().count();
    assert_eq!(scalar_lines, 7);
    Ok(())
}

#[test]
fn early_stopping_zero_stops_after_first_epoch() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("inputs");
    let out_dir = tmp.path().join("outputs");
    create_dataset(&data_dir, 10)?;

    let args = tiny_args(
        &data_dir,
        &out_dir,
        2,
        &[
            "--early-stopping",
            "0",
            "--deep-supervision",
            "true",
            "--loss",
            "LovaszHingeLoss",
            "--optimizer",
            "SGD",
            "--scheduler",
            "ReduceLROnPlateau",
        ],
    )?;
    let summary = run_train(args)?;
    assert_eq!(summary.epochs_run, 1);
    assert!(summary.stopped_early);
    assert!(!checkpoint_path(&out_dir.join("smoke"), LAST_MODEL).exists());
    Ok(())
}

#[test]
fn unknown_dataset_is_rejected_before_training() {
    let tmp = tempfile::tempdir().unwrap();
    let args = tiny_args(tmp.path(), tmp.path(), 2, &["--dataset", "kvasir"]).unwrap();
    let err = run_train(args).unwrap_err();
    assert!(err.to_string().contains("kvasir"), "{err}");
}
