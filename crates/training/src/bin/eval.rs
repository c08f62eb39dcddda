use std::fs;
use std::path::PathBuf;

use burn::tensor::backend::Backend;
use clap::Parser;
use training::checkpoint::{checkpoint_path, load_ukan, BEST_MODEL};
use training::config::{BackendKind, CONFIG_FILE};
use training::data::val_loader;
use training::losses::SegLoss;
use training::util::validate_backend_choice;
use training::{evaluate, TrainArgs, TrainBackend};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a U-KAN checkpoint on the validation split of its run"
)]
struct Args {
    /// Run directory containing config.yml and checkpoints.
    #[arg(long)]
    run_dir: PathBuf,
    /// Checkpoint stem or path (default: <run_dir>/best_model.bin).
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Override the dataset root recorded in config.yml.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Evaluation batch size (default: the run's batch size).
    #[arg(long)]
    batch_size: Option<usize>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Also write the metrics as JSON here.
    #[arg(long)]
    json_out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    validate_backend_choice(args.backend)?;

    let mut cfg = TrainArgs::load(&args.run_dir.join(CONFIG_FILE))?;
    if let Some(dir) = args.data_dir {
        cfg.data_dir = dir;
    }
    let batch_size = args.batch_size.unwrap_or(cfg.batch_size).max(1);
    let loader = val_loader(&cfg, batch_size)?;
    if loader.is_empty() {
        println!("No validation images under {}", cfg.data_dir.display());
        return Ok(());
    }

    let ckpt = args
        .checkpoint
        .unwrap_or_else(|| checkpoint_path(&args.run_dir, BEST_MODEL));
    let device = <TrainBackend as Backend>::Device::default();
    let model = load_ukan::<TrainBackend, _>(&ckpt, cfg.model_config(), &device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", ckpt.display()))?;

    let stats = evaluate(&model, &loader, &SegLoss::new(cfg.loss), &device, true)?;
    println!("checkpoint: {}", ckpt.display());
    println!("images: {}", stats.samples);
    println!("loss: {:.4}", stats.loss);
    println!("IoU: {:.4}", stats.iou);
    println!("Dice: {:.4}", stats.dice);
    println!("recall: {:.4}", stats.recall);
    println!("specificity: {:.4}", stats.specificity);
    println!("precision: {:.4}", stats.precision);

    if let Some(path) = args.json_out {
        fs::write(&path, serde_json::to_string_pretty(&stats)?)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}
