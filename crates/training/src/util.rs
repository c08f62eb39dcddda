use std::fs;

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use models::UKan;

use crate::config::{BackendKind, OptimizerKind, TrainArgs};
use crate::data::SegData;
use crate::optim::{adam, group_sizes, sgd};
use crate::trainer::{fit, TrainSummary};
use crate::TrainBackend;

pub type ADBackend = Autodiff<TrainBackend>;

/// Resolve, validate and record the config, then train.
pub fn run_train(mut args: TrainArgs) -> anyhow::Result<TrainSummary> {
    validate_backend_choice(args.backend)?;
    args.resolve_name();
    args.validate()?;

    let run_dir = args.run_dir();
    fs::create_dir_all(&run_dir)?;
    args.print();
    let config_path = args.save(&run_dir)?;
    log::info!("wrote {}", config_path.display());

    let device = <ADBackend as Backend>::Device::default();
    ADBackend::seed(args.seed);

    let data = SegData::from_args(&args)?;
    let model = UKan::<ADBackend>::new(args.model_config(), &device);
    let (base_params, kan_params) = group_sizes(&model);
    log::info!(
        "U-KAN: {base_params} base params (lr {:e}, wd {:e}), {kan_params} KAN params (lr {:e}, wd {:e})",
        args.lr,
        args.weight_decay,
        args.kan_lr,
        args.kan_weight_decay
    );

    let summary = match args.optimizer {
        OptimizerKind::Adam => fit(&args, &run_dir, &data, model, adam::<ADBackend>(&args), &device)?,
        OptimizerKind::Sgd => fit(&args, &run_dir, &data, model, sgd::<ADBackend>(&args), &device)?,
    };

    println!(
        "best val IoU {:.4} / Dice {:.4} after {} epoch(s){}",
        summary.best_iou,
        summary.best_dice,
        summary.epochs_run,
        if summary.stopped_early { " (early stop)" } else { "" }
    );
    Ok(summary)
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            println!("note: built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}
