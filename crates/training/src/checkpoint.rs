use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use models::{UKan, UKanConfig};

pub const BEST_MODEL: &str = "best_model";
pub const LAST_MODEL: &str = "last_model";
/// Extension the recorder appends to checkpoint stems.
pub const CHECKPOINT_EXT: &str = "bin";

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

/// Path of a checkpoint stem as written on disk.
pub fn checkpoint_path(run_dir: &Path, stem: &str) -> PathBuf {
    run_dir.join(format!("{stem}.{CHECKPOINT_EXT}"))
}

/// Save `model` under `<run_dir>/<stem>.bin`.
pub fn save_ukan<B: Backend>(
    model: &UKan<B>,
    run_dir: &Path,
    stem: &str,
) -> Result<PathBuf, RecorderError> {
    model.clone().save_file(run_dir.join(stem), &recorder())?;
    Ok(checkpoint_path(run_dir, stem))
}

/// Rebuild a U-KAN from `cfg` and load weights from `path` (with or without
/// the `.bin` extension).
pub fn load_ukan<B: Backend, P: AsRef<Path>>(
    path: P,
    cfg: UKanConfig,
    device: &B::Device,
) -> Result<UKan<B>, RecorderError> {
    let path = path.as_ref();
    let stem = if path.extension().is_some_and(|ext| ext == CHECKPOINT_EXT) {
        path.with_extension("")
    } else {
        path.to_path_buf()
    };
    UKan::<B>::new(cfg, device).load_file(stem, &recorder(), device)
}
