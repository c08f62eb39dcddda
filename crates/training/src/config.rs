//! Training configuration: CLI flags, YAML overlay, validation and the
//! resolved `config.yml` of a run.

use std::fs;
use std::path::{Path, PathBuf};

use clap::parser::ValueSource;
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use models::{KanGridConfig, UKanConfig, UKAN_STRIDE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("{field} must be >= 1 (got {value})")]
    NotPositive { field: &'static str, value: usize },
    #[error("{field} = {value} is not divisible by {stride}", stride = UKAN_STRIDE)]
    NotDivisible { field: &'static str, value: usize },
    #[error("input_list needs exactly 3 channel widths, got {0:?}")]
    InputList(Vec<usize>),
    #[error("val_split must be in (0, 1), got {0}")]
    ValSplit(f32),
    #[error("{field} must be a positive finite number (got {value})")]
    LearningRate { field: &'static str, value: f64 },
    #[error("milestones must be comma-separated integers (got '{0}')")]
    Milestones(String),
    #[error("unknown dataset '{0}'; pass --mask-ext")]
    UnknownDataset(String),
    #[error("failed to read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchKind {
    #[value(name = "UKAN")]
    #[serde(rename = "UKAN")]
    UKan,
}

#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    #[value(name = "BCEDiceLoss")]
    #[serde(rename = "BCEDiceLoss")]
    BceDice,
    #[value(name = "LovaszHingeLoss")]
    #[serde(rename = "LovaszHingeLoss")]
    LovaszHinge,
    #[value(name = "BCEWithLogitsLoss")]
    #[serde(rename = "BCEWithLogitsLoss")]
    BceWithLogits,
}

#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    #[value(name = "Adam")]
    #[serde(rename = "Adam")]
    Adam,
    #[value(name = "SGD")]
    #[serde(rename = "SGD")]
    Sgd,
}

#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    #[value(name = "CosineAnnealingLR")]
    #[serde(rename = "CosineAnnealingLR")]
    CosineAnnealing,
    #[value(name = "ReduceLROnPlateau")]
    #[serde(rename = "ReduceLROnPlateau")]
    ReduceOnPlateau,
    #[value(name = "MultiStepLR")]
    #[serde(rename = "MultiStepLR")]
    MultiStep,
    #[value(name = "ConstantLR")]
    #[serde(rename = "ConstantLR")]
    Constant,
}

#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[value(name = "ndarray")]
    NdArray,
    Wgpu,
}

#[derive(Parser, Serialize, Debug, Clone, PartialEq)]
#[command(name = "train", about = "Train a U-KAN segmentation model on image/mask pairs")]
pub struct TrainArgs {
    /// Run name (default: <dataset>_<arch>_wDS or _woDS).
    #[arg(long)]
    pub name: Option<String>,
    /// Number of epochs.
    #[arg(long, default_value_t = 400)]
    pub epochs: usize,
    /// Mini-batch size.
    #[arg(short = 'b', long, default_value_t = 8)]
    pub batch_size: usize,
    /// Seed of the train/val split.
    #[arg(long, default_value_t = 2981)]
    pub dataseed: u64,
    /// Seed of weight init, shuffling and augmentation.
    #[arg(long, default_value_t = 1029)]
    pub seed: u64,

    #[arg(short = 'a', long, value_enum, default_value_t = ArchKind::UKan)]
    pub arch: ArchKind,
    /// Train auxiliary heads on the two shallowest decoder stages.
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub deep_supervision: bool,
    #[arg(long, default_value_t = 3)]
    pub input_channels: usize,
    #[arg(long, default_value_t = 1)]
    pub num_classes: usize,
    #[arg(long, default_value_t = 256)]
    pub input_w: usize,
    #[arg(long, default_value_t = 256)]
    pub input_h: usize,
    /// Channel widths of encoder3 and the two tokenized stages.
    #[arg(long, value_delimiter = ',', default_values_t = [128, 160, 256])]
    pub input_list: Vec<usize>,
    /// Replace KAN projections with plain linear layers.
    #[arg(long)]
    pub no_kan: bool,

    #[arg(long, value_enum, default_value_t = LossKind::BceDice)]
    pub loss: LossKind,

    /// Dataset name (busi, glas, cvc, or any name with --mask-ext).
    #[arg(long, default_value = "busi")]
    pub dataset: String,
    #[arg(long, default_value = "inputs")]
    pub data_dir: PathBuf,
    #[arg(long, default_value = "outputs")]
    pub output_dir: PathBuf,
    /// Mask file suffix; overrides the built-in table for known datasets.
    #[arg(long)]
    pub mask_ext: Option<String>,
    /// Fraction of images held out for validation.
    #[arg(long, default_value_t = 0.2)]
    pub val_split: f32,
    /// Loader threads (0 = load on the training thread).
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,
    /// Learning rate of non-KAN parameters.
    #[arg(long, alias = "learning-rate", default_value_t = 1e-4)]
    pub lr: f64,
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,
    #[arg(long, default_value_t = 1e-4)]
    pub weight_decay: f64,
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub nesterov: bool,
    /// Learning rate of KAN projection parameters.
    #[arg(long, default_value_t = 1e-2)]
    pub kan_lr: f64,
    #[arg(long, default_value_t = 1e-4)]
    pub kan_weight_decay: f64,

    #[arg(long, value_enum, default_value_t = SchedulerKind::CosineAnnealing)]
    pub scheduler: SchedulerKind,
    #[arg(long, default_value_t = 1e-5)]
    pub min_lr: f64,
    #[arg(long, default_value_t = 0.1)]
    pub factor: f64,
    #[arg(long, default_value_t = 2)]
    pub patience: usize,
    /// Comma-separated epochs at which MultiStepLR decays.
    #[arg(long, default_value = "1,2")]
    pub milestones: String,
    #[arg(long, default_value_t = 2.0 / 3.0)]
    pub gamma: f64,
    /// Stop after this many epochs without a new best IoU (-1 disables).
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub early_stopping: i64,

    /// YAML file whose values replace defaults (explicit flags still win).
    #[arg(long, value_name = "FILE")]
    pub cfg: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

/// Every field optional; present fields overlay the CLI defaults.
#[derive(Debug, Deserialize, Default)]
pub struct TrainConfigFile {
    name: Option<String>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    dataseed: Option<u64>,
    seed: Option<u64>,
    arch: Option<ArchKind>,
    deep_supervision: Option<bool>,
    input_channels: Option<usize>,
    num_classes: Option<usize>,
    input_w: Option<usize>,
    input_h: Option<usize>,
    input_list: Option<Vec<usize>>,
    no_kan: Option<bool>,
    loss: Option<LossKind>,
    dataset: Option<String>,
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    mask_ext: Option<String>,
    val_split: Option<f32>,
    num_workers: Option<usize>,
    optimizer: Option<OptimizerKind>,
    lr: Option<f64>,
    momentum: Option<f64>,
    weight_decay: Option<f64>,
    nesterov: Option<bool>,
    kan_lr: Option<f64>,
    kan_weight_decay: Option<f64>,
    scheduler: Option<SchedulerKind>,
    min_lr: Option<f64>,
    factor: Option<f64>,
    patience: Option<usize>,
    milestones: Option<String>,
    gamma: Option<f64>,
    early_stopping: Option<i64>,
    backend: Option<BackendKind>,
}

impl TrainConfigFile {
    pub fn load(path: &Path) -> Result<Self, TrainError> {
        let text = fs::read_to_string(path).map_err(|source| TrainError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, TrainError> {
        serde_yaml::from_str(text).map_err(|source| TrainError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }
}

macro_rules! overlay_fields {
    ($args:ident, $file:ident, $explicit:ident; $($field:ident),* $(,)?) => {
        $(
            if let Some(value) = $file.$field {
                if !$explicit(stringify!($field)) {
                    $args.$field = value;
                }
            }
        )*
    };
}

impl TrainArgs {
    /// Parse the process arguments and apply the `--cfg` overlay.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_matches(Self::command().get_matches())
    }

    pub fn try_from_iter<I, T>(iter: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::from_matches(Self::command().try_get_matches_from(iter)?)
    }

    fn from_matches(matches: ArgMatches) -> anyhow::Result<Self> {
        let mut args = Self::from_arg_matches(&matches)?;
        if let Some(path) = args.cfg.clone() {
            let file = TrainConfigFile::load(&path)?;
            args.apply_overlay(file, |id| {
                matches.value_source(id) == Some(ValueSource::CommandLine)
            });
        }
        Ok(args)
    }

    /// Built-in defaults, as if no flag were given.
    pub fn defaults() -> Self {
        Self::parse_from(["train"])
    }

    /// Replace every field present in `file` unless `explicit(field)` says
    /// the user set it on the command line.
    pub fn apply_overlay(&mut self, file: TrainConfigFile, explicit: impl Fn(&str) -> bool) {
        if file.name.is_some() && !explicit("name") {
            self.name = file.name;
        }
        if file.mask_ext.is_some() && !explicit("mask_ext") {
            self.mask_ext = file.mask_ext;
        }
        overlay_fields!(self, file, explicit;
            epochs, batch_size, dataseed, seed, arch, deep_supervision, input_channels,
            num_classes, input_w, input_h, input_list, no_kan, loss, dataset, data_dir,
            output_dir, val_split, num_workers, optimizer, lr, momentum, weight_decay,
            nesterov, kan_lr, kan_weight_decay, scheduler, min_lr, factor, patience,
            milestones, gamma, early_stopping, backend,
        );
    }

    /// `<dataset>_<arch>_wDS` or `_woDS`.
    pub fn default_name(&self) -> String {
        let arch = self
            .arch
            .to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_default();
        let ds = if self.deep_supervision { "wDS" } else { "woDS" };
        format!("{}_{}_{}", self.dataset, arch, ds)
    }

    /// Fill in the default run name when none was given.
    pub fn resolve_name(&mut self) -> String {
        if self.name.is_none() {
            self.name = Some(self.default_name());
        }
        self.run_name()
    }

    pub fn run_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.default_name())
    }

    /// `<output_dir>/<name>`.
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(self.run_name())
    }

    pub fn milestones(&self) -> Result<Vec<usize>, TrainError> {
        self.milestones
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| TrainError::Milestones(self.milestones.clone()))
    }

    pub fn model_config(&self) -> UKanConfig {
        let mut embed_dims = [128, 160, 256];
        for (dst, src) in embed_dims.iter_mut().zip(&self.input_list) {
            *dst = *src;
        }
        UKanConfig {
            num_classes: self.num_classes,
            input_channels: self.input_channels,
            deep_supervision: self.deep_supervision,
            embed_dims,
            no_kan: self.no_kan,
            grid: KanGridConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        for (field, value) in [
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
            ("input_channels", self.input_channels),
            ("num_classes", self.num_classes),
        ] {
            if value == 0 {
                return Err(TrainError::NotPositive { field, value });
            }
        }
        for (field, value) in [("input_w", self.input_w), ("input_h", self.input_h)] {
            if value == 0 || value % UKAN_STRIDE != 0 {
                return Err(TrainError::NotDivisible { field, value });
            }
        }
        if self.input_list.len() != 3 || self.input_list.iter().any(|&c| c < 8) {
            return Err(TrainError::InputList(self.input_list.clone()));
        }
        if !(self.val_split > 0.0 && self.val_split < 1.0) {
            return Err(TrainError::ValSplit(self.val_split));
        }
        for (field, value) in [("lr", self.lr), ("kan_lr", self.kan_lr)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(TrainError::LearningRate { field, value });
            }
        }
        if self.mask_ext.is_none() && seg_dataset::known_mask_ext(&self.dataset).is_none() {
            return Err(TrainError::UnknownDataset(self.dataset.clone()));
        }
        self.milestones()?;
        Ok(())
    }

    /// `(key, value)` pairs of the resolved config in declaration order.
    pub fn entries(&self) -> Vec<(String, String)> {
        let Ok(serde_yaml::Value::Mapping(map)) = serde_yaml::to_value(self) else {
            return Vec::new();
        };
        map.into_iter()
            .filter_map(|(k, v)| Some((k.as_str()?.to_string(), display_value(&v))))
            .collect()
    }

    /// Print the config between dashed rules.
    pub fn print(&self) {
        println!("{}", "-".repeat(20));
        for (key, value) in self.entries() {
            println!("{key}: {value}");
        }
        println!("{}", "-".repeat(20));
    }

    /// Write `<run_dir>/config.yml`.
    pub fn save(&self, run_dir: &Path) -> anyhow::Result<PathBuf> {
        let path = run_dir.join(CONFIG_FILE);
        fs::write(&path, serde_yaml::to_string(self)?)?;
        Ok(path)
    }

    /// Load a `config.yml` written by [`TrainArgs::save`] on top of the
    /// defaults.
    pub fn load(path: &Path) -> Result<Self, TrainError> {
        let mut args = Self::defaults();
        args.apply_overlay(TrainConfigFile::load(path)?, |_| false);
        Ok(args)
    }
}

fn display_value(value: &serde_yaml::Value) -> String {
    use serde_yaml::Value;
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => format!(
            "[{}]",
            items.iter().map(display_value).collect::<Vec<_>>().join(", ")
        ),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_hyperparameters() {
        let args = TrainArgs::defaults();
        assert_eq!(args.epochs, 400);
        assert_eq!(args.batch_size, 8);
        assert_eq!(args.input_list, vec![128, 160, 256]);
        assert_eq!(args.loss, LossKind::BceDice);
        assert_eq!(args.scheduler, SchedulerKind::CosineAnnealing);
        assert_eq!(args.early_stopping, -1);
        assert!((args.gamma - 2.0 / 3.0).abs() < 1e-12);
        assert!(args.validate().is_ok());
        assert_eq!(args.run_name(), "busi_UKAN_woDS");
    }

    #[test]
    fn parses_reference_style_values() {
        let args = TrainArgs::try_from_iter([
            "train",
            "--loss",
            "LovaszHingeLoss",
            "--scheduler",
            "MultiStepLR",
            "--optimizer",
            "SGD",
            "--deep-supervision",
            "true",
            "--input-list",
            "32,64,96",
            "--early-stopping",
            "-1",
        ])
        .unwrap();
        assert_eq!(args.loss, LossKind::LovaszHinge);
        assert_eq!(args.optimizer, OptimizerKind::Sgd);
        assert!(args.deep_supervision);
        assert_eq!(args.input_list, vec![32, 64, 96]);
        assert_eq!(args.run_name(), "busi_UKAN_wDS");
    }

    #[test]
    fn overlay_replaces_defaults_but_not_explicit_flags() {
        let mut args = TrainArgs::try_from_iter(["train", "--epochs", "7"]).unwrap();
        let file = TrainConfigFile::parse(
            "epochs: 50\nbatch_size: 4\nloss: BCEWithLogitsLoss\nname: exp1\n",
            Path::new("inline.yml"),
        )
        .unwrap();
        args.apply_overlay(file, |id| id == "epochs");
        assert_eq!(args.epochs, 7);
        assert_eq!(args.batch_size, 4);
        assert_eq!(args.loss, LossKind::BceWithLogits);
        assert_eq!(args.name.as_deref(), Some("exp1"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut args = TrainArgs::defaults();
        args.input_w = 100;
        assert!(matches!(args.validate(), Err(TrainError::NotDivisible { .. })));

        let mut args = TrainArgs::defaults();
        args.milestones = "1,x".into();
        assert!(matches!(args.validate(), Err(TrainError::Milestones(_))));

        let mut args = TrainArgs::defaults();
        args.dataset = "kvasir".into();
        assert!(matches!(args.validate(), Err(TrainError::UnknownDataset(_))));
        args.mask_ext = Some(".jpg".into());
        assert!(args.validate().is_ok());

        let mut args = TrainArgs::defaults();
        args.input_list = vec![128, 160];
        assert!(matches!(args.validate(), Err(TrainError::InputList(_))));
    }

    #[test]
    fn saved_config_round_trips_through_load() {
        let tmp = tempfile::tempdir().unwrap();
        let mut args = TrainArgs::defaults();
        args.scheduler = SchedulerKind::ReduceOnPlateau;
        args.kan_lr = 5e-3;
        args.resolve_name();
        let path = args.save(tmp.path()).unwrap();
        let loaded = TrainArgs::load(&path).unwrap();
        assert_eq!(loaded, args);
    }

    #[test]
    fn entries_render_python_style_none_and_lists() {
        let args = TrainArgs::defaults();
        let entries = args.entries();
        assert_eq!(entries[0], ("name".to_string(), "None".to_string()));
        assert!(entries
            .iter()
            .any(|(k, v)| k == "input_list" && v == "[128, 160, 256]"));
        assert!(entries.iter().any(|(k, v)| k == "loss" && v == "BCEDiceLoss"));
    }
}
