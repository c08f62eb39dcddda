#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod history;
pub mod losses;
pub mod metrics;
pub mod optim;
pub mod plot;
pub mod scheduler;
pub mod trainer;
pub mod util;

pub use checkpoint::{load_ukan, save_ukan};
pub use config::{LossKind, OptimizerKind, SchedulerKind, TrainArgs, TrainError};
pub use data::SegData;
pub use trainer::{
    evaluate, fit, train_epoch, BestTracker, EpochDecision, EvalStats, TrainStats, TrainSummary,
};
pub use util::run_train;

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
