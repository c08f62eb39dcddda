//! Per-epoch learning-rate schedules over the two parameter groups.

use std::f64::consts::PI;

use crate::config::{SchedulerKind, TrainArgs, TrainError};

/// Learning rates of the base and KAN parameter groups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupLr {
    pub base: f64,
    pub kan: f64,
}

impl GroupLr {
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            base: f(self.base),
            kan: f(self.kan),
        }
    }
}

pub trait LrScheduler {
    fn current(&self) -> GroupLr;

    /// Advance one epoch. `val_loss` drives plateau detection.
    fn step(&mut self, val_loss: f64);
}

/// `lr_t = eta_min + (base - eta_min) * (1 + cos(pi * t / T)) / 2`, then
/// `eta_min` once `t >= T`.
pub struct CosineAnnealing {
    initial: GroupLr,
    eta_min: f64,
    t_max: usize,
    t: usize,
}

impl CosineAnnealing {
    pub fn new(initial: GroupLr, t_max: usize, eta_min: f64) -> Self {
        Self {
            initial,
            eta_min,
            t_max: t_max.max(1),
            t: 0,
        }
    }
}

impl LrScheduler for CosineAnnealing {
    fn current(&self) -> GroupLr {
        if self.t >= self.t_max {
            return self.initial.map(|_| self.eta_min);
        }
        let decay = 0.5 * (1.0 + (PI * self.t as f64 / self.t_max as f64).cos());
        self.initial
            .map(|base| self.eta_min + (base - self.eta_min) * decay)
    }

    fn step(&mut self, _val_loss: f64) {
        self.t += 1;
    }
}

/// Multiplies every group's lr by `factor` after more than `patience`
/// epochs without a relative improvement of `threshold` in validation loss.
pub struct ReduceOnPlateau {
    lr: GroupLr,
    factor: f64,
    patience: usize,
    min_lr: f64,
    threshold: f64,
    best: f64,
    bad_epochs: usize,
}

impl ReduceOnPlateau {
    pub const THRESHOLD: f64 = 1e-4;
    const EPS: f64 = 1e-8;

    pub fn new(initial: GroupLr, factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            lr: initial,
            factor,
            patience,
            min_lr,
            threshold: Self::THRESHOLD,
            best: f64::INFINITY,
            bad_epochs: 0,
        }
    }

    pub fn bad_epochs(&self) -> usize {
        self.bad_epochs
    }
}

impl LrScheduler for ReduceOnPlateau {
    fn current(&self) -> GroupLr {
        self.lr
    }

    fn step(&mut self, val_loss: f64) {
        if val_loss < self.best * (1.0 - self.threshold) {
            self.best = val_loss;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }
        if self.bad_epochs > self.patience {
            let (factor, min_lr) = (self.factor, self.min_lr);
            self.lr = self.lr.map(|lr| {
                let reduced = (lr * factor).max(min_lr);
                if lr - reduced > Self::EPS {
                    reduced
                } else {
                    lr
                }
            });
            log::info!(
                "reducing learning rate to base {:.3e} / kan {:.3e}",
                self.lr.base,
                self.lr.kan
            );
            self.bad_epochs = 0;
        }
    }
}

/// Multiplies by `gamma` each time the epoch counter hits a milestone.
pub struct MultiStep {
    lr: GroupLr,
    milestones: Vec<usize>,
    gamma: f64,
    epoch: usize,
}

impl MultiStep {
    pub fn new(initial: GroupLr, milestones: Vec<usize>, gamma: f64) -> Self {
        Self {
            lr: initial,
            milestones,
            gamma,
            epoch: 0,
        }
    }
}

impl LrScheduler for MultiStep {
    fn current(&self) -> GroupLr {
        self.lr
    }

    fn step(&mut self, _val_loss: f64) {
        self.epoch += 1;
        let hits = self.milestones.iter().filter(|&&m| m == self.epoch).count();
        if hits > 0 {
            let scale = self.gamma.powi(hits as i32);
            self.lr = self.lr.map(|lr| lr * scale);
        }
    }
}

pub struct Constant(pub GroupLr);

impl LrScheduler for Constant {
    fn current(&self) -> GroupLr {
        self.0
    }

    fn step(&mut self, _val_loss: f64) {}
}

pub fn build_scheduler(args: &TrainArgs) -> Result<Box<dyn LrScheduler>, TrainError> {
    let initial = GroupLr {
        base: args.lr,
        kan: args.kan_lr,
    };
    Ok(match args.scheduler {
        SchedulerKind::CosineAnnealing => {
            Box::new(CosineAnnealing::new(initial, args.epochs, args.min_lr))
        }
        SchedulerKind::ReduceOnPlateau => Box::new(ReduceOnPlateau::new(
            initial,
            args.factor,
            args.patience,
            args.min_lr,
        )),
        SchedulerKind::MultiStep => {
            Box::new(MultiStep::new(initial, args.milestones()?, args.gamma))
        }
        SchedulerKind::Constant => Box::new(Constant(initial)),
    })
}
