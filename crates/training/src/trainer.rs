//! Epoch loop: train, validate, schedule, log, checkpoint, early stop.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use indicatif::{ProgressBar, ProgressStyle};
use models::UKan;
use seg_dataset::SegLoader;
use serde::Serialize;

use crate::checkpoint::{save_ukan, BEST_MODEL, LAST_MODEL};
use crate::config::TrainArgs;
use crate::data::SegData;
use crate::history::{EpochRecord, RunHistory, ScalarWriter, LOG_CSV};
use crate::losses::SegLoss;
use crate::metrics::{indicators, iou_score, AverageMeter};
use crate::optim::GroupedOptimizer;
use crate::plot::{plot_progress_png, should_refresh, PlotContext, PLOTS_ENABLED, PROGRESS_PNG};
use crate::scheduler::{build_scheduler, GroupLr};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrainStats {
    pub loss: f64,
    pub iou: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EvalStats {
    pub loss: f64,
    pub iou: f64,
    pub dice: f64,
    pub recall: f64,
    pub specificity: f64,
    pub precision: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainSummary {
    pub run_dir: PathBuf,
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub best_iou: f64,
    pub best_dice: f64,
    pub stopped_early: bool,
}

fn progress_bar(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> anyhow::Result<f64> {
    let values = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("failed to read loss value: {e:?}"))?;
    values
        .first()
        .map(|v| *v as f64)
        .ok_or_else(|| anyhow::anyhow!("loss tensor is empty"))
}

/// Best-so-far validation scores and the early-stopping counter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestTracker {
    pub best_iou: f64,
    pub best_dice: f64,
    pub best_epoch: Option<usize>,
    /// Epochs since the last new best.
    pub trigger: usize,
}

/// Checkpoint and stopping actions for one finished epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochDecision {
    pub save_best: bool,
    pub save_last: bool,
    pub stop: bool,
}

impl BestTracker {
    /// Record the validation scores of `epoch`. A new best needs a strictly
    /// higher IoU and resets the trigger; a negative `early_stopping` never
    /// stops.
    pub fn observe(
        &mut self,
        epoch: usize,
        val_iou: f64,
        val_dice: f64,
        total_epochs: usize,
        early_stopping: i64,
    ) -> EpochDecision {
        self.trigger += 1;
        let save_best = val_iou > self.best_iou;
        if save_best {
            self.best_iou = val_iou;
            self.best_dice = val_dice;
            self.best_epoch = Some(epoch);
            self.trigger = 0;
        }
        EpochDecision {
            save_best,
            save_last: epoch + 1 == total_epochs,
            stop: early_stopping >= 0 && self.trigger as i64 >= early_stopping,
        }
    }
}

/// One pass over the shuffled, drop-last training batches.
#[allow(clippy::too_many_arguments)]
pub fn train_epoch<B, O>(
    mut model: UKan<B>,
    loader: &SegLoader,
    epoch: usize,
    optim: &mut GroupedOptimizer<O>,
    lr: GroupLr,
    criterion: &SegLoss,
    device: &B::Device,
    show_progress: bool,
) -> anyhow::Result<(UKan<B>, TrainStats)>
where
    B: AutodiffBackend,
    O: Optimizer<UKan<B>, B>,
{
    let mut loss_meter = AverageMeter::default();
    let mut iou_meter = AverageMeter::default();
    let bar = progress_bar(loader.num_batches(), show_progress);

    let mut batches = loader.epoch(epoch);
    while let Some(batch) = batches.next_batch::<B>(device)? {
        let n = batch.len();
        let heads = model.forward_all(batch.images);
        let loss = criterion.forward_heads(&heads, batch.masks.clone());
        if let Some(last) = heads.last() {
            iou_meter.update(iou_score(last.clone().detach(), batch.masks).iou, n);
        }
        loss_meter.update(scalar(loss.clone().detach())?, n);
        model = optim.step(lr, model, loss);

        bar.set_message(format!(
            "loss {:.4} iou {:.4}",
            loss_meter.avg, iou_meter.avg
        ));
        bar.inc(1);
    }
    bar.finish_and_clear();

    Ok((
        model,
        TrainStats {
            loss: loss_meter.avg,
            iou: iou_meter.avg,
        },
    ))
}

/// One pass over the unshuffled evaluation batches of `loader`.
pub fn evaluate<B: Backend>(
    model: &UKan<B>,
    loader: &SegLoader,
    criterion: &SegLoss,
    device: &B::Device,
    show_progress: bool,
) -> anyhow::Result<EvalStats> {
    let mut loss = AverageMeter::default();
    let mut iou = AverageMeter::default();
    let mut dice = AverageMeter::default();
    let mut recall = AverageMeter::default();
    let mut specificity = AverageMeter::default();
    let mut precision = AverageMeter::default();
    let bar = progress_bar(loader.num_batches(), show_progress);

    let mut batches = loader.epoch(0);
    while let Some(batch) = batches.next_batch::<B>(device)? {
        let n = batch.len();
        let heads = model.forward_all(batch.images);
        loss.update(scalar(criterion.forward_heads(&heads, batch.masks.clone()))?, n);
        if let Some(last) = heads.last() {
            let score = iou_score(last.clone(), batch.masks.clone());
            iou.update(score.iou, n);
            dice.update(score.dice, n);
            let ind = indicators(last.clone(), batch.masks);
            recall.update(ind.recall, n);
            specificity.update(ind.specificity, n);
            precision.update(ind.precision, n);
        }
        bar.set_message(format!(
            "loss {:.4} iou {:.4} dice {:.4}",
            loss.avg, iou.avg, dice.avg
        ));
        bar.inc(1);
    }
    bar.finish_and_clear();

    Ok(EvalStats {
        loss: loss.avg,
        iou: iou.avg,
        dice: dice.avg,
        recall: recall.avg,
        specificity: specificity.avg,
        precision: precision.avg,
        samples: loss.count,
    })
}

fn refresh_plot(run_dir: &Path, history: &RunHistory, ctx: &PlotContext<'_>) {
    if !PLOTS_ENABLED {
        return;
    }
    let path = run_dir.join(PROGRESS_PNG);
    match plot_progress_png(&path, history, ctx) {
        Ok(()) => {
            if ctx.epoch % 10 == 0 || ctx.epoch < 5 {
                println!("Progress visualization updated: {}", path.display());
            }
        }
        Err(e) => log::warn!("failed to draw {}: {e}", path.display()),
    }
}

/// Run the full epoch loop on `model` and write every run artifact under
/// `run_dir`.
pub fn fit<B, O>(
    args: &TrainArgs,
    run_dir: &Path,
    data: &SegData,
    mut model: UKan<B>,
    mut optim: GroupedOptimizer<O>,
    device: &B::Device,
) -> anyhow::Result<TrainSummary>
where
    B: AutodiffBackend,
    O: Optimizer<UKan<B>, B>,
{
    let criterion = SegLoss::new(args.loss);
    let mut scheduler = build_scheduler(args)?;
    let mut history = RunHistory::default();
    let mut scalars = ScalarWriter::create(run_dir)?;
    let run_name = args.run_name();
    let run_name = run_name.as_str();

    let mut best = BestTracker::default();
    let mut stopped_early = false;
    let mut epochs_run = 0;

    for epoch in 0..args.epochs {
        println!("Epoch [{epoch}/{}]", args.epochs);
        let lr = scheduler.current();

        let (trained, train_log) = train_epoch(
            model,
            &data.train,
            epoch,
            &mut optim,
            lr,
            &criterion,
            device,
            true,
        )?;
        model = trained;
        let val_log = evaluate(&model.valid(), &data.val, &criterion, device, true)?;
        epochs_run = epoch + 1;

        scheduler.step(val_log.loss);

        println!(
            "loss {:.4} - iou {:.4} - val_loss {:.4} - val_iou {:.4}",
            train_log.loss, train_log.iou, val_log.loss, val_log.iou
        );

        history.push(EpochRecord {
            epoch,
            lr: lr.base,
            loss: train_log.loss,
            iou: train_log.iou,
            val_loss: val_log.loss,
            val_iou: val_log.iou,
            val_dice: val_log.dice,
        });
        history.write_csv(&run_dir.join(LOG_CSV))?;

        let plot_ctx = |best: &BestTracker| PlotContext {
            run_name,
            epoch,
            total_epochs: args.epochs,
            best_iou: best.best_iou,
            best_dice: best.best_dice,
        };
        if should_refresh(epoch, history.len()) {
            refresh_plot(run_dir, &history, &plot_ctx(&best));
        }

        scalars.add_scalars(
            &[
                ("train/loss", train_log.loss),
                ("train/iou", train_log.iou),
                ("val/loss", val_log.loss),
                ("val/iou", val_log.iou),
                ("val/dice", val_log.dice),
                ("val/best_iou_value", best.best_iou),
                ("val/best_dice_value", best.best_dice),
            ],
            epoch,
        )?;

        let decision = best.observe(
            epoch,
            val_log.iou,
            val_log.dice,
            args.epochs,
            args.early_stopping,
        );
        if decision.save_best {
            let path = save_ukan(&model, run_dir, BEST_MODEL)?;
            println!("=> saved best model (epoch {epoch}, IoU: {:.4})", best.best_iou);
            log::debug!("best checkpoint at {}", path.display());
        }
        if decision.save_last {
            save_ukan(&model, run_dir, LAST_MODEL)?;
            println!("=> saved last model");
        }

        if decision.stop {
            println!("=> early stopping");
            refresh_plot(run_dir, &history, &plot_ctx(&best));
            stopped_early = true;
            break;
        }
        if decision.save_best || decision.save_last {
            refresh_plot(run_dir, &history, &plot_ctx(&best));
        }
    }

    Ok(TrainSummary {
        run_dir: run_dir.to_path_buf(),
        epochs_run,
        best_epoch: best.best_epoch,
        best_iou: best.best_iou,
        best_dice: best.best_dice,
        stopped_early,
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    /// Feed scripted validation IoUs; returns (epochs that saved a best
    /// checkpoint, epoch that stopped).
    fn replay(ious: &[f64], early_stopping: i64) -> (Vec<usize>, Option<usize>) {
        let mut best = BestTracker::default();
        let mut saved = Vec::new();
        for (epoch, &iou) in ious.iter().enumerate() {
            let decision = best.observe(epoch, iou, iou, ious.len(), early_stopping);
            if decision.save_best {
                saved.push(epoch);
            }
            if decision.stop {
                return (saved, Some(epoch));
            }
        }
        (saved, None)
    }

    #[test]
    fn ties_do_not_count_as_a_new_best() {
        let (saved, stop) = replay(&[0.3, 0.2, 0.4, 0.4, 0.1], 2);
        assert_eq!(saved, vec![0, 2]);
        assert_eq!(stop, Some(4));
    }

    #[test]
    fn new_best_resets_the_trigger() {
        let (saved, stop) = replay(&[0.3, 0.2, 0.35, 0.1, 0.5, 0.4, 0.45], 2);
        assert_eq!(saved, vec![0, 2, 4]);
        assert_eq!(stop, Some(6));

        let (saved, stop) = replay(&[0.1, 0.2, 0.3, 0.4], 1);
        assert_eq!(saved, vec![0, 1, 2, 3]);
        assert_eq!(stop, None);
    }

    #[test]
    fn zero_patience_stops_after_first_epoch() {
        assert_eq!(replay(&[0.5, 0.6, 0.7], 0), (vec![0], Some(0)));
    }

    #[test]
    fn negative_early_stopping_never_stops() {
        let (saved, stop) = replay(&[0.5, 0.1, 0.1, 0.1, 0.1, 0.1], -1);
        assert_eq!(saved, vec![0]);
        assert_eq!(stop, None);
    }

    #[test]
    fn last_epoch_is_flagged_and_best_scores_are_kept() {
        let mut best = BestTracker::default();
        assert!(!best.observe(0, 0.4, 0.57, 2, -1).save_last);
        let decision = best.observe(1, 0.3, 0.46, 2, -1);
        assert!(decision.save_last && !decision.save_best);
        assert_eq!(best.best_epoch, Some(0));
        assert_eq!((best.best_iou, best.best_dice), (0.4, 0.57));
        assert_eq!(best.trigger, 1);
    }

    #[test]
    fn scalar_reads_first_element() {
        let t = Tensor::<burn_ndarray::NdArray<f32>, 1>::from_floats([0.25], &Default::default());
        assert_eq!(scalar(t).unwrap(), 0.25);
    }
}
