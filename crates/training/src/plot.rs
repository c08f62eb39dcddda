//! `progress.png`: a 2x3 dashboard of the run so far.

use std::path::Path;

use crate::history::RunHistory;

pub const PROGRESS_PNG: &str = "progress.png";
pub const TARGET_IOU: f64 = 0.6526;
pub const TARGET_DICE: f64 = 0.7875;
pub const PLOTS_ENABLED: bool = cfg!(feature = "plots");

/// Routine refresh: every 5th epoch, the first 10 epochs, or the first row.
pub fn should_refresh(epoch: usize, rows: usize) -> bool {
    epoch % 5 == 0 || epoch < 10 || rows == 1
}

/// Context drawn next to the curves.
#[derive(Debug, Clone)]
pub struct PlotContext<'a> {
    pub run_name: &'a str,
    pub epoch: usize,
    pub total_epochs: usize,
    pub best_iou: f64,
    pub best_dice: f64,
}

/// Trailing moving average with a window of `window` (shorter at the start).
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Text progress bar of `width` cells.
pub fn progress_bar(done: usize, total: usize, width: usize) -> String {
    let total = total.max(1);
    let filled = (done.min(total) * width) / total;
    format!("{}{}", "#".repeat(filled), "-".repeat(width - filled))
}

fn padded_range(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0..1.0;
    }
    let pad = ((hi - lo) * 0.05).max(1e-3);
    (lo - pad)..(hi + pad)
}

#[cfg(feature = "plots")]
pub fn plot_progress_png<P: AsRef<Path>>(
    path: P,
    history: &RunHistory,
    ctx: &PlotContext<'_>,
) -> Result<(), Box<dyn std::error::Error>> {
    use plotters::prelude::*;

    let Some(last) = history.last() else {
        return Ok(());
    };
    let records = history.records();
    let root = BitMapBackend::new(path.as_ref(), (1800, 1100)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(
        &format!("U-KAN Training Progress: {} (Epoch {})", ctx.run_name, ctx.epoch + 1),
        ("sans-serif", 30).into_font(),
    )?;
    let panels = root.split_evenly((2, 3));

    let epochs: Vec<f64> = records.iter().map(|r| r.epoch as f64).collect();
    let x_range = 0.0..(epochs.last().copied().unwrap_or(0.0) + 1.0);
    let series = |f: fn(&crate::history::EpochRecord) -> f64| -> Vec<(f64, f64)> {
        records.iter().map(|r| (r.epoch as f64, f(r))).collect()
    };
    let gold = RGBColor(255, 215, 0);
    let purple = RGBColor(128, 0, 128);
    let dark_green = RGBColor(0, 100, 0);

    // Loss curves
    {
        let y = padded_range(records.iter().flat_map(|r| [r.loss, r.val_loss]));
        let mut chart = ChartBuilder::on(&panels[0])
            .caption("Loss Curves", ("sans-serif", 22))
            .margin(12)
            .x_label_area_size(35)
            .y_label_area_size(55)
            .build_cartesian_2d(x_range.clone(), y)?;
        chart.configure_mesh().x_desc("Epoch").y_desc("Loss").draw()?;
        chart
            .draw_series(LineSeries::new(series(|r| r.loss), BLUE.stroke_width(2)))?
            .label("Training Loss")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
        chart
            .draw_series(LineSeries::new(series(|r| r.val_loss), RED.stroke_width(2)))?
            .label("Validation Loss")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    // IoU curves with the best epoch marked
    {
        let y = padded_range(records.iter().flat_map(|r| [r.iou, r.val_iou]));
        let mut chart = ChartBuilder::on(&panels[1])
            .caption(
                format!("IoU Curves (Current: {:.4})", last.val_iou),
                ("sans-serif", 22),
            )
            .margin(12)
            .x_label_area_size(35)
            .y_label_area_size(55)
            .build_cartesian_2d(x_range.clone(), y)?;
        chart.configure_mesh().x_desc("Epoch").y_desc("IoU").draw()?;
        chart
            .draw_series(LineSeries::new(series(|r| r.iou), BLUE.stroke_width(2)))?
            .label("Training IoU")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
        chart
            .draw_series(LineSeries::new(series(|r| r.val_iou), RED.stroke_width(2)))?
            .label("Validation IoU")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
        if let Some(best) = history.best() {
            chart
                .draw_series(std::iter::once(Circle::new(
                    (best.epoch as f64, best.val_iou),
                    7,
                    gold.filled(),
                )))?
                .label(format!("Best: {:.4}", best.val_iou))
                .legend(move |(x, y)| Circle::new((x + 10, y), 5, gold.filled()));
        }
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    // Validation Dice with a 5-epoch moving average
    {
        let dice: Vec<f64> = records.iter().map(|r| r.val_dice).collect();
        let y = padded_range(dice.iter().copied());
        let mut chart = ChartBuilder::on(&panels[2])
            .caption(
                format!("Dice Score (Current: {:.4})", last.val_dice),
                ("sans-serif", 22),
            )
            .margin(12)
            .x_label_area_size(35)
            .y_label_area_size(55)
            .build_cartesian_2d(x_range.clone(), y)?;
        chart.configure_mesh().x_desc("Epoch").y_desc("Dice Score").draw()?;
        chart
            .draw_series(LineSeries::new(series(|r| r.val_dice), GREEN.stroke_width(2)))?
            .label("Validation Dice")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN));
        if dice.len() >= 5 {
            let smooth = moving_average(&dice, 5);
            chart
                .draw_series(LineSeries::new(
                    epochs.iter().copied().zip(smooth),
                    dark_green.stroke_width(3),
                ))?
                .label("5-epoch Moving Avg")
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], dark_green));
        }
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    // Learning rate on a log axis
    {
        let (lo, hi) = records
            .iter()
            .map(|r| r.lr)
            .filter(|lr| *lr > 0.0)
            .fold((f64::INFINITY, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let (lo, hi) = if lo.is_finite() { (lo / 2.0, hi * 2.0) } else { (1e-6, 1.0) };
        let mut chart = ChartBuilder::on(&panels[3])
            .caption("Learning Rate Schedule", ("sans-serif", 22))
            .margin(12)
            .x_label_area_size(35)
            .y_label_area_size(70)
            .build_cartesian_2d(x_range, (lo..hi).log_scale())?;
        chart
            .configure_mesh()
            .x_desc("Epoch")
            .y_desc("Learning Rate")
            .y_label_formatter(&|v| format!("{v:.0e}"))
            .draw()?;
        chart.draw_series(LineSeries::new(
            series(|r| r.lr).into_iter().filter(|(_, lr)| *lr > 0.0),
            purple.stroke_width(2),
        ))?;
    }

    // Progress
    {
        let done = ctx.epoch + 1;
        let pct = done as f64 / ctx.total_epochs.max(1) as f64 * 100.0;
        let panel = &panels[4];
        panel.draw(&Text::new("Training Progress", (20, 20), ("sans-serif", 24).into_font()))?;
        let lines = [
            (format!("Progress: {pct:.1}%"), 26u32),
            (format!("Epoch: {done}/{}", ctx.total_epochs), 22),
            (
                format!("Remaining: {} epochs", ctx.total_epochs.saturating_sub(done)),
                22,
            ),
            (progress_bar(done, ctx.total_epochs, 50), 16),
        ];
        for (i, (text, size)) in lines.iter().enumerate() {
            panel.draw(&Text::new(
                text.as_str(),
                (40, 90 + 80 * i as i32),
                ("monospace", *size).into_font(),
            ))?;
        }
    }

    // Summary against target scores
    {
        let panel = &panels[5];
        panel.draw(&Text::new("Performance Summary", (20, 20), ("sans-serif", 24).into_font()))?;
        let lines = [
            "Current Performance:".to_string(),
            format!("IoU: {:.4} (Target: {TARGET_IOU:.4})", last.val_iou),
            format!("Progress: {:.1}%", last.val_iou / TARGET_IOU * 100.0),
            format!("Dice: {:.4} (Target: {TARGET_DICE:.4})", last.val_dice),
            format!("Progress: {:.1}%", last.val_dice / TARGET_DICE * 100.0),
            format!("Best IoU: {:.4}", ctx.best_iou),
            format!("Best Dice: {:.4}", ctx.best_dice),
            format!("Val Loss: {:.4}", last.val_loss),
        ];
        for (i, text) in lines.iter().enumerate() {
            panel.draw(&Text::new(
                text.as_str(),
                (40, 70 + 40 * i as i32),
                ("monospace", 18).into_font(),
            ))?;
        }
    }

    root.present()?;
    Ok(())
}

#[cfg(not(feature = "plots"))]
pub fn plot_progress_png<P: AsRef<Path>>(
    _path: P,
    _history: &RunHistory,
    _ctx: &PlotContext<'_>,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("plots feature is not enabled".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_rule() {
        assert!(should_refresh(0, 1));
        assert!(should_refresh(9, 10));
        assert!(!should_refresh(11, 12));
        assert!(should_refresh(15, 16));
    }

    #[test]
    fn moving_average_uses_partial_windows() {
        let avg = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 5);
        assert_eq!(avg[0], 1.0);
        assert_eq!(avg[1], 1.5);
        assert_eq!(avg[4], 3.0);
        assert_eq!(avg[5], 4.0);
    }

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(1, 2, 10), "#####-----");
        assert_eq!(progress_bar(5, 5, 4), "####");
        assert_eq!(progress_bar(0, 0, 3), "---");
    }
}
