//! Dataset validation: every image must have one mask per class.

use crate::types::{
    DatasetLayout, DatasetResult, DatasetSummary, SegDatasetError, ValidationOutcome,
    ValidationReport,
};

const MAX_MISSING_EXAMPLES: usize = 5;

/// Count images and check that each has all of its class masks on disk.
pub fn summarize_layout(layout: &DatasetLayout) -> DatasetResult<DatasetSummary> {
    let ids = layout.index_ids()?;
    let mut summary = DatasetSummary {
        images: ids.len(),
        ..Default::default()
    };
    for id in &ids {
        let missing: Vec<_> = (0..layout.num_classes)
            .map(|class| layout.mask_path(class, id))
            .filter(|path| !path.is_file())
            .collect();
        if missing.is_empty() {
            summary.complete += 1;
        } else {
            summary.missing_masks += missing.len();
            let room = MAX_MISSING_EXAMPLES.saturating_sub(summary.missing_examples.len());
            summary.missing_examples.extend(missing.into_iter().take(room));
        }
    }
    Ok(summary)
}

pub fn validate_summary(summary: DatasetSummary) -> ValidationReport {
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();
    if summary.images == 0 {
        outcome = ValidationOutcome::Fail;
        reasons.push("no images found".to_string());
    }
    if summary.missing_masks > 0 {
        outcome = ValidationOutcome::Fail;
        reasons.push(format!(
            "{} mask file(s) missing, e.g. {}",
            summary.missing_masks,
            summary
                .missing_examples
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

/// Summarize and validate; a failing layout becomes an error.
pub fn validate_layout(layout: &DatasetLayout) -> DatasetResult<ValidationReport> {
    let report = validate_summary(summarize_layout(layout)?);
    if report.outcome == ValidationOutcome::Fail {
        if report.summary.images == 0 {
            return Err(SegDatasetError::Empty {
                dir: layout.images_dir(),
                ext: layout.img_ext.clone(),
            });
        }
        return Err(SegDatasetError::Other(format!(
            "dataset at {} failed validation: {}",
            layout.root.display(),
            report.reasons.join("; ")
        )));
    }
    Ok(report)
}
