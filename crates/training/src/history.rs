//! Per-epoch run log (`log.csv`) and scalar event stream (`scalars.jsonl`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const LOG_CSV: &str = "log.csv";
pub const SCALARS_JSONL: &str = "scalars.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Base-group learning rate used during the epoch.
    pub lr: f64,
    pub loss: f64,
    pub iou: f64,
    pub val_loss: f64,
    pub val_iou: f64,
    pub val_dice: f64,
}

#[derive(Debug, Default, Clone)]
pub struct RunHistory {
    records: Vec<EpochRecord>,
}

impl RunHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    /// Record with the highest validation IoU (earliest on ties).
    pub fn best(&self) -> Option<&EpochRecord> {
        self.records.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.val_iou >= r.val_iou => Some(b),
            _ => Some(r),
        })
    }

    /// Rewrite `log.csv` with every record so far.
    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let records = reader
            .deserialize()
            .collect::<Result<Vec<EpochRecord>, _>>()?;
        Ok(Self { records })
    }
}

#[derive(Debug, Serialize)]
struct ScalarEvent<'a> {
    tag: &'a str,
    value: f64,
    step: usize,
}

/// Append-only `tag/value/step` JSON lines.
pub struct ScalarWriter {
    path: PathBuf,
    file: fs::File,
}

impl ScalarWriter {
    /// Start a fresh `scalars.jsonl`; events of an earlier run in the same
    /// directory are discarded.
    pub fn create(run_dir: &Path) -> anyhow::Result<Self> {
        let path = run_dir.join(SCALARS_JSONL);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> anyhow::Result<()> {
        let line = serde_json::to_string(&ScalarEvent { tag, value, step })?;
        writeln!(self.file, "{line}")?;
        Ok(())
    }

    pub fn add_scalars(&mut self, scalars: &[(&str, f64)], step: usize) -> anyhow::Result<()> {
        for (tag, value) in scalars {
            self.add_scalar(tag, *value, step)?;
        }
        self.file.flush()?;
        Ok(())
    }
}
