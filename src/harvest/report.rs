use crate::harvest::extract::ActivityType;
use crate::harvest::fetch::FetchStatus;
use anyhow::{Context, Result};
use csv::Writer;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRow {
    pub record_type: ActivityType,
    pub url: String,
    pub status: FetchStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchTally {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn tally(rows: &[FetchRow]) -> FetchTally {
    let mut out = FetchTally::default();
    for row in rows {
        match row.status {
            FetchStatus::Success => out.success += 1,
            FetchStatus::Skipped => out.skipped += 1,
            FetchStatus::Failed => out.failed += 1,
        }
    }
    out
}

pub fn csv_path(logs_dir: &Path, date_stamp: &str) -> PathBuf {
    logs_dir.join(format!("activity_log_{date_stamp}.csv"))
}

/// Write the per-run fetch table, replacing any earlier report for the day.
pub fn write_csv(path: &Path, rows: &[FetchRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut writer =
        Writer::from_path(path).with_context(|| format!("failed to open {}", path.display()))?;
    writer.write_record(["RecordType", "URL", "Status"])?;
    for row in rows {
        writer.write_record([row.record_type.as_str(), row.url.as_str(), row.status.as_str()])?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
