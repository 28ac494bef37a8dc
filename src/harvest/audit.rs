use crate::harvest::extract::ActivityType;
use crate::harvest::paths::HarvestPaths;
use crate::harvest::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub record_type: Option<ActivityType>,
    pub message: String,
}

pub fn append_event(
    paths: &HarvestPaths,
    phase: &str,
    status: &str,
    record_type: Option<ActivityType>,
    message: &str,
) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        record_type,
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = paths.audit_log();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}
