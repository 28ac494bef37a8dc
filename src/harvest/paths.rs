use crate::harvest::config::HarvestConfig;
use crate::harvest::extract::ActivityType;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const CONVERTED_DIR: &str = "Converted_MARC";
const JOINED_DIR: &str = "Joined_MARC";
const ARCHIVED_DIR: &str = "Archived_MARC";
const LOCK_FILE: &str = ".lc-harvest.lock";

#[derive(Debug, Clone)]
pub struct HarvestPaths {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub converted_root: PathBuf,
    pub joined_dir: PathBuf,
    pub archive_root: PathBuf,
    pub logs_dir: PathBuf,
    pub lock_file: PathBuf,
}

impl HarvestPaths {
    /// Where fetched MARCXML for one activity type lands.
    pub fn download_dir(&self, record_type: ActivityType) -> PathBuf {
        self.output_root.join(record_type.as_str())
    }

    pub fn converted_dir(&self, record_type: ActivityType) -> PathBuf {
        self.converted_root.join(record_type.as_str())
    }

    pub fn archive_dir(&self, record_type: ActivityType) -> PathBuf {
        self.archive_root.join(record_type.as_str())
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.joined_dir.join("ledger.jsonl")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }

    pub fn download_log(&self) -> PathBuf {
        self.logs_dir.join("harvest_download_log.txt")
    }

    pub fn conversion_log(&self) -> PathBuf {
        self.logs_dir.join("conversion_log.txt")
    }

    pub fn ensure_output_dirs(&self) -> Result<()> {
        for dir in [
            &self.output_root,
            &self.converted_root,
            &self.joined_dir,
            &self.archive_root,
            &self.logs_dir,
        ] {
            fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn resolve_paths(cfg: &HarvestConfig) -> HarvestPaths {
    let output_root = cfg.paths.output_root.clone();
    let logs_dir = cfg
        .paths
        .logs_dir
        .clone()
        .unwrap_or_else(|| output_root.join("logs"));

    HarvestPaths {
        input_root: cfg.paths.input_root.clone(),
        converted_root: output_root.join(CONVERTED_DIR),
        joined_dir: output_root.join(JOINED_DIR),
        archive_root: output_root.join(ARCHIVED_DIR),
        lock_file: output_root.join(LOCK_FILE),
        logs_dir,
        output_root,
    }
}
