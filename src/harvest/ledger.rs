use crate::error::HarvestError;
use crate::harvest::extract::ActivityType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

/// One converted file folded into one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub record_type: ActivityType,
    pub date: String,
    pub bundle_path: String,
    pub bundle_version: u32,
    pub source_path: String,
    pub content_hash: String,
    pub joined_at_epoch_secs: u64,
}

pub fn file_hash(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn read_ledger(path: &Path) -> Result<Vec<LedgerRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: LedgerRecord =
            serde_json::from_str(trimmed).map_err(|err| HarvestError::StateCorrupt {
                path: path.display().to_string(),
                reason: format!("line {}: {err}", idx + 1),
            })?;
        out.push(entry);
    }
    Ok(out)
}

pub fn append_records(path: &Path, records: &[LedgerRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(out.as_bytes())
        .with_context(|| format!("failed to append {}", path.display()))?;
    Ok(())
}

/// What the ledger knows about one record type on one day.
#[derive(Debug, Clone, Default)]
pub struct PartitionHistory {
    /// Every source ever joined for the record type, any day.
    pub joined_sources: BTreeSet<String>,
    /// Whether any bundle for this exact day went through the ledger.
    pub has_records_for_day: bool,
}

pub fn partition_history(
    records: &[LedgerRecord],
    record_type: ActivityType,
    date: &str,
) -> PartitionHistory {
    let mut out = PartitionHistory::default();
    for record in records.iter().filter(|r| r.record_type == record_type) {
        out.joined_sources.insert(record.source_path.clone());
        if record.date == date {
            out.has_records_for_day = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{LedgerRecord, append_records, partition_history, read_ledger};
    use crate::harvest::extract::ActivityType;
    use std::fs;
    use tempfile::tempdir;

    fn record(record_type: ActivityType, date: &str, source: &str) -> LedgerRecord {
        LedgerRecord {
            record_type,
            date: date.to_string(),
            bundle_path: format!("/out/LC_Authorities_{record_type}_{date}.mrc"),
            bundle_version: 1,
            source_path: source.to_string(),
            content_hash: "00".to_string(),
            joined_at_epoch_secs: 1,
        }
    }

    #[test]
    fn missing_ledger_is_empty() {
        let tmp = tempdir().expect("tempdir");
        assert!(read_ledger(&tmp.path().join("ledger.jsonl")).expect("read").is_empty());
    }

    #[test]
    fn appends_accumulate() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("Joined_MARC/ledger.jsonl");
        let first = record(ActivityType::Create, "2025-03-07", "/c/a.mrc");
        let second = record(ActivityType::Update, "2025-03-07", "/u/b.mrc");

        append_records(&path, std::slice::from_ref(&first)).expect("append");
        append_records(&path, std::slice::from_ref(&second)).expect("append");

        assert_eq!(read_ledger(&path).expect("read"), vec![first, second]);
    }

    #[test]
    fn corrupt_line_is_reported_as_state_corrupt() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("ledger.jsonl");
        fs::write(&path, "{\"record_type\":\"Create\"\n").expect("write");
        let err = read_ledger(&path).unwrap_err();
        assert!(err.to_string().starts_with("E007_STATE_CORRUPT"));
    }

    #[test]
    fn history_is_scoped_by_type_and_day() {
        let records = vec![
            record(ActivityType::Create, "2025-03-06", "/c/old.mrc"),
            record(ActivityType::Create, "2025-03-07", "/c/today.mrc"),
            record(ActivityType::Update, "2025-03-08", "/u/other.mrc"),
        ];

        let today = partition_history(&records, ActivityType::Create, "2025-03-07");
        assert!(today.has_records_for_day);
        assert!(today.joined_sources.contains("/c/old.mrc"));
        assert!(today.joined_sources.contains("/c/today.mrc"));
        assert!(!today.joined_sources.contains("/u/other.mrc"));

        let later = partition_history(&records, ActivityType::Create, "2025-03-08");
        assert!(!later.has_records_for_day);
    }
}
