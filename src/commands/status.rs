use anyhow::Result;
use std::collections::BTreeMap;
use std::env;

use crate::commands::CommandReport;
use crate::harvest::config::load_config;
use crate::harvest::convert::ExternalConverter;
use crate::harvest::extract::ActivityType;
use crate::harvest::ledger::{LedgerRecord, read_ledger};
use crate::harvest::lock::{self, LockState};
use crate::harvest::paths::resolve_paths;

include!(concat!(env!("OUT_DIR"), "/harvest_env_allowlist.rs"));

/// Per record type: files joined, and the most recent bundle they went into.
fn ledger_lines(records: &[LedgerRecord]) -> Vec<String> {
    let mut by_type: BTreeMap<ActivityType, (usize, &LedgerRecord)> = BTreeMap::new();
    for record in records {
        by_type
            .entry(record.record_type)
            .and_modify(|(count, latest)| {
                *count += 1;
                if record.joined_at_epoch_secs >= latest.joined_at_epoch_secs {
                    *latest = record;
                }
            })
            .or_insert((1, record));
    }
    by_type
        .into_iter()
        .map(|(t, (count, latest))| {
            format!(
                "ledger.{t}: files={count} last_bundle={} (v{})",
                latest.bundle_path, latest.bundle_version
            )
        })
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let loaded = load_config()?;
    let cfg = &loaded.config;
    let paths = resolve_paths(cfg);
    let mut report = CommandReport::new("status");

    report.detail(format!("build_uuid={}", env!("BUILD_UUID")));
    match &loaded.source_file {
        Some(path) => report.detail(format!("config_file={}", path.display())),
        None => report.detail("config_file=none (defaults)"),
    }
    for key in GENERATED_HARVEST_ENV_ALLOWLIST {
        if let Ok(value) = env::var(key) {
            report.detail(format!("env.{key}={value}"));
        }
    }

    report.detail(format!("input_root={}", paths.input_root.display()));
    report.detail(format!("output_root={}", paths.output_root.display()));
    report.detail(format!("converted_root={}", paths.converted_root.display()));
    report.detail(format!("joined_dir={}", paths.joined_dir.display()));
    report.detail(format!("archive_root={}", paths.archive_root.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    let types: Vec<&str> = cfg
        .extract
        .recognized_types
        .iter()
        .map(|t| t.as_str())
        .collect();
    report.detail(format!("recognized_types={}", types.join(",")));

    if !paths.input_root.exists() {
        report.issue(format!("missing input root ({})", paths.input_root.display()));
    }
    match ExternalConverter::resolve(&cfg.conversion) {
        Ok(converter) => report.detail(format!("converter={}", converter.bin().display())),
        Err(err) => report.issue(err.to_string()),
    }

    match lock::lock_state(&paths.lock_file) {
        Ok(LockState::Held(Some(holder))) => report.detail(format!(
            "lock=held pid={} build_uuid={} since={}",
            holder.pid, holder.build_uuid, holder.started_at_epoch_secs
        )),
        Ok(LockState::Held(None)) => report.detail("lock=held (no payload)"),
        Ok(LockState::Free) => report.detail("lock=free"),
        Err(err) => report.issue(format!("{err:#}")),
    }

    match read_ledger(&paths.ledger_file()) {
        Ok(records) if records.is_empty() => report.detail("ledger=empty"),
        Ok(records) => {
            for line in ledger_lines(&records) {
                report.detail(line);
            }
        }
        Err(err) => report.issue(format!("{err:#}")),
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{GENERATED_HARVEST_ENV_ALLOWLIST, ledger_lines};
    use crate::harvest::extract::ActivityType;
    use crate::harvest::ledger::LedgerRecord;

    fn record(t: ActivityType, version: u32, at: u64) -> LedgerRecord {
        LedgerRecord {
            record_type: t,
            date: "2025-03-07".to_string(),
            bundle_path: format!("LC_Authorities_{t}_2025-03-07_v{version}.mrc"),
            bundle_version: version,
            source_path: format!("/c/{at}.mrc"),
            content_hash: "00".to_string(),
            joined_at_epoch_secs: at,
        }
    }

    #[test]
    fn ledger_lines_report_latest_bundle_per_type() {
        let records = vec![
            record(ActivityType::Update, 1, 10),
            record(ActivityType::Create, 1, 10),
            record(ActivityType::Create, 2, 20),
        ];
        let lines = ledger_lines(&records);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ledger.Create: files=2"));
        assert!(lines[0].ends_with("(v2)"));
        assert!(lines[1].starts_with("ledger.Update: files=1"));
    }

    #[test]
    fn allowlist_covers_config_overrides() {
        for key in ["HARVEST_OUTPUT_ROOT", "HARVEST_CONVERTER_BIN", "HARVEST_CONFIG_PATH"] {
            assert!(GENERATED_HARVEST_ENV_ALLOWLIST.contains(&key), "{key}");
        }
    }
}
