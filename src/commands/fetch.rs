use anyhow::Result;

use crate::commands::CommandReport;
use crate::harvest::config::load_config;
use crate::harvest::pipeline::{FetchSummary, Harvester};

pub fn summarize(summary: &FetchSummary) -> CommandReport {
    let mut report = CommandReport::new("fetch");
    report.detail(format!("fetch.feeds={}", summary.feeds_found));
    report.detail(format!("fetch.documents={}", summary.documents));
    report.detail(format!("fetch.success={}", summary.tally.success));
    report.detail(format!("fetch.skipped={}", summary.tally.skipped));
    report.detail(format!("fetch.failed={}", summary.tally.failed));
    if let Some(log) = &summary.log {
        report.detail(format!("fetch.log={}", log.display()));
    }
    if let Some(csv) = &summary.csv {
        report.detail(format!("fetch.report={}", csv.display()));
    } else {
        report.issue("activity report was not written");
    }

    if summary.feeds_found == 0 {
        report.issue("no feed documents found");
    }
    for (path, err) in &summary.unreadable {
        report.issue(format!("unreadable feed {}: {err}", path.display()));
    }
    if summary.tally.failed > 0 {
        report.issue(format!("{} download(s) failed", summary.tally.failed));
    }
    report
}

pub fn run() -> Result<CommandReport> {
    let loaded = load_config()?;
    let harvester = Harvester::open(loaded.config)?;
    let summary = harvester.fetch_phase()?;
    Ok(summarize(&summary))
}
