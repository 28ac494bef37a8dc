use anyhow::Result;

use crate::commands::CommandReport;
use crate::harvest::config::load_config;
use crate::harvest::pipeline::{ConvertSummary, Harvester, describe_join};

pub fn summarize(summary: &ConvertSummary) -> CommandReport {
    let mut report = CommandReport::new("convert");
    if let Some(bin) = &summary.converter {
        report.detail(format!("converter={}", bin.display()));
    }
    if let Some(log) = &summary.log {
        report.detail(format!("convert.log={}", log.display()));
    }

    for t in &summary.types {
        let kind = t.record_type;
        report.detail_for(
            kind,
            format!(
                "sources={} converted={} reused={} already_joined={} failed={}",
                t.sources,
                t.converted,
                t.reused,
                t.already_joined,
                t.conversion_failures.len()
            ),
        );
        report.detail_for(kind, describe_join(t));
        if t.archived > 0 {
            report.detail_for(kind, format!("archived={}", t.archived));
        }

        if let Some(err) = &t.error {
            report.issue_for(kind, err);
        }
        for (path, err) in &t.conversion_failures {
            report.issue_for(kind, format!("conversion failed for {}: {err}", path.display()));
        }
        for path in &t.archive_failures {
            report.issue_for(kind, format!("archive failed for {}", path.display()));
        }
    }
    report
}

pub fn run() -> Result<CommandReport> {
    let loaded = load_config()?;
    let harvester = Harvester::open(loaded.config)?;
    let summary = harvester.convert_phase()?;
    Ok(summarize(&summary))
}
