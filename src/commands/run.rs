use anyhow::Result;

use crate::commands::{CommandReport, convert, fetch};
use crate::harvest::config::load_config;
use crate::harvest::pipeline::Harvester;

/// Fetch, then convert and join, under one lock. A convert phase that cannot
/// start is reported without discarding what the fetch phase did.
pub fn run() -> Result<CommandReport> {
    let loaded = load_config()?;
    let harvester = Harvester::open(loaded.config)?;
    let mut report = CommandReport::new("run");
    report.detail(format!("day={}", harvester.day().stamp()));

    let fetched = harvester.fetch_phase()?;
    report.merge(fetch::summarize(&fetched));

    match harvester.convert_phase() {
        Ok(summary) => report.merge(convert::summarize(&summary)),
        Err(err) => report.issue(format!("convert phase aborted: {err:#}")),
    }
    Ok(report)
}
