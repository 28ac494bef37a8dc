use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Parser)]
#[command(name = "lc-harvest")]
#[command(about = "Harvest LC authority records from ActivityStreams feeds into daily MARC bundles")]
#[command(version)]
struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the records referenced by the latest feed documents
    Fetch,
    /// Convert downloaded records and join them into today's bundles
    Convert,
    /// Fetch, then convert and join
    Run,
    /// Show configuration, layout, lock and ledger state
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let state = if report.ok { "ok" } else { "issues" };
    println!("{}: {state}", report.command);
    for line in &report.details {
        println!("  {line}");
    }
    for line in &report.issues {
        println!("  ! {line}");
    }
    Ok(())
}

/// Exit status for the process: 0 when the report is clean, 2 when it
/// carries issues.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Fetch => commands::fetch::run()?,
        Command::Convert => commands::convert::run()?,
        Command::Run => commands::run::run()?,
        Command::Status => commands::status::run()?,
    };
    print_report(&report, cli.json)?;
    Ok(report.exit_code())
}
