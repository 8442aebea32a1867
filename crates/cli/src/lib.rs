//! `splitledger` command-line front end: load a group file, print balances and
//! the transfers that settle them.

pub mod args;
pub mod input;
pub mod report;

use std::fs;

use anyhow::{Context, Result};

use crate::args::Cli;
use crate::input::GroupFile;
use crate::report::Report;

/// Load, compute and print the report for `cli.file`.
pub fn run(cli: &Cli) -> Result<()> {
    let raw = fs::read_to_string(&cli.file)
        .with_context(|| format!("reading {}", cli.file.display()))?;
    let file: GroupFile =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", cli.file.display()))?;

    let report = build_report(cli, &file)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

/// Everything `run` prints, without the IO.
pub fn build_report(cli: &Cli, file: &GroupFile) -> Result<Report> {
    let group = file.build()?;
    tracing::info!(
        group = group.name(),
        members = group.memberships().len(),
        expenses = group.expenses().len(),
        "group loaded"
    );

    let rates = file.rates_with_overrides(&cli.rates)?;
    Report::build(&group, cli.target_currency.as_ref(), &rates, cli.strict_rates)
}
