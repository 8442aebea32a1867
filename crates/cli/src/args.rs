use std::path::PathBuf;

use clap::Parser;
use rust_decimal::Decimal;

use splitledger_core::CurrencyCode;

#[derive(Debug, Clone, Parser)]
#[command(name = "splitledger", version, about = "Settle shared expenses from a group file")]
pub struct Cli {
    /// Group file (JSON) with members and expenses.
    pub file: PathBuf,

    /// Also settle everything in this currency.
    #[arg(long, env = "SPLITLEDGER_TARGET_CURRENCY", value_parser = parse_currency)]
    pub target_currency: Option<CurrencyCode>,

    /// Exchange rate into the target currency, e.g. `--rate EUR=1.08`.
    /// Repeatable; overrides rates in the group file.
    #[arg(long = "rate", value_name = "CODE=RATE", value_parser = parse_rate)]
    pub rates: Vec<(CurrencyCode, Decimal)>,

    /// Fail on a missing rate instead of converting at 1.0.
    #[arg(long)]
    pub strict_rates: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

fn parse_currency(s: &str) -> Result<CurrencyCode, String> {
    CurrencyCode::new(s).map_err(|e| e.to_string())
}

fn parse_rate(s: &str) -> Result<(CurrencyCode, Decimal), String> {
    let (code, rate) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CODE=RATE, got `{s}`"))?;
    let code = parse_currency(code)?;
    let rate: Decimal = rate
        .trim()
        .parse()
        .map_err(|_| format!("`{rate}` is not a number"))?;
    Ok((code, rate))
}
