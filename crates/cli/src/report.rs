use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;

use splitledger_core::{CurrencyCode, MemberId};
use splitledger_fx::{normalize_strict, ExchangeRates, NormalizedBalances};
use splitledger_ledger::Group;
use splitledger_settlement::{compute_settlement, Settlement};

/// What the CLI prints, with members by name and amounts in major units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub group: String,
    pub balances: Vec<BalanceLine>,
    pub settlements: Vec<SettlementSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted: Option<SettlementSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceLine {
    pub member: String,
    pub currency: CurrencyCode,
    pub balance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementSection {
    pub currency: CurrencyCode,
    pub transfers: Vec<TransferLine>,
    /// Currencies converted at 1.0 for lack of a rate (converted section only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub defaulted_rates: Vec<CurrencyCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferLine {
    pub from: String,
    pub to: String,
    pub amount: String,
}

impl Report {
    pub fn build(
        group: &Group,
        target: Option<&CurrencyCode>,
        rates: &ExchangeRates,
        strict_rates: bool,
    ) -> Result<Self> {
        let balances = group
            .balance_sheet()
            .into_iter()
            .map(|row| BalanceLine {
                balance: row.balance.format_major(&row.currency),
                member: row.member_name,
                currency: row.currency,
            })
            .collect();

        let settlements = group
            .settle_all()
            .context("settling per currency")?
            .iter()
            .map(|s| section(group, s, Vec::new()))
            .collect();

        let converted = match target {
            Some(target) => {
                let normalized = normalized(group, target, rates, strict_rates)?;
                let settlement = compute_settlement(target, &normalized.balances)
                    .with_context(|| format!("settling in {target}"))?;
                Some(section(
                    group,
                    &settlement,
                    normalized.defaulted.into_iter().collect(),
                ))
            }
            None => None,
        };

        Ok(Self {
            group: group.name().to_string(),
            balances,
            settlements,
            converted,
        })
    }
}

fn normalized(
    group: &Group,
    target: &CurrencyCode,
    rates: &ExchangeRates,
    strict: bool,
) -> Result<NormalizedBalances> {
    let normalized = if strict {
        normalize_strict(
            group.memberships().iter().map(|m| (m.member_id(), m.balances())),
            target,
            rates,
        )
    } else {
        group.normalized(target, rates)
    };
    normalized.with_context(|| format!("converting balances into {target}"))
}

fn section(group: &Group, settlement: &Settlement, defaulted_rates: Vec<CurrencyCode>) -> SettlementSection {
    let name = |id: MemberId| {
        group
            .membership(id)
            .map(|m| m.member().name().to_string())
            .unwrap_or_else(|| id.to_string())
    };
    SettlementSection {
        currency: settlement.currency.clone(),
        transfers: settlement
            .transfers
            .iter()
            .map(|t| TransferLine {
                from: name(t.from),
                to: name(t.to),
                amount: t.amount.format_major(&t.currency),
            })
            .collect(),
        defaulted_rates,
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.group)?;
        writeln!(f)?;
        writeln!(f, "Balances")?;
        for line in &self.balances {
            writeln!(f, "  {:<16} {:>14} {}", line.member, line.balance, line.currency)?;
        }
        for section in &self.settlements {
            writeln!(f)?;
            writeln!(f, "Settle {}", section.currency)?;
            write_transfers(f, section)?;
        }
        if let Some(section) = &self.converted {
            writeln!(f)?;
            writeln!(f, "Settle everything in {}", section.currency)?;
            if !section.defaulted_rates.is_empty() {
                let codes: Vec<&str> = section.defaulted_rates.iter().map(CurrencyCode::as_str).collect();
                writeln!(f, "  (no rate for {}; converted at 1.0)", codes.join(", "))?;
            }
            write_transfers(f, section)?;
        }
        Ok(())
    }
}

fn write_transfers(f: &mut fmt::Formatter<'_>, section: &SettlementSection) -> fmt::Result {
    if section.transfers.is_empty() {
        return writeln!(f, "  nothing to settle");
    }
    for t in &section.transfers {
        writeln!(f, "  {} pays {} {} {}", t.from, t.to, t.amount, section.currency)?;
    }
    Ok(())
}
