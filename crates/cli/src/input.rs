//! Group file format.
//!
//! ```json
//! {
//!   "name": "Lisbon",
//!   "members": ["Alice", "Bob", "Carol"],
//!   "expenses": [
//!     { "description": "Dinner", "amount": "90.00", "currency": "USD",
//!       "payer": "Alice", "participants": ["Alice", "Bob", "Carol"] },
//!     { "description": "Taxi", "amount": "12", "currency": "EUR", "payer": "Bob",
//!       "shares": [{ "member": "Bob", "amount": "4" }, { "member": "Carol", "amount": "8" }] }
//!   ],
//!   "rates": { "EUR": 1.08 }
//! }
//! ```
//!
//! Amounts are decimal strings in major units. Members are referenced by name.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

use splitledger_core::{CurrencyCode, MemberId, Money};
use splitledger_fx::ExchangeRates;
use splitledger_ledger::{Expense, ExpenseDraft, Group, Member, ParticipantShare};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupFile {
    pub name: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub expenses: Vec<ExpenseEntry>,
    /// Rates into whatever target currency the caller picks.
    #[serde(default)]
    pub rates: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpenseEntry {
    pub description: String,
    pub amount: String,
    pub currency: String,
    pub payer: String,
    /// Split evenly across these members.
    #[serde(default)]
    pub participants: Vec<String>,
    /// Explicit per-member amounts.
    #[serde(default)]
    pub shares: Vec<ShareEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareEntry {
    pub member: String,
    pub amount: String,
}

impl GroupFile {
    /// Replay the file into a group.
    pub fn build(&self) -> Result<Group> {
        let mut group = Group::new(&self.name)?;
        for name in &self.members {
            if group.member_by_name(name).is_some() {
                bail!("member `{name}` is listed twice");
            }
            group.add_member(Member::new(name.as_str())?)?;
        }

        for (n, entry) in self.expenses.iter().enumerate() {
            let expense = entry
                .to_expense(&group)
                .with_context(|| format!("expense #{} ({})", n + 1, entry.description))?;
            group
                .record_expense(expense)
                .with_context(|| format!("expense #{} ({})", n + 1, entry.description))?;
        }
        Ok(group)
    }

    /// File rates, with `overrides` taking precedence.
    pub fn rates_with_overrides(&self, overrides: &[(CurrencyCode, Decimal)]) -> Result<ExchangeRates> {
        let mut rates = ExchangeRates::new();
        for (code, rate) in &self.rates {
            let code = CurrencyCode::new(code).with_context(|| format!("rate for `{code}`"))?;
            rates.insert(code, *rate)?;
        }
        for (code, rate) in overrides {
            rates
                .insert(code.clone(), *rate)
                .with_context(|| format!("--rate {code}={rate}"))?;
        }
        Ok(rates)
    }
}

impl ExpenseEntry {
    fn to_expense(&self, group: &Group) -> Result<Expense> {
        let currency = CurrencyCode::new(&self.currency)?;
        let amount = Money::parse_major(&self.amount, &currency)?;
        let payer = resolve(group, &self.payer)?;
        let draft = ExpenseDraft::new(self.description.as_str(), amount, currency.clone(), payer);

        match (self.participants.is_empty(), self.shares.is_empty()) {
            (false, false) => bail!("give either `participants` or `shares`, not both"),
            (_, true) => {
                let participants = self
                    .participants
                    .iter()
                    .map(|name| resolve(group, name))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expense::split_equally(draft, &participants)?)
            }
            (true, false) => {
                let shares = self
                    .shares
                    .iter()
                    .map(|s| {
                        Ok(ParticipantShare::new(
                            resolve(group, &s.member)?,
                            Money::parse_major(&s.amount, &currency)?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expense::with_shares(draft, shares)?)
            }
        }
    }
}

fn resolve(group: &Group, name: &str) -> Result<MemberId> {
    group
        .member_by_name(name)
        .map(Member::id_typed)
        .with_context(|| format!("`{name}` is not a member of {}", group.name()))
}
