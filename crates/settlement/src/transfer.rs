use serde::{Deserialize, Serialize};

use splitledger_core::{CurrencyCode, MemberId, Money};

/// One direct payment: `from` pays `to` the given amount.
///
/// Transfers are a report, never ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: MemberId,
    pub to: MemberId,
    /// Strictly positive amount in minor units.
    pub amount: Money,
    pub currency: CurrencyCode,
}

/// Ordered transfers that settle one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub currency: CurrencyCode,
    pub transfers: Vec<Transfer>,
}

impl Settlement {
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// Sum of all transferred amounts.
    pub fn total_volume(&self) -> Money {
        self.transfers.iter().map(|t| t.amount).sum()
    }

    /// Transfers paid by `member`.
    pub fn paid_by(&self, member: MemberId) -> impl Iterator<Item = &Transfer> {
        self.transfers.iter().filter(move |t| t.from == member)
    }

    /// Transfers received by `member`.
    pub fn received_by(&self, member: MemberId) -> impl Iterator<Item = &Transfer> {
        self.transfers.iter().filter(move |t| t.to == member)
    }
}
