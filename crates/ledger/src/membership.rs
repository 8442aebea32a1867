use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use splitledger_core::{CurrencyCode, MemberId, Money};

use crate::member::Member;

/// A member's standing within one group: one signed balance per currency.
///
/// Positive means the group owes the member; negative means the member owes
/// the group. Only the balance accumulator writes balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    member: Member,
    #[serde(default)]
    balances: BTreeMap<CurrencyCode, Money>,
}

impl Membership {
    pub fn new(member: Member) -> Self {
        Self {
            member,
            balances: BTreeMap::new(),
        }
    }

    pub fn member(&self) -> &Member {
        &self.member
    }

    pub fn member_id(&self) -> MemberId {
        self.member.id_typed()
    }

    /// Balance in `currency`; zero when the member never touched it.
    pub fn balance(&self, currency: &CurrencyCode) -> Money {
        self.balances.get(currency).copied().unwrap_or(Money::ZERO)
    }

    pub fn balances(&self) -> &BTreeMap<CurrencyCode, Money> {
        &self.balances
    }

    /// True when every currency balance is zero.
    pub fn is_settled(&self) -> bool {
        self.balances.values().all(|b| b.is_zero())
    }

    pub(crate) fn set_balance(&mut self, currency: &CurrencyCode, balance: Money) {
        self.balances.insert(currency.clone(), balance);
    }

    pub(crate) fn retain_balances(&mut self, keep: impl FnMut(&CurrencyCode, &mut Money) -> bool) {
        self.balances.retain(keep);
    }

    pub(crate) fn cleared(&self) -> Self {
        Self::new(self.member.clone())
    }
}
