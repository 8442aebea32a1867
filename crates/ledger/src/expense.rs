use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splitledger_core::{
    CurrencyCode, Entity, ExpenseId, LedgerError, LedgerResult, MemberId, Money, ValueObject,
};

/// The portion of an expense attributed to one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantShare {
    pub member_id: MemberId,
    /// Non-negative amount in the expense currency's minor units.
    pub share: Money,
}

impl ParticipantShare {
    pub fn new(member_id: MemberId, share: Money) -> Self {
        Self { member_id, share }
    }
}

impl ValueObject for ParticipantShare {}

/// Everything about an expense except how it is split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseDraft {
    pub id: ExpenseId,
    pub description: String,
    /// Total paid, in minor units.
    pub amount: Money,
    pub currency: CurrencyCode,
    pub payer: MemberId,
    pub occurred_at: DateTime<Utc>,
}

impl ExpenseDraft {
    pub fn new(
        description: impl Into<String>,
        amount: Money,
        currency: CurrencyCode,
        payer: MemberId,
    ) -> Self {
        Self {
            id: ExpenseId::new(),
            description: description.into(),
            amount,
            currency,
            payer,
            occurred_at: Utc::now(),
        }
    }
}

/// An immutable expense: who paid how much, and who owes which share.
///
/// Invariants (checked by [`Expense::validate`], which the accumulator runs
/// before every posting): positive amount, at least one participant, no
/// negative share, no duplicate participant, shares summing exactly to the
/// amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    id: ExpenseId,
    description: String,
    amount: Money,
    currency: CurrencyCode,
    payer: MemberId,
    shares: Vec<ParticipantShare>,
    occurred_at: DateTime<Utc>,
}

impl Expense {
    /// Build an expense from explicit shares.
    pub fn with_shares(draft: ExpenseDraft, shares: Vec<ParticipantShare>) -> LedgerResult<Self> {
        let expense = Self {
            id: draft.id,
            description: draft.description.trim().to_string(),
            amount: draft.amount,
            currency: draft.currency,
            payer: draft.payer,
            shares,
            occurred_at: draft.occurred_at,
        };
        expense.validate()?;
        Ok(expense)
    }

    /// Split the amount evenly across `participants`.
    ///
    /// The remainder of the integer division goes one minor unit at a time to
    /// the first participants in list order, so the shares always add up.
    pub fn split_equally(draft: ExpenseDraft, participants: &[MemberId]) -> LedgerResult<Self> {
        if participants.is_empty() {
            return Err(LedgerError::invalid_expense(
                "an expense needs at least one participant",
            ));
        }
        if !draft.amount.is_positive() {
            return Err(LedgerError::invalid_expense(format!(
                "amount must be positive (got {})",
                draft.amount
            )));
        }

        let count = participants.len() as i64;
        let base = draft.amount.minor() / count;
        let remainder = draft.amount.minor() % count;

        let shares = participants
            .iter()
            .enumerate()
            .map(|(idx, member_id)| {
                let extra = if (idx as i64) < remainder { 1 } else { 0 };
                ParticipantShare::new(*member_id, Money::from_minor(base + extra))
            })
            .collect();

        Self::with_shares(draft, shares)
    }

    /// Check the expense's own invariants. Group membership is checked by the
    /// accumulator, which knows the group.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.description.trim().is_empty() {
            return Err(LedgerError::invalid_expense("description must not be empty"));
        }
        if !self.amount.is_positive() {
            return Err(LedgerError::invalid_expense(format!(
                "amount must be positive (got {})",
                self.amount
            )));
        }
        if self.shares.is_empty() {
            return Err(LedgerError::invalid_expense(
                "an expense needs at least one participant",
            ));
        }

        let mut seen = HashSet::with_capacity(self.shares.len());
        let mut total: i128 = 0;
        for share in &self.shares {
            if share.share.is_negative() {
                return Err(LedgerError::invalid_expense(format!(
                    "share of {} is negative ({})",
                    share.member_id, share.share
                )));
            }
            if !seen.insert(share.member_id) {
                return Err(LedgerError::invalid_expense(format!(
                    "{} appears more than once",
                    share.member_id
                )));
            }
            total += share.share.minor() as i128;
        }

        if total != self.amount.minor() as i128 {
            return Err(LedgerError::invalid_expense(format!(
                "shares sum to {total} but the amount is {}",
                self.amount
            )));
        }
        Ok(())
    }

    pub fn id_typed(&self) -> ExpenseId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    pub fn payer(&self) -> MemberId {
        self.payer
    }

    pub fn shares(&self) -> &[ParticipantShare] {
        &self.shares
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn share_of(&self, member: MemberId) -> Option<Money> {
        self.shares
            .iter()
            .find(|s| s.member_id == member)
            .map(|s| s.share)
    }

    pub fn participants(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.shares.iter().map(|s| s.member_id)
    }
}

impl Entity for Expense {
    type Id = ExpenseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
