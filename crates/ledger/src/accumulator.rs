//! Balance accumulator: the only writer of membership balances.
//!
//! Applying an expense credits the payer with the full amount and debits each
//! participant with their share, in the expense currency. Reversal posts the
//! exact negation. Both are all-or-nothing: every resulting balance is
//! computed and range-checked before the first one is written.

use splitledger_core::{CurrencyCode, LedgerError, LedgerResult, MemberId, Money};

use crate::expense::Expense;
use crate::membership::Membership;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Apply,
    Reverse,
}

/// Posts expenses onto a group's memberships.
#[derive(Debug)]
pub struct BalanceAccumulator<'a> {
    memberships: &'a mut [Membership],
}

impl<'a> BalanceAccumulator<'a> {
    pub fn new(memberships: &'a mut [Membership]) -> Self {
        Self { memberships }
    }

    /// Payer's balance += amount; each participant's balance -= share.
    ///
    /// Fails with `InvalidExpense` (and leaves every balance untouched) when
    /// the expense is malformed or names someone outside the group.
    pub fn apply(&mut self, expense: &Expense) -> LedgerResult<()> {
        self.post(expense, Direction::Apply)
    }

    /// Exact negation of [`BalanceAccumulator::apply`].
    pub fn reverse(&mut self, expense: &Expense) -> LedgerResult<()> {
        self.post(expense, Direction::Reverse)
    }

    fn post(&mut self, expense: &Expense, direction: Direction) -> LedgerResult<()> {
        let plan = self.plan(expense, direction)?;
        let currency = expense.currency();
        for (idx, balance) in plan {
            self.memberships[idx].set_balance(currency, balance);
        }
        Ok(())
    }

    /// New balance for every touched membership, in first-touch order.
    fn plan(&self, expense: &Expense, direction: Direction) -> LedgerResult<Vec<(usize, Money)>> {
        expense.validate()?;

        let payer = self.index_of(expense.payer()).ok_or_else(|| {
            LedgerError::invalid_expense(format!(
                "payer {} is not a member of the group",
                expense.payer()
            ))
        })?;

        let mut deltas: Vec<(usize, i128)> = vec![(payer, expense.amount().minor() as i128)];
        for share in expense.shares() {
            let idx = self.index_of(share.member_id).ok_or_else(|| {
                LedgerError::invalid_expense(format!(
                    "participant {} is not a member of the group",
                    share.member_id
                ))
            })?;
            let debit = -(share.share.minor() as i128);
            match deltas.iter_mut().find(|(i, _)| *i == idx) {
                Some((_, delta)) => *delta += debit,
                None => deltas.push((idx, debit)),
            }
        }

        let currency = expense.currency();
        deltas
            .into_iter()
            .map(|(idx, delta)| {
                let delta = match direction {
                    Direction::Apply => delta,
                    Direction::Reverse => -delta,
                };
                let current = self.memberships[idx].balance(currency).minor() as i128;
                let next = i64::try_from(current + delta)
                    .map_err(|_| overflow(self.memberships[idx].member_id(), currency))?;
                Ok((idx, Money::from_minor(next)))
            })
            .collect()
    }

    fn index_of(&self, member: MemberId) -> Option<usize> {
        self.memberships.iter().position(|m| m.member_id() == member)
    }
}

/// Apply `expense` to `memberships`. See [`BalanceAccumulator::apply`].
pub fn apply_expense(memberships: &mut [Membership], expense: &Expense) -> LedgerResult<()> {
    BalanceAccumulator::new(memberships).apply(expense)
}

/// Reverse `expense` on `memberships`. See [`BalanceAccumulator::reverse`].
pub fn reverse_expense(memberships: &mut [Membership], expense: &Expense) -> LedgerResult<()> {
    BalanceAccumulator::new(memberships).reverse(expense)
}

fn overflow(member: MemberId, currency: &CurrencyCode) -> LedgerError {
    LedgerError::invalid_expense(format!(
        "posting would overflow the {currency} balance of {member}"
    ))
}
