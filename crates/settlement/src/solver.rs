//! Greedy two-pointer settlement.
//!
//! Balances are sorted ascending; the largest debtor (left pointer) pays the
//! largest creditor (right pointer) as much as both can absorb. Every step
//! zeroes at least one endpoint, so the loop emits at most `N - 1` transfers
//! for `N` members with a non-zero balance.

use splitledger_core::{CurrencyCode, LedgerError, LedgerResult, MemberId, Money};

use crate::transfer::{Settlement, Transfer};

/// Compute the transfers that drive every balance in `balances` to zero.
///
/// `balances` are net positions in `currency` (positive = owed money). They
/// must sum to exactly zero, otherwise `LedgerError::UnbalancedLedger` is
/// returned and nothing is computed.
///
/// Ties in balance keep their input order, so the output is deterministic for
/// a given input ordering.
pub fn compute_settlement(
    currency: &CurrencyCode,
    balances: &[(MemberId, Money)],
) -> LedgerResult<Settlement> {
    let residual: i128 = balances.iter().map(|(_, b)| b.minor() as i128).sum();
    if residual != 0 {
        tracing::warn!(
            currency = %currency,
            residual,
            member_count = balances.len(),
            "settlement rejected: balances do not sum to zero"
        );
        return Err(LedgerError::unbalanced(currency.clone(), residual));
    }

    let mut working: Vec<(MemberId, Money)> = balances.to_vec();
    working.sort_by_key(|(_, balance)| *balance);

    let mut transfers = Vec::new();
    if working.len() >= 2 {
        let mut i = 0usize;
        let mut j = working.len() - 1;

        while i < j {
            let (debtor, debt) = working[i];
            let (creditor, credit) = working[j];
            debug_assert!(debt.minor() <= 0 && credit.minor() >= 0);

            // min(-debt, credit) without negating i64::MIN.
            let amount = debt.minor().unsigned_abs().min(credit.minor().max(0) as u64);
            let amount = Money::from_minor(amount as i64);

            if amount.is_positive() {
                transfers.push(Transfer {
                    from: debtor,
                    to: creditor,
                    amount,
                    currency: currency.clone(),
                });
            }

            working[i].1 = debt + amount;
            working[j].1 = credit - amount;

            if working[i].1.is_zero() {
                i += 1;
            }
            if working[j].1.is_zero() {
                j -= 1;
            }
        }
    }

    tracing::debug!(
        currency = %currency,
        member_count = balances.len(),
        transfer_count = transfers.len(),
        "settlement computed"
    );

    Ok(Settlement {
        currency: currency.clone(),
        transfers,
    })
}

/// Replay `transfers` onto `balances`: the payer's balance rises by the amount,
/// the payee's falls by it.
///
/// Fails with `NotFound` if a transfer names a member absent from `balances`.
pub fn apply_transfers(
    balances: &[(MemberId, Money)],
    transfers: &[Transfer],
) -> LedgerResult<Vec<(MemberId, Money)>> {
    let mut out = balances.to_vec();
    for transfer in transfers {
        let from = position_of(&out, transfer.from)?;
        let to = position_of(&out, transfer.to)?;
        out[from].1 += transfer.amount;
        out[to].1 -= transfer.amount;
    }
    Ok(out)
}

fn position_of(balances: &[(MemberId, Money)], member: MemberId) -> LedgerResult<usize> {
    balances
        .iter()
        .position(|(id, _)| *id == member)
        .ok_or_else(|| LedgerError::not_found(format!("member {member} in settlement")))
}
