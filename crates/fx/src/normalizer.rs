//! Per-member currency normalization.
//!
//! Each member's balance becomes `Σ balance[c] × rate[c]` in the target
//! currency, scaled between minor-unit exponents and computed in [`Decimal`].
//! Balances already in the target currency are carried over exactly. Results
//! are rounded half away from zero; any rounding drift in the total is then given back one minor unit
//! at a time to the members whose rounding moved them furthest, so that a
//! consistent ledger normalizes to an exactly zero-sum list.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use splitledger_core::{CurrencyCode, LedgerError, LedgerResult, MemberId, Money};

use crate::rates::{ExchangeRates, RateSource};

/// Balances of all members expressed in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedBalances {
    pub currency: CurrencyCode,
    /// One entry per input member, in input order.
    pub balances: Vec<(MemberId, Money)>,
    /// Source currencies that had no rate and were converted at 1.0.
    pub defaulted: BTreeSet<CurrencyCode>,
}

impl NormalizedBalances {
    /// Sum of all normalized balances. Zero for a consistent ledger with
    /// correct rates; anything else means the rates (or the input) are off.
    pub fn residual(&self) -> i128 {
        self.balances.iter().map(|(_, b)| b.minor() as i128).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.residual() == 0
    }

    /// True when every source currency had an explicit rate (or was the target).
    pub fn fully_rated(&self) -> bool {
        self.defaulted.is_empty()
    }

    pub fn get(&self, member: MemberId) -> Option<Money> {
        self.balances
            .iter()
            .find(|(id, _)| *id == member)
            .map(|(_, b)| *b)
    }
}

/// Convert every member's per-currency balances into `target`.
///
/// Missing rates silently use 1.0 (see [`NormalizedBalances::defaulted`]); use
/// [`normalize_strict`] to refuse them instead. The only failure is a
/// converted balance that does not fit in `i64` minor units.
pub fn normalize<'a, I>(
    balances: I,
    target: &CurrencyCode,
    rates: &ExchangeRates,
) -> LedgerResult<NormalizedBalances>
where
    I: IntoIterator<Item = (MemberId, &'a BTreeMap<CurrencyCode, Money>)>,
{
    let mut defaulted = BTreeSet::new();
    let mut exact: Vec<(MemberId, Decimal)> = Vec::new();

    for (member, per_currency) in balances {
        let mut value = Decimal::ZERO;
        for (currency, balance) in per_currency {
            let converted = if currency == target {
                Decimal::from(balance.minor())
            } else {
                let lookup = rates.lookup(currency, target);
                if lookup.source == RateSource::Defaulted {
                    defaulted.insert(currency.clone());
                }
                convert(*balance, currency, lookup.rate, target)?
            };
            value = value.checked_add(converted).ok_or_else(|| overflow(target))?;
        }
        exact.push((member, value));
    }

    for currency in &defaulted {
        tracing::warn!(
            source = %currency,
            target = %target,
            "no exchange rate supplied; converting at 1.0"
        );
    }

    let rounded = round_zero_sum(&exact, target)?;
    let normalized = NormalizedBalances {
        currency: target.clone(),
        balances: rounded,
        defaulted,
    };

    tracing::debug!(
        target = %target,
        member_count = normalized.balances.len(),
        residual = normalized.residual(),
        defaulted = normalized.defaulted.len(),
        "balances normalized"
    );

    Ok(normalized)
}

/// Like [`normalize`], but fails with `NotFound` when any source currency lacks
/// a rate instead of converting it at 1.0.
pub fn normalize_strict<'a, I>(
    balances: I,
    target: &CurrencyCode,
    rates: &ExchangeRates,
) -> LedgerResult<NormalizedBalances>
where
    I: IntoIterator<Item = (MemberId, &'a BTreeMap<CurrencyCode, Money>)>,
{
    let balances: Vec<(MemberId, &'a BTreeMap<CurrencyCode, Money>)> =
        balances.into_iter().collect();
    rates.require_complete(balances.iter().flat_map(|(_, per)| per.keys()), target)?;
    normalize(balances, target, rates)
}

/// `balance` (minor units of `source`) in minor units of `target`, unrounded.
fn convert(
    balance: Money,
    source: &CurrencyCode,
    rate: Decimal,
    target: &CurrencyCode,
) -> LedgerResult<Decimal> {
    let from = source.minor_unit_exponent();
    let to = target.minor_unit_exponent();
    let scaled = Decimal::from(balance.minor())
        .checked_mul(rate)
        .ok_or_else(|| overflow(target))?;
    let rescaled = if to >= from {
        scaled.checked_mul(Decimal::from(10i64.pow(to - from)))
    } else {
        scaled.checked_div(Decimal::from(10i64.pow(from - to)))
    };
    rescaled.ok_or_else(|| overflow(target))
}

/// Round each exact value, then nudge members by one minor unit until the
/// rounded total equals the rounded exact total.
fn round_zero_sum(
    exact: &[(MemberId, Decimal)],
    target: &CurrencyCode,
) -> LedgerResult<Vec<(MemberId, Money)>> {
    let mut rounded = Vec::with_capacity(exact.len());
    for (member, value) in exact {
        rounded.push((*member, to_minor(*value, target)?));
    }

    let exact_total = exact
        .iter()
        .try_fold(Decimal::ZERO, |total, (_, v)| total.checked_add(*v))
        .ok_or_else(|| overflow(target))?;
    let wanted = round_half_away(exact_total)
        .to_i128()
        .ok_or_else(|| overflow(target))?;
    let actual: i128 = rounded.iter().map(|(_, m)| *m as i128).sum();
    let drift = actual - wanted;
    if drift == 0 || rounded.is_empty() {
        return Ok(into_money(rounded));
    }

    // Members ranked by how far rounding pushed them in the drift direction.
    let gains: Vec<Decimal> = rounded
        .iter()
        .zip(exact)
        .map(|((_, r), (_, e))| Decimal::from(*r) - *e)
        .collect();
    let mut ranked: Vec<usize> = (0..rounded.len()).collect();
    if drift > 0 {
        ranked.sort_by(|a, b| gains[*b].cmp(&gains[*a]));
    } else {
        ranked.sort_by(|a, b| gains[*a].cmp(&gains[*b]));
    }

    let step: i64 = if drift > 0 { -1 } else { 1 };
    for idx in ranked.into_iter().cycle().take(drift.unsigned_abs() as usize) {
        rounded[idx].1 = rounded[idx].1.checked_add(step).ok_or_else(|| overflow(target))?;
    }

    Ok(into_money(rounded))
}

fn round_half_away(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

fn to_minor(value: Decimal, target: &CurrencyCode) -> LedgerResult<i64> {
    round_half_away(value).to_i64().ok_or_else(|| overflow(target))
}

fn overflow(target: &CurrencyCode) -> LedgerError {
    LedgerError::validation(format!("normalized balance does not fit in {target} minor units"))
}

fn into_money(values: Vec<(MemberId, i64)>) -> Vec<(MemberId, Money)> {
    values
        .into_iter()
        .map(|(member, minor)| (member, Money::from_minor(minor)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn code(s: &str) -> CurrencyCode {
        CurrencyCode::new(s).unwrap()
    }

    fn single(currency: &str, minor: i64) -> BTreeMap<CurrencyCode, Money> {
        BTreeMap::from([(code(currency), Money::from_minor(minor))])
    }

    #[test]
    fn cross_ledger_rates_leave_a_visible_residual() {
        let (a, b) = (MemberId::new(), MemberId::new());
        let a_bal = single("USD", 10_000);
        let b_bal = single("EUR", -9_000);
        let rates = ExchangeRates::new().with_rate(code("EUR"), dec!(1.1)).unwrap();

        let out = normalize([(a, &a_bal), (b, &b_bal)], &code("USD"), &rates).unwrap();

        assert_eq!(out.get(a), Some(Money::from_minor(10_000)));
        assert_eq!(out.get(b), Some(Money::from_minor(-9_900)));
        assert_eq!(out.residual(), 100);
        assert!(!out.is_balanced());
        assert!(out.fully_rated());
    }

    #[test]
    fn target_currency_balances_are_unchanged() {
        let (a, b) = (MemberId::new(), MemberId::new());
        let a_bal = single("USD", 1_234);
        let b_bal = single("USD", -1_234);
        let rates = ExchangeRates::new().with_rate(code("USD"), dec!(3.0)).unwrap();

        let out = normalize([(a, &a_bal), (b, &b_bal)], &code("USD"), &rates).unwrap();

        assert_eq!(
            out.balances,
            vec![(a, Money::from_minor(1_234)), (b, Money::from_minor(-1_234))]
        );
    }

    #[test]
    fn missing_rates_default_to_one_and_are_reported() {
        let a = MemberId::new();
        let a_bal = BTreeMap::from([
            (code("USD"), Money::from_minor(500)),
            (code("GBP"), Money::from_minor(200)),
        ]);

        let out = normalize([(a, &a_bal)], &code("USD"), &ExchangeRates::new()).unwrap();

        assert_eq!(out.get(a), Some(Money::from_minor(700)));
        assert_eq!(out.defaulted, BTreeSet::from([code("GBP")]));
        assert!(!out.fully_rated());

        let err = normalize_strict([(a, &a_bal)], &code("USD"), &ExchangeRates::new()).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn minor_unit_exponents_are_respected() {
        // 1500 JPY (exponent 0) at 0.0067 USD per yen is 10.05 USD = 1005 cents.
        let a = MemberId::new();
        let a_bal = single("JPY", 1_500);
        let rates = ExchangeRates::new().with_rate(code("JPY"), dec!(0.0067)).unwrap();

        let out = normalize([(a, &a_bal)], &code("USD"), &rates).unwrap();
        assert_eq!(out.get(a), Some(Money::from_minor(1_005)));
    }

    #[test]
    fn rounding_drift_is_given_back() {
        // Three members owed/owing thirds: every value rounds the same way.
        let ids: Vec<MemberId> = (0..3).map(|_| MemberId::new()).collect();
        let bals = [single("EUR", 1), single("EUR", 1), single("EUR", -2)];
        let rates = ExchangeRates::new().with_rate(code("EUR"), dec!(1.5)).unwrap();

        let out = normalize(
            ids.iter().copied().zip(bals.iter()),
            &code("USD"),
            &rates,
        )
        .unwrap();

        // Exact: 1.5, 1.5, -3.0 -> rounded 2, 2, -3 (sum 1) -> one member gives back a unit.
        assert!(out.is_balanced());
        assert_eq!(out.get(ids[2]), Some(Money::from_minor(-3)));
        assert_eq!(out.get(ids[0]), Some(Money::from_minor(1)));
        assert_eq!(out.get(ids[1]), Some(Money::from_minor(2)));
    }

    #[test]
    fn half_unit_results_round_away_from_zero() {
        // 100 cents at 1.005 is exactly 100.5 cents either way.
        let (a, b) = (MemberId::new(), MemberId::new());
        let a_bal = single("EUR", 100);
        let b_bal = single("EUR", -100);
        let rates = ExchangeRates::new().with_rate(code("EUR"), dec!(1.005)).unwrap();

        let out = normalize([(a, &a_bal), (b, &b_bal)], &code("USD"), &rates).unwrap();

        assert_eq!(out.get(a), Some(Money::from_minor(101)));
        assert_eq!(out.get(b), Some(Money::from_minor(-101)));
        assert!(out.is_balanced());
    }

    #[test]
    fn half_unit_rounding_across_exponents() {
        // 5 JPY at 0.003 is 1.5 cents; 1 KWD fil at 1.5 is 0.15 cents.
        let (a, b) = (MemberId::new(), MemberId::new());
        let a_bal = single("JPY", 5);
        let b_bal = single("KWD", 1);
        let rates = ExchangeRates::new()
            .with_rate(code("JPY"), dec!(0.003))
            .unwrap()
            .with_rate(code("KWD"), dec!(1.5))
            .unwrap();

        let out = normalize([(a, &a_bal), (b, &b_bal)], &code("USD"), &rates).unwrap();

        // Exact total is 1.65, so rounding each (2 and 0) matches the rounded total.
        assert_eq!(out.get(a), Some(Money::from_minor(2)));
        assert_eq!(out.get(b), Some(Money::from_minor(0)));
    }

    #[test]
    fn large_target_balances_are_exact() {
        let (a, b) = (MemberId::new(), MemberId::new());
        let big = (1i64 << 53) + 1;
        let a_bal = single("USD", big);
        let b_bal = BTreeMap::from([
            (code("USD"), Money::from_minor(-big)),
            (code("EUR"), Money::from_minor(1)),
        ]);
        let rates = ExchangeRates::new().with_rate(code("EUR"), dec!(2)).unwrap();

        let out = normalize([(a, &a_bal), (b, &b_bal)], &code("USD"), &rates).unwrap();

        assert_eq!(out.get(a), Some(Money::from_minor(9_007_199_254_740_993)));
        assert_eq!(out.get(b), Some(Money::from_minor(-9_007_199_254_740_991)));
    }

    #[test]
    fn out_of_range_results_fail() {
        let a = MemberId::new();
        let a_bal = single("EUR", i64::MAX);
        let rates = ExchangeRates::new().with_rate(code("EUR"), dec!(4.0)).unwrap();
        assert!(normalize([(a, &a_bal)], &code("USD"), &rates).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: a ledger that is zero-sum in every currency normalizes to
        /// an exactly zero-sum list for any positive rates.
        #[test]
        fn consistent_ledgers_normalize_to_zero_sum(
            usd in prop::collection::vec(-100_000i64..100_000, 2..8),
            eur in prop::collection::vec(-100_000i64..100_000, 2..8),
            eur_rate in 1i64..1_000,
        ) {
            let n = usd.len().max(eur.len()) + 1;
            let ids: Vec<MemberId> = (0..n).map(|_| MemberId::new()).collect();
            let mut per_member: Vec<BTreeMap<CurrencyCode, Money>> = vec![BTreeMap::new(); n];

            for (series, currency) in [(&usd, "USD"), (&eur, "EUR")] {
                let total: i64 = series.iter().sum();
                for (k, v) in series.iter().enumerate() {
                    per_member[k].insert(code(currency), Money::from_minor(*v));
                }
                let last = per_member[n - 1].entry(code(currency)).or_insert(Money::ZERO);
                *last -= Money::from_minor(total);
            }

            let rates = ExchangeRates::new().with_rate(code("EUR"), Decimal::new(eur_rate, 2)).unwrap();
            let out = normalize(ids.iter().copied().zip(per_member.iter()), &code("USD"), &rates).unwrap();
            prop_assert!(out.is_balanced());
        }

        /// Property: balances already in the target currency are left unchanged,
        /// whatever rate is supplied for the target itself.
        #[test]
        fn normalization_identity(values in prop::collection::vec(-1_000_000i64..1_000_000, 1..10), bogus in 1i64..90) {
            let ids: Vec<MemberId> = values.iter().map(|_| MemberId::new()).collect();
            let per_member: Vec<BTreeMap<CurrencyCode, Money>> =
                values.iter().map(|v| single("USD", *v)).collect();
            let rates = ExchangeRates::new().with_rate(code("USD"), Decimal::new(bogus, 1)).unwrap();

            let out = normalize(ids.iter().copied().zip(per_member.iter()), &code("USD"), &rates).unwrap();
            let expected: Vec<(MemberId, Money)> =
                ids.iter().copied().zip(values.iter().map(|v| Money::from_minor(*v))).collect();
            prop_assert_eq!(out.balances, expected);
        }
    }
}
