use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use splitledger_core::{CurrencyCode, LedgerError, LedgerResult};

/// Rate table keyed by source currency.
///
/// Each rate is "units of target currency per 1 unit of source currency" for
/// the target currency of the request the table was built for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<CurrencyCode, Decimal>",
    into = "BTreeMap<CurrencyCode, Decimal>"
)]
pub struct ExchangeRates {
    rates: BTreeMap<CurrencyCode, Decimal>,
}

/// Where a looked-up rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    /// Source and target are the same currency; always 1.
    Parity,
    /// Taken from the table.
    Supplied,
    /// No entry in the table; 1 was substituted.
    Defaulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLookup {
    pub rate: Decimal,
    pub source: RateSource,
}

impl ExchangeRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I>(pairs: I) -> LedgerResult<Self>
    where
        I: IntoIterator<Item = (CurrencyCode, Decimal)>,
    {
        let mut rates = Self::new();
        for (currency, rate) in pairs {
            rates.insert(currency, rate)?;
        }
        Ok(rates)
    }

    /// Add or replace a rate. Rates must be strictly positive.
    pub fn insert(&mut self, currency: CurrencyCode, rate: Decimal) -> LedgerResult<()> {
        if rate <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "exchange rate for {currency} must be a positive number (got {rate})"
            )));
        }
        self.rates.insert(currency, rate);
        Ok(())
    }

    pub fn with_rate(mut self, currency: CurrencyCode, rate: Decimal) -> LedgerResult<Self> {
        self.insert(currency, rate)?;
        Ok(self)
    }

    pub fn get(&self, currency: &CurrencyCode) -> Option<Decimal> {
        self.rates.get(currency).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CurrencyCode, Decimal)> {
        self.rates.iter().map(|(code, rate)| (code, *rate))
    }

    /// Rate for converting `source` into `target`.
    ///
    /// The target currency always converts at parity, whatever the table says
    /// for it.
    pub fn lookup(&self, source: &CurrencyCode, target: &CurrencyCode) -> RateLookup {
        if source == target {
            return RateLookup {
                rate: Decimal::ONE,
                source: RateSource::Parity,
            };
        }
        match self.get(source) {
            Some(rate) => RateLookup {
                rate,
                source: RateSource::Supplied,
            },
            None => RateLookup {
                rate: Decimal::ONE,
                source: RateSource::Defaulted,
            },
        }
    }

    /// Currencies among `currencies` that would fall back to the default of 1.
    pub fn missing_rates<'a, I>(&self, currencies: I, target: &CurrencyCode) -> Vec<CurrencyCode>
    where
        I: IntoIterator<Item = &'a CurrencyCode>,
    {
        let mut missing: Vec<CurrencyCode> = currencies
            .into_iter()
            .filter(|c| self.lookup(c, target).source == RateSource::Defaulted)
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Fail with `NotFound` if any of `currencies` has no rate towards `target`.
    pub fn require_complete<'a, I>(&self, currencies: I, target: &CurrencyCode) -> LedgerResult<()>
    where
        I: IntoIterator<Item = &'a CurrencyCode>,
    {
        let missing = self.missing_rates(currencies, target);
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = missing.iter().map(CurrencyCode::as_str).collect();
        Err(LedgerError::not_found(format!(
            "exchange rates into {target} for {}",
            names.join(", ")
        )))
    }
}

impl TryFrom<BTreeMap<CurrencyCode, Decimal>> for ExchangeRates {
    type Error = LedgerError;

    fn try_from(value: BTreeMap<CurrencyCode, Decimal>) -> Result<Self, Self::Error> {
        Self::from_pairs(value)
    }
}

impl From<ExchangeRates> for BTreeMap<CurrencyCode, Decimal> {
    fn from(value: ExchangeRates) -> Self {
        value.rates
    }
}
