//! Money in integer minor units, and currency codes.
//!
//! All ledger arithmetic is exact: an amount is a signed count of the smallest
//! denomination of its currency (cents for USD, yen for JPY). There is no
//! rounding tolerance anywhere in the accounting identities.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::value_object::ValueObject;

/// Upper-cased currency code such as `USD`, `EUR` or `JPY`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    const MIN_LEN: usize = 2;
    const MAX_LEN: usize = 10;

    /// Parse and normalize a currency code (ASCII alphanumeric, 2..=10 chars).
    pub fn new(code: impl AsRef<str>) -> LedgerResult<Self> {
        let trimmed = code.as_ref().trim();
        let len = trimmed.len();
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&len) {
            return Err(LedgerError::invalid_id(format!(
                "currency code `{trimmed}` must be {}-{} characters",
                Self::MIN_LEN,
                Self::MAX_LEN
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LedgerError::invalid_id(format!(
                "currency code `{trimmed}` must be ASCII alphanumeric"
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of decimal digits in one major unit (2 for USD, 0 for JPY).
    pub fn minor_unit_exponent(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" | "XAF" | "XOF" | "PYG" => 0,
            "KWD" | "BHD" | "OMR" | "JOD" | "TND" | "LYD" | "IQD" => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

impl FromStr for CurrencyCode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl ValueObject for CurrencyCode {}

/// Signed amount in minor units. The currency travels alongside (balances are
/// keyed by currency, expenses and transfers carry one).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn signum(self) -> i64 {
        self.0.signum()
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_neg(self) -> Option<Self> {
        self.0.checked_neg().map(Self)
    }

    /// Parse a major-unit decimal string (`"12.5"`, `"-0.07"`) in `currency`.
    ///
    /// More fractional digits than the currency allows is an error rather than
    /// a silent rounding.
    pub fn parse_major(input: &str, currency: &CurrencyCode) -> LedgerResult<Self> {
        let raw = input.trim();
        let invalid = || LedgerError::validation(format!("`{raw}` is not a valid {currency} amount"));

        let (negative, unsigned) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.strip_prefix('+').unwrap_or(raw)),
        };
        let well_formed = unsigned.chars().any(|c| c.is_ascii_digit())
            && unsigned.chars().all(|c| c.is_ascii_digit() || c == '.')
            && unsigned.matches('.').count() <= 1;
        if !well_formed {
            return Err(invalid());
        }

        let magnitude = match unsigned.strip_prefix('.') {
            Some(fraction) => Decimal::from_str(&format!("0.{fraction}")),
            None => Decimal::from_str(unsigned),
        }
        .map_err(|_| invalid())?;
        let value = if negative { -magnitude } else { magnitude };

        let exponent = currency.minor_unit_exponent();
        if value.scale() > exponent {
            return Err(LedgerError::validation(format!(
                "`{raw}` has more than {exponent} decimal places for {currency}"
            )));
        }
        value
            .checked_mul(Decimal::from(10i64.pow(exponent)))
            .and_then(|minor| minor.to_i64())
            .map(Self)
            .ok_or_else(invalid)
    }

    /// Render in major units with the currency's number of decimals.
    pub fn format_major(self, currency: &CurrencyCode) -> String {
        Decimal::from_i128_with_scale(i128::from(self.0), currency.minor_unit_exponent()).to_string()
    }
}

impl ValueObject for Money {}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}
