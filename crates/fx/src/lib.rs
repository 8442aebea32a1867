//! Currency normalization: folds per-currency member balances into one target
//! currency using caller-supplied exchange rates.
//!
//! Rates are never fetched here. A missing rate falls back to 1.0 and is
//! reported back to the caller rather than raised as an error.

pub mod normalizer;
pub mod rates;

pub use normalizer::{normalize, normalize_strict, NormalizedBalances};
pub use rates::{ExchangeRates, RateLookup, RateSource};
