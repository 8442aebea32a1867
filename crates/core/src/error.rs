//! Ledger error model.

use thiserror::Error;

use crate::money::CurrencyCode;

/// Result type used across the ledger engine.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Keep this focused on deterministic, business failures (malformed expenses,
/// broken accounting identities, conflicts). A failed operation never leaves a
/// partially-mutated ledger behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// An expense is malformed (shares don't add up, negative share, duplicate
    /// or non-member participant, ...). The caller must reject the input.
    #[error("invalid expense: {0}")]
    InvalidExpense(String),

    /// Balances handed to the settlement solver do not sum to zero.
    ///
    /// This is an integration error, not user input: the calling operation
    /// fails but the process can carry on.
    #[error("unbalanced ledger in {currency}: balances sum to {residual} minor units")]
    UnbalancedLedger {
        currency: CurrencyCode,
        residual: i128,
    },

    /// A ledger invariant was violated (e.g. stored balances drifted from the
    /// expense history).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A value failed validation (e.g. empty name, non-positive rate).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier or code was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested entity was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict occurred (e.g. stale version, duplicate id, poisoned lock).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl LedgerError {
    pub fn invalid_expense(msg: impl Into<String>) -> Self {
        Self::InvalidExpense(msg.into())
    }

    pub fn unbalanced(currency: CurrencyCode, residual: i128) -> Self {
        Self::UnbalancedLedger { currency, residual }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// True for errors caused by caller input rather than integration bugs.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidExpense(_) | Self::Validation(_) | Self::InvalidId(_)
        )
    }
}
