//! Shared primitives for the ledger and settlement engine.
//!
//! This crate contains **pure domain** building blocks (no IO, no logging):
//! identifiers, money in integer minor units, currency codes and the error model.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{LedgerError, LedgerResult};
pub use id::{ExpenseId, GroupId, MemberId};
pub use money::{CurrencyCode, Money};
pub use value_object::ValueObject;
