//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// `Money` and `CurrencyCode` are value objects: `Money(3000)` is the same
/// amount wherever it appears, and "eur" normalizes to the same code as "EUR".
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
