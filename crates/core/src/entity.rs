//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Members and expenses are entities: two expenses with identical amounts are
/// still different expenses.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
