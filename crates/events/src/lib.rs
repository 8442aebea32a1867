//! Ledger events: the facts a group's state is evolved from.

pub mod envelope;
pub mod event;

pub use envelope::{EventEnvelope, EventLog};
pub use event::Event;
