use serde::{Deserialize, Serialize};
use uuid::Uuid;

use splitledger_core::{GroupId, LedgerError, LedgerResult};

use crate::event::Event;

/// An applied event plus its position in the group's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    group_id: GroupId,
    /// 1-based position in the group stream; equals the group version after
    /// the event was applied.
    sequence: u64,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(group_id: GroupId, sequence: u64, payload: E) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            group_id,
            sequence,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

/// Append-only event stream for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog<E> {
    group_id: GroupId,
    entries: Vec<EventEnvelope<E>>,
}

impl<E: Event> EventLog<E> {
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            entries: Vec::new(),
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Sequence of the last entry (0 when empty).
    pub fn head(&self) -> u64 {
        self.entries.last().map_or(0, EventEnvelope::sequence)
    }

    /// Fail with `Conflict` unless the log is at `expected_head`.
    pub fn ensure_head(&self, expected_head: u64) -> LedgerResult<()> {
        let head = self.head();
        if head != expected_head {
            return Err(LedgerError::conflict(format!(
                "event log for group {} is at {head}, append expected {expected_head}",
                self.group_id
            )));
        }
        Ok(())
    }

    /// Append `events` that were applied on top of version `expected_head`.
    pub fn append(&mut self, expected_head: u64, events: impl IntoIterator<Item = E>) -> LedgerResult<()> {
        self.ensure_head(expected_head)?;
        let head = expected_head;
        for (offset, event) in events.into_iter().enumerate() {
            let sequence = head + offset as u64 + 1;
            self.entries.push(EventEnvelope::new(self.group_id, sequence, event));
        }
        Ok(())
    }

    pub fn entries(&self) -> &[EventEnvelope<E>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Payloads in stream order.
    pub fn events(&self) -> impl Iterator<Item = &E> {
        self.entries.iter().map(EventEnvelope::payload)
    }
}
