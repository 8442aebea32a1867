//! Shared, thread-safe access to one group.

use std::sync::{Arc, RwLock};

use chrono::Utc;

use splitledger_core::{Aggregate, AggregateRoot, ExpectedVersion, GroupId, LedgerError, LedgerResult};
use splitledger_events::{Event, EventLog};

use crate::group::{CreateGroup, Group, GroupCommand, GroupEvent};

/// Single-writer, many-reader handle around a [`Group`].
///
/// Commands take the write lock for the whole decide+apply step, so each one
/// is atomic with respect to every other command and query on the group.
/// Events applied through the handle are appended to its [`EventLog`].
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    inner: Arc<RwLock<State>>,
}

#[derive(Debug)]
struct State {
    group: Group,
    log: EventLog<GroupEvent>,
    /// Group version the log starts from.
    base_version: u64,
}

impl LedgerHandle {
    /// Wrap an existing group. Its prior history is not part of the log.
    pub fn new(group: Group) -> Self {
        let state = State {
            log: EventLog::new(group.id_typed()),
            base_version: group.version(),
            group,
        };
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Create a fresh group through the handle, so its log starts at the
    /// creation event.
    pub fn create(name: impl Into<String>) -> LedgerResult<Self> {
        let group_id = GroupId::new();
        let handle = Self::new(Group::empty(group_id));
        handle.execute(GroupCommand::CreateGroup(CreateGroup {
            group_id,
            name: name.into(),
            occurred_at: Utc::now(),
        }))?;
        Ok(handle)
    }

    pub fn execute(&self, command: GroupCommand) -> LedgerResult<Vec<GroupEvent>> {
        self.execute_expecting(ExpectedVersion::Any, command)
    }

    /// Execute `command` only if the group is still at `expected`.
    pub fn execute_expecting(
        &self,
        expected: ExpectedVersion,
        command: GroupCommand,
    ) -> LedgerResult<Vec<GroupEvent>> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| LedgerError::conflict("group lock poisoned"))?;
        let State {
            group,
            log,
            base_version,
        } = &mut *state;

        if let Err(err) = expected.check(group.version()) {
            tracing::warn!(group_id = %group.id_typed(), error = %err, "stale command rejected");
            return Err(err);
        }

        let events = group.handle(&command).inspect_err(|err| {
            tracing::info!(group_id = %group.id_typed(), error = %err, "command rejected");
        })?;
        let head = group.version() - *base_version;
        log.ensure_head(head).inspect_err(|err| {
            tracing::error!(group_id = %group.id_typed(), error = %err, "event log out of step with group");
        })?;
        for event in &events {
            group.apply(event);
        }
        log.append(head, events.iter().cloned())?;

        tracing::info!(
            group_id = %group.id_typed(),
            version = group.version(),
            events = ?events.iter().map(Event::event_type).collect::<Vec<_>>(),
            "command executed"
        );
        Ok(events)
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&Group) -> R) -> LedgerResult<R> {
        let state = self
            .inner
            .read()
            .map_err(|_| LedgerError::conflict("group lock poisoned"))?;
        Ok(f(&state.group))
    }

    /// Copy of the events applied through this handle, in order.
    pub fn history(&self) -> LedgerResult<EventLog<GroupEvent>> {
        let state = self
            .inner
            .read()
            .map_err(|_| LedgerError::conflict("group lock poisoned"))?;
        Ok(state.log.clone())
    }

    /// Point-in-time copy of the group.
    pub fn snapshot(&self) -> LedgerResult<Group> {
        self.read(Group::clone)
    }

    pub fn id(&self) -> LedgerResult<GroupId> {
        self.read(Group::id_typed)
    }

    pub fn version(&self) -> LedgerResult<u64> {
        self.read(|group| group.version())
    }
}
