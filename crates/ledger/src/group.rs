use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splitledger_core::{
    Aggregate, AggregateRoot, CurrencyCode, ExpenseId, GroupId, LedgerError, LedgerResult,
    MemberId, Money,
};
use splitledger_events::Event;
use splitledger_fx::{normalize, ExchangeRates, NormalizedBalances};
use splitledger_settlement::{compute_settlement, Settlement};

use crate::accumulator::BalanceAccumulator;
use crate::expense::Expense;
use crate::member::Member;
use crate::membership::Membership;

/// Aggregate root: a group of members sharing expenses.
///
/// The group exclusively owns its memberships (and their balances) and its
/// expense history. All mutation goes through [`Aggregate::handle`] +
/// [`Aggregate::apply`], or [`Group::execute`] which does both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    id: GroupId,
    name: String,
    memberships: Vec<Membership>,
    expenses: Vec<Expense>,
    version: u64,
    created: bool,
}

/// One row of the tabular balance export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub member_id: MemberId,
    pub member_name: String,
    pub currency: CurrencyCode,
    pub balance: Money,
}

/// Command: CreateGroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGroup {
    pub group_id: GroupId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddMember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMember {
    pub group_id: GroupId,
    pub member: Member,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordExpense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExpense {
    pub group_id: GroupId,
    pub expense: Expense,
}

/// Command: RemoveExpense (reverses its postings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveExpense {
    pub group_id: GroupId,
    pub expense_id: ExpenseId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseExpense (replaces the expense with the same id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseExpense {
    pub group_id: GroupId,
    pub expense: Expense,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupCommand {
    CreateGroup(CreateGroup),
    AddMember(AddMember),
    RecordExpense(RecordExpense),
    RemoveExpense(RemoveExpense),
    ReviseExpense(ReviseExpense),
}

/// Event: GroupCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreated {
    pub group_id: GroupId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MemberJoined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberJoined {
    pub group_id: GroupId,
    pub member: Member,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenseRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecorded {
    pub group_id: GroupId,
    pub expense: Expense,
}

/// Event: ExpenseRemoved. Carries the removed expense so it can be reversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRemoved {
    pub group_id: GroupId,
    pub expense: Expense,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenseRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRevised {
    pub group_id: GroupId,
    pub previous: Expense,
    pub revised: Expense,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupEvent {
    GroupCreated(GroupCreated),
    MemberJoined(MemberJoined),
    ExpenseRecorded(ExpenseRecorded),
    ExpenseRemoved(ExpenseRemoved),
    ExpenseRevised(ExpenseRevised),
}

impl GroupEvent {
    pub fn group_id(&self) -> GroupId {
        match self {
            GroupEvent::GroupCreated(e) => e.group_id,
            GroupEvent::MemberJoined(e) => e.group_id,
            GroupEvent::ExpenseRecorded(e) => e.group_id,
            GroupEvent::ExpenseRemoved(e) => e.group_id,
            GroupEvent::ExpenseRevised(e) => e.group_id,
        }
    }
}

impl Event for GroupEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GroupEvent::GroupCreated(_) => "ledger.group.created",
            GroupEvent::MemberJoined(_) => "ledger.group.member_joined",
            GroupEvent::ExpenseRecorded(_) => "ledger.group.expense_recorded",
            GroupEvent::ExpenseRemoved(_) => "ledger.group.expense_removed",
            GroupEvent::ExpenseRevised(_) => "ledger.group.expense_revised",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GroupEvent::GroupCreated(e) => e.occurred_at,
            GroupEvent::MemberJoined(e) => e.occurred_at,
            GroupEvent::ExpenseRecorded(e) => e.expense.occurred_at(),
            GroupEvent::ExpenseRemoved(e) => e.occurred_at,
            GroupEvent::ExpenseRevised(e) => e.revised.occurred_at(),
        }
    }
}

/// One accumulator posting, in order.
#[derive(Debug, Clone, Copy)]
enum Posting<'e> {
    Apply(&'e Expense),
    Reverse(&'e Expense),
}

impl Group {
    /// Empty aggregate for rehydration.
    pub fn empty(id: GroupId) -> Self {
        Self {
            id,
            name: String::new(),
            memberships: Vec::new(),
            expenses: Vec::new(),
            version: 0,
            created: false,
        }
    }

    /// Create a group with a fresh id.
    pub fn new(name: impl Into<String>) -> LedgerResult<Self> {
        let id = GroupId::new();
        let mut group = Self::empty(id);
        group.execute(GroupCommand::CreateGroup(CreateGroup {
            group_id: id,
            name: name.into(),
            occurred_at: Utc::now(),
        }))?;
        Ok(group)
    }

    /// Rebuild a group by replaying its event stream, then verify the
    /// replayed balances against the replayed expense history.
    ///
    /// Each event is checked against the state built so far with the same
    /// rules commands are decided by; the first one that does not fit fails
    /// the whole replay.
    pub fn from_history<'e>(
        id: GroupId,
        events: impl IntoIterator<Item = &'e GroupEvent>,
    ) -> LedgerResult<Self> {
        let mut group = Self::empty(id);
        for event in events {
            if event.group_id() != id {
                return Err(LedgerError::conflict(format!(
                    "event for group {} in the stream of group {id}",
                    event.group_id()
                )));
            }
            group.check_event(event).inspect_err(|err| {
                tracing::warn!(
                    group_id = %id,
                    version = group.version,
                    event_type = event.event_type(),
                    error = %err,
                    "event stream rejected"
                );
            })?;
            group.apply(event);
        }
        group.check_zero_sum()?;
        group.audit()?;
        Ok(group)
    }

    /// Decide and apply a command; returns the applied events.
    pub fn execute(&mut self, command: GroupCommand) -> LedgerResult<Vec<GroupEvent>> {
        let events = self.handle(&command)?;
        for event in &events {
            self.apply(event);
            tracing::debug!(
                group_id = %self.id,
                event_type = event.event_type(),
                version = self.version,
                "group event applied"
            );
        }
        Ok(events)
    }

    /// Add a member (convenience over [`GroupCommand::AddMember`]).
    pub fn add_member(&mut self, member: Member) -> LedgerResult<MemberId> {
        let member_id = member.id_typed();
        self.execute(GroupCommand::AddMember(AddMember {
            group_id: self.id,
            member,
            occurred_at: Utc::now(),
        }))?;
        Ok(member_id)
    }

    /// Record an expense (convenience over [`GroupCommand::RecordExpense`]).
    pub fn record_expense(&mut self, expense: Expense) -> LedgerResult<ExpenseId> {
        let expense_id = expense.id_typed();
        self.execute(GroupCommand::RecordExpense(RecordExpense {
            group_id: self.id,
            expense,
        }))?;
        Ok(expense_id)
    }

    /// Remove an expense and reverse its postings.
    pub fn remove_expense(&mut self, expense_id: ExpenseId) -> LedgerResult<()> {
        self.execute(GroupCommand::RemoveExpense(RemoveExpense {
            group_id: self.id,
            expense_id,
            occurred_at: Utc::now(),
        }))?;
        Ok(())
    }

    /// Replace the expense sharing `expense`'s id.
    pub fn revise_expense(&mut self, expense: Expense) -> LedgerResult<()> {
        self.execute(GroupCommand::ReviseExpense(ReviseExpense {
            group_id: self.id,
            expense,
        }))?;
        Ok(())
    }

    pub fn id_typed(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn memberships(&self) -> &[Membership] {
        &self.memberships
    }

    pub fn membership(&self, member: MemberId) -> Option<&Membership> {
        self.memberships.iter().find(|m| m.member_id() == member)
    }

    /// Members in join order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.memberships.iter().map(Membership::member)
    }

    /// First member whose display name matches (case-insensitive).
    pub fn member_by_name(&self, name: &str) -> Option<&Member> {
        self.members()
            .find(|m| m.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    pub fn expense(&self, expense_id: ExpenseId) -> Option<&Expense> {
        self.expenses.iter().find(|e| e.id_typed() == expense_id)
    }

    /// Every currency that appears in a balance or an expense.
    pub fn currencies(&self) -> BTreeSet<CurrencyCode> {
        self.memberships
            .iter()
            .flat_map(|m| m.balances().keys().cloned())
            .chain(self.expenses.iter().map(|e| e.currency().clone()))
            .collect()
    }

    /// Every member's balance in `currency`, in join order (zero if untouched).
    pub fn balances(&self, currency: &CurrencyCode) -> Vec<(MemberId, Money)> {
        self.memberships
            .iter()
            .map(|m| (m.member_id(), m.balance(currency)))
            .collect()
    }

    /// Tabular (member, currency, balance) projection, member-major.
    pub fn balance_sheet(&self) -> Vec<BalanceRow> {
        let currencies = self.currencies();
        self.memberships
            .iter()
            .flat_map(|m| {
                currencies.iter().map(move |currency| BalanceRow {
                    member_id: m.member_id(),
                    member_name: m.member().name().to_string(),
                    currency: currency.clone(),
                    balance: m.balance(currency),
                })
            })
            .collect()
    }

    /// Verify the accounting identity: each currency's balances sum to zero.
    pub fn check_zero_sum(&self) -> LedgerResult<()> {
        for currency in self.currencies() {
            let residual: i128 = self
                .memberships
                .iter()
                .map(|m| m.balance(&currency).minor() as i128)
                .sum();
            if residual != 0 {
                return Err(LedgerError::unbalanced(currency, residual));
            }
        }
        Ok(())
    }

    /// Rebuild balances from the expense history and compare them with the
    /// stored memberships.
    pub fn audit(&self) -> LedgerResult<()> {
        let mut rebuilt: Vec<Membership> = self.memberships.iter().map(Membership::cleared).collect();
        for expense in &self.expenses {
            BalanceAccumulator::new(&mut rebuilt).apply(expense)?;
        }

        for (stored, replayed) in self.memberships.iter().zip(rebuilt.iter()) {
            let currencies: BTreeSet<&CurrencyCode> = stored
                .balances()
                .keys()
                .chain(replayed.balances().keys())
                .collect();
            for currency in currencies {
                let (have, want) = (stored.balance(currency), replayed.balance(currency));
                if have != want {
                    return Err(LedgerError::invariant(format!(
                        "stored {currency} balance of {} is {have}, expense history gives {want}",
                        stored.member().name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Transfers that settle `currency`.
    pub fn settle(&self, currency: &CurrencyCode) -> LedgerResult<Settlement> {
        compute_settlement(currency, &self.balances(currency))
    }

    /// One settlement per currency, in currency-code order.
    pub fn settle_all(&self) -> LedgerResult<Vec<Settlement>> {
        self.currencies()
            .iter()
            .map(|currency| self.settle(currency))
            .collect()
    }

    /// All balances folded into `target` using `rates`.
    pub fn normalized(
        &self,
        target: &CurrencyCode,
        rates: &ExchangeRates,
    ) -> LedgerResult<NormalizedBalances> {
        normalize(
            self.memberships.iter().map(|m| (m.member_id(), m.balances())),
            target,
            rates,
        )
    }

    /// Normalize into `target`, then settle. Inconsistent rates that leave a
    /// residual surface as `UnbalancedLedger`.
    pub fn settle_in(&self, target: &CurrencyCode, rates: &ExchangeRates) -> LedgerResult<Settlement> {
        let normalized = self.normalized(target, rates)?;
        compute_settlement(target, &normalized.balances)
    }

    /// Per-member balance maps, for callers doing their own normalization.
    pub fn member_balances(&self) -> BTreeMap<MemberId, BTreeMap<CurrencyCode, Money>> {
        self.memberships
            .iter()
            .map(|m| (m.member_id(), m.balances().clone()))
            .collect()
    }
}

impl AggregateRoot for Group {
    type Id = GroupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Group {
    type Command = GroupCommand;
    type Event = GroupEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            GroupEvent::GroupCreated(e) => {
                if self.created {
                    tracing::error!(group_id = %self.id, "group created twice; event ignored");
                    return;
                }
                self.id = e.group_id;
                self.name = e.name.clone();
                self.created = true;
            }
            GroupEvent::MemberJoined(e) => {
                self.memberships.push(Membership::new(e.member.clone()));
            }
            GroupEvent::ExpenseRecorded(e) => {
                if !self.commit(&[Posting::Apply(&e.expense)]) {
                    return;
                }
                self.expenses.push(e.expense.clone());
            }
            GroupEvent::ExpenseRemoved(e) => {
                if !self.commit(&[Posting::Reverse(&e.expense)]) {
                    return;
                }
                let removed = e.expense.id_typed();
                self.expenses.retain(|x| x.id_typed() != removed);
            }
            GroupEvent::ExpenseRevised(e) => {
                if !self.commit(&[Posting::Reverse(&e.previous), Posting::Apply(&e.revised)]) {
                    return;
                }
                let revised = e.revised.id_typed();
                if let Some(slot) = self.expenses.iter_mut().find(|x| x.id_typed() == revised) {
                    *slot = e.revised.clone();
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            GroupCommand::CreateGroup(cmd) => self.handle_create(cmd),
            GroupCommand::AddMember(cmd) => self.handle_add_member(cmd),
            GroupCommand::RecordExpense(cmd) => self.handle_record(cmd),
            GroupCommand::RemoveExpense(cmd) => self.handle_remove(cmd),
            GroupCommand::ReviseExpense(cmd) => self.handle_revise(cmd),
        }
    }
}

impl Group {
    fn ensure_target(&self, group_id: GroupId) -> LedgerResult<()> {
        if !self.created {
            return Err(LedgerError::validation(format!("group {group_id} has not been created")));
        }
        if self.id != group_id {
            return Err(LedgerError::conflict(format!(
                "command for group {group_id} sent to group {}",
                self.id
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateGroup) -> LedgerResult<Vec<GroupEvent>> {
        if self.created {
            return Err(LedgerError::validation(format!("group {} already exists", self.id)));
        }
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("group name must not be empty"));
        }
        Ok(vec![GroupEvent::GroupCreated(GroupCreated {
            group_id: cmd.group_id,
            name: name.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_member(&self, cmd: &AddMember) -> LedgerResult<Vec<GroupEvent>> {
        self.ensure_target(cmd.group_id)?;
        let member_id = cmd.member.id_typed();
        if self.membership(member_id).is_some() {
            return Err(LedgerError::validation(format!(
                "member {member_id} already belongs to group {}",
                self.id
            )));
        }
        Ok(vec![GroupEvent::MemberJoined(MemberJoined {
            group_id: cmd.group_id,
            member: cmd.member.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordExpense) -> LedgerResult<Vec<GroupEvent>> {
        self.ensure_target(cmd.group_id)?;
        let expense_id = cmd.expense.id_typed();
        if self.expense(expense_id).is_some() {
            return Err(LedgerError::conflict(format!(
                "expense {expense_id} is already recorded"
            )));
        }
        self.simulate(&[Posting::Apply(&cmd.expense)])?;
        Ok(vec![GroupEvent::ExpenseRecorded(ExpenseRecorded {
            group_id: cmd.group_id,
            expense: cmd.expense.clone(),
        })])
    }

    fn handle_remove(&self, cmd: &RemoveExpense) -> LedgerResult<Vec<GroupEvent>> {
        self.ensure_target(cmd.group_id)?;
        let expense = self
            .expense(cmd.expense_id)
            .ok_or_else(|| LedgerError::not_found(format!("expense {}", cmd.expense_id)))?;
        self.simulate(&[Posting::Reverse(expense)])?;
        Ok(vec![GroupEvent::ExpenseRemoved(ExpenseRemoved {
            group_id: cmd.group_id,
            expense: expense.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(&self, cmd: &ReviseExpense) -> LedgerResult<Vec<GroupEvent>> {
        self.ensure_target(cmd.group_id)?;
        let expense_id = cmd.expense.id_typed();
        let previous = self
            .expense(expense_id)
            .ok_or_else(|| LedgerError::not_found(format!("expense {expense_id}")))?;
        self.simulate(&[Posting::Reverse(previous), Posting::Apply(&cmd.expense)])?;
        Ok(vec![GroupEvent::ExpenseRevised(ExpenseRevised {
            group_id: cmd.group_id,
            previous: previous.clone(),
            revised: cmd.expense.clone(),
        })])
    }

    /// Whether `event` can follow the current state. Mirrors the checks the
    /// command handlers make before emitting the same event.
    fn check_event(&self, event: &GroupEvent) -> LedgerResult<()> {
        match event {
            GroupEvent::GroupCreated(e) => {
                if self.created {
                    return Err(LedgerError::validation(format!("group {} already exists", self.id)));
                }
                if e.name.trim().is_empty() {
                    return Err(LedgerError::validation("group name must not be empty"));
                }
                Ok(())
            }
            GroupEvent::MemberJoined(e) => {
                self.ensure_target(e.group_id)?;
                let member_id = e.member.id_typed();
                if self.membership(member_id).is_some() {
                    return Err(LedgerError::validation(format!(
                        "member {member_id} already belongs to group {}",
                        self.id
                    )));
                }
                Ok(())
            }
            GroupEvent::ExpenseRecorded(e) => {
                self.ensure_target(e.group_id)?;
                let expense_id = e.expense.id_typed();
                if self.expense(expense_id).is_some() {
                    return Err(LedgerError::conflict(format!(
                        "expense {expense_id} is already recorded"
                    )));
                }
                self.simulate(&[Posting::Apply(&e.expense)]).map(drop)
            }
            GroupEvent::ExpenseRemoved(e) => {
                self.ensure_target(e.group_id)?;
                self.ensure_recorded(&e.expense)?;
                self.simulate(&[Posting::Reverse(&e.expense)]).map(drop)
            }
            GroupEvent::ExpenseRevised(e) => {
                self.ensure_target(e.group_id)?;
                self.ensure_recorded(&e.previous)?;
                if e.revised.id_typed() != e.previous.id_typed() {
                    return Err(LedgerError::invariant(format!(
                        "expense {} revised into expense {}",
                        e.previous.id_typed(),
                        e.revised.id_typed()
                    )));
                }
                self.simulate(&[Posting::Reverse(&e.previous), Posting::Apply(&e.revised)])
                    .map(drop)
            }
        }
    }

    /// `expense` must be in the history exactly as recorded.
    fn ensure_recorded(&self, expense: &Expense) -> LedgerResult<()> {
        let expense_id = expense.id_typed();
        match self.expense(expense_id) {
            None => Err(LedgerError::not_found(format!("expense {expense_id}"))),
            Some(recorded) if recorded != expense => Err(LedgerError::invariant(format!(
                "expense {expense_id} does not match the recorded expense"
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Run `postings` against a copy of the memberships.
    ///
    /// After a reversal, zero balances in currencies the member no longer
    /// takes part in are dropped, so removing the last expense in a currency
    /// leaves no trace of it.
    fn simulate(&self, postings: &[Posting<'_>]) -> LedgerResult<Vec<Membership>> {
        let mut scratch = self.memberships.clone();
        let mut accumulator = BalanceAccumulator::new(&mut scratch);
        for posting in postings {
            match posting {
                Posting::Apply(expense) => accumulator.apply(expense)?,
                Posting::Reverse(expense) => accumulator.reverse(expense)?,
            }
        }
        if postings.iter().any(|p| matches!(p, Posting::Reverse(_))) {
            self.prune_unreferenced(&mut scratch, postings);
        }
        Ok(scratch)
    }

    fn prune_unreferenced(&self, memberships: &mut [Membership], postings: &[Posting<'_>]) {
        let reversed: BTreeSet<ExpenseId> = postings
            .iter()
            .filter_map(|p| match p {
                Posting::Reverse(expense) => Some(expense.id_typed()),
                Posting::Apply(_) => None,
            })
            .collect();
        let applied = postings.iter().filter_map(|p| match p {
            Posting::Apply(expense) => Some(*expense),
            Posting::Reverse(_) => None,
        });

        let mut referenced: BTreeSet<(MemberId, CurrencyCode)> = BTreeSet::new();
        let mut touch = |expense: &Expense| {
            let currency = expense.currency();
            referenced.insert((expense.payer(), currency.clone()));
            referenced.extend(expense.participants().map(|m| (m, currency.clone())));
        };
        self.expenses
            .iter()
            .filter(|e| !reversed.contains(&e.id_typed()))
            .for_each(&mut touch);
        applied.for_each(&mut touch);

        for membership in memberships {
            let member = membership.member_id();
            membership.retain_balances(|currency, balance| {
                !balance.is_zero() || referenced.contains(&(member, currency.clone()))
            });
        }
    }

    /// Apply `postings` all-or-nothing. Returns false (state untouched) if the
    /// event does not fit the current balances, which `handle` rules out.
    fn commit(&mut self, postings: &[Posting<'_>]) -> bool {
        match self.simulate(postings) {
            Ok(memberships) => {
                self.memberships = memberships;
                true
            }
            Err(err) => {
                tracing::error!(group_id = %self.id, error = %err, "event could not be applied");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expense::{ExpenseDraft, ParticipantShare};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn eur() -> CurrencyCode {
        CurrencyCode::new("EUR").unwrap()
    }

    fn group_with(names: &[&str]) -> (Group, Vec<MemberId>) {
        let mut group = Group::new("Trip").unwrap();
        let ids = names
            .iter()
            .map(|n| group.add_member(Member::new(*n).unwrap()).unwrap())
            .collect();
        (group, ids)
    }

    fn even(amount: i64, currency: CurrencyCode, payer: MemberId, with: &[MemberId]) -> Expense {
        let draft = ExpenseDraft::new("Shared", Money::from_minor(amount), currency, payer);
        Expense::split_equally(draft, with).unwrap()
    }

    #[test]
    fn create_emits_event_and_sets_version() {
        let group = Group::new("  Flatmates ").unwrap();
        assert!(group.is_created());
        assert_eq!(group.name(), "Flatmates");
        assert_eq!(group.version(), 1);
    }

    #[test]
    fn create_twice_is_rejected() {
        let group = Group::new("Trip").unwrap();
        let err = group
            .handle(&GroupCommand::CreateGroup(CreateGroup {
                group_id: group.id_typed(),
                name: "Again".into(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn commands_before_creation_are_rejected() {
        let mut group = Group::empty(GroupId::new());
        let err = group.add_member(Member::new("A").unwrap()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn duplicate_member_is_rejected() {
        let (mut group, ids) = group_with(&["A"]);
        let again = Member::with_id(ids[0], "A again").unwrap();
        assert!(matches!(group.add_member(again), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn record_emits_event_and_updates_balances() {
        let (mut group, ids) = group_with(&["A", "B", "C"]);
        let expense = even(9000, usd(), ids[0], &ids);
        let events = group
            .execute(GroupCommand::RecordExpense(RecordExpense {
                group_id: group.id_typed(),
                expense: expense.clone(),
            }))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "ledger.group.expense_recorded");
        assert_eq!(
            group.balances(&usd()),
            vec![
                (ids[0], Money::from_minor(6000)),
                (ids[1], Money::from_minor(-3000)),
                (ids[2], Money::from_minor(-3000)),
            ]
        );
        assert_eq!(group.expenses(), &[expense]);
    }

    #[test]
    fn rejected_expense_leaves_group_untouched() {
        let (mut group, ids) = group_with(&["A", "B"]);
        group.record_expense(even(1000, usd(), ids[0], &ids)).unwrap();
        let before = group.clone();

        let outsider = MemberId::new();
        let err = group
            .record_expense(even(500, usd(), ids[1], &[ids[0], outsider]))
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidExpense(_)));
        assert_eq!(group, before);
    }

    #[test]
    fn duplicate_expense_id_is_a_conflict() {
        let (mut group, ids) = group_with(&["A", "B"]);
        let expense = even(1000, usd(), ids[0], &ids);
        group.record_expense(expense.clone()).unwrap();
        assert!(matches!(group.record_expense(expense), Err(LedgerError::Conflict(_))));
    }

    #[test]
    fn remove_restores_balances() {
        let (mut group, ids) = group_with(&["A", "B", "C"]);
        group.record_expense(even(1200, usd(), ids[0], &ids)).unwrap();
        let before = group.balances(&usd());

        let expense_id = group.record_expense(even(999, usd(), ids[2], &ids)).unwrap();
        group.remove_expense(expense_id).unwrap();

        assert_eq!(group.balances(&usd()), before);
        assert_eq!(group.expenses().len(), 1);
        assert!(matches!(
            group.remove_expense(expense_id),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn revise_swaps_postings_atomically() {
        let (mut group, ids) = group_with(&["A", "B"]);
        let original = even(1000, usd(), ids[0], &ids);
        group.record_expense(original.clone()).unwrap();

        let draft = ExpenseDraft {
            id: original.id_typed(),
            description: "Corrected".into(),
            amount: Money::from_minor(400),
            currency: eur(),
            payer: ids[1],
            occurred_at: Utc::now(),
        };
        let revised = Expense::with_shares(
            draft,
            vec![ParticipantShare::new(ids[0], Money::from_minor(400))],
        )
        .unwrap();
        group.revise_expense(revised.clone()).unwrap();

        assert_eq!(group.balances(&usd()), vec![(ids[0], Money::ZERO), (ids[1], Money::ZERO)]);
        assert_eq!(
            group.balances(&eur()),
            vec![(ids[0], Money::from_minor(-400)), (ids[1], Money::from_minor(400))]
        );
        assert_eq!(group.expense(original.id_typed()), Some(&revised));
        assert_eq!(group.currencies(), BTreeSet::from([eur()]));
        group.audit().unwrap();
    }

    #[test]
    fn removing_the_last_expense_in_a_currency_leaves_no_trace() {
        let (mut group, ids) = group_with(&["A", "B"]);
        group.record_expense(even(1000, usd(), ids[0], &ids)).unwrap();
        let before = group.clone();

        let expense_id = group.record_expense(even(600, eur(), ids[1], &ids)).unwrap();
        group.remove_expense(expense_id).unwrap();

        assert_eq!(group.memberships(), before.memberships());
        assert_eq!(group.expenses(), before.expenses());
        assert_eq!(group.balance_sheet(), before.balance_sheet());
        assert_eq!(group.settle_all().unwrap(), before.settle_all().unwrap());
    }

    #[test]
    fn zero_balances_of_remaining_expenses_are_kept() {
        // A pays for themself, so their EUR balance is zero but still in use.
        let (mut group, ids) = group_with(&["A", "B"]);
        group.record_expense(even(300, eur(), ids[0], &[ids[0]])).unwrap();
        let expense_id = group.record_expense(even(1000, usd(), ids[0], &ids)).unwrap();
        group.remove_expense(expense_id).unwrap();

        assert_eq!(group.currencies(), BTreeSet::from([eur()]));
        assert_eq!(group.memberships()[0].balances().get(&eur()), Some(&Money::ZERO));
        assert_eq!(group.settle_all().unwrap().len(), 1);
    }

    #[test]
    fn failed_revision_keeps_the_original() {
        let (mut group, ids) = group_with(&["A", "B"]);
        let original = even(1000, usd(), ids[0], &ids);
        group.record_expense(original.clone()).unwrap();
        let before = group.clone();

        let draft = ExpenseDraft {
            id: original.id_typed(),
            description: "Bad".into(),
            amount: Money::from_minor(100),
            currency: usd(),
            payer: MemberId::new(),
            occurred_at: Utc::now(),
        };
        let bad = Expense::with_shares(draft, vec![ParticipantShare::new(ids[0], Money::from_minor(100))])
            .unwrap();

        assert!(group.revise_expense(bad).is_err());
        assert_eq!(group, before);
    }

    #[test]
    fn balance_sheet_covers_every_member_and_currency() {
        let (mut group, ids) = group_with(&["A", "B"]);
        group.record_expense(even(1000, usd(), ids[0], &ids)).unwrap();
        group.record_expense(even(300, eur(), ids[1], &[ids[1]])).unwrap();

        let rows = group.balance_sheet();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].member_name, "A");
        assert_eq!(rows[0].currency, eur());
        assert_eq!(rows[0].balance, Money::ZERO);
        assert_eq!(rows[1].currency, usd());
        assert_eq!(rows[1].balance, Money::from_minor(500));
    }

    #[test]
    fn audit_detects_tampered_balances() {
        let (mut group, ids) = group_with(&["A", "B"]);
        group.record_expense(even(1000, usd(), ids[0], &ids)).unwrap();
        group.audit().unwrap();

        group.memberships[0].set_balance(&usd(), Money::from_minor(1));
        assert!(matches!(group.audit(), Err(LedgerError::InvariantViolation(_))));
        assert!(matches!(
            group.check_zero_sum(),
            Err(LedgerError::UnbalancedLedger { .. })
        ));
    }

    #[test]
    fn settle_all_returns_one_settlement_per_currency() {
        let (mut group, ids) = group_with(&["A", "B", "C"]);
        group.record_expense(even(9000, usd(), ids[0], &ids)).unwrap();
        group.record_expense(even(2000, eur(), ids[1], &[ids[1], ids[2]])).unwrap();

        let settlements = group.settle_all().unwrap();
        assert_eq!(settlements.len(), 2);
        assert_eq!(settlements[0].currency, eur());
        assert_eq!(settlements[0].len(), 1);
        assert_eq!(settlements[1].currency, usd());
        assert_eq!(settlements[1].len(), 2);
    }

    #[test]
    fn settle_in_target_currency_uses_rates() {
        let (mut group, ids) = group_with(&["A", "B"]);
        group.record_expense(even(1000, usd(), ids[0], &ids)).unwrap();
        group.record_expense(even(1000, eur(), ids[0], &ids)).unwrap();
        let rates = ExchangeRates::new().with_rate(eur(), dec!(1.2)).unwrap();

        let settlement = group.settle_in(&usd(), &rates).unwrap();
        assert_eq!(settlement.len(), 1);
        assert_eq!(settlement.transfers[0].from, ids[1]);
        assert_eq!(settlement.transfers[0].amount, Money::from_minor(500 + 600));
    }

    #[test]
    fn events_replay_into_the_same_state() {
        let mut group = Group::empty(GroupId::new());
        let id = group.id_typed();
        let mut log = group
            .execute(GroupCommand::CreateGroup(CreateGroup {
                group_id: id,
                name: "Replay".into(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        let a = Member::new("A").unwrap();
        let b = Member::new("B").unwrap();
        let ids = [a.id_typed(), b.id_typed()];
        for member in [a, b] {
            log.extend(
                group
                    .execute(GroupCommand::AddMember(AddMember {
                        group_id: id,
                        member,
                        occurred_at: Utc::now(),
                    }))
                    .unwrap(),
            );
        }
        log.extend(
            group
                .execute(GroupCommand::RecordExpense(RecordExpense {
                    group_id: id,
                    expense: even(500, usd(), ids[0], &ids),
                }))
                .unwrap(),
        );

        let replayed = Group::from_history(id, &log).unwrap();
        assert_eq!(replayed, group);
        assert_eq!(replayed.version(), 4);

        let foreign = Group::new("Other").unwrap();
        let mut mixed = log.clone();
        mixed.push(GroupEvent::GroupCreated(GroupCreated {
            group_id: foreign.id_typed(),
            name: "Other".into(),
            occurred_at: Utc::now(),
        }));
        assert!(matches!(Group::from_history(id, &mixed), Err(LedgerError::Conflict(_))));
    }

    fn created(id: GroupId, name: &str) -> GroupEvent {
        GroupEvent::GroupCreated(GroupCreated {
            group_id: id,
            name: name.into(),
            occurred_at: Utc::now(),
        })
    }

    fn joined(id: GroupId, member: &Member) -> GroupEvent {
        GroupEvent::MemberJoined(MemberJoined {
            group_id: id,
            member: member.clone(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn replay_rejects_an_expense_outside_the_group() {
        let id = GroupId::new();
        let a = Member::new("A").unwrap();
        let outsider = MemberId::new();
        let stream = vec![
            created(id, "Replay"),
            joined(id, &a),
            GroupEvent::ExpenseRecorded(ExpenseRecorded {
                group_id: id,
                expense: even(1000, usd(), a.id_typed(), &[a.id_typed(), outsider]),
            }),
        ];

        let err = Group::from_history(id, &stream).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidExpense(_)));
    }

    #[test]
    fn replay_rejects_a_second_creation() {
        let id = GroupId::new();
        let stream = vec![created(id, "First"), created(id, "Second")];

        let err = Group::from_history(id, &stream).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let mut group = Group::from_history(id, &stream[..1]).unwrap();
        group.apply(&stream[1]);
        assert_eq!(group.name(), "First");
        assert_eq!(group.version(), 1);
    }

    #[test]
    fn replay_rejects_events_that_do_not_follow_the_history() {
        let id = GroupId::new();
        let a = Member::new("A").unwrap();
        let b = Member::new("B").unwrap();
        let ids = [a.id_typed(), b.id_typed()];
        let expense = even(800, usd(), ids[0], &ids);

        let before_creation = vec![joined(id, &a)];
        assert!(matches!(
            Group::from_history(id, &before_creation),
            Err(LedgerError::Validation(_))
        ));

        let joined_twice = vec![created(id, "T"), joined(id, &a), joined(id, &a)];
        assert!(matches!(
            Group::from_history(id, &joined_twice),
            Err(LedgerError::Validation(_))
        ));

        let removed_unknown = vec![
            created(id, "T"),
            joined(id, &a),
            joined(id, &b),
            GroupEvent::ExpenseRemoved(ExpenseRemoved {
                group_id: id,
                expense: expense.clone(),
                occurred_at: Utc::now(),
            }),
        ];
        assert!(matches!(
            Group::from_history(id, &removed_unknown),
            Err(LedgerError::NotFound(_))
        ));

        let recorded = GroupEvent::ExpenseRecorded(ExpenseRecorded {
            group_id: id,
            expense: expense.clone(),
        });
        let recorded_twice = vec![
            created(id, "T"),
            joined(id, &a),
            joined(id, &b),
            recorded.clone(),
            recorded,
        ];
        assert!(matches!(
            Group::from_history(id, &recorded_twice),
            Err(LedgerError::Conflict(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: every currency sums to zero after any sequence of
        /// recorded and removed expenses, and the history audit holds.
        #[test]
        fn group_stays_zero_sum(
            ops in prop::collection::vec((0usize..3, 1i64..100_000, any::<bool>(), any::<bool>()), 1..30)
        ) {
            let (mut group, ids) = group_with(&["A", "B", "C"]);
            let mut recorded: Vec<ExpenseId> = Vec::new();

            for (payer, amount, in_euros, remove_last) in ops {
                if remove_last {
                    if let Some(expense_id) = recorded.pop() {
                        group.remove_expense(expense_id).unwrap();
                    }
                } else {
                    let currency = if in_euros { eur() } else { usd() };
                    recorded.push(group.record_expense(even(amount, currency, ids[payer], &ids)).unwrap());
                }
                prop_assert!(group.check_zero_sum().is_ok());
            }
            prop_assert!(group.audit().is_ok());
        }
    }
}
