//! Shared-expense ledger (event-sourced group aggregate).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. Callers
//! serialize mutations per group, either by owning the `Group` or through a
//! `LedgerHandle`.

pub mod accumulator;
pub mod expense;
pub mod group;
pub mod handle;
pub mod member;
pub mod membership;

pub use accumulator::{apply_expense, reverse_expense, BalanceAccumulator};
pub use expense::{Expense, ExpenseDraft, ParticipantShare};
pub use group::{
    AddMember, BalanceRow, CreateGroup, ExpenseRecorded, ExpenseRemoved, ExpenseRevised, Group,
    GroupCommand, GroupCreated, GroupEvent, MemberJoined, RecordExpense, RemoveExpense,
    ReviseExpense,
};
pub use handle::LedgerHandle;
pub use member::Member;
pub use membership::Membership;
