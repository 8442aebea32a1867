//! Settlement solver: reduces single-currency net balances to a short list of
//! pairwise transfers.
//!
//! Pure computation only: no IO, no ledger mutation.

pub mod solver;
pub mod transfer;

pub use solver::{apply_transfers, compute_settlement};
pub use transfer::{Settlement, Transfer};
