//! Transactions.
//!
//! A transaction provides:
//! - **Atomicity**: all-or-nothing commits; a failed commit leaves the
//!   published catalog untouched
//! - **Isolation**: snapshot isolation, readers never see uncommitted changes
//! - **Durability**: commits of an ALIVE catalog are flushed before they
//!   are published
//!
//! Writers only serialize on the commit lock, held while the transaction's
//! layers are merged into a new catalog.

mod state;
mod writes;

pub use state::{CommitOutcome, Transaction, TransactionState};
pub use writes::PendingWrites;
