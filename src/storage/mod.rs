//! Storage layer: transaction journal, immutable states and the transactor

pub mod journal;
pub mod state;
pub mod transactor;

pub use journal::{InMemoryJournal, TxJournal, TxRecord};
pub use state::{DbState, IdCounters};
pub use transactor::Applied;
