//! Durable log of saga step attempts.
//!
//! Every step invocation is recorded as a [`Log`] before its forward action
//! runs, and acknowledged once the outcome is known. Sagas are the set of logs
//! sharing a [`CorrelationId`], closed by a single [`SagaOutcome`] marker. The
//! [`Store`] trait is the contract the saga registry depends on;
//! [`MemoryStore`] and [`JournalStore`] implement it.

mod error;
mod journal;
mod log;
mod memory;
mod state;
mod store;

pub use error::StoreError;
pub use journal::JournalStore;
pub use log::{CorrelationId, Log, LogId, LogStatus, Outcome, SagaOutcome};
pub use memory::MemoryStore;
pub use store::Store;
