use async_trait::async_trait;

use crate::error::Result;
use crate::log::{CorrelationId, Log, LogId, Outcome, SagaOutcome};

/// Durable log of step attempts.
///
/// Implementations serialize concurrent access themselves; callers hold no
/// locks across calls. Every mutating operation must be durable before it
/// returns `Ok`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append a pending attempt record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateLog` if the id is already present, or an
    /// infrastructure error if the record could not be persisted.
    async fn log(&self, log: Log) -> Result<()>;

    /// Acknowledge the outcome of an attempt.
    ///
    /// Repeating an ack, or acking after a conflicting terminal ack, is a
    /// no-op rather than an error.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownLog` if no record has this id.
    async fn ack(&self, id: LogId, outcome: Outcome) -> Result<()>;

    /// Attempts of a saga that are still pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn unacknowledged_steps(&self, correlation_id: &CorrelationId) -> Result<Vec<Log>>;

    /// Attempts of every saga without a closing marker, in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn uncommitted_sagas(&self) -> Result<Vec<Log>>;

    /// All attempts of a saga, in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn saga_steps(&self, correlation_id: &CorrelationId) -> Result<Vec<Log>>;

    /// Close a saga. The first close wins; the outcome actually recorded is
    /// returned so callers can detect a lost race.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker could not be persisted.
    async fn close_saga(
        &self,
        correlation_id: &CorrelationId,
        outcome: SagaOutcome,
    ) -> Result<SagaOutcome>;

    /// The closing marker of a saga, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn saga_outcome(&self, correlation_id: &CorrelationId) -> Result<Option<SagaOutcome>>;
}
