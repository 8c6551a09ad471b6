use std::fmt;
use std::sync::Arc;

use saga_store::{CorrelationId, LogStatus, SagaOutcome};
use tracing::debug;

use crate::context::SagaContext;
use crate::error::{Result, SagaError};
use crate::registry::Registry;

/// State of a saga as derived from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransactionState {
    /// Not closed and nothing compensated yet.
    Open,
    /// Not closed, but at least one compensation was attempted.
    Compensating,
    Committed,
    Compensated,
}

impl TransactionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Compensating => "compensating",
            Self::Committed => "committed",
            Self::Compensated => "compensated",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle of one saga instance.
///
/// Owned by the caller driving the saga; the registry keeps no copy. All
/// state changes go through the store, so concurrent handles for the same
/// saga observe the same outcome.
pub struct Transaction {
    registry: Arc<Registry>,
    correlation_id: CorrelationId,
    ctx: SagaContext,
}

impl Transaction {
    pub(crate) fn new(
        registry: Arc<Registry>,
        correlation_id: CorrelationId,
        ctx: SagaContext,
    ) -> Self {
        Self {
            registry,
            correlation_id,
            ctx,
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Confirm that every intended step succeeded.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::AlreadyCompensated` if compensation closed the saga
    /// first, and `SagaError::Persistence` if the store is unavailable.
    pub async fn commit(&self) -> Result<()> {
        let recorded = self
            .registry
            .store()
            .close_saga(&self.correlation_id, SagaOutcome::Committed)
            .await?;
        match recorded {
            SagaOutcome::Committed => {
                debug!(saga = %self.correlation_id, "saga committed");
                Ok(())
            }
            _ => Err(SagaError::AlreadyCompensated(self.correlation_id.clone())),
        }
    }

    /// Compensate every attempt of the saga, newest first, including ones
    /// whose outcome was never acknowledged.
    ///
    /// Rolling back an already compensated saga is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::AlreadyCommitted` if the saga was committed,
    /// `SagaError::CompensationFailed` if some Undo failed (recovery retries
    /// them), and `SagaError::Persistence` if the store is unavailable.
    pub async fn rollback(&self) -> Result<()> {
        let store = self.registry.store();
        match store.saga_outcome(&self.correlation_id).await? {
            Some(SagaOutcome::Committed) => {
                return Err(SagaError::AlreadyCommitted(self.correlation_id.clone()));
            }
            Some(_) => return Ok(()),
            None => {}
        }

        let errors = self
            .registry
            .compensate_saga(&self.ctx, &self.correlation_id, LogStatus::needs_compensation)
            .await?;
        if errors.is_empty() {
            return Ok(());
        }
        Err(SagaError::CompensationFailed {
            correlation_id: self.correlation_id.clone(),
            errors,
        })
    }

    /// Current state of the saga.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::Persistence` if the store is unavailable.
    pub async fn state(&self) -> Result<TransactionState> {
        let store = self.registry.store();
        let state = match store.saga_outcome(&self.correlation_id).await? {
            Some(SagaOutcome::Committed) => TransactionState::Committed,
            Some(_) => TransactionState::Compensated,
            None => {
                let logs = store.saga_steps(&self.correlation_id).await?;
                let compensating = logs.iter().any(|log| {
                    log.status == LogStatus::Compensated || log.compensation_error.is_some()
                });
                if compensating {
                    TransactionState::Compensating
                } else {
                    TransactionState::Open
                }
            }
        };
        Ok(state)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}
