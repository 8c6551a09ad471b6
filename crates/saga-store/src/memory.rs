use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::trace;

use crate::error::Result;
use crate::log::{CorrelationId, Log, LogId, Outcome, SagaOutcome};
use crate::state::StoreState;
use crate::store::Store;

/// Process-local store. Nothing survives a restart; intended for tests and
/// for hosts that accept losing in-flight sagas on a crash.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn log(&self, log: Log) -> Result<()> {
        trace!(id = %log.id, step = %log.step_name, "appending log");
        self.state().insert(log)
    }

    async fn ack(&self, id: LogId, outcome: Outcome) -> Result<()> {
        let changed = self.state().ack(id, &outcome, Utc::now())?;
        if !changed {
            trace!(%id, "ack did not change log");
        }
        Ok(())
    }

    async fn unacknowledged_steps(&self, correlation_id: &CorrelationId) -> Result<Vec<Log>> {
        Ok(self.state().unacknowledged(correlation_id))
    }

    async fn uncommitted_sagas(&self) -> Result<Vec<Log>> {
        Ok(self.state().uncommitted())
    }

    async fn saga_steps(&self, correlation_id: &CorrelationId) -> Result<Vec<Log>> {
        Ok(self.state().saga_logs(correlation_id))
    }

    async fn close_saga(
        &self,
        correlation_id: &CorrelationId,
        outcome: SagaOutcome,
    ) -> Result<SagaOutcome> {
        let (recorded, _) = self.state().close(correlation_id.clone(), outcome);
        Ok(recorded)
    }

    async fn saga_outcome(&self, correlation_id: &CorrelationId) -> Result<Option<SagaOutcome>> {
        Ok(self.state().outcome(correlation_id))
    }
}
