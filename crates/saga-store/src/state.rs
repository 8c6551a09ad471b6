use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::error::{Result, StoreError};
use crate::log::{CorrelationId, Log, LogId, LogStatus, Outcome, SagaOutcome};

/// In-memory state machine shared by every store implementation.
///
/// Logs keep insertion order, which is the creation order the registry relies
/// on for reverse compensation.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    logs: IndexMap<LogId, Log>,
    closed: IndexMap<CorrelationId, SagaOutcome>,
}

impl StoreState {
    pub(crate) fn insert(&mut self, log: Log) -> Result<()> {
        match self.logs.entry(log.id) {
            Entry::Occupied(_) => Err(StoreError::DuplicateLog(log.id)),
            Entry::Vacant(slot) => {
                slot.insert(log);
                Ok(())
            }
        }
    }

    pub(crate) fn check_insert(&self, log: &Log) -> Result<()> {
        if self.logs.contains_key(&log.id) {
            return Err(StoreError::DuplicateLog(log.id));
        }
        Ok(())
    }

    pub(crate) fn ack(&mut self, id: LogId, outcome: &Outcome, at: DateTime<Utc>) -> Result<bool> {
        let log = self.logs.get_mut(&id).ok_or(StoreError::UnknownLog(id))?;
        Ok(log.apply(outcome, at))
    }

    /// Whether acking `outcome` would change the log, without changing it.
    pub(crate) fn ack_changes(&self, id: LogId, outcome: &Outcome) -> Result<bool> {
        let mut log = self.logs.get(&id).ok_or(StoreError::UnknownLog(id))?.clone();
        Ok(log.apply(outcome, Utc::now()))
    }

    /// Record the closing marker, returning the one that is in effect and
    /// whether this call wrote it.
    pub(crate) fn close(
        &mut self,
        correlation_id: CorrelationId,
        outcome: SagaOutcome,
    ) -> (SagaOutcome, bool) {
        match self.closed.entry(correlation_id) {
            Entry::Occupied(existing) => (*existing.get(), false),
            Entry::Vacant(slot) => {
                slot.insert(outcome);
                (outcome, true)
            }
        }
    }

    pub(crate) fn outcome(&self, correlation_id: &CorrelationId) -> Option<SagaOutcome> {
        self.closed.get(correlation_id).copied()
    }

    pub(crate) fn unacknowledged(&self, correlation_id: &CorrelationId) -> Vec<Log> {
        self.logs
            .values()
            .filter(|log| &log.correlation_id == correlation_id && log.status == LogStatus::Pending)
            .cloned()
            .collect()
    }

    pub(crate) fn saga_logs(&self, correlation_id: &CorrelationId) -> Vec<Log> {
        self.logs
            .values()
            .filter(|log| &log.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    pub(crate) fn uncommitted(&self) -> Vec<Log> {
        self.logs
            .values()
            .filter(|log| !self.closed.contains_key(&log.correlation_id))
            .cloned()
            .collect()
    }
}
