use saga_store::{CorrelationId, StoreError};

use crate::error::CompensationError;

/// How a recovery sweep left a saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SagaResolution {
    /// Every attempt was compensated and the saga closed.
    Compensated,
    /// Compensation finished, but a concurrent commit closed the saga first.
    CommittedConcurrently,
    /// Some Undo failed; the saga stays open for the next sweep.
    CompensationFailed,
    /// The store failed while resolving; the saga stays open.
    StoreFailed,
    /// Too recent to tell apart from a saga still in flight.
    InFlight,
    /// Left for a later sweep because this one reached its limit.
    Deferred,
}

/// Record of one saga visited by a sweep.
#[derive(Debug)]
pub struct SagaRecord {
    pub correlation_id: CorrelationId,
    pub resolution: SagaResolution,
    /// Attempts compensated during this sweep.
    pub steps_compensated: usize,
    pub compensation_errors: Vec<CompensationError>,
    pub store_error: Option<StoreError>,
}

/// Outcome of a single recovery sweep.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    records: Vec<SagaRecord>,
    listing_error: Option<StoreError>,
}

impl RecoveryReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_listing_failure(&mut self, error: StoreError) {
        self.listing_error = Some(error);
    }

    pub(crate) fn record_skipped(&mut self, correlation_id: CorrelationId, resolution: SagaResolution) {
        self.records.push(SagaRecord {
            correlation_id,
            resolution,
            steps_compensated: 0,
            compensation_errors: Vec::new(),
            store_error: None,
        });
    }

    pub(crate) fn record_resolved(
        &mut self,
        correlation_id: CorrelationId,
        steps_compensated: usize,
        compensation_errors: Vec<CompensationError>,
        committed_concurrently: bool,
    ) {
        let resolution = if !compensation_errors.is_empty() {
            SagaResolution::CompensationFailed
        } else if committed_concurrently {
            SagaResolution::CommittedConcurrently
        } else {
            SagaResolution::Compensated
        };
        self.records.push(SagaRecord {
            correlation_id,
            resolution,
            steps_compensated,
            compensation_errors,
            store_error: None,
        });
    }

    pub(crate) fn record_store_failure(
        &mut self,
        correlation_id: CorrelationId,
        steps_compensated: usize,
        error: StoreError,
    ) {
        self.records.push(SagaRecord {
            correlation_id,
            resolution: SagaResolution::StoreFailed,
            steps_compensated,
            compensation_errors: Vec::new(),
            store_error: Some(error),
        });
    }

    /// Get all saga records of the sweep.
    #[must_use]
    pub fn records(&self) -> &[SagaRecord] {
        &self.records
    }

    /// The record of a specific saga, if the sweep visited it.
    #[must_use]
    pub fn record(&self, correlation_id: &CorrelationId) -> Option<&SagaRecord> {
        self.records
            .iter()
            .find(|record| &record.correlation_id == correlation_id)
    }

    /// Error that prevented the sweep from listing candidate sagas.
    #[must_use]
    pub fn listing_error(&self) -> Option<&StoreError> {
        self.listing_error.as_ref()
    }

    /// Whether the sweep found nothing to do.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.records.is_empty() && self.listing_error.is_none()
    }

    #[must_use]
    pub fn count(&self, resolution: SagaResolution) -> usize {
        self.records
            .iter()
            .filter(|record| record.resolution == resolution)
            .count()
    }

    #[must_use]
    pub fn steps_compensated(&self) -> usize {
        self.records
            .iter()
            .map(|record| record.steps_compensated)
            .sum()
    }

    /// Get a summary of the sweep for display.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(error) = &self.listing_error {
            lines.push(format!("✗ listing failed: {error}"));
        }
        for record in &self.records {
            let status = match record.resolution {
                SagaResolution::Compensated => "↩",
                SagaResolution::CommittedConcurrently => "✓",
                SagaResolution::CompensationFailed => "⚠",
                SagaResolution::StoreFailed => "✗",
                SagaResolution::InFlight | SagaResolution::Deferred => "…",
            };
            lines.push(format!(
                "{status} {} ({} compensated)",
                record.correlation_id, record.steps_compensated
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use saga_store::LogId;

    use super::*;

    fn saga(id: &str) -> CorrelationId {
        CorrelationId::from(id)
    }

    #[test]
    fn new_report_is_noop() {
        let report = RecoveryReport::new();

        assert!(report.is_noop());
        assert!(report.records().is_empty());
    }

    #[test]
    fn listing_failure_is_not_noop() {
        let mut report = RecoveryReport::new();
        report.record_listing_failure(StoreError::Unavailable("down".to_string()));

        assert!(!report.is_noop());
        assert!(report.listing_error().is_some());
    }

    #[test]
    fn resolution_reflects_compensation_errors() {
        let mut report = RecoveryReport::new();
        report.record_resolved(saga("clean"), 2, Vec::new(), false);
        report.record_resolved(
            saga("dirty"),
            1,
            vec![CompensationError {
                step: "reserve".to_string(),
                log_id: LogId::new(),
                description: "undo reserve".to_string(),
                error: "offline".into(),
            }],
            false,
        );
        report.record_resolved(saga("raced"), 1, Vec::new(), true);

        assert_eq!(report.count(SagaResolution::Compensated), 1);
        assert_eq!(report.count(SagaResolution::CompensationFailed), 1);
        assert_eq!(report.count(SagaResolution::CommittedConcurrently), 1);
        assert_eq!(report.steps_compensated(), 4);
    }

    #[test]
    fn record_lookup_by_correlation_id() {
        let mut report = RecoveryReport::new();
        report.record_skipped(saga("young"), SagaResolution::InFlight);

        let record = report.record(&saga("young"));

        assert_eq!(record.map(|r| r.resolution), Some(SagaResolution::InFlight));
        assert!(report.record(&saga("other")).is_none());
    }

    #[test]
    fn summary_formats_all_sagas() {
        let mut report = RecoveryReport::new();
        report.record_resolved(saga("a"), 2, Vec::new(), false);
        report.record_store_failure(saga("b"), 0, StoreError::Unavailable("down".to_string()));
        report.record_skipped(saga("c"), SagaResolution::Deferred);

        let summary = report.summary();
        assert!(summary.contains("↩ a (2 compensated)"));
        assert!(summary.contains("✗ b (0 compensated)"));
        assert!(summary.contains("… c"));
    }
}
