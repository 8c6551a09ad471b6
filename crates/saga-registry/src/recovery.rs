//! Reconciliation of sagas left indeterminate by a crash.
//!
//! A saga with no closing marker may belong to a process that died between
//! logging an attempt and acknowledging it, or after its last step without
//! committing. The sweep cannot know whether an unacknowledged forward action
//! took effect, so it never re-runs it: every pending or succeeded attempt is
//! compensated, newest first, and the saga is closed as compensated.
//!
//! The sweep is safe to run next to live traffic and next to itself:
//! - sagas younger than the step timeout are left alone as possibly in flight
//! - acks and closing markers are idempotent, so a repeated Undo is the only
//!   effect of overlapping sweeps, which step implementations must tolerate
//! - a store error for one saga ends work on that saga only

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use indexmap::IndexMap;
use saga_store::{CorrelationId, Log, LogStatus, SagaOutcome, StoreError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::SagaContext;
use crate::error::{CompensationError, Result, SagaError};
use crate::registry::Registry;
use crate::report::{RecoveryReport, SagaResolution};

struct Resolved {
    steps_compensated: usize,
    errors: Vec<CompensationError>,
    committed_concurrently: bool,
}

impl Registry {
    /// Run one recovery sweep.
    ///
    /// Failures are logged and recorded in the returned report; they never
    /// abort the sweep as a whole.
    pub async fn recover(&self, ctx: &SagaContext) -> RecoveryReport {
        let mut report = RecoveryReport::new();

        let logs = match self.store().uncommitted_sagas().await {
            Ok(logs) => logs,
            Err(error) => {
                warn!(error = %error, "recovery sweep could not list uncommitted sagas");
                report.record_listing_failure(error);
                return report;
            }
        };

        let mut sagas: IndexMap<CorrelationId, Vec<Log>> = IndexMap::new();
        for log in logs {
            sagas.entry(log.correlation_id.clone()).or_default().push(log);
        }

        let cutoff = TimeDelta::from_std(self.config().step_timeout)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace));
        let mut attempted = 0;

        for (correlation_id, logs) in sagas {
            if ctx.is_cancelled() {
                break;
            }

            let newest = logs.iter().map(|log| log.created_at).max();
            let settled = matches!((newest, cutoff), (Some(newest), Some(cutoff)) if newest <= cutoff);
            if !settled {
                debug!(saga = %correlation_id, "saga may still be in flight, skipping");
                report.record_skipped(correlation_id, SagaResolution::InFlight);
                continue;
            }
            if attempted >= self.config().max_sagas_per_sweep {
                report.record_skipped(correlation_id, SagaResolution::Deferred);
                continue;
            }
            attempted += 1;

            let saga_ctx = ctx.for_saga(correlation_id.clone());
            match self.resolve_saga(&saga_ctx, &correlation_id).await {
                Ok(resolved) => {
                    for error in &resolved.errors {
                        warn!(
                            saga = %correlation_id,
                            step = %error.step,
                            log = %error.log_id,
                            error = %error.error,
                            "compensation failed during recovery"
                        );
                    }
                    report.record_resolved(
                        correlation_id,
                        resolved.steps_compensated,
                        resolved.errors,
                        resolved.committed_concurrently,
                    );
                }
                Err((steps_compensated, error)) => {
                    warn!(
                        saga = %correlation_id,
                        error = %error,
                        "recovery of saga failed, retrying on next sweep"
                    );
                    report.record_store_failure(correlation_id, steps_compensated, error);
                }
            }
        }

        if report.is_noop() {
            debug!("recovery sweep found nothing to do");
        } else {
            info!(
                compensated = report.count(SagaResolution::Compensated),
                failed = report.count(SagaResolution::CompensationFailed)
                    + report.count(SagaResolution::StoreFailed),
                in_flight = report.count(SagaResolution::InFlight),
                deferred = report.count(SagaResolution::Deferred),
                steps_compensated = report.steps_compensated(),
                "recovery sweep completed"
            );
        }
        report
    }

    /// Compensate unacknowledged attempts, then succeeded ones, newest first.
    async fn resolve_saga(
        &self,
        ctx: &SagaContext,
        correlation_id: &CorrelationId,
    ) -> std::result::Result<Resolved, (usize, StoreError)> {
        let pending = self
            .store()
            .unacknowledged_steps(correlation_id)
            .await
            .map_err(|e| (0, e))?;
        let (mut steps_compensated, mut errors) =
            self.compensate_logs(ctx, pending.into_iter().rev().collect()).await;

        let succeeded: Vec<Log> = self
            .store()
            .saga_steps(correlation_id)
            .await
            .map_err(|e| (steps_compensated, e))?
            .into_iter()
            .rev()
            .filter(|log| log.status == LogStatus::Succeeded)
            .collect();
        let (compensated, more_errors) = self.compensate_logs(ctx, succeeded).await;
        steps_compensated += compensated;
        errors.extend(more_errors);

        let mut committed_concurrently = false;
        if errors.is_empty() {
            let recorded = self
                .close_compensated(correlation_id)
                .await
                .map_err(|e| (steps_compensated, e))?;
            committed_concurrently = recorded == SagaOutcome::Committed;
        }

        Ok(Resolved {
            steps_compensated,
            errors,
            committed_concurrently,
        })
    }
}

/// Background task running the recovery sweep on a fixed interval.
#[derive(Debug)]
pub struct RecoveryTask {
    registry: Arc<Registry>,
    interval: Duration,
}

impl RecoveryTask {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        let interval = registry.config().recover_interval;
        Self { registry, interval }
    }

    /// Sweep once immediately, then every interval, until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::InvalidConfig` if the registry configuration
    /// cannot drive a timer.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        self.registry.config().validate()?;
        let ctx = SagaContext::with_cancellation(cancel.clone());

        info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "saga recovery task started"
        );
        self.registry.recover(&ctx).await;

        let first_tick = Instant::now()
            .checked_add(self.interval)
            .ok_or(SagaError::InvalidConfig("recover interval is out of range"))?;
        let mut ticker = interval_at(first_tick, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("saga recovery task shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.registry.recover(&ctx).await;
                }
            }
        }
    }

    /// Run the task on the tokio runtime.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(cancel))
    }
}
