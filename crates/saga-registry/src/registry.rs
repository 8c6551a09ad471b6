use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use indexmap::map::Entry;
use saga_store::{CorrelationId, Log, LogStatus, Outcome, SagaOutcome, Store, StoreError};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SagaConfig;
use crate::context::SagaContext;
use crate::endpoint::StepEndpoint;
use crate::error::{BoxError, CompensationError, Interrupted, Result, SagaError};
use crate::step::SagaStep;
use crate::transaction::Transaction;

/// Owns the registered steps and drives them through the attempt log.
///
/// The registry keeps no per-saga state in memory: everything needed to
/// finish or unwind a saga lives in the [`Store`], so a restarted process can
/// pick up where a crashed one stopped.
pub struct Registry {
    store: Arc<dyn Store>,
    config: SagaConfig,
    steps: RwLock<IndexMap<String, Arc<dyn SagaStep>>>,
}

impl Registry {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: SagaConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            steps: RwLock::new(IndexMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Register a step and return the endpoint through which it is invoked.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::InvalidStepName` for an empty name and
    /// `SagaError::DuplicateStepName` if the name is already taken.
    pub fn add_step(self: &Arc<Self>, step: Arc<dyn SagaStep>) -> Result<StepEndpoint> {
        let name = step.name().to_string();
        if name.is_empty() {
            return Err(SagaError::InvalidStepName);
        }

        let mut steps = self.steps.write().unwrap_or_else(PoisonError::into_inner);
        match steps.entry(name) {
            Entry::Occupied(existing) => Err(SagaError::DuplicateStepName(existing.key().clone())),
            Entry::Vacant(slot) => {
                debug!(step = %slot.key(), "registered saga step");
                slot.insert(Arc::clone(&step));
                Ok(StepEndpoint::new(Arc::clone(self), step))
            }
        }
    }

    /// Names of all registered steps, in registration order.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        self.steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn step(&self, name: &str) -> Option<Arc<dyn SagaStep>> {
        self.steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Start a saga.
    ///
    /// Nothing is written to the store until the first step is invoked with
    /// the returned context.
    #[must_use]
    pub fn start_tx(self: &Arc<Self>, parent: &SagaContext) -> (Transaction, SagaContext) {
        self.resume_tx(parent, CorrelationId::generate())
    }

    /// Rebuild the handle of an existing saga, e.g. to commit or roll it back
    /// from another request.
    #[must_use]
    pub fn resume_tx(
        self: &Arc<Self>,
        parent: &SagaContext,
        correlation_id: CorrelationId,
    ) -> (Transaction, SagaContext) {
        let ctx = parent.for_saga(correlation_id.clone());
        let tx = Transaction::new(Arc::clone(self), correlation_id, ctx.clone());
        (tx, ctx)
    }

    /// Log intent, run the forward action, acknowledge its outcome and
    /// compensate the saga if it failed.
    pub(crate) async fn invoke(
        &self,
        step: &dyn SagaStep,
        ctx: &SagaContext,
        request: Value,
    ) -> Result<Value> {
        let correlation_id = ctx
            .correlation_id()
            .ok_or(SagaError::NoActiveTransaction)?
            .clone();

        // A closed saga takes no new attempts: nothing would ever compensate them.
        match self.store.saga_outcome(&correlation_id).await? {
            Some(SagaOutcome::Committed) => return Err(SagaError::AlreadyCommitted(correlation_id)),
            Some(_) => return Err(SagaError::AlreadyCompensated(correlation_id)),
            None => {}
        }

        let log = Log::pending(correlation_id.clone(), step.name(), request.clone());
        let log_id = log.id;
        self.store.log(log).await?;
        debug!(saga = %correlation_id, step = step.name(), log = %log_id, "executing step");

        match self.bounded(ctx, step.execute(ctx, request)).await {
            Ok(response) => {
                let outcome = Outcome::Succeeded {
                    response: response.clone(),
                };
                if let Err(error) = self.store.ack(log_id, outcome).await {
                    warn!(
                        saga = %correlation_id,
                        step = step.name(),
                        log = %log_id,
                        error = %error,
                        "failed to acknowledge step success, leaving it to recovery"
                    );
                }
                Ok(response)
            }
            Err(error) => {
                warn!(
                    saga = %correlation_id,
                    step = step.name(),
                    log = %log_id,
                    error = %error,
                    "step failed, compensating saga"
                );
                let outcome = Outcome::failed(&*error);
                if let Err(ack_error) = self.store.ack(log_id, outcome).await {
                    warn!(
                        saga = %correlation_id,
                        log = %log_id,
                        error = %ack_error,
                        "failed to acknowledge step failure"
                    );
                }
                self.compensate_after_failure(ctx, &correlation_id).await;
                Err(SagaError::StepFailed {
                    step: step.name().to_string(),
                    source: error,
                })
            }
        }
    }

    async fn compensate_after_failure(&self, ctx: &SagaContext, correlation_id: &CorrelationId) {
        let result = self
            .compensate_saga(ctx, correlation_id, |status| status == LogStatus::Succeeded)
            .await;
        match result {
            Ok(errors) if errors.is_empty() => {}
            Ok(errors) => {
                for error in &errors {
                    warn!(
                        saga = %correlation_id,
                        step = %error.step,
                        log = %error.log_id,
                        error = %error.error,
                        "compensation failed, leaving it to recovery"
                    );
                }
            }
            Err(error) => {
                warn!(
                    saga = %correlation_id,
                    error = %error,
                    "could not compensate saga, leaving it to recovery"
                );
            }
        }
    }

    /// Compensate the saga's attempts selected by `select`, newest first, and
    /// close it as compensated when nothing is left to undo.
    pub(crate) async fn compensate_saga(
        &self,
        ctx: &SagaContext,
        correlation_id: &CorrelationId,
        select: impl Fn(LogStatus) -> bool,
    ) -> std::result::Result<Vec<CompensationError>, StoreError> {
        if self.store.saga_outcome(correlation_id).await? == Some(SagaOutcome::Committed) {
            warn!(saga = %correlation_id, "saga is committed, not compensating");
            return Ok(Vec::new());
        }

        let targets: Vec<Log> = self
            .store
            .saga_steps(correlation_id)
            .await?
            .into_iter()
            .rev()
            .filter(|log| select(log.status))
            .collect();
        let (_, errors) = self.compensate_logs(ctx, targets).await;

        if errors.is_empty() && self.store.unacknowledged_steps(correlation_id).await?.is_empty() {
            self.close_compensated(correlation_id).await?;
        }
        Ok(errors)
    }

    /// Run Undo for each log in the given order. Returns how many were
    /// compensated and the failures, which do not stop the remaining logs.
    pub(crate) async fn compensate_logs(
        &self,
        ctx: &SagaContext,
        logs: Vec<Log>,
    ) -> (usize, Vec<CompensationError>) {
        let mut compensated = 0;
        let mut errors = Vec::new();

        for log in logs {
            match self.compensate_log(ctx, &log).await {
                Ok(()) => compensated += 1,
                Err(error) => errors.push(error),
            }
        }

        (compensated, errors)
    }

    async fn compensate_log(
        &self,
        ctx: &SagaContext,
        log: &Log,
    ) -> std::result::Result<(), CompensationError> {
        let Some(step) = self.step(&log.step_name) else {
            let error: BoxError = format!("step '{}' is not registered", log.step_name).into();
            self.record_compensation_failure(log, &*error).await;
            return Err(CompensationError {
                step: log.step_name.clone(),
                log_id: log.id,
                description: format!("undo {}", log.step_name),
                error,
            });
        };
        let description = step.compensation_description();

        debug!(
            saga = %log.correlation_id,
            step = %log.step_name,
            log = %log.id,
            %description,
            "compensating step"
        );
        let result = self
            .bounded(ctx, step.compensate(ctx, log.request.clone()))
            .await;

        let error: BoxError = match result {
            Ok(()) => match self.store.ack(log.id, Outcome::Compensated).await {
                Ok(()) => return Ok(()),
                Err(store_error) => Box::new(store_error),
            },
            Err(error) => {
                self.record_compensation_failure(log, &*error).await;
                error
            }
        };

        Err(CompensationError {
            step: log.step_name.clone(),
            log_id: log.id,
            description,
            error,
        })
    }

    async fn record_compensation_failure(
        &self,
        log: &Log,
        error: &(dyn std::error::Error + Send + Sync + 'static),
    ) {
        let outcome = Outcome::compensation_failed(error);
        if let Err(store_error) = self.store.ack(log.id, outcome).await {
            warn!(
                saga = %log.correlation_id,
                log = %log.id,
                error = %store_error,
                "failed to record compensation failure"
            );
        }
    }

    pub(crate) async fn close_compensated(
        &self,
        correlation_id: &CorrelationId,
    ) -> std::result::Result<SagaOutcome, StoreError> {
        let recorded = self
            .store
            .close_saga(correlation_id, SagaOutcome::Compensated)
            .await?;
        if recorded == SagaOutcome::Committed {
            warn!(saga = %correlation_id, "saga was committed while it was being compensated");
        } else {
            debug!(saga = %correlation_id, "saga compensated");
        }
        Ok(recorded)
    }

    /// Run an action under the step timeout and the context's cancellation.
    async fn bounded<T>(
        &self,
        ctx: &SagaContext,
        action: impl Future<Output = std::result::Result<T, BoxError>>,
    ) -> std::result::Result<T, BoxError> {
        tokio::select! {
            biased;
            () = ctx.cancellation_token().cancelled() => Err(Interrupted::Cancelled.into()),
            result = tokio::time::timeout(self.config.step_timeout, action) => {
                result.unwrap_or_else(|_| Err(Interrupted::TimedOut.into()))
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("steps", &self.step_names())
            .finish_non_exhaustive()
    }
}
