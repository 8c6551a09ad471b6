//! Integration tests for the recovery sweep over sagas a crashed process left
//! behind.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use saga_registry::store::{
    CorrelationId, Log, LogId, LogStatus, MemoryStore, Outcome, SagaOutcome, Store, StoreError,
};
use saga_registry::{
    BoxError, RecoveryTask, Registry, SagaConfig, SagaContext, SagaError, SagaResolution,
    SagaStep,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: String) {
        self.0.lock().expect("call log lock").push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().expect("call log lock").clone()
    }
}

struct TrackedStep {
    name: &'static str,
    calls: CallLog,
}

#[async_trait]
impl SagaStep for TrackedStep {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _ctx: &SagaContext, request: Value) -> Result<Value, BoxError> {
        self.calls.push(format!("do {}", self.name));
        Ok(request)
    }

    async fn compensate(&self, _ctx: &SagaContext, request: Value) -> Result<(), BoxError> {
        self.calls.push(format!("undo {} {request}", self.name));
        Ok(())
    }
}

/// Delegates to a [`MemoryStore`] unless listing is switched off.
struct FlakyStore {
    inner: MemoryStore,
    listing_down: AtomicBool,
    listings: AtomicUsize,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            listing_down: AtomicBool::new(false),
            listings: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn log(&self, log: Log) -> Result<(), StoreError> {
        self.inner.log(log).await
    }

    async fn ack(&self, id: LogId, outcome: Outcome) -> Result<(), StoreError> {
        self.inner.ack(id, outcome).await
    }

    async fn unacknowledged_steps(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Vec<Log>, StoreError> {
        self.inner.unacknowledged_steps(correlation_id).await
    }

    async fn uncommitted_sagas(&self) -> Result<Vec<Log>, StoreError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.listing_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("listing is down".to_string()));
        }
        self.inner.uncommitted_sagas().await
    }

    async fn saga_steps(&self, correlation_id: &CorrelationId) -> Result<Vec<Log>, StoreError> {
        self.inner.saga_steps(correlation_id).await
    }

    async fn close_saga(
        &self,
        correlation_id: &CorrelationId,
        outcome: SagaOutcome,
    ) -> Result<SagaOutcome, StoreError> {
        self.inner.close_saga(correlation_id, outcome).await
    }

    async fn saga_outcome(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<SagaOutcome>, StoreError> {
        self.inner.saga_outcome(correlation_id).await
    }
}

const GRACE: Duration = Duration::from_millis(50);

fn registry_with(store: Arc<dyn Store>, calls: &CallLog, names: &[&'static str]) -> Arc<Registry> {
    let registry = Registry::new(store, SagaConfig::default().with_step_timeout(GRACE));
    for &name in names {
        registry
            .add_step(Arc::new(TrackedStep {
                name,
                calls: calls.clone(),
            }))
            .expect("step should register");
    }
    registry
}

/// Write a log as a crashed process would have left it, an hour ago.
async fn seed(
    store: &dyn Store,
    correlation_id: &CorrelationId,
    step: &str,
    request: Value,
    outcome: Option<Outcome>,
) -> anyhow::Result<LogId> {
    let mut log = Log::pending(correlation_id.clone(), step, request);
    log.created_at = Utc::now() - TimeDelta::hours(1);
    let id = log.id;
    store.log(log).await?;
    if let Some(outcome) = outcome {
        store.ack(id, outcome).await?;
    }
    Ok(id)
}

fn succeeded() -> Option<Outcome> {
    Some(Outcome::Succeeded {
        response: Value::Null,
    })
}

#[tokio::test]
async fn pending_step_is_compensated_without_running_forward_action() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(Arc::clone(&store) as Arc<dyn Store>, &calls, &["foo"]);
    let saga = CorrelationId::from("crashed");
    let id = seed(store.as_ref(), &saga, "foo", json!(7), None).await?;

    let report = registry.recover(&SagaContext::new()).await;

    assert_eq!(calls.entries(), vec!["undo foo 7"]);
    let record = report.record(&saga).expect("saga should be visited");
    assert_eq!(record.resolution, SagaResolution::Compensated);
    assert_eq!(record.steps_compensated, 1);

    let logs = store.saga_steps(&saga).await?;
    assert_eq!(logs[0].id, id);
    assert_eq!(logs[0].status, LogStatus::Compensated);
    assert_eq!(store.saga_outcome(&saga).await?, Some(SagaOutcome::Compensated));
    Ok(())
}

#[tokio::test]
async fn uncommitted_saga_is_compensated_newest_first() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(Arc::clone(&store) as Arc<dyn Store>, &calls, &["a", "b", "c"]);
    let saga = CorrelationId::from("abandoned");
    seed(store.as_ref(), &saga, "a", json!(1), succeeded()).await?;
    seed(store.as_ref(), &saga, "b", json!(2), succeeded()).await?;
    seed(store.as_ref(), &saga, "c", json!(3), None).await?;

    let report = registry.recover(&SagaContext::new()).await;

    assert_eq!(calls.entries(), vec!["undo c 3", "undo b 2", "undo a 1"]);
    assert_eq!(report.steps_compensated(), 3);
    assert!(
        store
            .saga_steps(&saga)
            .await?
            .iter()
            .all(|log| log.status == LogStatus::Compensated)
    );
    Ok(())
}

#[tokio::test]
async fn failed_step_is_not_compensated() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(Arc::clone(&store) as Arc<dyn Store>, &calls, &["a", "b"]);
    let saga = CorrelationId::from("half-failed");
    seed(store.as_ref(), &saga, "a", json!(1), succeeded()).await?;
    let failed = Outcome::Failed {
        error: "boom".to_string(),
    };
    seed(store.as_ref(), &saga, "b", json!(2), Some(failed)).await?;

    registry.recover(&SagaContext::new()).await;

    assert_eq!(calls.entries(), vec!["undo a 1"]);
    let logs = store.saga_steps(&saga).await?;
    assert_eq!(logs[1].status, LogStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn committed_saga_is_left_alone() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(Arc::clone(&store) as Arc<dyn Store>, &calls, &["foo"]);
    let saga = CorrelationId::from("done");
    seed(store.as_ref(), &saga, "foo", json!(1), succeeded()).await?;
    store.close_saga(&saga, SagaOutcome::Committed).await?;

    let report = registry.recover(&SagaContext::new()).await;

    assert!(report.is_noop());
    assert!(calls.entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn recent_saga_is_treated_as_in_flight() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(Arc::clone(&store) as Arc<dyn Store>, &calls, &["foo"]);
    let saga = CorrelationId::from("live");
    store
        .log(Log::pending(saga.clone(), "foo", json!(1)))
        .await?;

    let report = registry.recover(&SagaContext::new()).await;

    assert_eq!(report.count(SagaResolution::InFlight), 1);
    assert!(calls.entries().is_empty());
    assert_eq!(store.unacknowledged_steps(&saga).await?.len(), 1);

    tokio::time::sleep(GRACE * 2).await;
    let later = registry.recover(&SagaContext::new()).await;
    assert_eq!(later.count(SagaResolution::Compensated), 1);
    assert_eq!(calls.entries(), vec!["undo foo 1"]);
    Ok(())
}

#[tokio::test]
async fn sweep_limit_defers_remaining_sagas() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(MemoryStore::new());
    let registry = Registry::new(
        Arc::clone(&store) as Arc<dyn Store>,
        SagaConfig::default()
            .with_step_timeout(GRACE)
            .with_max_sagas_per_sweep(2),
    );
    registry.add_step(Arc::new(TrackedStep {
        name: "foo",
        calls: calls.clone(),
    }))?;
    for index in 0..3 {
        let saga = CorrelationId::from(format!("saga-{index}"));
        seed(store.as_ref(), &saga, "foo", json!(index), None).await?;
    }

    let first = registry.recover(&SagaContext::new()).await;

    assert_eq!(first.count(SagaResolution::Compensated), 2);
    assert_eq!(first.count(SagaResolution::Deferred), 1);
    assert_eq!(
        first
            .record(&CorrelationId::from("saga-2"))
            .map(|record| record.resolution),
        Some(SagaResolution::Deferred)
    );

    let second = registry.recover(&SagaContext::new()).await;
    assert_eq!(second.count(SagaResolution::Compensated), 1);
    assert_eq!(calls.entries().len(), 3);
    Ok(())
}

#[tokio::test]
async fn listing_failure_is_reported() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(FlakyStore::new());
    let registry = registry_with(Arc::clone(&store) as Arc<dyn Store>, &calls, &["foo"]);
    let saga = CorrelationId::from("waiting");
    seed(store.as_ref(), &saga, "foo", json!(1), None).await?;
    store.listing_down.store(true, Ordering::SeqCst);

    let report = registry.recover(&SagaContext::new()).await;

    assert!(matches!(
        report.listing_error(),
        Some(StoreError::Unavailable(_))
    ));
    assert!(report.records().is_empty());
    assert!(calls.entries().is_empty());

    store.listing_down.store(false, Ordering::SeqCst);
    let retried = registry.recover(&SagaContext::new()).await;
    assert_eq!(retried.count(SagaResolution::Compensated), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_step_counts_as_compensation_failure() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(Arc::clone(&store) as Arc<dyn Store>, &calls, &["known"]);
    let saga = CorrelationId::from("renamed");
    seed(store.as_ref(), &saga, "known", json!(1), succeeded()).await?;
    seed(store.as_ref(), &saga, "retired", json!(2), succeeded()).await?;

    let report = registry.recover(&SagaContext::new()).await;

    let record = report.record(&saga).expect("saga should be visited");
    assert_eq!(record.resolution, SagaResolution::CompensationFailed);
    assert_eq!(record.steps_compensated, 1);
    assert_eq!(record.compensation_errors[0].step, "retired");
    assert_eq!(calls.entries(), vec!["undo known 1"]);
    assert_eq!(store.saga_outcome(&saga).await?, None);

    let logs = store.saga_steps(&saga).await?;
    assert_eq!(
        logs[1].compensation_error.as_deref(),
        Some("step 'retired' is not registered")
    );
    Ok(())
}

#[tokio::test]
async fn repeated_sweeps_compensate_once() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(Arc::clone(&store) as Arc<dyn Store>, &calls, &["foo"]);
    let saga = CorrelationId::from("crashed");
    seed(store.as_ref(), &saga, "foo", json!(1), succeeded()).await?;

    registry.recover(&SagaContext::new()).await;
    let second = registry.recover(&SagaContext::new()).await;

    assert!(second.is_noop());
    assert_eq!(calls.entries(), vec!["undo foo 1"]);
    Ok(())
}

#[tokio::test]
async fn cancelled_sweep_stops_before_visiting_sagas() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(Arc::clone(&store) as Arc<dyn Store>, &calls, &["foo"]);
    seed(store.as_ref(), &CorrelationId::from("crashed"), "foo", json!(1), None).await?;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = registry
        .recover(&SagaContext::with_cancellation(cancel))
        .await;

    assert!(report.records().is_empty());
    assert!(calls.entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn recovery_task_sweeps_immediately_and_stops_on_cancel() -> anyhow::Result<()> {
    let calls = CallLog::default();
    let store = Arc::new(FlakyStore::new());
    let registry = Registry::new(
        Arc::clone(&store) as Arc<dyn Store>,
        SagaConfig::default()
            .with_step_timeout(GRACE)
            .with_recover_interval(Duration::from_secs(3600)),
    );
    registry.add_step(Arc::new(TrackedStep {
        name: "foo",
        calls: calls.clone(),
    }))?;
    seed(store.as_ref(), &CorrelationId::from("crashed"), "foo", json!(1), None).await?;

    let cancel = CancellationToken::new();
    let handle = RecoveryTask::new(Arc::clone(&registry)).spawn(cancel.clone());
    tokio::time::timeout(Duration::from_secs(5), async {
        while calls.entries().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle).await???;
    assert_eq!(calls.entries(), vec!["undo foo 1"]);
    assert_eq!(store.listings.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn recovery_task_rejects_out_of_range_interval() {
    let registry = Registry::new(
        Arc::new(MemoryStore::new()),
        SagaConfig::default().with_recover_interval(Duration::from_secs(u64::MAX)),
    );

    let result = RecoveryTask::new(registry)
        .spawn(CancellationToken::new())
        .await;

    assert!(matches!(result, Ok(Err(SagaError::InvalidConfig(_)))));
}
