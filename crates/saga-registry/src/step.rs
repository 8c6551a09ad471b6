use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::SagaContext;
use crate::error::BoxError;

/// One participant of a saga: a forward action paired with the action that
/// reverses it.
///
/// Steps are registered once with a [`Registry`](crate::Registry) and only run
/// through the endpoint it returns, which records each attempt durably before
/// the forward action executes.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Registry key; also stored on every attempt so recovery can find the
    /// step again after a restart.
    fn name(&self) -> &str;

    /// Run the forward action for one attempt.
    ///
    /// A crash after this returns but before the outcome is stored leaves the
    /// attempt unacknowledged, and recovery will reverse it.
    ///
    /// # Errors
    ///
    /// Any error fails the attempt and unwinds the saga.
    async fn execute(&self, ctx: &SagaContext, request: Value) -> Result<Value, BoxError>;

    /// Reverse an attempt, given the request it was logged with.
    ///
    /// Runs at least once per attempt that needs reversing, and possibly
    /// for an attempt whose forward action never reached the participant.
    /// Both cases must be harmless.
    ///
    /// Without an override nothing is reversed.
    ///
    /// # Errors
    ///
    /// A failure is stored on the attempt and the next recovery sweep
    /// tries again.
    async fn compensate(&self, ctx: &SagaContext, request: Value) -> Result<(), BoxError> {
        let _ = (ctx, request);
        Ok(())
    }

    /// Short label used in logs and in [`CompensationError`](crate::CompensationError).
    fn compensation_description(&self) -> String {
        format!("undo {}", self.name())
    }
}

/// A step built from a pair of async closures.
pub struct FnStep<D, U> {
    name: String,
    forward: D,
    undo: U,
}

impl<D, DF, U, UF> FnStep<D, U>
where
    D: Fn(SagaContext, Value) -> DF + Send + Sync,
    DF: Future<Output = Result<Value, BoxError>> + Send + 'static,
    U: Fn(SagaContext, Value) -> UF + Send + Sync,
    UF: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    #[must_use]
    pub fn new(name: impl Into<String>, forward: D, undo: U) -> Self {
        Self {
            name: name.into(),
            forward,
            undo,
        }
    }
}

#[async_trait]
impl<D, DF, U, UF> SagaStep for FnStep<D, U>
where
    D: Fn(SagaContext, Value) -> DF + Send + Sync,
    DF: Future<Output = Result<Value, BoxError>> + Send + 'static,
    U: Fn(SagaContext, Value) -> UF + Send + Sync,
    UF: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &SagaContext, request: Value) -> Result<Value, BoxError> {
        (self.forward)(ctx.clone(), request).await
    }

    async fn compensate(&self, ctx: &SagaContext, request: Value) -> Result<(), BoxError> {
        (self.undo)(ctx.clone(), request).await
    }
}
