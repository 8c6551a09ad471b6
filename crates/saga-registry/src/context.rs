use saga_store::CorrelationId;
use tokio_util::sync::CancellationToken;

/// Request-scoped context threaded through every step invocation.
///
/// Carries the correlation id of the saga a call belongs to and a
/// cancellation token. Contexts derived from a parent share its cancellation:
/// cancelling the parent aborts in-flight actions of every derived context.
#[derive(Debug, Clone, Default)]
pub struct SagaContext {
    correlation_id: Option<CorrelationId>,
    cancel: CancellationToken,
}

impl SagaContext {
    /// A root context with no saga and its own cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A root context cancelled together with `cancel`.
    #[must_use]
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            correlation_id: None,
            cancel,
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Derive a context bound to `correlation_id`.
    pub(crate) fn for_saga(&self, correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            cancel: self.cancel.child_token(),
        }
    }
}
