use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::context::SagaContext;
use crate::error::Result;
use crate::registry::Registry;
use crate::step::SagaStep;

/// Invocable handle of a registered step.
///
/// Calling [`invoke`](Self::invoke) is the only way to run a step's forward
/// action with crash safety: the attempt is logged before it runs and
/// acknowledged after.
#[derive(Clone)]
pub struct StepEndpoint {
    registry: Arc<Registry>,
    step: Arc<dyn SagaStep>,
}

impl StepEndpoint {
    pub(crate) fn new(registry: Arc<Registry>, step: Arc<dyn SagaStep>) -> Self {
        Self { registry, step }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.step.name()
    }

    /// Run the step inside the saga bound to `ctx`.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::NoActiveTransaction` if `ctx` was not produced by
    /// [`Registry::start_tx`], `SagaError::Persistence` if the attempt could
    /// not be logged (the step does not run), `SagaError::AlreadyCommitted` or
    /// `SagaError::AlreadyCompensated` if the saga is already closed, and
    /// `SagaError::StepFailed` with the forward error once earlier steps have
    /// been compensated.
    pub async fn invoke(&self, ctx: &SagaContext, request: Value) -> Result<Value> {
        self.registry.invoke(self.step.as_ref(), ctx, request).await
    }
}

impl fmt::Debug for StepEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepEndpoint")
            .field("step", &self.step.name())
            .finish_non_exhaustive()
    }
}

/// Endpoints of all registered steps, keyed by step name.
#[derive(Debug, Clone, Default)]
pub struct SagaEndpoints {
    endpoints: IndexMap<String, StepEndpoint>,
}

impl SagaEndpoints {
    pub(crate) fn insert(&mut self, endpoint: StepEndpoint) {
        self.endpoints.insert(endpoint.name().to_string(), endpoint);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StepEndpoint> {
        self.endpoints.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepEndpoint> {
        self.endpoints.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl Index<&str> for SagaEndpoints {
    type Output = StepEndpoint;

    /// # Panics
    ///
    /// Panics if no step is registered under `name`.
    fn index(&self, name: &str) -> &StepEndpoint {
        &self.endpoints[name]
    }
}
