use std::sync::Arc;

use saga_store::{MemoryStore, Store};
use tracing::debug;

use crate::config::SagaConfig;
use crate::endpoint::SagaEndpoints;
use crate::error::Result;
use crate::recovery::RecoveryTask;
use crate::registry::Registry;
use crate::step::SagaStep;

/// Everything a host process needs to serve sagas: the registry, one endpoint
/// per step, and the recovery task to run next to the server.
#[derive(Debug)]
pub struct SagaModule {
    pub registry: Arc<Registry>,
    pub endpoints: SagaEndpoints,
    pub recovery: RecoveryTask,
}

impl SagaModule {
    /// Assemble a module from a configuration, an optional store and the
    /// ordered list of steps.
    ///
    /// Without a store, sagas are kept in a [`MemoryStore`].
    ///
    /// # Errors
    ///
    /// Returns `SagaError::InvalidConfig` for unusable configuration and
    /// `SagaError::DuplicateStepName` or `SagaError::InvalidStepName` for a
    /// bad step list.
    pub fn new(
        config: SagaConfig,
        store: Option<Arc<dyn Store>>,
        steps: Vec<Arc<dyn SagaStep>>,
    ) -> Result<Self> {
        let mut builder = SagaModuleBuilder::new().config(config);
        if let Some(store) = store {
            builder = builder.store(store);
        }
        steps
            .into_iter()
            .fold(builder, SagaModuleBuilder::step)
            .build()
    }

    #[must_use]
    pub fn builder() -> SagaModuleBuilder {
        SagaModuleBuilder::new()
    }
}

/// Builder for [`SagaModule`].
#[derive(Default)]
pub struct SagaModuleBuilder {
    config: SagaConfig,
    store: Option<Arc<dyn Store>>,
    steps: Vec<Arc<dyn SagaStep>>,
}

impl SagaModuleBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: SagaConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add a step. Steps are registered in the order they are added.
    #[must_use]
    pub fn step(mut self, step: Arc<dyn SagaStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Register every step and build the module.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::InvalidConfig` for unusable configuration and
    /// `SagaError::DuplicateStepName` or `SagaError::InvalidStepName` for a
    /// bad step list.
    pub fn build(self) -> Result<SagaModule> {
        self.config.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn Store>);
        let registry = Registry::new(store, self.config);

        let mut endpoints = SagaEndpoints::default();
        for step in self.steps {
            endpoints.insert(registry.add_step(step)?);
        }
        debug!(steps = endpoints.len(), "saga module assembled");

        let recovery = RecoveryTask::new(Arc::clone(&registry));
        Ok(SagaModule {
            registry,
            endpoints,
            recovery,
        })
    }
}
