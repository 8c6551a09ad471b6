//! Crash-safe saga orchestration.
//!
//! Steps are registered with a [`Registry`], which returns an endpoint per
//! step. Invoking an endpoint inside a transaction logs the attempt, runs the
//! forward action and acknowledges its outcome; when a forward action fails,
//! earlier steps of the same saga are compensated in reverse order. A
//! [`RecoveryTask`] periodically compensates sagas a crashed process left
//! behind.

mod config;
mod context;
mod endpoint;
mod error;
mod module;
mod recovery;
mod registry;
mod report;
mod step;
mod transaction;

pub use config::{MAX_DURATION, SagaConfig};
pub use context::SagaContext;
pub use endpoint::{SagaEndpoints, StepEndpoint};
pub use error::{BoxError, CompensationError, Interrupted, SagaError};
pub use module::{SagaModule, SagaModuleBuilder};
pub use recovery::RecoveryTask;
pub use registry::Registry;
pub use report::{RecoveryReport, SagaRecord, SagaResolution};
pub use saga_store as store;
pub use step::{FnStep, SagaStep};
pub use transaction::{Transaction, TransactionState};
