use saga_store::{CorrelationId, LogId, StoreError};
use thiserror::Error;

/// Error type returned by step actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reason an action was aborted before it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Interrupted {
    #[error("action timed out")]
    TimedOut,
    #[error("action cancelled")]
    Cancelled,
}

/// Error from a failed compensation operation.
#[derive(Debug, Error)]
#[error("compensation failed for step '{step}': {description}")]
pub struct CompensationError {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// Attempt that was being compensated.
    pub log_id: LogId,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The underlying error.
    #[source]
    pub error: BoxError,
}

/// Error from saga registration, invocation and lifecycle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SagaError {
    /// The store could not record or read saga state.
    #[error("saga store unavailable")]
    Persistence(#[from] StoreError),

    /// A step endpoint was invoked outside a started transaction.
    #[error("no active transaction in context")]
    NoActiveTransaction,

    /// Two steps were registered under the same name.
    #[error("step '{0}' is already registered")]
    DuplicateStepName(String),

    /// A step was registered with an empty name.
    #[error("step name must not be empty")]
    InvalidStepName,

    /// A configuration value cannot be used.
    #[error("invalid saga configuration: {0}")]
    InvalidConfig(&'static str),

    /// The forward action failed; earlier steps were compensated best-effort.
    #[error("step '{step}' failed")]
    StepFailed {
        /// Name of the step that failed.
        step: String,
        /// The error that caused the step to fail.
        #[source]
        source: BoxError,
    },

    /// The saga was closed by compensation; it can be neither committed nor
    /// extended.
    #[error("saga '{0}' was already compensated")]
    AlreadyCompensated(CorrelationId),

    /// The saga was committed; it can be neither rolled back nor extended.
    #[error("saga '{0}' was already committed")]
    AlreadyCommitted(CorrelationId),

    /// An explicit rollback left some steps uncompensated.
    #[error("{} compensation(s) failed for saga '{correlation_id}'", errors.len())]
    CompensationFailed {
        correlation_id: CorrelationId,
        errors: Vec<CompensationError>,
    },
}

pub type Result<T> = std::result::Result<T, SagaError>;
