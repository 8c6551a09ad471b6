use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(Uuid);

impl LogId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier shared by every log of one saga instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh, globally unique correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum LogStatus {
    /// Intent recorded; the forward action has not been acknowledged.
    #[default]
    Pending,
    /// The forward action returned a response.
    Succeeded,
    /// The forward action returned an error.
    Failed,
    /// The compensating action returned successfully.
    Compensated,
}

impl LogStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Compensated => "compensated",
        }
    }

    /// Whether the attempt may still need an Undo.
    #[must_use]
    pub const fn needs_compensation(self) -> bool {
        matches!(self, Self::Pending | Self::Succeeded)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledged outcome of a forward or compensating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Outcome {
    Succeeded { response: Value },
    Failed { error: String },
    Compensated,
    /// Undo failed; recorded on the log without changing its status.
    CompensationFailed { error: String },
}

impl Outcome {
    #[must_use]
    pub fn failed(error: &dyn std::error::Error) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    #[must_use]
    pub fn compensation_failed(error: &dyn std::error::Error) -> Self {
        Self::CompensationFailed {
            error: error.to_string(),
        }
    }
}

/// Closing marker of a saga. Only the first one written takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum SagaOutcome {
    Committed,
    Compensated,
}

impl SagaOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Compensated => "compensated",
        }
    }
}

impl fmt::Display for SagaOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one step attempt.
///
/// Written as [`LogStatus::Pending`] strictly before the forward action runs.
/// Afterwards only its status and outcome fields change, through
/// [`Log::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub id: LogId,
    pub correlation_id: CorrelationId,
    pub step_name: String,
    pub request: Value,
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_error: Option<String>,
}

impl Log {
    /// Create the intent record for a step attempt.
    #[must_use]
    pub fn pending(
        correlation_id: CorrelationId,
        step_name: impl Into<String>,
        request: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: LogId::new(),
            correlation_id,
            step_name: step_name.into(),
            request,
            status: LogStatus::Pending,
            created_at: now,
            updated_at: now,
            response: None,
            error: None,
            compensation_error: None,
        }
    }

    /// Apply an acknowledged outcome.
    ///
    /// Returns `false` when the outcome does not change the record: repeated
    /// acks, acks conflicting with an earlier terminal ack, and anything
    /// arriving after compensation.
    pub fn apply(&mut self, outcome: &Outcome, at: DateTime<Utc>) -> bool {
        match (self.status, outcome) {
            (LogStatus::Pending, Outcome::Succeeded { response }) => {
                self.status = LogStatus::Succeeded;
                self.response = Some(response.clone());
            }
            (LogStatus::Pending, Outcome::Failed { error }) => {
                self.status = LogStatus::Failed;
                self.error = Some(error.clone());
            }
            (LogStatus::Pending | LogStatus::Succeeded, Outcome::Compensated) => {
                self.status = LogStatus::Compensated;
                self.compensation_error = None;
            }
            (LogStatus::Pending | LogStatus::Succeeded, Outcome::CompensationFailed { error }) => {
                if self.compensation_error.as_deref() == Some(error.as_str()) {
                    return false;
                }
                self.compensation_error = Some(error.clone());
            }
            _ => return false,
        }
        self.updated_at = at;
        true
    }
}
