use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SagaError};

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_RECOVER_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_SAGAS_PER_SWEEP: usize = 100;
/// Longest step timeout or recover interval accepted.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Tunables of the saga registry and its recovery task.
///
/// Deserializes from a table such as:
///
/// ```toml
/// step-timeout-secs = 30
/// recover-interval-secs = 10
/// max-sagas-per-sweep = 50
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSagaConfig")]
pub struct SagaConfig {
    /// Upper bound on a single Do or Undo call. Also the age below which the
    /// recovery sweep treats a saga as possibly still in flight.
    pub step_timeout: Duration,
    /// Delay between recovery sweeps.
    pub recover_interval: Duration,
    /// Maximum number of sagas one sweep resolves.
    pub max_sagas_per_sweep: usize,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            recover_interval: DEFAULT_RECOVER_INTERVAL,
            max_sagas_per_sweep: DEFAULT_MAX_SAGAS_PER_SWEEP,
        }
    }
}

impl SagaConfig {
    #[must_use]
    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    #[must_use]
    pub fn with_recover_interval(mut self, recover_interval: Duration) -> Self {
        self.recover_interval = recover_interval;
        self
    }

    #[must_use]
    pub fn with_max_sagas_per_sweep(mut self, max_sagas_per_sweep: usize) -> Self {
        self.max_sagas_per_sweep = max_sagas_per_sweep;
        self
    }

    /// Reject values the registry cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::InvalidConfig` if a duration or the sweep limit is
    /// zero, or a duration exceeds [`MAX_DURATION`].
    pub fn validate(&self) -> Result<()> {
        if self.step_timeout.is_zero() {
            return Err(SagaError::InvalidConfig("step timeout must be positive"));
        }
        if self.step_timeout > MAX_DURATION {
            return Err(SagaError::InvalidConfig("step timeout must not exceed a year"));
        }
        if self.recover_interval.is_zero() {
            return Err(SagaError::InvalidConfig("recover interval must be positive"));
        }
        if self.recover_interval > MAX_DURATION {
            return Err(SagaError::InvalidConfig(
                "recover interval must not exceed a year",
            ));
        }
        if self.max_sagas_per_sweep == 0 {
            return Err(SagaError::InvalidConfig(
                "max sagas per sweep must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawSagaConfig {
    step_timeout_secs: u64,
    recover_interval_secs: u64,
    max_sagas_per_sweep: usize,
}

impl Default for RawSagaConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: DEFAULT_STEP_TIMEOUT.as_secs(),
            recover_interval_secs: DEFAULT_RECOVER_INTERVAL.as_secs(),
            max_sagas_per_sweep: DEFAULT_MAX_SAGAS_PER_SWEEP,
        }
    }
}

impl TryFrom<RawSagaConfig> for SagaConfig {
    type Error = SagaError;

    fn try_from(raw: RawSagaConfig) -> Result<Self> {
        let config = Self {
            step_timeout: Duration::from_secs(raw.step_timeout_secs),
            recover_interval: Duration::from_secs(raw.recover_interval_secs),
            max_sagas_per_sweep: raw.max_sagas_per_sweep,
        };
        config.validate()?;
        Ok(config)
    }
}
