//! Retry policy for external calls.
//!
//! Every call site wraps its operation in [`RetryPolicy::run`], so the retry
//! semantics stay visible where the call happens:
//!
//! ```ignore
//! let item = retry.run("get_item", || library.get_item(&key)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExternalError;

/// Whether a failure may go away on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry after a delay.
    Transient,
    /// Give up immediately.
    Permanent,
}

/// Outcome of a call that did not succeed under the policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// The first failure was permanent; no retry happened.
    #[error("{0}")]
    Permanent(ExternalError),

    /// The first call and every retry failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of calls made, the first one included.
        attempts: u32,
        /// Error of the final call.
        last: ExternalError,
    },
}

impl From<RetryError> for ExternalError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Permanent(e) | RetryError::Exhausted { last: e, .. } => e,
        }
    }
}

impl RetryError {
    /// The error of the last call.
    #[must_use]
    pub const fn last(&self) -> &ExternalError {
        match self {
            Self::Permanent(e) | Self::Exhausted { last: e, .. } => e,
        }
    }
}

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first failed call. An operation is called at most
    /// `max_attempts + 1` times.
    pub max_attempts: u32,
    /// Delay after the first failure.
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests and dry runs against fakes.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Classifies a failure.
    ///
    /// Timeouts, rate limits, unavailability, connection failures and
    /// version conflicts are transient; everything else is permanent.
    #[must_use]
    pub const fn classify(&self, error: &ExternalError) -> ErrorClass {
        match error {
            ExternalError::Timeout
            | ExternalError::RateLimited { .. }
            | ExternalError::Unavailable(_)
            | ExternalError::Connection(_)
            | ExternalError::VersionConflict(_) => ErrorClass::Transient,
            ExternalError::NotFound(_)
            | ExternalError::InvalidResponse(_)
            | ExternalError::Rejected(_) => ErrorClass::Permanent,
        }
    }

    /// Delay before retrying after the failed call number `attempt` (zero-based):
    /// `min(max_delay, base_delay * 2^attempt)`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Like [`next_delay`](Self::next_delay), but honours a server-requested
    /// wait up to `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &ExternalError) -> Duration {
        let backoff = self.next_delay(attempt);
        match error {
            ExternalError::RateLimited {
                retry_after: Some(wait),
            } => backoff.max(*wait).min(self.max_delay),
            _ => backoff,
        }
    }

    /// Runs `op` until it succeeds, fails permanently or uses up the attempts.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Permanent`] on the first permanent failure and
    /// [`RetryError::Exhausted`] once the first call and `max_attempts`
    /// retries have all failed transiently.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let attempts = self.max_attempts.saturating_add(1);
        let mut attempt = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if self.classify(&err) == ErrorClass::Permanent {
                return Err(RetryError::Permanent(err));
            }

            attempt += 1;
            if attempt >= attempts {
                warn!(op = op_name, attempts, error = %err, "Giving up");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.delay_for(attempt - 1, &err);
            warn!(op = op_name, attempt, ?delay, error = %err, "Transient failure, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
