//! Bounded exponential backoff for database connections.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Connector, MigrationError};

/// Connection retry settings.
///
/// Attempt `n` failing waits `min(initial_delay * 2^(n-1), max_delay)` before
/// attempt `n + 1`. No wait follows the last attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  #[serde(with = "crate::util::duration")]
  pub initial_delay: Duration,
  #[serde(with = "crate::util::duration")]
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      initial_delay: Duration::from_millis(250),
      max_delay: Duration::from_secs(5),
    }
  }
}

impl RetryPolicy {
  /// Wait after the given failed attempt (1-based).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self
      .initial_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }

  /// Total time spent waiting if every attempt fails.
  pub fn total_wait(&self) -> Duration {
    (1..self.max_attempts.max(1)).map(|attempt| self.delay_for(attempt)).sum()
  }
}

/// Connect, retrying failures per `policy`.
///
/// Exhausting the attempts yields [`MigrationError::Unreachable`].
pub async fn connect_with_retry<C: Connector>(connector: &C, policy: &RetryPolicy) -> Result<C::Store, MigrationError> {
  let endpoint = connector.endpoint();
  let max_attempts = policy.max_attempts.max(1);
  let mut last_error = String::new();

  for attempt in 1..=max_attempts {
    match connector.connect() {
      Ok(store) => {
        if attempt > 1 {
          info!(endpoint = %endpoint, attempt, "database connection established after retry");
        } else {
          debug!(endpoint = %endpoint, "database connection established");
        }
        return Ok(store);
      }
      Err(err) => {
        warn!(endpoint = %endpoint, attempt, max_attempts, error = %err, "database connection failed");
        last_error = err.0;
        if attempt < max_attempts {
          let delay = policy.delay_for(attempt);
          debug!(delay = %humantime::format_duration(delay), "waiting before next connection attempt");
          tokio::time::sleep(delay).await;
        }
      }
    }
  }

  Err(MigrationError::Unreachable {
    endpoint,
    attempts: max_attempts,
    message: last_error,
  })
}
