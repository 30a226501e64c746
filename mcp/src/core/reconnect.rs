//! Retry with exponential backoff for provider connects.

use std::{future::Future, time::Duration};

use backoff::ExponentialBackoffBuilder;
use tracing::{error, warn};

use super::config::RetryConfig;
use crate::error::McpResult;

/// Retries transient failures; permanent ones (see
/// [`crate::McpError::is_permanent`]) end the attempt immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Zero means a single attempt.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            max_elapsed: Duration::from_millis(config.max_elapsed_ms),
        }
    }

    pub fn disabled() -> Self {
        Self::from_config(&RetryConfig::disabled())
    }

    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> McpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        if self.max_elapsed.is_zero() {
            return operation().await;
        }

        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build();

        backoff::future::retry(backoff, || {
            let attempt = operation();
            async move {
                match attempt.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_permanent() => {
                        error!(operation = %label, error = %e, "Permanent error - not retrying");
                        Err(backoff::Error::permanent(e))
                    }
                    Err(e) => {
                        warn!(operation = %label, error = %e, "Transient error, retrying");
                        Err(backoff::Error::transient(e))
                    }
                }
            }
        })
        .await
    }
}
