use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use nodeflow_core::config::RetryConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::ModelClient;
use nodeflow_core::types::*;

/// A model client that retries requests failing with a retryable error.
///
/// Hosts opt into this wrapper; the engine never retries on its own.
pub struct RetryingModel {
    inner: Box<dyn ModelClient>,
    retry_config: RetryConfig,
}

impl RetryingModel {
    pub fn new(inner: Box<dyn ModelClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelClient for RetryingModel {
    fn generate(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut last_err = None;

            for attempt in 0..=max_retries {
                match self.inner.generate(request.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        if e.is_retryable() && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying model request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        return Err(e);
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| NodeflowError::ModelError("all attempts failed".into())))
        })
    }
}
