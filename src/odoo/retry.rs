use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::types::{OdooError, OdooResult};

const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 2_000;

/// Retry policy shared by both Odoo client variants: transient faults
/// (network, timeout, 5xx, 429) are retried up to `max_retries` extra
/// attempts with capped exponential backoff and ±20 % jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self { max_retries }
    }

    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> OdooResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OdooResult<T>>,
    {
        let mut last_err: Option<OdooError> = None;

        for n in 0..=self.max_retries {
            match attempt().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => last_err = Some(e),
                Err(e) => return Err(e),
            }
            if n < self.max_retries {
                tokio::time::sleep(backoff_delay(n)).await;
            }
        }

        // After the budget, transient faults surface as TransportError or
        // Timeout.
        Err(match last_err {
            Some(e @ OdooError::Timeout(_)) | Some(e @ OdooError::Transport(_)) => e,
            Some(e) => OdooError::Transport(format!("retry budget exhausted: {e}")),
            None => OdooError::InvalidResponse("request failed without error details".to_string()),
        })
    }
}

fn backoff_delay(attempt: usize) -> Duration {
    let base = BASE_DELAY_MS
        .saturating_mul(2u64.saturating_pow(attempt as u32))
        .min(MAX_DELAY_MS);
    let jitter: f64 = rand::rng().random_range(0.8..=1.2);
    Duration::from_millis((base as f64 * jitter) as u64)
}
