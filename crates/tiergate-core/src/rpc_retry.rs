//! ============================================================================
//! RPC Retry Logic - Exponential Backoff for Balance Reads
//! ============================================================================
//! Bounded retries for JSON-RPC reads:
//! - Exponential backoff with jitter
//! - Error classification (retryable vs permanent vs rate limited)
//! - Only network failures are retried; contract errors surface at once
//! ============================================================================

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::types::GateError;

/// Configuration for RPC retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay between retries (will be multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Maximum delay between retries
    pub max_delay_ms: u64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4000,
            jitter: true,
        }
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorKind {
    /// Error is likely transient, should retry
    Retryable,
    /// Error is permanent, don't retry
    Permanent,
    /// Rate limited, back off more aggressively
    RateLimited,
}

/// Classify an error to determine if retry is appropriate
pub fn classify_error(error: &GateError) -> ErrorKind {
    match error {
        GateError::Network(msg) => {
            let lower = msg.to_lowercase();
            if lower.contains("rate limit")
                || lower.contains("too many requests")
                || lower.contains("429")
            {
                ErrorKind::RateLimited
            } else {
                ErrorKind::Retryable
            }
        }
        _ => ErrorKind::Permanent,
    }
}

/// Calculate delay with exponential backoff and optional jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.base_delay_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(config.max_delay_ms);

    let final_delay = if config.jitter {
        // Add random jitter (0-50% of delay)
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..0.5);
        (capped_delay as f64 * jitter_factor) as u64
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> Result<T, GateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GateError>>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = calculate_delay(attempt - 1, config);
            debug!("{}: retry attempt {} after {:?} delay", label, attempt, delay);
            sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let kind = classify_error(&e);
                warn!("{}: attempt {} failed ({:?}): {}", label, attempt + 1, kind, e);

                match kind {
                    ErrorKind::Permanent => return Err(e),
                    ErrorKind::RateLimited => {
                        let rate_limit_delay = Duration::from_millis(config.max_delay_ms);
                        if attempt + 1 < attempts {
                            warn!("{}: rate limited, waiting {:?}", label, rate_limit_delay);
                            sleep(rate_limit_delay).await;
                        }
                    }
                    ErrorKind::Retryable => {}
                }

                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(GateError::Network(msg)) => GateError::Network(format!(
            "{} failed after {} attempts: {}",
            label, attempts, msg
        )),
        Some(other) => other,
        None => GateError::Network(format!("{} was never attempted", label)),
    })
}
