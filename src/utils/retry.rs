//! Retry decoration for transactional blocks.
//!
//! Built on `backon`'s jittered exponential backoff. The decoration wraps
//! a whole attempt, never individual statements: each retry of a
//! coordinator operation re-opens a fresh store session.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{error, warn};

use crate::config::ReservationConfig;

/// Backoff for retryable store failures (deadlock, lock timeout,
/// connectivity), shaped by the reservation retry policy.
pub fn store_backoff(config: &ReservationConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.initial_retry_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_retry_delay_ms))
        .with_factor(config.retry_backoff_multiplier as f32)
        .with_max_times(config.max_retry_attempts)
        .with_jitter()
}

/// Backoff for reaching the broker at process start, where the broker may
/// come up well after this process does. Patient: jittered delays growing
/// from 200ms to a 10s ceiling, twenty attempts.
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(20)
        .with_jitter()
}

/// Run an operation with exponential backoff.
///
/// `op` is attempted once, then retried for every delay the backoff yields
/// while `is_retryable` holds for the error. Fatal errors and exhaustion
/// propagate the last error.
pub async fn run_with_retry<T, E, F, Fut, P>(
    name: &str,
    backoff: ExponentialBuilder,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut delays = backoff.build();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) => {
                if let Some(delay) = delays.next() {
                    warn!(
                        operation = %name,
                        attempt = attempt,
                        error = %e,
                        delay = ?delay,
                        "Retryable failure; waiting before the next attempt"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    error!(
                        operation = %name,
                        attempts = attempt,
                        "Retries exhausted; surfacing the last failure"
                    );
                    return Err(e);
                }
            }
            Err(e) => {
                error!(
                    operation = %name,
                    attempt = attempt,
                    error = %e,
                    "Non-retryable failure"
                );
                return Err(e);
            }
        }
    }
}
