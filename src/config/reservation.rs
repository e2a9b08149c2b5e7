//! Hold TTL, retry policy, and expiration consumer configuration.

use std::time::Duration;

use serde::Deserialize;

use super::InvalidConfig;

/// Hold TTL and transactional retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// Hold lifetime in seconds. Valid range: [10, 3600].
    pub ttl_seconds: u64,
    /// Retries after the first attempt on a retryable store failure.
    pub max_retry_attempts: usize,
    /// First retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Growth factor between consecutive retry delays.
    pub retry_backoff_multiplier: u32,
    /// Upper bound for a single retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 30,
            max_retry_attempts: 3,
            initial_retry_delay_ms: 100,
            retry_backoff_multiplier: 2,
            max_retry_delay_ms: 2000,
        }
    }
}

impl ReservationConfig {
    /// Hold lifetime as a wall-clock duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Hold lifetime as a chrono duration, for deadline arithmetic.
    pub fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_seconds as i64)
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if !(10..=3600).contains(&self.ttl_seconds) {
            return Err(InvalidConfig(format!(
                "reservation.ttl_seconds must be within [10, 3600], got {}",
                self.ttl_seconds
            )));
        }
        if self.retry_backoff_multiplier == 0 {
            return Err(InvalidConfig(
                "reservation.retry_backoff_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expiration consumer batching configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    /// Maximum deliveries accumulated before a batch is processed.
    pub batch_size: usize,
    /// Maximum time a partial batch waits before being processed.
    pub flush_interval_ms: u64,
    /// Unacked deliveries held per consumer instance. Defaults to
    /// `batch_size` so a full batch can accumulate.
    pub prefetch: Option<u16>,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval_ms: 2000,
            prefetch: None,
        }
    }
}

impl ExpirationConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Effective prefetch for the consumer channel.
    pub fn effective_prefetch(&self) -> u16 {
        self.prefetch
            .unwrap_or_else(|| self.batch_size.min(u16::MAX as usize) as u16)
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.batch_size == 0 {
            return Err(InvalidConfig(
                "expiration.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
