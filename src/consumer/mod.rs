//! Expiration consumer: drains the delayed queue and drives the
//! coordinator's expire operation.
//!
//! Deliveries accumulate into a batch (bounded by size and flush interval)
//! and are processed in parallel. Acknowledgement is per message, keyed to
//! outcome: successes and benign no-ops ack, early timer fires re-enqueue
//! with the residual delay then ack, failures nack with requeue so the
//! broker redelivers. Redelivery is harmless because expire is idempotent.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use lapin::Consumer;
use tracing::{debug, error, info, warn};

use crate::bus::{AmqpBroker, DelayScheduler, ExpirationMessage};
use crate::config::ExpirationConfig;
use crate::coordinator::{ExpireOutcome, ReservationCoordinator, ReservationError};

/// Deadline for a single expire invocation.
const EXPIRE_DEADLINE: Duration = Duration::from_secs(30);

/// Floor for residual re-enqueue delays, absorbing scheduler jitter.
const MIN_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Drains the expiration processing queue.
pub struct ExpirationConsumer {
    coordinator: Arc<ReservationCoordinator>,
    broker: Arc<AmqpBroker>,
    config: ExpirationConfig,
}

impl ExpirationConsumer {
    pub fn new(
        coordinator: Arc<ReservationCoordinator>,
        broker: Arc<AmqpBroker>,
        config: ExpirationConfig,
    ) -> Self {
        Self {
            coordinator,
            broker,
            config,
        }
    }

    /// Consume until the task is cancelled, reopening the stream with a
    /// growing, jittered pause whenever it drops.
    pub async fn run(&self) {
        let reconnect_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(20))
            .with_jitter();

        let mut pauses = reconnect_policy.build();

        loop {
            let consumer = match self
                .broker
                .consume_expirations(self.config.effective_prefetch())
                .await
            {
                Ok(consumer) => consumer,
                Err(e) => {
                    let pause = pauses.next().unwrap_or(Duration::from_secs(20));
                    error!(error = %e, pause = ?pause, "Could not open expiration consumer; will try again");
                    tokio::time::sleep(pause).await;
                    continue;
                }
            };

            info!(
                batch_size = self.config.batch_size,
                prefetch = self.config.effective_prefetch(),
                "Draining expiration queue"
            );
            // A stream that came up healthy earns a fresh pause schedule.
            pauses = reconnect_policy.build();

            self.drain(consumer).await;

            let pause = pauses.next().unwrap_or(Duration::from_secs(20));
            warn!(pause = ?pause, "Expiration stream closed; reopening");
            tokio::time::sleep(pause).await;
        }
    }

    /// Accumulate deliveries into batches and process them until the
    /// stream ends.
    async fn drain(&self, mut consumer: Consumer) {
        let mut batch: Vec<Delivery> = Vec::with_capacity(self.config.batch_size);

        loop {
            let flush = tokio::time::sleep(self.config.flush_interval());
            tokio::pin!(flush);

            let mut stream_ended = false;
            while batch.len() < self.config.batch_size {
                tokio::select! {
                    maybe = consumer.next() => match maybe {
                        Some(Ok(delivery)) => batch.push(delivery),
                        Some(Err(e)) => {
                            error!(error = %e, "Delivery stream errored; dropping this consumer");
                            stream_ended = true;
                            break;
                        }
                        None => {
                            stream_ended = true;
                            break;
                        }
                    },
                    _ = &mut flush => break,
                }
            }

            if !batch.is_empty() {
                self.process_batch(std::mem::take(&mut batch)).await;
            }

            if stream_ended {
                return;
            }
        }
    }

    /// Process one batch in parallel; each delivery acks on its own
    /// outcome.
    async fn process_batch(&self, batch: Vec<Delivery>) {
        debug!(size = batch.len(), "Processing expiration batch");
        futures::future::join_all(
            batch
                .into_iter()
                .map(|delivery| self.process_delivery(delivery)),
        )
        .await;
    }

    async fn process_delivery(&self, delivery: Delivery) {
        let message = match serde_json::from_slice::<ExpirationMessage>(&delivery.data) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Failed to decode expiration message");
                // Malformed messages are rejected without requeue.
                if let Err(e) = delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await
                {
                    error!(error = %e, "Could not reject malformed delivery");
                }
                return;
            }
        };

        let outcome = match tokio::time::timeout(
            EXPIRE_DEADLINE,
            self.coordinator.expire(message.reservation_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ReservationError::Timeout),
        };

        match disposition(&outcome) {
            Disposition::Ack => {
                if let Ok(ExpireOutcome::Expired) = outcome {
                    debug!(reservation = %message.reservation_id, "Reservation expired");
                }
                self.ack(delivery).await;
            }
            Disposition::Reschedule(remaining) => {
                let delay = remaining.max(MIN_REDELIVERY_DELAY);
                match self
                    .broker
                    .schedule_expiration(message.reservation_id, delay)
                    .await
                {
                    Ok(()) => {
                        debug!(
                            reservation = %message.reservation_id,
                            delay_ms = delay.as_millis() as u64,
                            "Timer fired early, re-enqueued with residual delay"
                        );
                        self.ack(delivery).await;
                    }
                    Err(e) => {
                        // Keep the original delivery alive so the hold is
                        // not orphaned.
                        warn!(
                            reservation = %message.reservation_id,
                            error = %e,
                            "Failed to re-enqueue early timer, re-queueing delivery"
                        );
                        self.nack(delivery).await;
                    }
                }
            }
            Disposition::Requeue => {
                if let Err(e) = &outcome {
                    warn!(
                        reservation = %message.reservation_id,
                        error = %e,
                        "Expire failed, re-queueing for redelivery"
                    );
                }
                self.nack(delivery).await;
            }
        }
    }

    async fn ack(&self, delivery: Delivery) {
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!(error = %e, "Could not ack delivery");
        }
    }

    async fn nack(&self, delivery: Delivery) {
        let options = BasicNackOptions {
            requeue: true,
            ..Default::default()
        };
        if let Err(e) = delivery.nack(options).await {
            error!(error = %e, "Could not nack delivery");
        }
    }
}

/// How a delivery should be settled for a given expire outcome.
#[derive(Debug, PartialEq)]
enum Disposition {
    Ack,
    Requeue,
    Reschedule(Duration),
}

fn disposition(outcome: &Result<ExpireOutcome, ReservationError>) -> Disposition {
    match outcome {
        Ok(ExpireOutcome::Expired) | Ok(ExpireOutcome::Noop) => Disposition::Ack,
        Ok(ExpireOutcome::EarlyTimer { remaining }) => Disposition::Reschedule(*remaining),
        Err(_) => Disposition::Requeue,
    }
}
