//! Broker-facing seams: delayed expiration scheduling and domain event
//! publication.
//!
//! This module contains:
//! - `DelayScheduler` trait: durable, at-least-once delayed delivery of
//!   expiration commands
//! - `EventPublisher` trait: post-commit domain event fan-out
//! - Implementations: AMQP (RabbitMQ), Mock

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::DomainEvent;

pub mod amqp;
pub mod mock;

pub use amqp::{AmqpBroker, AmqpTopology};
pub use mock::{MockDelayScheduler, MockEventPublisher};

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("broker connection: {0}")]
    Connection(String),

    #[error("event publish: {0}")]
    Publish(String),

    #[error("delay enqueue: {0}")]
    Schedule(String),

    #[error("queue consume: {0}")]
    Consume(String),

    #[error("payload encoding: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Payload of a delayed expiration message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationMessage {
    pub reservation_id: Uuid,
}

/// Durable delayed delivery of expiration commands.
///
/// The scheduler is trusted for durability and at-least-once delivery only;
/// ordering, precision and exactly-once are not assumed. The coordinator's
/// expire operation is the sole authority on whether expiration happens.
#[async_trait]
pub trait DelayScheduler: Send + Sync {
    /// Enqueue an expiration command that becomes deliverable after
    /// roughly `delay` of wall-clock time.
    async fn schedule_expiration(&self, reservation_id: Uuid, delay: Duration) -> Result<()>;
}

/// Post-commit domain event publication. Best-effort at-least-once;
/// consumers are assumed idempotent.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}
