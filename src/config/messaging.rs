//! Messaging configuration types.

use serde::Deserialize;

use crate::bus::AmqpTopology;

/// AMQP messaging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Topic exchange for domain events.
    pub events_exchange: String,
    /// Wait queue for delayed expiration messages.
    pub wait_queue: String,
    /// Processing queue drained by the expiration consumer.
    pub processing_queue: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        let topology = AmqpTopology::default();
        Self {
            url: "amqp://localhost:5672".to_string(),
            events_exchange: topology.events_exchange,
            wait_queue: topology.wait_queue,
            processing_queue: topology.processing_queue,
        }
    }
}

impl MessagingConfig {
    /// The broker topology this configuration describes.
    pub fn topology(&self) -> AmqpTopology {
        AmqpTopology {
            events_exchange: self.events_exchange.clone(),
            wait_queue: self.wait_queue.clone(),
            processing_queue: self.processing_queue.clone(),
        }
    }
}
