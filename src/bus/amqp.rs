//! RabbitMQ implementation of the broker seams.
//!
//! One topic exchange fans out domain events; delayed expiration uses a
//! wait queue whose per-message TTL dead-letters into the processing queue
//! drained by the expiration consumer.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
        ExchangeDeclareOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Consumer, ExchangeKind,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{BusError, DelayScheduler, EventPublisher, ExpirationMessage, Result};
use crate::events::DomainEvent;

/// Queue and exchange names used by the reservation core.
#[derive(Clone, Debug)]
pub struct AmqpTopology {
    /// Topic exchange domain events are published to.
    pub events_exchange: String,
    /// Wait queue holding delayed expiration messages until their TTL
    /// dead-letters them into the processing queue.
    pub wait_queue: String,
    /// Queue the expiration consumer drains.
    pub processing_queue: String,
}

impl Default for AmqpTopology {
    fn default() -> Self {
        Self {
            events_exchange: "marquee.events".to_string(),
            wait_queue: "marquee.expiration.wait".to_string(),
            processing_queue: "marquee.expiration".to_string(),
        }
    }
}

/// AMQP broker: event publisher, delay scheduler, and consumer source.
pub struct AmqpBroker {
    pool: Pool,
    topology: AmqpTopology,
}

impl AmqpBroker {
    /// Connect and declare the topology. Idempotent against an existing
    /// broker state with the same declarations.
    pub async fn new(url: &str, topology: AmqpTopology) -> Result<Self> {
        let manager = Manager::new(url.to_string(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| BusError::Connection(format!("connection pool: {}", e)))?;

        let broker = Self { pool, topology };
        broker.declare_topology().await?;

        info!(url = %url, exchange = %broker.topology.events_exchange, "AMQP broker ready");

        Ok(broker)
    }

    /// Open a confirmed channel on a pooled connection.
    async fn get_channel(&self) -> Result<Channel> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e: PoolError| BusError::Connection(format!("pool checkout: {}", e)))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("channel open: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError::Connection(format!("confirm mode: {}", e)))?;

        Ok(channel)
    }

    /// Declare the events exchange, the processing queue, and the wait
    /// queue whose dead-letter target is the processing queue.
    async fn declare_topology(&self) -> Result<()> {
        let channel = self.get_channel().await?;

        channel
            .exchange_declare(
                &self.topology.events_exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("exchange declare: {}", e)))?;

        channel
            .queue_declare(
                &self.topology.processing_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("processing queue declare: {}", e)))?;

        // Expired messages dead-letter through the default exchange straight
        // into the processing queue.
        let mut wait_args = BTreeMap::new();
        wait_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(String::new().into()),
        );
        wait_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.topology.processing_queue.clone().into()),
        );

        channel
            .queue_declare(
                &self.topology.wait_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::from(wait_args),
            )
            .await
            .map_err(|e| BusError::Connection(format!("wait queue declare: {}", e)))?;

        info!(
            wait_queue = %self.topology.wait_queue,
            processing_queue = %self.topology.processing_queue,
            "Declared expiration topology"
        );

        Ok(())
    }

    /// Start a consumer on the processing queue.
    ///
    /// `prefetch` bounds the unacked deliveries held by this instance so
    /// replicas drain the queue cooperatively.
    pub async fn consume_expirations(&self, prefetch: u16) -> Result<Consumer> {
        let channel = self.get_channel().await?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Consume(format!("qos: {}", e)))?;

        let consumer = channel
            .basic_consume(
                &self.topology.processing_queue,
                "marquee-expirer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume(format!("basic.consume: {}", e)))?;

        Ok(consumer)
    }
}

/// Per-message TTL in the string form AMQP expects.
fn expiration_millis(delay: Duration) -> String {
    delay.as_millis().to_string()
}

#[async_trait]
impl DelayScheduler for AmqpBroker {
    #[tracing::instrument(name = "bus.schedule", skip(self), fields(reservation = %reservation_id))]
    async fn schedule_expiration(&self, reservation_id: Uuid, delay: Duration) -> Result<()> {
        let payload = serde_json::to_vec(&ExpirationMessage { reservation_id })?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_expiration(expiration_millis(delay).into());

        let channel = self.get_channel().await?;
        let confirm = channel
            .basic_publish(
                "", // default exchange routes by queue name
                &self.topology.wait_queue,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Schedule(format!("wait queue publish: {}", e)))?;

        confirm
            .await
            .map_err(|e| BusError::Schedule(format!("wait queue confirm: {}", e)))?;

        debug!(delay_ms = delay.as_millis() as u64, "Scheduled expiration");

        Ok(())
    }
}

/// Retries after the first publish attempt before the event is abandoned
/// to the operational log.
const PUBLISH_RETRIES: usize = 4;

impl AmqpBroker {
    /// One publish attempt on a fresh pooled channel, confirmed by the
    /// broker before it counts as delivered.
    async fn try_publish(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        let channel = self.get_channel().await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2);

        let confirm = channel
            .basic_publish(
                &self.topology.events_exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("basic.publish: {}", e)))?;

        confirm
            .await
            .map_err(|e| BusError::Publish(format!("broker confirm: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpBroker {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(event = %event.name()))]
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let payload = event.payload()?;
        let routing_key = event.name();

        // Event fan-out runs after commit, so a struggling broker gets a
        // few short, jittered pauses and then the event is dropped to the
        // log rather than wedging the request path.
        let mut pauses = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_secs(3))
            .with_max_times(PUBLISH_RETRIES)
            .with_jitter()
            .build();

        loop {
            match self.try_publish(routing_key, &payload).await {
                Ok(()) => {
                    debug!(routing_key = %routing_key, "Event delivered to exchange");
                    return Ok(());
                }
                Err(e) => {
                    let Some(pause) = pauses.next() else {
                        error!(routing_key = %routing_key, error = %e, "Giving up on event publish");
                        return Err(e);
                    };
                    warn!(
                        routing_key = %routing_key,
                        error = %e,
                        pause = ?pause,
                        "Event publish attempt failed; backing off"
                    );
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}
