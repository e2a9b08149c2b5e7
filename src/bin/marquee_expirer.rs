//! marquee-expirer: expiration worker
//!
//! Drains the delayed expiration queue and releases holds whose deadline
//! has passed. Multiple instances may run side by side; the broker's
//! prefetch keeps them draining the queue cooperatively, and the expire
//! operation is idempotent under redelivery.
//!
//! ## Configuration
//! - `--config <path>` or `MARQUEE_CONFIG`: YAML configuration file
//! - `MARQUEE_*` environment variables override file values
//! - `MARQUEE_LOG`: tracing filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{error, info, warn};

use marquee::bus::AmqpBroker;
use marquee::config::Config;
use marquee::consumer::ExpirationConsumer;
use marquee::coordinator::ReservationCoordinator;
use marquee::store::init_store;
use marquee::utils::bootstrap::{init_tracing, parse_config_path};
use marquee::utils::retry::connection_backoff;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Configuration rejected: {}", e);
        e
    })?;

    info!("Starting marquee expiration worker");

    let store = init_store(&config.storage).await?;

    // The broker may still be coming up alongside this process.
    let messaging = config.messaging.clone();
    let broker = (move || {
        let messaging = messaging.clone();
        async move {
            AmqpBroker::new(&messaging.url, messaging.topology())
                .await
                .map_err(|e| e.to_string())
        }
    })
    .retry(connection_backoff())
    .notify(|err: &String, dur: Duration| {
        warn!(error = %err, delay = ?dur, "Broker connection failed, retrying");
    })
    .await?;
    let broker = Arc::new(broker);

    let coordinator = Arc::new(ReservationCoordinator::new(
        store,
        broker.clone(),
        broker.clone(),
        config.reservation.clone(),
    ));

    let consumer = ExpirationConsumer::new(coordinator, broker, config.expiration.clone());

    info!("Expiration worker up; ctrl-c stops it");

    tokio::select! {
        _ = consumer.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
