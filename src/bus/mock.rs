//! Mock broker implementations for testing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BusError, DelayScheduler, EventPublisher, Result};
use crate::events::DomainEvent;

/// Mock event publisher that records published events.
#[derive(Default)]
pub struct MockEventPublisher {
    published: RwLock<Vec<DomainEvent>>,
    fail_on_publish: RwLock<bool>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published(&self) -> Vec<DomainEvent> {
        self.published.read().await.clone()
    }

    pub async fn published_names(&self) -> Vec<&'static str> {
        self.published.read().await.iter().map(|e| e.name()).collect()
    }

    pub async fn take_published(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Publish("publish failure injected".to_string()));
        }
        self.published.write().await.push(event.clone());
        Ok(())
    }
}

/// Mock delay scheduler that records scheduled expirations.
#[derive(Default)]
pub struct MockDelayScheduler {
    scheduled: RwLock<Vec<(Uuid, Duration)>>,
    fail_on_schedule: RwLock<bool>,
}

impl MockDelayScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_schedule(&self, fail: bool) {
        *self.fail_on_schedule.write().await = fail;
    }

    pub async fn scheduled(&self) -> Vec<(Uuid, Duration)> {
        self.scheduled.read().await.clone()
    }
}

#[async_trait]
impl DelayScheduler for MockDelayScheduler {
    async fn schedule_expiration(&self, reservation_id: Uuid, delay: Duration) -> Result<()> {
        if *self.fail_on_schedule.read().await {
            return Err(BusError::Schedule("schedule failure injected".to_string()));
        }
        self.scheduled.write().await.push((reservation_id, delay));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SeatReleased;

    #[tokio::test]
    async fn test_mock_publisher_records_events() {
        let publisher = MockEventPublisher::new();
        let event = DomainEvent::SeatReleased(SeatReleased {
            seat_id: Uuid::new_v4(),
            seat_label: "C2".to_string(),
            screening_id: Uuid::new_v4(),
        });
        publisher.publish(&event).await.unwrap();
        assert_eq!(publisher.published_names().await, vec!["seat.released"]);
    }

    #[tokio::test]
    async fn test_mock_publisher_failure_mode() {
        let publisher = MockEventPublisher::new();
        publisher.set_fail_on_publish(true).await;
        let event = DomainEvent::SeatReleased(SeatReleased {
            seat_id: Uuid::new_v4(),
            seat_label: "C2".to_string(),
            screening_id: Uuid::new_v4(),
        });
        assert!(publisher.publish(&event).await.is_err());
        assert!(publisher.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_scheduler_records_delays() {
        let scheduler = MockDelayScheduler::new();
        let id = Uuid::new_v4();
        scheduler
            .schedule_expiration(id, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(scheduler.scheduled().await, vec![(id, Duration::from_secs(30))]);
    }
}
