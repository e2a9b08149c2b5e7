//! Domain events emitted after successful commits.
//!
//! Events are published only once the triggering transaction has committed,
//! never inside it, so rolled-back state can't produce phantom events.
//! Consumers are assumed idempotent (delivery is at-least-once).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A hold was created for a seat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCreated {
    pub reservation_id: Uuid,
    pub seat_id: Uuid,
    pub seat_label: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// A hold was converted into a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmed {
    pub sale_id: Uuid,
    pub reservation_id: Uuid,
    pub seat_id: Uuid,
    pub seat_label: String,
    pub user_id: String,
    /// Amount paid in the smallest currency unit (cents).
    pub amount: i64,
}

/// A hold passed its deadline and was released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationExpired {
    pub reservation_id: Uuid,
    pub seat_id: Uuid,
    pub seat_label: String,
    pub user_id: String,
}

/// A seat returned to the available pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatReleased {
    pub seat_id: Uuid,
    pub seat_label: String,
    pub screening_id: Uuid,
}

/// Union of all domain events the core publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    ReservationCreated(ReservationCreated),
    PaymentConfirmed(PaymentConfirmed),
    ReservationExpired(ReservationExpired),
    SeatReleased(SeatReleased),
}

impl DomainEvent {
    /// Wire name of the event; doubles as the routing key.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::ReservationCreated(_) => "reservation.created",
            DomainEvent::PaymentConfirmed(_) => "payment.confirmed",
            DomainEvent::ReservationExpired(_) => "reservation.expired",
            DomainEvent::SeatReleased(_) => "seat.released",
        }
    }

    /// JSON payload for publication.
    pub fn payload(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            DomainEvent::ReservationCreated(p) => serde_json::to_vec(p),
            DomainEvent::PaymentConfirmed(p) => serde_json::to_vec(p),
            DomainEvent::ReservationExpired(p) => serde_json::to_vec(p),
            DomainEvent::SeatReleased(p) => serde_json::to_vec(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = DomainEvent::SeatReleased(SeatReleased {
            seat_id: Uuid::new_v4(),
            seat_label: "A3".to_string(),
            screening_id: Uuid::new_v4(),
        });
        assert_eq!(event.name(), "seat.released");
    }

    #[test]
    fn test_payload_uses_camel_case_keys() {
        let event = DomainEvent::ReservationCreated(ReservationCreated {
            reservation_id: Uuid::new_v4(),
            seat_id: Uuid::new_v4(),
            seat_label: "B7".to_string(),
            user_id: "u1".to_string(),
            expires_at: Utc::now(),
        });
        let payload = event.payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(value.get("reservationId").is_some());
        assert!(value.get("seatLabel").is_some());
        assert!(value.get("expiresAt").is_some());
        assert!(value.get("reservation_id").is_none());
    }
}
