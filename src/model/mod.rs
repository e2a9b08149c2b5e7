//! Domain entities for the reservation core.
//!
//! Screenings own a fixed seat inventory. Seats move through
//! `Available -> Reserved -> Sold` (with `Reserved -> Available` on
//! expiration); reservations move through the monotonic DAG
//! `Pending -> {Confirmed, Expired, Cancelled}`. Sales are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seat lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Reserved,
    Sold,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Reserved => "reserved",
            SeatStatus::Sold => "sold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(SeatStatus::Available),
            "reserved" => Some(SeatStatus::Reserved),
            "sold" => Some(SeatStatus::Sold),
            _ => None,
        }
    }
}

impl std::fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation lifecycle status.
///
/// `Cancelled` is representable but no core operation produces it; it is
/// reserved for a future user-initiated cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Expired,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReservationStatus::Pending),
            "confirmed" => Some(ReservationStatus::Confirmed),
            "expired" => Some(ReservationStatus::Expired),
            "cancelled" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    /// Whether `self -> next` is a legal transition in the status DAG.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(self, ReservationStatus::Pending) && next != ReservationStatus::Pending
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled showing of a film in a specific room; owns a fixed seat
/// inventory created at provisioning time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screening {
    pub id: Uuid,
    pub movie_name: String,
    pub start_time: DateTime<Utc>,
    pub room_number: i32,
    /// Ticket price in the smallest currency unit (cents).
    pub ticket_price_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One bookable position within a screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub screening_id: Uuid,
    /// Human-readable label, unique within a screening (e.g. "A3").
    pub label: String,
    pub row_label: String,
    pub status: SeatStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A time-bounded exclusive hold on exactly one seat by one buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub seat_id: Uuid,
    /// Opaque buyer identifier.
    pub user_id: String,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of a confirmed purchase. One sale per reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: Uuid,
    pub seat_id: Uuid,
    pub user_id: String,
    pub reservation_id: Uuid,
    /// Amount paid in the smallest currency unit (cents).
    pub amount_cents: i64,
    pub paid_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Fingerprint of a single multi-seat hold request.
///
/// All reservations created by one hold call share one `expires_at`, so the
/// triple identifies the sibling set without a stored group id. Timestamps
/// carry microsecond resolution, so distinct calls land on distinct values.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingGroupKey {
    pub user_id: String,
    pub screening_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A reservation joined with its seat and the seat's screening, as returned
/// by the gateway's locking fetch for confirm.
#[derive(Debug, Clone)]
pub struct ReservationContext {
    pub reservation: Reservation,
    pub seat: Seat,
    pub screening: Screening,
}
