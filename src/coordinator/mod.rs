//! Reservation coordinator: the hold / confirm / expire state machine.
//!
//! All durable state flows through one transactional session per attempt.
//! Seats are locked in sorted-label order, so two holds over overlapping
//! seat sets cannot form a lock-wait cycle. Retryable store failures rerun
//! the whole transactional block with a fresh session; side effects
//! (events, expiration scheduling) happen strictly after commit and are
//! logged rather than surfaced when the broker is down.
//!
//! Coordinator futures are cancellation-safe: an attempt abandoned at any
//! suspension point drops its session, which rolls the transaction back.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use crate::bus::{DelayScheduler, EventPublisher};
use crate::config::ReservationConfig;
use crate::events::{
    DomainEvent, PaymentConfirmed, ReservationCreated, ReservationExpired, SeatReleased,
};
use crate::model::{
    BookingGroupKey, Reservation, ReservationContext, ReservationStatus, Sale, Screening, Seat,
    SeatStatus,
};
use crate::store::{InventoryStore, StoreError, StoreSession};
use crate::utils::retry::{run_with_retry, store_backoff};

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, ReservationError>;

/// Errors surfaced by coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    /// Referenced screening/seat/reservation absent, or ownership mismatch.
    #[error("{0}")]
    NotFound(String),

    /// Seat not available, reservation not pending, or reservation expired.
    #[error("{0}")]
    Conflict(String),

    /// Malformed command (empty or duplicated seat labels).
    #[error("{0}")]
    InvalidRequest(String),

    /// Structural inconsistency in durable state.
    #[error("{0}")]
    InvalidState(String),

    /// Caller deadline exceeded; the transaction was rolled back.
    #[error("Operation timed out")]
    Timeout,

    /// Store failure, retried internally when retryable.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReservationError {
    /// Whether rerunning the transactional block may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReservationError::Store(e) if e.is_retryable())
    }
}

/// Command: hold one or more seats of a screening for one buyer.
#[derive(Debug, Clone)]
pub struct CreateHold {
    pub screening_id: Uuid,
    pub seat_labels: Vec<String>,
    pub user_id: String,
}

/// Command: convert a hold (and its booking group) into sales.
#[derive(Debug, Clone)]
pub struct ConfirmPayment {
    pub reservation_id: Uuid,
    pub user_id: String,
}

/// One reservation created by a hold.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldReceipt {
    pub reservation_id: Uuid,
    pub seat_id: Uuid,
    pub seat_label: String,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
}

/// The sale corresponding to a confirmed reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleReceipt {
    pub sale_id: Uuid,
    pub reservation_id: Uuid,
    pub seat_id: Uuid,
    pub seat_label: String,
    pub movie_name: String,
    pub room_number: i32,
    pub amount_cents: i64,
    pub paid_at: DateTime<Utc>,
}

impl SaleReceipt {
    fn new(sale: &Sale, seat: &Seat, screening: &Screening) -> Self {
        Self {
            sale_id: sale.id,
            reservation_id: sale.reservation_id,
            seat_id: sale.seat_id,
            seat_label: seat.label.clone(),
            movie_name: screening.movie_name.clone(),
            room_number: screening.room_number,
            amount_cents: sale.amount_cents,
            paid_at: sale.paid_at,
        }
    }
}

/// What an expire invocation observed. Idempotent by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpireOutcome {
    /// The hold was released and the seat returned to the pool.
    Expired,
    /// The reservation is gone or already terminal.
    Noop,
    /// The timer fired before the deadline; re-enqueue after `remaining`.
    EarlyTimer { remaining: Duration },
}

/// The reservation state machine over the store, scheduler, and publisher
/// seams.
pub struct ReservationCoordinator {
    store: Arc<dyn InventoryStore>,
    scheduler: Arc<dyn DelayScheduler>,
    publisher: Arc<dyn EventPublisher>,
    config: ReservationConfig,
}

impl ReservationCoordinator {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        scheduler: Arc<dyn DelayScheduler>,
        publisher: Arc<dyn EventPublisher>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            publisher,
            config,
        }
    }

    // ========================================================================
    // Create Hold
    // ========================================================================

    /// Hold the requested seats, all sharing one deadline.
    ///
    /// Receipts are ordered by lexicographically sorted seat label. Any
    /// per-seat failure rolls back the whole transaction; there are no
    /// partial holds.
    #[tracing::instrument(
        name = "coordinator.create_hold",
        skip(self, command),
        fields(screening = %command.screening_id, seats = command.seat_labels.len())
    )]
    pub async fn create_hold(&self, command: CreateHold) -> Result<Vec<HoldReceipt>> {
        let labels = sorted_unique_labels(&command.seat_labels)?;

        let command_ref = &command;
        let labels_ref = &labels;
        let receipts = run_with_retry(
            "create_hold",
            store_backoff(&self.config),
            ReservationError::is_retryable,
            move || self.try_create_hold(command_ref, labels_ref),
        )
        .await?;

        // Post-commit side effects. The transaction is durable at this
        // point, so broker failures are logged, never surfaced.
        for receipt in &receipts {
            let event = DomainEvent::ReservationCreated(ReservationCreated {
                reservation_id: receipt.reservation_id,
                seat_id: receipt.seat_id,
                seat_label: receipt.seat_label.clone(),
                user_id: command.user_id.clone(),
                expires_at: receipt.expires_at,
            });
            if let Err(e) = self.publisher.publish(&event).await {
                warn!(
                    reservation = %receipt.reservation_id,
                    error = %e,
                    "Failed to publish reservation.created"
                );
            }
            if let Err(e) = self
                .scheduler
                .schedule_expiration(receipt.reservation_id, self.config.ttl())
                .await
            {
                error!(
                    reservation = %receipt.reservation_id,
                    error = %e,
                    "Failed to schedule expiration; hold will outlive its deadline until re-scheduled"
                );
            }
        }

        Ok(receipts)
    }

    async fn try_create_hold(
        &self,
        command: &CreateHold,
        labels: &[String],
    ) -> Result<Vec<HoldReceipt>> {
        let mut session = self.store.begin().await?;
        match self.hold_seats(session.as_mut(), command, labels).await {
            Ok(receipts) => {
                session.commit().await?;
                Ok(receipts)
            }
            Err(e) => {
                rollback_quietly(session, "create_hold").await;
                Err(e)
            }
        }
    }

    async fn hold_seats(
        &self,
        session: &mut dyn StoreSession,
        command: &CreateHold,
        labels: &[String],
    ) -> Result<Vec<HoldReceipt>> {
        let screening = session
            .fetch_screening(command.screening_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| {
                ReservationError::NotFound(format!(
                    "Screening {} not found",
                    command.screening_id
                ))
            })?;

        let now = Utc::now();
        let expires_at = now + self.config.ttl_chrono();

        // Lock every seat before mutating anything, in sorted order.
        let mut seats = Vec::with_capacity(labels.len());
        for label in labels {
            let seat = session
                .lock_seat(screening.id, label)
                .await?
                .ok_or_else(|| {
                    ReservationError::NotFound(format!(
                        "Seat {} not found in screening {}",
                        label, screening.id
                    ))
                })?;
            if seat.status != SeatStatus::Available {
                return Err(ReservationError::Conflict(format!(
                    "Seat {} is not available (current status: {})",
                    label, seat.status
                )));
            }
            seats.push(seat);
        }

        let mut receipts = Vec::with_capacity(seats.len());
        for seat in seats {
            session
                .update_seat_status(seat.id, SeatStatus::Reserved)
                .await?;
            let reservation = Reservation {
                id: Uuid::new_v4(),
                seat_id: seat.id,
                user_id: command.user_id.clone(),
                status: ReservationStatus::Pending,
                expires_at,
                created_at: now,
                updated_at: now,
            };
            session.insert_reservation(&reservation).await?;
            receipts.push(HoldReceipt {
                reservation_id: reservation.id,
                seat_id: seat.id,
                seat_label: seat.label,
                status: ReservationStatus::Pending,
                expires_at,
            });
        }

        Ok(receipts)
    }

    // ========================================================================
    // Confirm Payment
    // ========================================================================

    /// Convert the reservation's whole booking group into sales.
    ///
    /// Idempotent: confirming an already-confirmed reservation returns the
    /// existing sale unchanged.
    #[tracing::instrument(
        name = "coordinator.confirm_payment",
        skip(self, command),
        fields(reservation = %command.reservation_id)
    )]
    pub async fn confirm_payment(&self, command: ConfirmPayment) -> Result<SaleReceipt> {
        let command_ref = &command;
        let (receipt, events) = run_with_retry(
            "confirm_payment",
            store_backoff(&self.config),
            ReservationError::is_retryable,
            move || self.try_confirm(command_ref),
        )
        .await?;

        for event in &events {
            if let Err(e) = self.publisher.publish(event).await {
                warn!(event = %event.name(), error = %e, "Failed to publish payment.confirmed");
            }
        }

        Ok(receipt)
    }

    async fn try_confirm(
        &self,
        command: &ConfirmPayment,
    ) -> Result<(SaleReceipt, Vec<DomainEvent>)> {
        let mut session = self.store.begin().await?;
        match self.confirm_in_session(session.as_mut(), command).await {
            Ok(outcome) => {
                session.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                rollback_quietly(session, "confirm_payment").await;
                Err(e)
            }
        }
    }

    async fn confirm_in_session(
        &self,
        session: &mut dyn StoreSession,
        command: &ConfirmPayment,
    ) -> Result<(SaleReceipt, Vec<DomainEvent>)> {
        // A foreign user's reservation is indistinguishable from a missing
        // one; ownership information must not leak.
        let ReservationContext {
            reservation,
            seat,
            screening,
        } = session
            .lock_reservation_for_user(command.reservation_id, &command.user_id)
            .await?
            .ok_or_else(|| {
                ReservationError::NotFound(format!(
                    "Reservation {} not found",
                    command.reservation_id
                ))
            })?;

        if reservation.status == ReservationStatus::Confirmed {
            // Retry of a completed confirm. The sale must already exist;
            // synthesising one here would hide corruption.
            let sale = session
                .find_sale_by_reservation(reservation.id)
                .await?
                .ok_or_else(|| {
                    ReservationError::InvalidState(format!(
                        "Reservation {} is confirmed but has no sale",
                        reservation.id
                    ))
                })?;
            return Ok((SaleReceipt::new(&sale, &seat, &screening), Vec::new()));
        }

        if reservation.status != ReservationStatus::Pending {
            return Err(ReservationError::Conflict(format!(
                "Reservation is not pending (status: {})",
                reservation.status
            )));
        }

        let now = Utc::now();
        if now > reservation.expires_at {
            // The release side-effect may still be in flight on the timer
            // path; refusing here is enough.
            return Err(ReservationError::Conflict(
                "Reservation has expired".to_string(),
            ));
        }

        let group = BookingGroupKey {
            user_id: command.user_id.clone(),
            screening_id: screening.id,
            expires_at: reservation.expires_at,
        };
        let siblings = session.lock_pending_siblings(&group).await?;

        let paid_at = now;
        let mut target_receipt = None;
        let mut events = Vec::with_capacity(siblings.len());

        for (sibling, sibling_seat) in siblings {
            session
                .update_reservation_status(sibling.id, ReservationStatus::Confirmed)
                .await?;
            session
                .update_seat_status(sibling_seat.id, SeatStatus::Sold)
                .await?;

            let sale = Sale {
                id: Uuid::new_v4(),
                seat_id: sibling_seat.id,
                user_id: sibling.user_id.clone(),
                reservation_id: sibling.id,
                amount_cents: screening.ticket_price_cents,
                paid_at,
                created_at: paid_at,
            };
            session.insert_sale(&sale).await?;

            events.push(DomainEvent::PaymentConfirmed(PaymentConfirmed {
                sale_id: sale.id,
                reservation_id: sibling.id,
                seat_id: sibling_seat.id,
                seat_label: sibling_seat.label.clone(),
                user_id: sibling.user_id.clone(),
                amount: sale.amount_cents,
            }));

            if sibling.id == reservation.id {
                target_receipt = Some(SaleReceipt::new(&sale, &sibling_seat, &screening));
            }
        }

        let receipt = target_receipt.ok_or_else(|| {
            ReservationError::InvalidState(format!(
                "Booking group for reservation {} did not contain it",
                reservation.id
            ))
        })?;

        Ok((receipt, events))
    }

    // ========================================================================
    // Expire
    // ========================================================================

    /// Release the hold if it is still pending and past its deadline.
    ///
    /// Safe to invoke any number of times; every terminal observation is a
    /// committed no-op.
    #[tracing::instrument(
        name = "coordinator.expire",
        skip(self),
        fields(reservation = %reservation_id)
    )]
    pub async fn expire(&self, reservation_id: Uuid) -> Result<ExpireOutcome> {
        let (outcome, events) = run_with_retry(
            "expire",
            store_backoff(&self.config),
            ReservationError::is_retryable,
            move || self.try_expire(reservation_id),
        )
        .await?;

        for event in &events {
            if let Err(e) = self.publisher.publish(event).await {
                warn!(event = %event.name(), error = %e, "Failed to publish expiration event");
            }
        }

        Ok(outcome)
    }

    async fn try_expire(
        &self,
        reservation_id: Uuid,
    ) -> Result<(ExpireOutcome, Vec<DomainEvent>)> {
        let mut session = self.store.begin().await?;
        match self.expire_in_session(session.as_mut(), reservation_id).await {
            Ok(outcome) => {
                session.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                rollback_quietly(session, "expire").await;
                Err(e)
            }
        }
    }

    async fn expire_in_session(
        &self,
        session: &mut dyn StoreSession,
        reservation_id: Uuid,
    ) -> Result<(ExpireOutcome, Vec<DomainEvent>)> {
        let (reservation, seat) = match session.lock_reservation(reservation_id).await? {
            Some(pair) => pair,
            // Benign: the reservation was purged.
            None => return Ok((ExpireOutcome::Noop, Vec::new())),
        };

        if reservation.status != ReservationStatus::Pending {
            return Ok((ExpireOutcome::Noop, Vec::new()));
        }

        let now = Utc::now();
        if now <= reservation.expires_at {
            // Scheduler jitter: the timer fired early. The consumer
            // re-enqueues with the residual delay.
            let remaining = (reservation.expires_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            return Ok((ExpireOutcome::EarlyTimer { remaining }, Vec::new()));
        }

        session
            .update_reservation_status(reservation.id, ReservationStatus::Expired)
            .await?;
        session
            .update_seat_status(seat.id, SeatStatus::Available)
            .await?;

        let events = vec![
            DomainEvent::ReservationExpired(ReservationExpired {
                reservation_id: reservation.id,
                seat_id: seat.id,
                seat_label: seat.label.clone(),
                user_id: reservation.user_id.clone(),
            }),
            DomainEvent::SeatReleased(SeatReleased {
                seat_id: seat.id,
                seat_label: seat.label.clone(),
                screening_id: seat.screening_id,
            }),
        ];

        Ok((ExpireOutcome::Expired, events))
    }
}

/// Roll a failed session back, logging instead of masking the original
/// error if the rollback itself fails.
async fn rollback_quietly(session: Box<dyn StoreSession>, operation: &str) {
    if let Err(e) = session.rollback().await {
        warn!(operation = %operation, error = %e, "Rollback failed");
    }
}

/// Sort and validate the requested seat labels.
fn sorted_unique_labels(labels: &[String]) -> Result<Vec<String>> {
    if labels.is_empty() {
        return Err(ReservationError::InvalidRequest(
            "At least one seat label is required".to_string(),
        ));
    }
    let mut sorted = labels.to_vec();
    sorted.sort();
    for pair in sorted.windows(2) {
        if pair[0] == pair[1] {
            return Err(ReservationError::InvalidRequest(format!(
                "Duplicate seat label: {}",
                pair[0]
            )));
        }
    }
    Ok(sorted)
}
