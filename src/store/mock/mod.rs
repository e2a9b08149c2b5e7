//! In-memory inventory store for testing.
//!
//! Implements the same contract as the PostgreSQL store, including the
//! locking discipline: every row a session locks is backed by an async
//! mutex held until commit or rollback, so two sessions contending on a
//! seat serialise and the second observes the first's committed state.
//! Writes are buffered in the session and applied atomically on commit;
//! dropping a session discards them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{InventoryStore, NewScreening, Result, StoreError, StoreSession};
use crate::model::{
    BookingGroupKey, Reservation, ReservationContext, ReservationStatus, Sale, Screening, Seat,
    SeatStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Seat(Uuid),
    Reservation(Uuid),
}

#[derive(Default)]
struct State {
    screenings: HashMap<Uuid, Screening>,
    seats: HashMap<Uuid, Seat>,
    seats_by_label: HashMap<(Uuid, String), Uuid>,
    reservations: HashMap<Uuid, Reservation>,
    sales: HashMap<Uuid, Sale>,
    sales_by_reservation: HashMap<Uuid, Uuid>,
}

/// Full copy of committed state, for assertions.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub screenings: Vec<Screening>,
    pub seats: Vec<Seat>,
    pub reservations: Vec<Reservation>,
    pub sales: Vec<Sale>,
}

/// In-memory mock inventory store.
#[derive(Default)]
pub struct MockInventoryStore {
    state: Arc<Mutex<State>>,
    locks: Arc<Mutex<HashMap<RowKey, Arc<Mutex<()>>>>>,
    conflicts_to_inject: AtomicUsize,
}

impl MockInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `begin` fail with a retryable conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts_to_inject.store(n, Ordering::SeqCst);
    }

    /// Copy of all committed state.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock().await;
        StoreSnapshot {
            screenings: state.screenings.values().cloned().collect(),
            seats: state.seats.values().cloned().collect(),
            reservations: state.reservations.values().cloned().collect(),
            sales: state.sales.values().cloned().collect(),
        }
    }

    /// Committed seat row by screening and label.
    pub async fn seat_by_label(&self, screening_id: Uuid, label: &str) -> Option<Seat> {
        let state = self.state.lock().await;
        let id = state.seats_by_label.get(&(screening_id, label.to_string()))?;
        state.seats.get(id).cloned()
    }

    /// Committed reservation row by id.
    pub async fn reservation(&self, reservation_id: Uuid) -> Option<Reservation> {
        self.state
            .lock()
            .await
            .reservations
            .get(&reservation_id)
            .cloned()
    }

    /// All committed sales.
    pub async fn sales(&self) -> Vec<Sale> {
        self.state.lock().await.sales.values().cloned().collect()
    }
}

#[async_trait]
impl InventoryStore for MockInventoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>> {
        let pending = self.conflicts_to_inject.load(Ordering::SeqCst);
        if pending > 0
            && self
                .conflicts_to_inject
                .compare_exchange(pending, pending - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }

        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            locks: Arc::clone(&self.locks),
            guards: Vec::new(),
            held: HashSet::new(),
            writes: Vec::new(),
        }))
    }

    async fn provision_screening(&self, spec: NewScreening) -> Result<Screening> {
        let now = Utc::now();
        let screening = Screening {
            id: Uuid::new_v4(),
            movie_name: spec.movie_name,
            start_time: spec.start_time,
            room_number: spec.room_number,
            ticket_price_cents: spec.ticket_price_cents,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.lock().await;
        state.screenings.insert(screening.id, screening.clone());
        for seat_spec in spec.seats {
            let seat = Seat {
                id: Uuid::new_v4(),
                screening_id: screening.id,
                label: seat_spec.label.clone(),
                row_label: seat_spec.row_label,
                status: SeatStatus::Available,
                created_at: now,
                updated_at: now,
            };
            state
                .seats_by_label
                .insert((screening.id, seat_spec.label), seat.id);
            state.seats.insert(seat.id, seat);
        }

        Ok(screening)
    }
}

enum Write {
    InsertReservation(Reservation),
    InsertSale(Sale),
    SeatStatus(Uuid, SeatStatus),
    ReservationStatus(Uuid, ReservationStatus),
}

/// One open mock transaction: held row locks plus a buffered write-set.
pub struct MockSession {
    state: Arc<Mutex<State>>,
    locks: Arc<Mutex<HashMap<RowKey, Arc<Mutex<()>>>>>,
    guards: Vec<OwnedMutexGuard<()>>,
    held: HashSet<RowKey>,
    writes: Vec<Write>,
}

impl MockSession {
    /// Acquire the exclusive lock for a row, blocking until the holding
    /// session finishes. Re-acquisition within one session is a no-op.
    async fn lock_row(&mut self, key: RowKey) {
        if self.held.contains(&key) {
            return;
        }
        let mutex = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key).or_default())
        };
        let guard = mutex.lock_owned().await;
        self.guards.push(guard);
        self.held.insert(key);
    }

    /// Committed seat with this session's pending writes applied.
    async fn read_seat(&self, seat_id: Uuid) -> Option<Seat> {
        let mut seat = self.state.lock().await.seats.get(&seat_id).cloned()?;
        for write in &self.writes {
            if let Write::SeatStatus(id, status) = write {
                if *id == seat_id {
                    seat.status = *status;
                }
            }
        }
        Some(seat)
    }

    /// Committed or session-inserted reservation, with pending status
    /// writes applied.
    async fn read_reservation(&self, reservation_id: Uuid) -> Option<Reservation> {
        let committed = self
            .state
            .lock()
            .await
            .reservations
            .get(&reservation_id)
            .cloned();
        let mut reservation = committed.or_else(|| {
            self.writes.iter().find_map(|w| match w {
                Write::InsertReservation(r) if r.id == reservation_id => Some(r.clone()),
                _ => None,
            })
        })?;
        for write in &self.writes {
            if let Write::ReservationStatus(id, status) = write {
                if *id == reservation_id {
                    reservation.status = *status;
                }
            }
        }
        Some(reservation)
    }
}

#[async_trait]
impl StoreSession for MockSession {
    async fn fetch_screening(&mut self, screening_id: Uuid) -> Result<Option<Screening>> {
        Ok(self.state.lock().await.screenings.get(&screening_id).cloned())
    }

    async fn lock_seat(&mut self, screening_id: Uuid, label: &str) -> Result<Option<Seat>> {
        let seat_id = {
            let state = self.state.lock().await;
            match state
                .seats_by_label
                .get(&(screening_id, label.to_string()))
            {
                Some(id) => *id,
                None => return Ok(None),
            }
        };
        self.lock_row(RowKey::Seat(seat_id)).await;
        Ok(self.read_seat(seat_id).await)
    }

    async fn lock_reservation(
        &mut self,
        reservation_id: Uuid,
    ) -> Result<Option<(Reservation, Seat)>> {
        self.lock_row(RowKey::Reservation(reservation_id)).await;
        let reservation = match self.read_reservation(reservation_id).await {
            Some(r) => r,
            None => return Ok(None),
        };
        self.lock_row(RowKey::Seat(reservation.seat_id)).await;
        let seat = self.read_seat(reservation.seat_id).await.ok_or_else(|| {
            StoreError::InvalidRow(format!(
                "reservation {} references missing seat {}",
                reservation.id, reservation.seat_id
            ))
        })?;
        Ok(Some((reservation, seat)))
    }

    async fn lock_reservation_for_user(
        &mut self,
        reservation_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ReservationContext>> {
        let pair = match self.lock_reservation(reservation_id).await? {
            Some(pair) => pair,
            None => return Ok(None),
        };
        if pair.0.user_id != user_id {
            return Ok(None);
        }
        let screening = self
            .state
            .lock()
            .await
            .screenings
            .get(&pair.1.screening_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::InvalidRow(format!(
                    "seat {} references missing screening {}",
                    pair.1.id, pair.1.screening_id
                ))
            })?;
        Ok(Some(ReservationContext {
            reservation: pair.0,
            seat: pair.1,
            screening,
        }))
    }

    async fn lock_pending_siblings(
        &mut self,
        group: &BookingGroupKey,
    ) -> Result<Vec<(Reservation, Seat)>> {
        // Candidate set under the group fingerprint, ordered by seat label
        // so locks are acquired in the same global order as hold creation.
        let mut candidates: Vec<(Uuid, String)> = {
            let state = self.state.lock().await;
            state
                .reservations
                .values()
                .filter(|r| r.user_id == group.user_id && r.expires_at == group.expires_at)
                .filter_map(|r| {
                    let seat = state.seats.get(&r.seat_id)?;
                    (seat.screening_id == group.screening_id)
                        .then(|| (r.id, seat.label.clone()))
                })
                .collect()
        };
        candidates.sort_by(|a, b| a.1.cmp(&b.1));

        let mut siblings = Vec::with_capacity(candidates.len());
        for (reservation_id, _) in candidates {
            if let Some((reservation, seat)) = self.lock_reservation(reservation_id).await? {
                if reservation.status == ReservationStatus::Pending {
                    siblings.push((reservation, seat));
                }
            }
        }
        Ok(siblings)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        self.writes
            .push(Write::InsertReservation(reservation.clone()));
        Ok(())
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<()> {
        self.writes.push(Write::InsertSale(sale.clone()));
        Ok(())
    }

    async fn update_seat_status(&mut self, seat_id: Uuid, status: SeatStatus) -> Result<()> {
        if self.read_seat(seat_id).await.is_none() {
            return Err(StoreError::NotFound(format!("seat {}", seat_id)));
        }
        self.writes.push(Write::SeatStatus(seat_id, status));
        Ok(())
    }

    async fn update_reservation_status(
        &mut self,
        reservation_id: Uuid,
        status: ReservationStatus,
    ) -> Result<()> {
        if self.read_reservation(reservation_id).await.is_none() {
            return Err(StoreError::NotFound(format!(
                "reservation {}",
                reservation_id
            )));
        }
        self.writes
            .push(Write::ReservationStatus(reservation_id, status));
        Ok(())
    }

    async fn find_sale_by_reservation(&mut self, reservation_id: Uuid) -> Result<Option<Sale>> {
        for write in &self.writes {
            if let Write::InsertSale(sale) = write {
                if sale.reservation_id == reservation_id {
                    return Ok(Some(sale.clone()));
                }
            }
        }
        let state = self.state.lock().await;
        Ok(state
            .sales_by_reservation
            .get(&reservation_id)
            .and_then(|sale_id| state.sales.get(sale_id))
            .cloned())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        for write in &self.writes {
            match write {
                Write::InsertReservation(reservation) => {
                    state
                        .reservations
                        .insert(reservation.id, reservation.clone());
                }
                Write::InsertSale(sale) => {
                    state.sales_by_reservation.insert(sale.reservation_id, sale.id);
                    state.sales.insert(sale.id, sale.clone());
                }
                Write::SeatStatus(seat_id, status) => {
                    if let Some(seat) = state.seats.get_mut(seat_id) {
                        seat.status = *status;
                        seat.updated_at = now;
                    }
                }
                Write::ReservationStatus(reservation_id, status) => {
                    if let Some(reservation) = state.reservations.get_mut(reservation_id) {
                        reservation.status = *status;
                        reservation.updated_at = now;
                    }
                }
            }
        }
        // Guards drop with self, releasing the row locks after the state
        // mutation is visible.
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Buffered writes are discarded and guards drop with self.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SeatSpec;
    use std::time::Duration;

    async fn seeded_store() -> (MockInventoryStore, Screening) {
        let store = MockInventoryStore::new();
        let screening = store
            .provision_screening(NewScreening {
                movie_name: "Solaris".to_string(),
                start_time: Utc::now(),
                room_number: 1,
                ticket_price_cents: 1500,
                seats: vec![
                    SeatSpec {
                        label: "A1".to_string(),
                        row_label: "A".to_string(),
                    },
                    SeatSpec {
                        label: "A2".to_string(),
                        row_label: "A".to_string(),
                    },
                ],
            })
            .await
            .unwrap();
        (store, screening)
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let (store, screening) = seeded_store().await;

        let mut session = store.begin().await.unwrap();
        let seat = session.lock_seat(screening.id, "A1").await.unwrap().unwrap();
        session
            .update_seat_status(seat.id, SeatStatus::Reserved)
            .await
            .unwrap();

        // Committed state still shows the seat available.
        let committed = store.seat_by_label(screening.id, "A1").await.unwrap();
        assert_eq!(committed.status, SeatStatus::Available);

        session.rollback().await.unwrap();
        let committed = store.seat_by_label(screening.id, "A1").await.unwrap();
        assert_eq!(committed.status, SeatStatus::Available);
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_session_until_commit() {
        let (store, screening) = seeded_store().await;

        let mut first = store.begin().await.unwrap();
        let seat = first.lock_seat(screening.id, "A1").await.unwrap().unwrap();
        first
            .update_seat_status(seat.id, SeatStatus::Reserved)
            .await
            .unwrap();

        let mut second = store.begin().await.unwrap();
        let contended = tokio::time::timeout(
            Duration::from_millis(50),
            second.lock_seat(screening.id, "A1"),
        )
        .await;
        assert!(contended.is_err(), "second session should block on the row lock");

        first.commit().await.unwrap();

        let seat = second.lock_seat(screening.id, "A1").await.unwrap().unwrap();
        assert_eq!(seat.status, SeatStatus::Reserved);
    }

    #[tokio::test]
    async fn test_disjoint_rows_do_not_contend() {
        let (store, screening) = seeded_store().await;

        let mut first = store.begin().await.unwrap();
        first.lock_seat(screening.id, "A1").await.unwrap().unwrap();

        let mut second = store.begin().await.unwrap();
        let free = tokio::time::timeout(
            Duration::from_millis(50),
            second.lock_seat(screening.id, "A2"),
        )
        .await;
        assert!(free.is_ok(), "disjoint seats must not contend");
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let (store, _screening) = seeded_store().await;
        store.inject_conflicts(1);
        let err = store.begin().await.err().unwrap();
        assert!(err.is_retryable());
        assert!(store.begin().await.is_ok());
    }
}
