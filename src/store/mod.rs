//! Inventory store gateway.
//!
//! This module contains:
//! - `InventoryStore` / `StoreSession` traits: the only path by which the
//!   coordinator touches durable state
//! - `StoreError` classification (conflicts are retryable, the rest are not)
//! - Implementations: PostgreSQL, in-memory mock

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::model::{
    BookingGroupKey, Reservation, ReservationContext, ReservationStatus, Sale, Screening, Seat,
    SeatStatus,
};

pub mod mock;
pub mod postgres;
pub mod queries;
pub mod schema;

pub use mock::MockInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use queries::InventoryQueries;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Deadlock, serialisation failure, or lock timeout. Retryable.
    #[error("Store conflict: {0}")]
    Conflict(String),

    /// Connectivity loss or pool exhaustion. Retryable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A persisted row failed to map back into the domain model.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Whether the caller may retry the whole transaction with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    /// Classify driver errors into the retryable kinds.
    ///
    /// SQLSTATE 40001 (serialization_failure), 40P01 (deadlock_detected) and
    /// 55P03 (lock_not_available) surface as `Conflict`; connection-level
    /// failures surface as `Unavailable`.
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("40001") | Some("40P01") | Some("55P03") => {
                    StoreError::Conflict(db.message().to_string())
                }
                _ => StoreError::Database(e),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Database(e),
        }
    }
}

/// Seat position to create when provisioning a screening.
#[derive(Debug, Clone)]
pub struct SeatSpec {
    pub label: String,
    pub row_label: String,
}

/// Inputs for provisioning a screening with its seat inventory.
#[derive(Debug, Clone)]
pub struct NewScreening {
    pub movie_name: String,
    pub start_time: DateTime<Utc>,
    pub room_number: i32,
    pub ticket_price_cents: i64,
    pub seats: Vec<SeatSpec>,
}

/// Factory for transactional sessions, plus one-time provisioning.
///
/// Implementations:
/// - `PostgresInventoryStore`: PostgreSQL with row-level locks
/// - `MockInventoryStore`: in-memory, for tests
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Open a transactional session. The session holds every row lock it
    /// acquires until `commit` or `rollback`; dropping an unfinished
    /// session rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreSession>>;

    /// Create a screening and its seat inventory in one transaction.
    /// Seats are created `Available` and never destroyed afterwards.
    async fn provision_screening(&self, spec: NewScreening) -> Result<Screening>;
}

/// One transactional session over the inventory.
///
/// Every `lock_*` fetch acquires an exclusive row lock held until the
/// session ends; two sessions contending on the same row serialise, the
/// second observing the first's committed state.
#[async_trait]
pub trait StoreSession: Send {
    /// Fetch a screening by id (no lock; screenings are immutable here).
    async fn fetch_screening(&mut self, screening_id: Uuid) -> Result<Option<Screening>>;

    /// Fetch and exclusively lock a seat row by `(screening, label)`.
    async fn lock_seat(&mut self, screening_id: Uuid, label: &str) -> Result<Option<Seat>>;

    /// Fetch and lock a reservation together with its seat.
    async fn lock_reservation(
        &mut self,
        reservation_id: Uuid,
    ) -> Result<Option<(Reservation, Seat)>>;

    /// Fetch and lock a reservation joined with its seat and screening,
    /// constrained to the owning user. A foreign user observes `None`,
    /// indistinguishable from a missing reservation.
    async fn lock_reservation_for_user(
        &mut self,
        reservation_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ReservationContext>>;

    /// Fetch and lock every `Pending` reservation in a booking group,
    /// ordered by seat label. The set includes the target reservation.
    async fn lock_pending_siblings(
        &mut self,
        group: &BookingGroupKey,
    ) -> Result<Vec<(Reservation, Seat)>>;

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    async fn insert_sale(&mut self, sale: &Sale) -> Result<()>;

    async fn update_seat_status(&mut self, seat_id: Uuid, status: SeatStatus) -> Result<()>;

    async fn update_reservation_status(
        &mut self,
        reservation_id: Uuid,
        status: ReservationStatus,
    ) -> Result<()>;

    async fn find_sale_by_reservation(&mut self, reservation_id: Uuid) -> Result<Option<Sale>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Initialize the PostgreSQL store from configuration.
pub async fn init_store(config: &StorageConfig) -> Result<Arc<PostgresInventoryStore>> {
    info!(uri = %config.postgres.uri, "Connecting to Postgres inventory store");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.uri)
        .await?;

    let store = PostgresInventoryStore::new(pool);
    store.init().await?;

    Ok(Arc::new(store))
}
