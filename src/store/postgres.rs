//! PostgreSQL inventory store.
//!
//! Row locks are taken with `SELECT ... FOR UPDATE`; a session wraps one
//! `sqlx` transaction, so locks are held until commit or rollback and an
//! abandoned session rolls back when the transaction drops.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{
    ColumnDef, Expr, ForeignKey, Index, LockType, Order, PostgresQueryBuilder, Query, Table,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::schema::{Reservations, Sales, Screenings, Seats};
use super::{
    InventoryStore, NewScreening, Result, StoreError, StoreSession,
};
use crate::model::{
    BookingGroupKey, Reservation, ReservationContext, ReservationStatus, Sale, Screening, Seat,
    SeatStatus,
};

/// PostgreSQL implementation of the inventory store.
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Create a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool (read-side queries reuse it).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Initialize the schema. Idempotent.
    pub async fn init(&self) -> Result<()> {
        let create_screenings = Table::create()
            .table(Screenings::Table)
            .if_not_exists()
            .col(ColumnDef::new(Screenings::Id).uuid().primary_key())
            .col(ColumnDef::new(Screenings::MovieName).text().not_null())
            .col(
                ColumnDef::new(Screenings::StartTime)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(ColumnDef::new(Screenings::RoomNumber).integer().not_null())
            .col(
                ColumnDef::new(Screenings::TicketPriceCents)
                    .big_integer()
                    .not_null(),
            )
            .col(
                ColumnDef::new(Screenings::IsActive)
                    .boolean()
                    .not_null()
                    .default(true),
            )
            .col(
                ColumnDef::new(Screenings::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(Screenings::UpdatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .to_string(PostgresQueryBuilder);

        let create_seats = Table::create()
            .table(Seats::Table)
            .if_not_exists()
            .col(ColumnDef::new(Seats::Id).uuid().primary_key())
            .col(ColumnDef::new(Seats::ScreeningId).uuid().not_null())
            .col(ColumnDef::new(Seats::Label).text().not_null())
            .col(ColumnDef::new(Seats::RowLabel).text().not_null())
            .col(ColumnDef::new(Seats::Status).text().not_null())
            .col(
                ColumnDef::new(Seats::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(Seats::UpdatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_seats_screening")
                    .from(Seats::Table, Seats::ScreeningId)
                    .to(Screenings::Table, Screenings::Id),
            )
            .to_string(PostgresQueryBuilder);

        let create_reservations = Table::create()
            .table(Reservations::Table)
            .if_not_exists()
            .col(ColumnDef::new(Reservations::Id).uuid().primary_key())
            .col(ColumnDef::new(Reservations::SeatId).uuid().not_null())
            .col(ColumnDef::new(Reservations::UserId).text().not_null())
            .col(ColumnDef::new(Reservations::Status).text().not_null())
            .col(
                ColumnDef::new(Reservations::ExpiresAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(Reservations::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(Reservations::UpdatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_reservations_seat")
                    .from(Reservations::Table, Reservations::SeatId)
                    .to(Seats::Table, Seats::Id),
            )
            .to_string(PostgresQueryBuilder);

        let create_sales = Table::create()
            .table(Sales::Table)
            .if_not_exists()
            .col(ColumnDef::new(Sales::Id).uuid().primary_key())
            .col(ColumnDef::new(Sales::SeatId).uuid().not_null())
            .col(ColumnDef::new(Sales::UserId).text().not_null())
            .col(ColumnDef::new(Sales::ReservationId).uuid().not_null())
            .col(ColumnDef::new(Sales::AmountCents).big_integer().not_null())
            .col(
                ColumnDef::new(Sales::PaidAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(Sales::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_sales_reservation")
                    .from(Sales::Table, Sales::ReservationId)
                    .to(Reservations::Table, Reservations::Id),
            )
            .to_string(PostgresQueryBuilder);

        let idx_seats_label = Index::create()
            .name("ux_seats_screening_label")
            .table(Seats::Table)
            .col(Seats::ScreeningId)
            .col(Seats::Label)
            .unique()
            .if_not_exists()
            .to_string(PostgresQueryBuilder);

        let idx_seats_status = Index::create()
            .name("ix_seats_screening_status")
            .table(Seats::Table)
            .col(Seats::ScreeningId)
            .col(Seats::Status)
            .if_not_exists()
            .to_string(PostgresQueryBuilder);

        let idx_reservations_group = Index::create()
            .name("ix_reservations_user_expiry_status")
            .table(Reservations::Table)
            .col(Reservations::UserId)
            .col(Reservations::ExpiresAt)
            .col(Reservations::Status)
            .if_not_exists()
            .to_string(PostgresQueryBuilder);

        let idx_sales_reservation = Index::create()
            .name("ux_sales_reservation")
            .table(Sales::Table)
            .col(Sales::ReservationId)
            .unique()
            .if_not_exists()
            .to_string(PostgresQueryBuilder);

        for statement in [
            create_screenings,
            create_seats,
            create_reservations,
            create_sales,
            idx_seats_label,
            idx_seats_status,
            idx_reservations_group,
            idx_sales_reservation,
        ] {
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresSession { tx }))
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

        let mut tx = self.pool.begin().await?;

        let insert_screening = Query::insert()
            .into_table(Screenings::Table)
            .columns([
                Screenings::Id,
                Screenings::MovieName,
                Screenings::StartTime,
                Screenings::RoomNumber,
                Screenings::TicketPriceCents,
                Screenings::IsActive,
                Screenings::CreatedAt,
                Screenings::UpdatedAt,
            ])
            .values_panic([
                screening.id.into(),
                screening.movie_name.clone().into(),
                screening.start_time.into(),
                screening.room_number.into(),
                screening.ticket_price_cents.into(),
                screening.is_active.into(),
                screening.created_at.into(),
                screening.updated_at.into(),
            ])
            .to_string(PostgresQueryBuilder);
        sqlx::query(&insert_screening).execute(&mut *tx).await?;

        for seat in &spec.seats {
            let insert_seat = Query::insert()
                .into_table(Seats::Table)
                .columns([
                    Seats::Id,
                    Seats::ScreeningId,
                    Seats::Label,
                    Seats::RowLabel,
                    Seats::Status,
                    Seats::CreatedAt,
                    Seats::UpdatedAt,
                ])
                .values_panic([
                    Uuid::new_v4().into(),
                    screening.id.into(),
                    seat.label.clone().into(),
                    seat.row_label.clone().into(),
                    SeatStatus::Available.as_str().into(),
                    now.into(),
                    now.into(),
                ])
                .to_string(PostgresQueryBuilder);
            sqlx::query(&insert_seat).execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(screening)
    }
}

/// One open PostgreSQL transaction.
pub struct PostgresSession {
    tx: Transaction<'static, Postgres>,
}

impl PostgresSession {
    async fn fetch_seat_by_id_locked(&mut self, seat_id: Uuid) -> Result<Option<Seat>> {
        let query = Query::select()
            .columns([
                Seats::Id,
                Seats::ScreeningId,
                Seats::Label,
                Seats::RowLabel,
                Seats::Status,
                Seats::CreatedAt,
                Seats::UpdatedAt,
            ])
            .from(Seats::Table)
            .and_where(Expr::col(Seats::Id).eq(seat_id))
            .lock(LockType::Update)
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *self.tx).await?;
        row.map(|r| seat_from_row(&r)).transpose()
    }

    async fn fetch_screening_by_id(&mut self, screening_id: Uuid) -> Result<Option<Screening>> {
        let query = Query::select()
            .columns([
                Screenings::Id,
                Screenings::MovieName,
                Screenings::StartTime,
                Screenings::RoomNumber,
                Screenings::TicketPriceCents,
                Screenings::IsActive,
                Screenings::CreatedAt,
                Screenings::UpdatedAt,
            ])
            .from(Screenings::Table)
            .and_where(Expr::col(Screenings::Id).eq(screening_id))
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *self.tx).await?;
        row.map(|r| screening_from_row(&r)).transpose()
    }
}

#[async_trait]
impl StoreSession for PostgresSession {
    async fn fetch_screening(&mut self, screening_id: Uuid) -> Result<Option<Screening>> {
        self.fetch_screening_by_id(screening_id).await
    }

    async fn lock_seat(&mut self, screening_id: Uuid, label: &str) -> Result<Option<Seat>> {
        let query = Query::select()
            .columns([
                Seats::Id,
                Seats::ScreeningId,
                Seats::Label,
                Seats::RowLabel,
                Seats::Status,
                Seats::CreatedAt,
                Seats::UpdatedAt,
            ])
            .from(Seats::Table)
            .and_where(Expr::col(Seats::ScreeningId).eq(screening_id))
            .and_where(Expr::col(Seats::Label).eq(label))
            .lock(LockType::Update)
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *self.tx).await?;
        row.map(|r| seat_from_row(&r)).transpose()
    }

    async fn lock_reservation(
        &mut self,
        reservation_id: Uuid,
    ) -> Result<Option<(Reservation, Seat)>> {
        let query = Query::select()
            .columns([
                Reservations::Id,
                Reservations::SeatId,
                Reservations::UserId,
                Reservations::Status,
                Reservations::ExpiresAt,
                Reservations::CreatedAt,
                Reservations::UpdatedAt,
            ])
            .from(Reservations::Table)
            .and_where(Expr::col(Reservations::Id).eq(reservation_id))
            .lock(LockType::Update)
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *self.tx).await?;
        let reservation = match row {
            Some(r) => reservation_from_row(&r)?,
            None => return Ok(None),
        };

        let seat = self
            .fetch_seat_by_id_locked(reservation.seat_id)
            .await?
            .ok_or_else(|| {
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
        let query = Query::select()
            .columns([
                Reservations::Id,
                Reservations::SeatId,
                Reservations::UserId,
                Reservations::Status,
                Reservations::ExpiresAt,
                Reservations::CreatedAt,
                Reservations::UpdatedAt,
            ])
            .from(Reservations::Table)
            .and_where(Expr::col(Reservations::Id).eq(reservation_id))
            .and_where(Expr::col(Reservations::UserId).eq(user_id))
            .lock(LockType::Update)
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *self.tx).await?;
        let reservation = match row {
            Some(r) => reservation_from_row(&r)?,
            None => return Ok(None),
        };

        let seat = self
            .fetch_seat_by_id_locked(reservation.seat_id)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidRow(format!(
                    "reservation {} references missing seat {}",
                    reservation.id, reservation.seat_id
                ))
            })?;

        let screening = self
            .fetch_screening_by_id(seat.screening_id)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidRow(format!(
                    "seat {} references missing screening {}",
                    seat.id, seat.screening_id
                ))
            })?;

        Ok(Some(ReservationContext {
            reservation,
            seat,
            screening,
        }))
    }

    async fn lock_pending_siblings(
        &mut self,
        group: &BookingGroupKey,
    ) -> Result<Vec<(Reservation, Seat)>> {
        // Lock sibling reservations first, ordered by seat label so every
        // session acquires seat locks in the same global order afterwards.
        let query = Query::select()
            .columns([
                (Reservations::Table, Reservations::Id),
                (Reservations::Table, Reservations::SeatId),
                (Reservations::Table, Reservations::UserId),
                (Reservations::Table, Reservations::Status),
                (Reservations::Table, Reservations::ExpiresAt),
                (Reservations::Table, Reservations::CreatedAt),
                (Reservations::Table, Reservations::UpdatedAt),
            ])
            .from(Reservations::Table)
            .inner_join(
                Seats::Table,
                Expr::col((Reservations::Table, Reservations::SeatId))
                    .equals((Seats::Table, Seats::Id)),
            )
            .and_where(
                Expr::col((Reservations::Table, Reservations::UserId)).eq(group.user_id.clone()),
            )
            .and_where(
                Expr::col((Reservations::Table, Reservations::ExpiresAt)).eq(group.expires_at),
            )
            .and_where(
                Expr::col((Reservations::Table, Reservations::Status))
                    .eq(ReservationStatus::Pending.as_str()),
            )
            .and_where(Expr::col((Seats::Table, Seats::ScreeningId)).eq(group.screening_id))
            .order_by((Seats::Table, Seats::Label), Order::Asc)
            .lock_with_tables(LockType::Update, [Reservations::Table])
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&mut *self.tx).await?;

        let mut siblings = Vec::with_capacity(rows.len());
        for row in rows {
            let reservation = reservation_from_row(&row)?;
            let seat = self
                .fetch_seat_by_id_locked(reservation.seat_id)
                .await?
                .ok_or_else(|| {
                    StoreError::InvalidRow(format!(
                        "reservation {} references missing seat {}",
                        reservation.id, reservation.seat_id
                    ))
                })?;
            siblings.push((reservation, seat));
        }

        Ok(siblings)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let query = Query::insert()
            .into_table(Reservations::Table)
            .columns([
                Reservations::Id,
                Reservations::SeatId,
                Reservations::UserId,
                Reservations::Status,
                Reservations::ExpiresAt,
                Reservations::CreatedAt,
                Reservations::UpdatedAt,
            ])
            .values_panic([
                reservation.id.into(),
                reservation.seat_id.into(),
                reservation.user_id.clone().into(),
                reservation.status.as_str().into(),
                reservation.expires_at.into(),
                reservation.created_at.into(),
                reservation.updated_at.into(),
            ])
            .to_string(PostgresQueryBuilder);

        sqlx::query(&query).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<()> {
        let query = Query::insert()
            .into_table(Sales::Table)
            .columns([
                Sales::Id,
                Sales::SeatId,
                Sales::UserId,
                Sales::ReservationId,
                Sales::AmountCents,
                Sales::PaidAt,
                Sales::CreatedAt,
            ])
            .values_panic([
                sale.id.into(),
                sale.seat_id.into(),
                sale.user_id.clone().into(),
                sale.reservation_id.into(),
                sale.amount_cents.into(),
                sale.paid_at.into(),
                sale.created_at.into(),
            ])
            .to_string(PostgresQueryBuilder);

        sqlx::query(&query).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn update_seat_status(&mut self, seat_id: Uuid, status: SeatStatus) -> Result<()> {
        let query = Query::update()
            .table(Seats::Table)
            .value(Seats::Status, status.as_str())
            .value(Seats::UpdatedAt, Utc::now())
            .and_where(Expr::col(Seats::Id).eq(seat_id))
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("seat {}", seat_id)));
        }
        Ok(())
    }

    async fn update_reservation_status(
        &mut self,
        reservation_id: Uuid,
        status: ReservationStatus,
    ) -> Result<()> {
        let query = Query::update()
            .table(Reservations::Table)
            .value(Reservations::Status, status.as_str())
            .value(Reservations::UpdatedAt, Utc::now())
            .and_where(Expr::col(Reservations::Id).eq(reservation_id))
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "reservation {}",
                reservation_id
            )));
        }
        Ok(())
    }

    async fn find_sale_by_reservation(&mut self, reservation_id: Uuid) -> Result<Option<Sale>> {
        let query = Query::select()
            .columns([
                Sales::Id,
                Sales::SeatId,
                Sales::UserId,
                Sales::ReservationId,
                Sales::AmountCents,
                Sales::PaidAt,
                Sales::CreatedAt,
            ])
            .from(Sales::Table)
            .and_where(Expr::col(Sales::ReservationId).eq(reservation_id))
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *self.tx).await?;
        row.map(|r| sale_from_row(&r)).transpose()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

pub(crate) fn screening_from_row(row: &PgRow) -> Result<Screening> {
    Ok(Screening {
        id: row.get("id"),
        movie_name: row.get("movie_name"),
        start_time: row.get("start_time"),
        room_number: row.get("room_number"),
        ticket_price_cents: row.get("ticket_price_cents"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn seat_from_row(row: &PgRow) -> Result<Seat> {
    let status: String = row.get("status");
    Ok(Seat {
        id: row.get("id"),
        screening_id: row.get("screening_id"),
        label: row.get("label"),
        row_label: row.get("row_label"),
        status: SeatStatus::parse(&status)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown seat status: {}", status)))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn reservation_from_row(row: &PgRow) -> Result<Reservation> {
    let status: String = row.get("status");
    Ok(Reservation {
        id: row.get("id"),
        seat_id: row.get("seat_id"),
        user_id: row.get("user_id"),
        status: ReservationStatus::parse(&status).ok_or_else(|| {
            StoreError::InvalidRow(format!("unknown reservation status: {}", status))
        })?,
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn sale_from_row(row: &PgRow) -> Result<Sale> {
    Ok(Sale {
        id: row.get("id"),
        seat_id: row.get("seat_id"),
        user_id: row.get("user_id"),
        reservation_id: row.get("reservation_id"),
        amount_cents: row.get("amount_cents"),
        paid_at: row.get("paid_at"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_seat_query_takes_row_lock() {
        let query = Query::select()
            .column(Seats::Id)
            .from(Seats::Table)
            .and_where(Expr::col(Seats::Label).eq("A1"))
            .lock(LockType::Update)
            .to_string(PostgresQueryBuilder);
        assert!(query.ends_with("FOR UPDATE"));
    }

    #[test]
    fn test_sibling_query_orders_by_label_and_locks_reservations_only() {
        let query = Query::select()
            .column((Reservations::Table, Reservations::Id))
            .from(Reservations::Table)
            .inner_join(
                Seats::Table,
                Expr::col((Reservations::Table, Reservations::SeatId))
                    .equals((Seats::Table, Seats::Id)),
            )
            .order_by((Seats::Table, Seats::Label), Order::Asc)
            .lock_with_tables(LockType::Update, [Reservations::Table])
            .to_string(PostgresQueryBuilder);
        assert!(query.contains(r#"ORDER BY "seats"."label""#));
        assert!(query.contains(r#"FOR UPDATE OF "reservations""#));
    }
}
