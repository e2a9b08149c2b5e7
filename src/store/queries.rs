//! Read-side queries over the same store.
//!
//! Lock-free, read-committed listings for the delegated query surface
//! (screening listings, availability, purchase history). These never
//! participate in the coordinator's locking discipline.

use sea_query::{Expr, Order, PostgresQueryBuilder, Query};
use sqlx::PgPool;
use uuid::Uuid;

use super::postgres::{reservation_from_row, sale_from_row, screening_from_row, seat_from_row};
use super::schema::{Reservations, Sales, Screenings, Seats};
use super::Result;
use crate::model::{Reservation, Sale, Screening, Seat};

/// Read-only query facade over the inventory store.
#[derive(Clone)]
pub struct InventoryQueries {
    pool: PgPool,
}

impl InventoryQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List active screenings, soonest first.
    pub async fn list_screenings(&self) -> Result<Vec<Screening>> {
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
            .and_where(Expr::col(Screenings::IsActive).eq(true))
            .order_by(Screenings::StartTime, Order::Asc)
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(screening_from_row).collect()
    }

    /// All seats of a screening with their current status, ordered by label.
    pub async fn screening_availability(&self, screening_id: Uuid) -> Result<Vec<Seat>> {
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
            .order_by(Seats::Label, Order::Asc)
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(seat_from_row).collect()
    }

    /// Purchase history for a buyer, most recent first.
    pub async fn sales_by_user(&self, user_id: &str) -> Result<Vec<Sale>> {
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
            .and_where(Expr::col(Sales::UserId).eq(user_id))
            .order_by(Sales::PaidAt, Order::Desc)
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(sale_from_row).collect()
    }

    /// Reservations ever held by a buyer, most recent first.
    pub async fn reservations_by_user(&self, user_id: &str) -> Result<Vec<Reservation>> {
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
            .and_where(Expr::col(Reservations::UserId).eq(user_id))
            .order_by(Reservations::CreatedAt, Order::Desc)
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(reservation_from_row).collect()
    }
}
