//! sea-query identifiers for the inventory tables.
//!
//! Keeps query building free of stringly-typed column names. The tables
//! themselves are created by `PostgresInventoryStore::init`.

use sea_query::Iden;

/// Screenings table schema.
#[derive(Iden)]
pub enum Screenings {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "movie_name"]
    MovieName,
    #[iden = "start_time"]
    StartTime,
    #[iden = "room_number"]
    RoomNumber,
    #[iden = "ticket_price_cents"]
    TicketPriceCents,
    #[iden = "is_active"]
    IsActive,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Seats table schema. Unique on `(screening_id, label)`.
#[derive(Iden)]
pub enum Seats {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "screening_id"]
    ScreeningId,
    #[iden = "label"]
    Label,
    #[iden = "row_label"]
    RowLabel,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Reservations table schema.
#[derive(Iden)]
pub enum Reservations {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "seat_id"]
    SeatId,
    #[iden = "user_id"]
    UserId,
    #[iden = "status"]
    Status,
    #[iden = "expires_at"]
    ExpiresAt,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Sales table schema. Unique on `reservation_id`.
#[derive(Iden)]
pub enum Sales {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "seat_id"]
    SeatId,
    #[iden = "user_id"]
    UserId,
    #[iden = "reservation_id"]
    ReservationId,
    #[iden = "amount_cents"]
    AmountCents,
    #[iden = "paid_at"]
    PaidAt,
    #[iden = "created_at"]
    CreatedAt,
}
