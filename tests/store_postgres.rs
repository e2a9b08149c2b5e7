//! PostgreSQL inventory store integration tests using testcontainers.
//!
//! Run with: cargo test --test store_postgres -- --ignored --nocapture
//!
//! These tests spin up PostgreSQL in a container, create the schema, and
//! exercise the gateway's locking contract against the real database.

use std::time::Duration;

use chrono::Utc;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};
use uuid::Uuid;

use marquee::model::{BookingGroupKey, Reservation, ReservationStatus, SeatStatus};
use marquee::store::{
    InventoryStore, NewScreening, PostgresInventoryStore, SeatSpec, StoreSession,
};

/// Boot a throwaway Postgres and hand back its connection string. The
/// container handle must stay alive for the duration of the test.
async fn start_postgres() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    // The readiness line appears once for the bootstrap instance and again
    // for the real one, so a short grace period follows the wait.
    let image = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ));

    let container = image
        .with_env_var("POSTGRES_USER", "marquee")
        .with_env_var("POSTGRES_PASSWORD", "marquee")
        .with_env_var("POSTGRES_DB", "marquee")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("postgres container did not start");

    tokio::time::sleep(Duration::from_secs(1)).await;

    let host_port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("no mapped port");
    let host = container.get_host().await.expect("no container host");

    let connection_string = format!("postgres://marquee:marquee@{}:{}/marquee", host, host_port);

    (container, connection_string)
}

async fn connect(uri: &str) -> PostgresInventoryStore {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(uri)
        .await
        .expect("Failed to connect");
    let store = PostgresInventoryStore::new(pool);
    store.init().await.expect("Schema init failed");
    store
}

fn two_seat_screening() -> NewScreening {
    NewScreening {
        movie_name: "Solaris".to_string(),
        start_time: Utc::now() + chrono::Duration::hours(1),
        room_number: 1,
        ticket_price_cents: 1200,
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
    }
}

fn pending_reservation(seat_id: Uuid, user: &str, expires_at: chrono::DateTime<Utc>) -> Reservation {
    let now = Utc::now();
    Reservation {
        id: Uuid::new_v4(),
        seat_id,
        user_id: user.to_string(),
        status: ReservationStatus::Pending,
        expires_at,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_schema_init_is_idempotent() {
    let (_container, uri) = start_postgres().await;
    let store = connect(&uri).await;
    store.init().await.expect("Second init must not fail");
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_hold_roundtrip_is_visible_after_commit() {
    let (_container, uri) = start_postgres().await;
    let store = connect(&uri).await;
    let screening = store
        .provision_screening(two_seat_screening())
        .await
        .unwrap();

    let mut session = store.begin().await.unwrap();
    let seat = session
        .lock_seat(screening.id, "A1")
        .await
        .unwrap()
        .expect("seat exists");
    assert_eq!(seat.status, SeatStatus::Available);

    session
        .update_seat_status(seat.id, SeatStatus::Reserved)
        .await
        .unwrap();
    let expires_at = Utc::now() + chrono::Duration::seconds(30);
    let reservation = pending_reservation(seat.id, "u1", expires_at);
    session.insert_reservation(&reservation).await.unwrap();
    session.commit().await.unwrap();

    let mut verify = store.begin().await.unwrap();
    let seat = verify
        .lock_seat(screening.id, "A1")
        .await
        .unwrap()
        .expect("seat exists");
    assert_eq!(seat.status, SeatStatus::Reserved);
    let (found, _seat) = verify
        .lock_reservation(reservation.id)
        .await
        .unwrap()
        .expect("reservation persisted");
    assert_eq!(found.status, ReservationStatus::Pending);
    assert_eq!(found.user_id, "u1");
    verify.rollback().await.unwrap();
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_rollback_discards_writes_and_releases_locks() {
    let (_container, uri) = start_postgres().await;
    let store = connect(&uri).await;
    let screening = store
        .provision_screening(two_seat_screening())
        .await
        .unwrap();

    let mut session = store.begin().await.unwrap();
    let seat = session
        .lock_seat(screening.id, "A1")
        .await
        .unwrap()
        .expect("seat exists");
    session
        .update_seat_status(seat.id, SeatStatus::Sold)
        .await
        .unwrap();
    session.rollback().await.unwrap();

    let mut verify = store.begin().await.unwrap();
    let seat = verify
        .lock_seat(screening.id, "A1")
        .await
        .unwrap()
        .expect("seat exists");
    assert_eq!(seat.status, SeatStatus::Available);
    verify.rollback().await.unwrap();
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_contending_sessions_serialise_on_the_seat_row() {
    let (_container, uri) = start_postgres().await;
    let store = std::sync::Arc::new(connect(&uri).await);
    let screening = store
        .provision_screening(two_seat_screening())
        .await
        .unwrap();

    let mut first = store.begin().await.unwrap();
    let seat = first
        .lock_seat(screening.id, "A1")
        .await
        .unwrap()
        .expect("seat exists");
    first
        .update_seat_status(seat.id, SeatStatus::Reserved)
        .await
        .unwrap();

    // The second session blocks on the row lock until the first commits.
    let store_clone = store.clone();
    let screening_id = screening.id;
    let contender = tokio::spawn(async move {
        let mut second = store_clone.begin().await.unwrap();
        let seat = second
            .lock_seat(screening_id, "A1")
            .await
            .unwrap()
            .expect("seat exists");
        second.rollback().await.unwrap();
        seat.status
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!contender.is_finished(), "contender should be blocked");

    first.commit().await.unwrap();

    let observed = tokio::time::timeout(Duration::from_secs(5), contender)
        .await
        .expect("contender should unblock")
        .unwrap();
    assert_eq!(observed, SeatStatus::Reserved);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_sibling_lookup_matches_the_group_fingerprint() {
    let (_container, uri) = start_postgres().await;
    let store = connect(&uri).await;

    let mut spec = two_seat_screening();
    spec.seats.push(SeatSpec {
        label: "A3".to_string(),
        row_label: "A".to_string(),
    });
    let screening = store.provision_screening(spec).await.unwrap();

    let expires_at = Utc::now() + chrono::Duration::seconds(60);
    let other_expiry = expires_at + chrono::Duration::microseconds(1);

    let mut session = store.begin().await.unwrap();
    for (label, user, expiry) in [
        ("A1", "u1", expires_at),
        ("A2", "u1", expires_at),
        // Same user, different hold call: different deadline.
        ("A3", "u1", other_expiry),
    ] {
        let seat = session
            .lock_seat(screening.id, label)
            .await
            .unwrap()
            .expect("seat exists");
        session
            .update_seat_status(seat.id, SeatStatus::Reserved)
            .await
            .unwrap();
        session
            .insert_reservation(&pending_reservation(seat.id, user, expiry))
            .await
            .unwrap();
    }
    session.commit().await.unwrap();

    let mut verify = store.begin().await.unwrap();
    let siblings = verify
        .lock_pending_siblings(&BookingGroupKey {
            user_id: "u1".to_string(),
            screening_id: screening.id,
            expires_at,
        })
        .await
        .unwrap();
    verify.rollback().await.unwrap();

    let labels: Vec<_> = siblings.iter().map(|(_, seat)| seat.label.clone()).collect();
    assert_eq!(labels, vec!["A1", "A2"]);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_sale_lookup_by_reservation() {
    let (_container, uri) = start_postgres().await;
    let store = connect(&uri).await;
    let screening = store
        .provision_screening(two_seat_screening())
        .await
        .unwrap();

    let mut session = store.begin().await.unwrap();
    let seat = session
        .lock_seat(screening.id, "A1")
        .await
        .unwrap()
        .expect("seat exists");
    let reservation = pending_reservation(seat.id, "u1", Utc::now() + chrono::Duration::seconds(30));
    session.insert_reservation(&reservation).await.unwrap();
    session
        .update_reservation_status(reservation.id, ReservationStatus::Confirmed)
        .await
        .unwrap();
    session
        .update_seat_status(seat.id, SeatStatus::Sold)
        .await
        .unwrap();

    let now = Utc::now();
    let sale = marquee::model::Sale {
        id: Uuid::new_v4(),
        seat_id: seat.id,
        user_id: "u1".to_string(),
        reservation_id: reservation.id,
        amount_cents: screening.ticket_price_cents,
        paid_at: now,
        created_at: now,
    };
    session.insert_sale(&sale).await.unwrap();
    session.commit().await.unwrap();

    let mut verify = store.begin().await.unwrap();
    let found = verify
        .find_sale_by_reservation(reservation.id)
        .await
        .unwrap()
        .expect("sale persisted");
    assert_eq!(found.id, sale.id);
    assert_eq!(found.amount_cents, 1200);
    assert!(verify
        .find_sale_by_reservation(Uuid::new_v4())
        .await
        .unwrap()
        .is_none());
    verify.rollback().await.unwrap();
}
