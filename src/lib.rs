//! marquee — reservation core for cinema screening seat inventory.
//!
//! Sells a strictly limited, enumerable resource (seats within scheduled
//! screenings) under concurrent demand: buyers take short-lived exclusive
//! holds, confirm payment to convert a whole booking group into sales, or
//! let holds lapse and be reclaimed through a delayed queue. Double-booking
//! is prevented by row-level locks acquired in sorted seat-label order.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod events;
pub mod model;
pub mod store;
pub mod utils;

pub use config::Config;
pub use coordinator::{
    ConfirmPayment, CreateHold, ExpireOutcome, HoldReceipt, ReservationCoordinator,
    ReservationError, SaleReceipt,
};
