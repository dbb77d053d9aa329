#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Keyhaven shared types
//!
//! Types used by both the API server and the billing crate: the
//! authenticated [`Identity`] and its [`Role`], the [`Clock`] abstraction,
//! and database pool/migration helpers.

pub mod clock;
pub mod db;
pub mod identity;

pub use clock::{Clock, FixedClock, SystemClock};
pub use db::{create_pool, run_migrations};
pub use identity::{Identity, Role, UnknownRole};
