//! Postgres implementation of the parser daemon's database gateway.
//!
//! Each session wraps one blocking [`postgres::Client`]. The producer's
//! operations (claiming, notification waits) propagate failures, which the
//! producer treats as fatal; the worker-facing operations reconnect once on
//! a dropped connection before giving up.

mod gateway;

pub use gateway::{PgGateway, PgSessionFactory};
