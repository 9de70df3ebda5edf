// src/core/persistence/mod.rs

//! Durable storage: connection pool, schema setup, and typed entity access.
//!
//! Backed by `sqlx`'s `Any` driver so the same query surface runs against
//! SQLite (default, zero-config deployments) or Postgres (larger campus
//! deployments), selected by `database.type` in configuration.

mod entities;
mod migrations;
mod pool;

pub use entities::*;
pub use pool::{Db, with_tx};
