// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum ConsultEaseError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("account locked, retry in {remaining_secs}s")]
    Locked { remaining_secs: u64 },

    #[error("transient error: {0}")]
    Transient(String),

    #[error("message bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Clone for ConsultEaseError {
    fn clone(&self) -> Self {
        match self {
            Self::Validation(s) => Self::Validation(s.clone()),
            Self::NotFound(s) => Self::NotFound(s.clone()),
            Self::Conflict(s) => Self::Conflict(s.clone()),
            Self::Unauthorized => Self::Unauthorized,
            Self::Locked { remaining_secs } => Self::Locked {
                remaining_secs: *remaining_secs,
            },
            Self::Transient(s) => Self::Transient(s.clone()),
            Self::BusUnavailable(s) => Self::BusUnavailable(s.clone()),
            Self::Fatal(s) => Self::Fatal(s.clone()),
            Self::Io(e) => Self::Io(Arc::clone(e)),
            Self::Database(s) => Self::Database(s.clone()),
            Self::Config(s) => Self::Config(s.clone()),
        }
    }
}

impl PartialEq for ConsultEaseError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::Conflict(a), Self::Conflict(b)) => a == b,
            (Self::Unauthorized, Self::Unauthorized) => true,
            (Self::Locked { remaining_secs: a }, Self::Locked { remaining_secs: b }) => a == b,
            (Self::Transient(a), Self::Transient(b)) => a == b,
            (Self::BusUnavailable(a), Self::BusUnavailable(b)) => a == b,
            (Self::Fatal(a), Self::Fatal(b)) => a == b,
            (Self::Io(a), Self::Io(b)) => a.to_string() == b.to_string(),
            (Self::Database(a), Self::Database(b)) => a == b,
            (Self::Config(a), Self::Config(b)) => a == b,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for ConsultEaseError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<sqlx::Error> for ConsultEaseError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::Transient(e.to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<rumqttc::ClientError> for ConsultEaseError {
    fn from(e: rumqttc::ClientError) -> Self {
        Self::BusUnavailable(e.to_string())
    }
}

impl From<anyhow::Error> for ConsultEaseError {
    fn from(e: anyhow::Error) -> Self {
        Self::Fatal(e.to_string())
    }
}

impl From<argon2::password_hash::Error> for ConsultEaseError {
    fn from(e: argon2::password_hash::Error) -> Self {
        Self::Validation(format!("password hashing error: {e}"))
    }
}
