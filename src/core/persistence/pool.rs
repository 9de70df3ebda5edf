// src/core/persistence/pool.rs

use crate::config::DatabaseConfig;
use crate::core::errors::ConsultEaseError;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Row, Transaction};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Maximum retries for a transient transaction failure, and the base delay
/// an attempt waits before retrying. Doubles each attempt
/// (`base * 2^attempt`), matching the original implementation's
/// `atomic_operation` backoff.
const MAX_TX_RETRIES: u32 = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Thin handle around the connection pool plus the indexes this schema
/// depends on.
#[derive(Clone)]
pub struct Db {
    pool: AnyPool,
}

impl Db {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, ConsultEaseError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.pool_size + config.max_overflow)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .max_lifetime(Duration::from_secs(config.pool_recycle_secs))
            .connect(&config.connection_string())
            .await
            .map_err(ConsultEaseError::from)?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), ConsultEaseError> {
        for statement in migrations::statements() {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(ConsultEaseError::from)?;
        }
        for index in migrations::index_statements() {
            if let Err(e) = sqlx::query(index).execute(&self.pool).await {
                warn!("failed to create index (non-fatal): {e}");
            }
        }
        info!("database schema ready");
        Ok(())
    }

    /// A liveness check used by the pool-recovery path.
    pub async fn ping(&self) -> Result<(), ConsultEaseError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_: AnyRow| ())
            .map_err(ConsultEaseError::from)
    }
}

use super::migrations;

/// Runs `body` inside a transaction, committing on success and rolling back
/// on error. Transient failures (pool exhaustion, connection loss mid-tx)
/// are retried with exponential backoff up to `MAX_TX_RETRIES` times before
/// being surfaced to the caller.
pub async fn with_tx<T, F, Fut>(db: &Db, body: F) -> Result<T, ConsultEaseError>
where
    F: Fn(Transaction<'static, Any>) -> Fut,
    Fut: Future<Output = Result<(T, Transaction<'static, Any>), ConsultEaseError>>,
{
    let mut attempt = 0;
    loop {
        let tx = db
            .pool
            .begin()
            .await
            .map_err(ConsultEaseError::from)?;
        match body(tx).await {
            Ok((value, tx)) => {
                tx.commit().await.map_err(ConsultEaseError::from)?;
                return Ok(value);
            }
            Err(e) => {
                if attempt >= MAX_TX_RETRIES || !is_transient(&e) {
                    return Err(e);
                }
                let delay = BASE_RETRY_DELAY * 2u32.pow(attempt);
                warn!("transaction attempt {attempt} failed transiently, retrying in {delay:?}: {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn is_transient(e: &ConsultEaseError) -> bool {
    matches!(e, ConsultEaseError::Transient(_))
}

#[allow(dead_code)]
fn row_get_i64(row: &AnyRow, col: &str) -> i64 {
    row.try_get(col).unwrap_or_default()
}
