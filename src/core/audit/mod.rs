// src/core/audit/mod.rs

//! Append-only audit trail for authentication, admin, and security events.
//!
//! A thin wrapper over the persistence layer's `audit_records` table rather
//! than its own store: the append-only guarantee and retention concerns are
//! a query pattern, not a separate subsystem, the same way the teacher
//! layers narrow-purpose task types (`ChannelPurgerTask`, `TtlManager`) over
//! its single shared store rather than giving each one a private one.

use crate::core::errors::ConsultEaseError;
use crate::core::persistence::{AuditOutcome, AuditRecord, Db};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuditLog {
    db: Db,
}

/// Who performed an audited action, if anyone identifiable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Actor<'a> {
    pub id: Option<i64>,
    pub name: Option<&'a str>,
}

impl<'a> Actor<'a> {
    pub const fn none() -> Self {
        Self {
            id: None,
            name: None,
        }
    }

    pub fn named(id: i64, name: &'a str) -> Self {
        Self {
            id: Some(id),
            name: Some(name),
        }
    }
}

impl AuditLog {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn success(
        &self,
        actor: Actor<'_>,
        action: &str,
        resource: Option<&str>,
        details: &str,
        source_addr: Option<&str>,
    ) {
        self.record(actor, action, resource, details, source_addr, AuditOutcome::Success)
            .await;
    }

    pub async fn failure(
        &self,
        actor: Actor<'_>,
        action: &str,
        resource: Option<&str>,
        details: &str,
        source_addr: Option<&str>,
    ) {
        self.record(actor, action, resource, details, source_addr, AuditOutcome::Failure)
            .await;
    }

    pub async fn warning(
        &self,
        actor: Actor<'_>,
        action: &str,
        resource: Option<&str>,
        details: &str,
        source_addr: Option<&str>,
    ) {
        self.record(actor, action, resource, details, source_addr, AuditOutcome::Warning)
            .await;
    }

    async fn record(
        &self,
        actor: Actor<'_>,
        action: &str,
        resource: Option<&str>,
        details: &str,
        source_addr: Option<&str>,
        outcome: AuditOutcome,
    ) {
        let result = self
            .db
            .record_audit(
                actor.id,
                actor.name,
                action,
                resource,
                details,
                source_addr,
                outcome,
            )
            .await;
        match (outcome, result) {
            (_, Ok(())) => {}
            (AuditOutcome::Failure | AuditOutcome::Warning, Err(e)) => {
                warn!("failed to persist audit record for action '{action}': {e}");
            }
            (AuditOutcome::Success, Err(e)) => {
                info!("failed to persist audit record for action '{action}': {e}");
            }
        }
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>, ConsultEaseError> {
        self.db.list_recent_audit(limit).await
    }
}
