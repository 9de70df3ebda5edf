// src/core/auth/mod.rs

//! Student RFID authentication, admin credential authentication, and the
//! in-memory session / lockout tables that back both.
//!
//! Sessions and failed-attempt tracking are kept exclusively in memory in a
//! `DashMap`, the same concurrent-map choice the teacher makes for its own
//! server-wide tables (ACL users, pubsub channels) rather than a
//! `Mutex<HashMap<_>>`. The map itself lives in [`SessionStore`], split out
//! from [`AuthManager`] so its lifetime/lockout rules can be unit tested
//! without a database handle.

pub mod password;

use crate::config::SecurityConfig;
use crate::core::audit::{Actor, AuditLog};
use crate::core::errors::ConsultEaseError;
use crate::core::persistence::{Admin, Db, Student};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Student,
    Admin,
}

/// A bounded-lifetime authenticated session. Kept in memory only; never
/// persisted, never survives a restart.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub subject_id: i64,
    pub subject_kind: SubjectKind,
    pub created: Instant,
    pub last_active: Instant,
    pub source_addr: Option<String>,
    pub user_agent: Option<String>,
    pub csrf_token: String,
}

struct FailedAttempts {
    /// Timestamps of failures, oldest first. Pruned lazily on each touch.
    at: Vec<(Instant, Option<String>)>,
}

/// Sessions plus the failed-attempt lockout table. Exclusively owned: no
/// other component reaches into these maps.
pub struct SessionStore {
    config: SecurityConfig,
    sessions: DashMap<String, Session>,
    failed_attempts: DashMap<String, FailedAttempts>,
}

impl SessionStore {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            failed_attempts: DashMap::new(),
        }
    }

    fn lockout_window(&self) -> Duration {
        Duration::from_secs(self.config.password_lockout_duration_secs)
    }

    /// Prunes attempts older than the lockout window, then reports the
    /// remaining lockout time (if any) computed from the Nth-most-recent
    /// failure, where N is the lockout threshold.
    pub fn lockout_remaining(&self, identifier: &str) -> Option<Duration> {
        let mut entry = self.failed_attempts.get_mut(identifier)?;
        let window = self.lockout_window();
        let now = Instant::now();
        entry
            .at
            .retain(|(at, _)| now.duration_since(*at) <= window);

        let threshold = self.config.password_lockout_threshold as usize;
        if entry.at.len() < threshold {
            return None;
        }
        let nth_most_recent = &entry.at[entry.at.len() - threshold];
        let elapsed = now.duration_since(nth_most_recent.0);
        if elapsed >= window {
            None
        } else {
            Some(window - elapsed)
        }
    }

    pub fn record_failure(&self, identifier: &str, source_addr: Option<&str>) {
        let window = self.lockout_window();
        let now = Instant::now();
        let mut entry = self
            .failed_attempts
            .entry(identifier.to_string())
            .or_insert_with(|| FailedAttempts { at: Vec::new() });
        entry.at.retain(|(at, _)| now.duration_since(*at) <= window);
        entry.at.push((now, source_addr.map(str::to_string)));

        let threshold = self.config.password_lockout_threshold as usize;
        if entry.at.len() >= threshold {
            warn!("'{identifier}' locked out after {} failed attempts", entry.at.len());
        }
    }

    pub fn clear_failed_attempts(&self, identifier: &str) {
        self.failed_attempts.remove(identifier);
    }

    pub fn open_session(
        &self,
        subject_id: i64,
        subject_kind: SubjectKind,
        source_addr: Option<&str>,
        user_agent: Option<&str>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Instant::now();
        let session = Session {
            id: id.clone(),
            subject_id,
            subject_kind,
            created: now,
            last_active: now,
            source_addr: source_addr.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            csrf_token: Uuid::new_v4().to_string(),
        };
        self.sessions.insert(id.clone(), session);
        id
    }

    /// Validates a session id, refreshing `last_active` if it is still
    /// within the idle timeout. Expired sessions are evicted, not just
    /// reported invalid.
    pub fn validate(&self, id: &str) -> Option<Session> {
        let timeout = Duration::from_secs(self.config.session_timeout_secs);
        let mut entry = self.sessions.get_mut(id)?;
        if entry.last_active.elapsed() > timeout {
            drop(entry);
            self.sessions.remove(id);
            return None;
        }
        entry.last_active = Instant::now();
        Some(entry.clone())
    }

    pub fn invalidate(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn invalidate_all_for(&self, subject_id: i64) {
        self.sessions.retain(|_, s| s.subject_id != subject_id);
    }

    pub fn rotate_csrf(&self, id: &str) -> Option<String> {
        let mut entry = self.sessions.get_mut(id)?;
        let token = Uuid::new_v4().to_string();
        entry.csrf_token = token.clone();
        Some(token)
    }

    /// Updates the recorded source address/user agent for a session. A
    /// changed address is logged as a security warning but does not
    /// invalidate the session (configurable in principle; this deployment
    /// assumes a single trusted LAN where address churn behind NAT/DHCP is
    /// routine, not necessarily hostile).
    pub fn update_security_context(&self, id: &str, source_addr: Option<&str>, user_agent: Option<&str>) {
        let Some(mut entry) = self.sessions.get_mut(id) else {
            return;
        };
        if let Some(addr) = source_addr {
            if let Some(prev) = &entry.source_addr
                && prev != addr
            {
                warn!("session {id} source address changed from {prev} to {addr}");
            }
            entry.source_addr = Some(addr.to_string());
        }
        if let Some(ua) = user_agent {
            entry.user_agent = Some(ua.to_string());
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Student RFID and admin credential authentication. Holds the database
/// handle (for looking up subjects) and the in-memory [`SessionStore`].
pub struct AuthManager {
    db: Db,
    audit: AuditLog,
    config: SecurityConfig,
    store: SessionStore,
}

pub struct AdminAuthOutcome {
    pub session_id: String,
    pub admin: Admin,
    pub force_change: bool,
}

impl AuthManager {
    pub fn new(db: Db, audit: AuditLog, config: SecurityConfig) -> Self {
        let store = SessionStore::new(config.clone());
        Self {
            db,
            audit,
            config,
            store,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // ---- student (RFID) authentication ----

    /// Looks up a student by `rfid_uid`: exact match first, then a
    /// case-insensitive fallback. Returns `NotFound` for an unknown card
    /// and `Unauthorized` for a card belonging to a deactivated student.
    pub async fn authenticate_student(
        &self,
        rfid_uid: &str,
        source_addr: Option<&str>,
    ) -> Result<(Student, String), ConsultEaseError> {
        let student = match self.db.find_student_by_rfid_exact(rfid_uid).await? {
            Some(s) => Some(s),
            None => self.db.find_student_by_rfid_ci(rfid_uid).await?,
        };

        let student = match student {
            Some(s) if s.active => s,
            Some(_) => {
                self.audit
                    .failure(
                        Actor::none(),
                        "student.auth",
                        Some(rfid_uid),
                        "card belongs to a deactivated student",
                        source_addr,
                    )
                    .await;
                return Err(ConsultEaseError::Unauthorized);
            }
            None => {
                self.audit
                    .failure(
                        Actor::none(),
                        "student.auth",
                        Some(rfid_uid),
                        "unknown card",
                        source_addr,
                    )
                    .await;
                return Err(ConsultEaseError::NotFound("unknown_card".to_string()));
            }
        };

        let session = self
            .store
            .open_session(student.id, SubjectKind::Student, source_addr, None);
        self.audit
            .success(
                Actor::named(student.id, &student.name),
                "student.auth",
                Some(rfid_uid),
                "card recognized",
                source_addr,
            )
            .await;
        Ok((student, session))
    }

    // ---- admin authentication ----

    pub async fn authenticate_admin(
        &self,
        username: &str,
        password: &str,
        source_addr: Option<&str>,
    ) -> Result<AdminAuthOutcome, ConsultEaseError> {
        if let Some(remaining) = self.store.lockout_remaining(username) {
            self.audit
                .failure(
                    Actor::none(),
                    "admin.auth",
                    Some(username),
                    "login attempted while locked out",
                    source_addr,
                )
                .await;
            return Err(ConsultEaseError::Locked {
                remaining_secs: remaining.as_secs(),
            });
        }

        let admin = match self.db.find_admin_by_username(username).await? {
            Some(a) if a.active => a,
            _ => {
                self.store.record_failure(username, source_addr);
                self.audit
                    .failure(
                        Actor::none(),
                        "admin.auth",
                        Some(username),
                        "unknown or inactive admin",
                        source_addr,
                    )
                    .await;
                return Err(ConsultEaseError::Unauthorized);
            }
        };

        let (matches, needs_rehash) = password::verify_password(password, &admin.password_hash)?;
        if !matches {
            self.store.record_failure(username, source_addr);
            self.audit
                .failure(
                    Actor::named(admin.id, &admin.username),
                    "admin.auth",
                    Some(username),
                    "invalid password",
                    source_addr,
                )
                .await;
            return Err(ConsultEaseError::Unauthorized);
        }

        if needs_rehash {
            let rehashed = password::hash_password(password)?;
            self.db
                .update_admin_password(admin.id, &rehashed, admin.force_change)
                .await?;
            info!("transparently rehashed legacy password for admin '{username}'");
        }

        self.store.clear_failed_attempts(username);

        let rotation_expired = self.config.password_rotation_days > 0
            && Utc::now() - admin.last_change
                > chrono::Duration::days(self.config.password_rotation_days);
        let force_change = admin.force_change || rotation_expired;

        let session_id = self
            .store
            .open_session(admin.id, SubjectKind::Admin, source_addr, None);
        self.audit
            .success(
                Actor::named(admin.id, &admin.username),
                "admin.auth",
                Some(username),
                "login successful",
                source_addr,
            )
            .await;

        Ok(AdminAuthOutcome {
            session_id,
            admin,
            force_change,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_round_trips_until_timeout() {
        let store = SessionStore::new(SecurityConfig {
            session_timeout_secs: 1,
            ..Default::default()
        });
        let id = store.open_session(1, SubjectKind::Student, None, None);
        assert!(store.validate(&id).is_some());
    }

    #[test]
    fn session_expires_after_idle_timeout() {
        let store = SessionStore::new(SecurityConfig {
            session_timeout_secs: 0,
            ..Default::default()
        });
        let id = store.open_session(1, SubjectKind::Student, None, None);
        std::thread::sleep(Duration::from_millis(50));
        assert!(store.validate(&id).is_none());
    }

    #[test]
    fn lockout_clears_after_window() {
        let store = SessionStore::new(SecurityConfig {
            password_lockout_threshold: 3,
            password_lockout_duration_secs: 1,
            ..Default::default()
        });
        for _ in 0..3 {
            store.record_failure("alice", None);
        }
        assert!(store.lockout_remaining("alice").is_some());
        std::thread::sleep(Duration::from_millis(1100));
        assert!(store.lockout_remaining("alice").is_none());
    }

    #[test]
    fn csrf_rotation_changes_token() {
        let store = SessionStore::new(SecurityConfig::default());
        let id = store.open_session(1, SubjectKind::Admin, None, None);
        let original = store.validate(&id).unwrap().csrf_token;
        let rotated = store.rotate_csrf(&id).unwrap();
        assert_ne!(original, rotated);
    }
}
