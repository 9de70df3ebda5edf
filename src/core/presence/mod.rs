// src/core/presence/mod.rs

//! Faculty presence tracking: beacon-derived presence with a debounced grace
//! period on loss, plus an `always_present` override.
//!
//! The transition shape is grounded on the teacher's `warden` failover state
//! machine: explicit, named transitions that never silently clamp into an
//! unreachable state. Grace-timer cancellation-on-return reuses a generation
//! counter per faculty id rather than a `JoinHandle` so a flurry of
//! present/absent flaps on a flaky beacon can't leak tasks.

use crate::config::PresenceConfig;
use crate::core::errors::ConsultEaseError;
use crate::core::events::{DomainEvent, EventBus};
use crate::core::persistence::Db;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

pub struct PresenceTracker {
    db: Db,
    events: EventBus,
    grace_period: Duration,
    generations: DashMap<i64, Arc<AtomicU64>>,
}

impl PresenceTracker {
    pub fn new(db: Db, events: EventBus, config: PresenceConfig) -> Arc<Self> {
        Arc::new(Self {
            db,
            events,
            grace_period: Duration::from_secs(config.grace_period_secs),
            generations: DashMap::new(),
        })
    }

    fn generation_cell(&self, faculty_id: i64) -> Arc<AtomicU64> {
        self.generations
            .entry(faculty_id)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// A beacon associated with `faculty_id` came into range.
    pub async fn beacon_present(self: &Arc<Self>, faculty_id: i64) -> Result<(), ConsultEaseError> {
        let cell = self.generation_cell(faculty_id);
        cell.fetch_add(1, Ordering::SeqCst); // invalidates any armed grace timer
        let now = Utc::now();
        self.db
            .update_faculty_presence(faculty_id, true, false, now)
            .await?;
        self.events.publish(DomainEvent::FacultyStateChanged {
            faculty_id,
            present: true,
            grace_active: false,
            at: now,
        });
        Ok(())
    }

    /// A beacon associated with `faculty_id` dropped out of range. Arms a
    /// grace timer rather than immediately marking the faculty absent.
    pub async fn beacon_absent(self: &Arc<Self>, faculty_id: i64) -> Result<(), ConsultEaseError> {
        let cell = self.generation_cell(faculty_id);
        let my_generation = cell.fetch_add(1, Ordering::SeqCst) + 1;

        let faculty = self.db.get_faculty(faculty_id).await?;
        let now = Utc::now();
        self.db
            .update_faculty_presence(faculty_id, faculty.present, true, now)
            .await?;
        self.events.publish(DomainEvent::FacultyStateChanged {
            faculty_id,
            present: faculty.present,
            grace_active: true,
            at: now,
        });

        let tracker = self.clone();
        let grace_period = self.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            if cell.load(Ordering::SeqCst) != my_generation {
                return; // a beacon_present or another beacon_absent superseded this timer
            }
            if let Err(e) = tracker.finalize_absence(faculty_id).await {
                warn!("failed to finalize absence for faculty {faculty_id}: {e}");
            }
        });
        Ok(())
    }

    async fn finalize_absence(&self, faculty_id: i64) -> Result<(), ConsultEaseError> {
        let now = Utc::now();
        self.db
            .update_faculty_presence(faculty_id, false, false, now)
            .await?;
        self.events.publish(DomainEvent::FacultyStateChanged {
            faculty_id,
            present: false,
            grace_active: false,
            at: now,
        });
        info!("faculty {faculty_id} grace period elapsed, marked absent");
        Ok(())
    }

    /// Admin override: when set, observed availability is always true
    /// regardless of beacon signal; when cleared, reverts to the
    /// beacon-derived value already stored on the row.
    pub async fn set_always_present(
        &self,
        faculty_id: i64,
        always_present: bool,
    ) -> Result<(), ConsultEaseError> {
        self.db
            .set_faculty_always_present(faculty_id, always_present)
            .await?;
        let faculty = self.db.get_faculty(faculty_id).await?;
        self.events.publish(DomainEvent::FacultyStateChanged {
            faculty_id,
            present: faculty.is_available(self.grace_period),
            grace_active: faculty.grace_active,
            at: Utc::now(),
        });
        Ok(())
    }

    /// A desk unit reported its sync state (e.g. `keychain_connected`,
    /// `keychain_disconnected`). Updates `sync_state` only; presence itself
    /// is untouched.
    pub async fn update_sync_state(&self, faculty_id: i64, sync_state: &str) -> Result<(), ConsultEaseError> {
        self.db.update_faculty_sync_state(faculty_id, sync_state).await
    }

    /// Beacon reassignment: the old faculty (if any) gets a synthesized
    /// `beacon_absent`, the new faculty a `beacon_present`.
    pub async fn reassign_beacon(
        self: &Arc<Self>,
        beacon_id: &str,
        new_faculty_id: i64,
    ) -> Result<(), ConsultEaseError> {
        if let Some(previous) = self.db.find_faculty_by_beacon(beacon_id).await?
            && previous.id != new_faculty_id
        {
            self.db.assign_faculty_beacon(previous.id, None).await?;
            self.beacon_absent(previous.id).await?;
        }
        self.db
            .assign_faculty_beacon(new_faculty_id, Some(beacon_id))
            .await?;
        self.beacon_present(new_faculty_id).await?;
        Ok(())
    }
}
