// src/core/consultation/mod.rs

//! The consultation request state machine and its dispatch/retry loop.
//!
//! ```text
//! pending ──accept──▶ accepted ──complete──▶ completed
//!    │                   │
//!    │                   └──busy──▶ busy ──cancel──▶ cancelled
//!    └──cancel──▶ cancelled
//! ```
//!
//! Modeled the way the teacher models its own master/failover state machine:
//! explicit transition functions that reject a transition whose precondition
//! doesn't hold, rather than clamping to the nearest valid state.

use crate::config::ConsultationConfig;
use crate::core::audit::{Actor, AuditLog};
use crate::core::bus::BusClient;
use crate::core::errors::ConsultEaseError;
use crate::core::events::{DomainEvent, EventBus};
use crate::core::persistence::{Consultation, Db};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Wire payload published to `consultease/faculty/{id}/requests`. Distinct
/// from the `Consultation` row shape: desk units key off `consultation_id`,
/// `student_name`, and `message`, none of which match the database columns.
#[derive(Serialize)]
struct DeskRequest<'a> {
    consultation_id: i64,
    student_name: &'a str,
    course_code: Option<&'a str>,
    message: &'a str,
    requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Pending,
    Accepted,
    Busy,
    Completed,
    Cancelled,
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Busy => "busy",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ConsultationStatus {
    type Err = ConsultEaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "busy" => Ok(Self::Busy),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ConsultEaseError::Validation(format!(
                "unknown consultation status '{other}'"
            ))),
        }
    }
}

impl ConsultationStatus {
    /// Whether `self -> next` is a legal transition per the state machine above.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted)
                | (Self::Pending, Self::Cancelled)
                | (Self::Accepted, Self::Completed)
                | (Self::Accepted, Self::Busy)
                | (Self::Busy, Self::Cancelled)
        )
    }
}

struct DispatchRecord {
    last_attempt: Instant,
    attempts: u32,
}

/// Owns in-flight consultation state: the durable rows plus the in-memory
/// dispatch-attempt index the sweeper consults.
pub struct ConsultationEngine {
    db: Db,
    bus: BusClient,
    events: EventBus,
    audit: AuditLog,
    config: ConsultationConfig,
    dispatch_index: DashMap<i64, DispatchRecord>,
}

impl ConsultationEngine {
    pub async fn new(
        db: Db,
        bus: BusClient,
        events: EventBus,
        audit: AuditLog,
        config: ConsultationConfig,
    ) -> Result<Arc<Self>, ConsultEaseError> {
        let engine = Arc::new(Self {
            db,
            bus,
            events,
            audit,
            config,
            dispatch_index: DashMap::new(),
        });
        for consultation in engine.db.list_pending_consultations().await? {
            if consultation.parsed_status() == ConsultationStatus::Pending {
                engine.dispatch_index.insert(
                    consultation.id,
                    DispatchRecord {
                        last_attempt: Instant::now(),
                        attempts: 0,
                    },
                );
            }
        }
        Ok(engine)
    }

    pub async fn create(
        &self,
        student_id: i64,
        faculty_id: i64,
        request_text: &str,
        course_code: Option<&str>,
    ) -> Result<Consultation, ConsultEaseError> {
        if request_text.is_empty() {
            return Err(ConsultEaseError::Validation(
                "request_text cannot be empty".to_string(),
            ));
        }
        if request_text.len() > self.config.max_request_text_len {
            return Err(ConsultEaseError::Validation(format!(
                "request_text exceeds {} characters",
                self.config.max_request_text_len
            )));
        }
        let faculty = self.db.get_faculty(faculty_id).await?;
        if !faculty.active {
            return Err(ConsultEaseError::Validation(
                "faculty is not active".to_string(),
            ));
        }
        self.db.get_student(student_id).await?;

        // The open-consultation check and the insert happen atomically inside
        // `create_consultation`'s transaction, so two concurrent duplicate
        // submissions from the same student can't both slip past a
        // check-then-insert race.
        let consultation = self
            .db
            .create_consultation(student_id, faculty_id, request_text, course_code)
            .await?;

        self.dispatch_index.insert(
            consultation.id,
            DispatchRecord {
                last_attempt: Instant::now(),
                attempts: 1,
            },
        );
        self.dispatch(&consultation).await;
        self.emit(&consultation);
        Ok(consultation)
    }

    /// Applies a status transition, rejecting it if the durable row's
    /// current status doesn't match the expected precondition.
    pub async fn transition(
        &self,
        id: i64,
        to: ConsultationStatus,
    ) -> Result<Consultation, ConsultEaseError> {
        let current = self.db.get_consultation(id).await?;
        let from = current.parsed_status();
        if !from.can_transition_to(to) {
            return Err(ConsultEaseError::Conflict(format!(
                "cannot transition consultation {id} from {from} to {to}"
            )));
        }

        let now = Utc::now();
        let responded_at = matches!(from, ConsultationStatus::Pending).then_some(now);
        let completed_at =
            matches!(to, ConsultationStatus::Completed | ConsultationStatus::Cancelled)
                .then_some(now);

        self.db
            .update_consultation_status(id, from, to, responded_at, completed_at)
            .await?;

        if matches!(to, ConsultationStatus::Completed | ConsultationStatus::Cancelled) {
            self.dispatch_index.remove(&id);
        }

        let updated = self.db.get_consultation(id).await?;
        self.emit(&updated);
        Ok(updated)
    }

    fn emit(&self, consultation: &Consultation) {
        self.events.publish(DomainEvent::ConsultationStatusChanged {
            consultation_id: consultation.id,
            status: consultation.parsed_status(),
            at: Utc::now(),
        });
    }

    async fn dispatch(&self, consultation: &Consultation) {
        let topic = format!("consultease/faculty/{}/requests", consultation.faculty_id);

        let student = match self.db.get_student(consultation.student_id).await {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    "failed to load student {} for dispatch of consultation {}: {e}",
                    consultation.student_id, consultation.id
                );
                return;
            }
        };
        let wire = DeskRequest {
            consultation_id: consultation.id,
            student_name: &student.name,
            course_code: consultation.course_code.as_deref(),
            message: &consultation.request_text,
            requested_at: consultation.requested_at,
        };
        let payload = match serde_json::to_vec(&wire) {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to serialize consultation {}: {e}", consultation.id);
                return;
            }
        };
        self.bus.publish(&topic, payload).await;
    }

    /// Background loop: republishes any `pending` consultation older than
    /// the configured reattempt interval, up to `max_dispatch_attempts`.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.config.reattempt_interval_secs.max(1),
        ));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once().await,
                _ = shutdown_rx.recv() => {
                    info!("consultation sweeper shutting down");
                    break;
                }
            }
        }
    }

    async fn sweep_once(&self) {
        let reattempt_after = Duration::from_secs(self.config.reattempt_interval_secs.max(1));
        let due: Vec<i64> = self
            .dispatch_index
            .iter()
            .filter(|entry| entry.last_attempt.elapsed() >= reattempt_after)
            .map(|entry| *entry.key())
            .collect();

        for id in due {
            let consultation = match self.db.get_consultation(id).await {
                Ok(c) => c,
                Err(_) => {
                    self.dispatch_index.remove(&id);
                    continue;
                }
            };
            if consultation.parsed_status() != ConsultationStatus::Pending {
                self.dispatch_index.remove(&id);
                continue;
            }

            let mut record = match self.dispatch_index.get_mut(&id) {
                Some(r) => r,
                None => continue,
            };
            if record.attempts >= self.config.max_dispatch_attempts {
                warn!(
                    "consultation {id} exhausted {} dispatch attempts, leaving pending",
                    self.config.max_dispatch_attempts
                );
                let audit = self.audit.clone();
                let max_attempts = self.config.max_dispatch_attempts;
                tokio::spawn(async move {
                    audit
                        .warning(
                            Actor::none(),
                            "consultation.dispatch_exhausted",
                            Some(&format!("consultation:{id}")),
                            &format!(
                                "consultation {id} stayed pending after {max_attempts} dispatch attempts"
                            ),
                            None,
                        )
                        .await;
                });
                continue;
            }
            record.attempts += 1;
            record.last_attempt = Instant::now();
            drop(record);

            self.dispatch(&consultation).await;
        }
    }
}
