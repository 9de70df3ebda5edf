// src/core/state.rs

//! The coordinator: wires every component together in the required startup
//! order, fans bus topics out to the component they belong to, and is the
//! single place that knows the legacy `professor/*` topic compatibility
//! shim exists.

use crate::config::Config;
use crate::core::admin_ops::AdminOps;
use crate::core::audit::AuditLog;
use crate::core::auth::AuthManager;
use crate::core::bus::BusClient;
use crate::core::consultation::{ConsultationEngine, ConsultationStatus};
use crate::core::events::{DomainEvent, EventBus};
use crate::core::persistence::{Db, Student};
use crate::core::presence::PresenceTracker;
use crate::core::rfid::RfidAdapter;
use anyhow::{Context, Result};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// The outcome of one RFID scan, pushed to a dedicated broadcast channel so
/// the edge API (or a test harness) can observe the authentication result
/// without polling the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub uid: String,
    pub student: Option<Student>,
    pub session_id: Option<String>,
    pub error: Option<String>,
}

/// Every live component, constructed once and shared as `Arc<AppState>`.
pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub events: EventBus,
    pub bus: BusClient,
    pub presence: Arc<PresenceTracker>,
    pub consultations: Arc<ConsultationEngine>,
    pub auth: Arc<AuthManager>,
    pub admin_ops: Arc<AdminOps>,
    pub audit: AuditLog,
    pub rfid: Arc<RfidAdapter>,
    pub scan_outcomes: broadcast::Sender<ScanOutcome>,
}

impl AppState {
    /// Builds every component in the order the coordinator requires: config
    /// (already loaded by the caller) → persistence → audit log → bus
    /// client → presence tracker → consultation engine → RFID adapter →
    /// auth manager → admin operations. Then spawns the bus- and
    /// RFID-routing tasks that fan inbound traffic out to those components.
    pub async fn initialize(config: Config, shutdown_tx: &broadcast::Sender<()>) -> Result<Arc<Self>> {
        let db = Db::connect(&config.database)
            .await
            .context("failed to connect to the persistence layer")?;
        let audit = AuditLog::new(db.clone());
        let events = EventBus::new();

        let bus = BusClient::connect(config.broker.clone(), events.clone(), shutdown_tx.subscribe());

        let presence = PresenceTracker::new(db.clone(), events.clone(), config.presence.clone());

        let consultations = ConsultationEngine::new(
            db.clone(),
            bus.clone(),
            events.clone(),
            audit.clone(),
            config.consultation.clone(),
        )
        .await
        .context("failed to initialize consultation engine")?;

        let rfid = Arc::new(RfidAdapter::spawn(
            config.rfid.clone(),
            events.clone(),
            shutdown_tx.subscribe(),
        ));

        let auth = Arc::new(AuthManager::new(db.clone(), audit.clone(), config.security.clone()));

        let admin_ops = Arc::new(AdminOps::new(
            db.clone(),
            audit.clone(),
            presence.clone(),
            config.security.min_password_length,
        ));

        let (scan_outcomes, _) = broadcast::channel(256);

        let state = Arc::new(Self {
            config,
            db,
            events,
            bus,
            presence,
            consultations,
            auth,
            admin_ops,
            audit,
            rfid,
            scan_outcomes,
        });

        tokio::spawn(state.consultations.clone().run_sweeper(shutdown_tx.subscribe()));
        state.clone().spawn_bus_routing(shutdown_tx.subscribe());
        state.clone().spawn_rfid_routing(shutdown_tx.subscribe());

        Ok(state)
    }

    /// Subscribes to the desk-unit topics (and the legacy `professor/*`
    /// aliases) and translates each inbound message into a call on the
    /// presence tracker or consultation engine.
    fn spawn_bus_routing(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut status_rx = self.bus.subscribe("consultease/faculty/+/status");
        let mut mac_status_rx = self.bus.subscribe("consultease/faculty/+/mac_status");
        let mut responses_rx = self.bus.subscribe("consultease/faculty/+/responses");
        let mut legacy_status_rx = self.bus.subscribe("professor/status");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    Ok(msg) = status_rx.recv() => {
                        if let Some(faculty_id) = faculty_id_from_topic(&msg.topic) {
                            self.handle_status(faculty_id, &msg.payload).await;
                        }
                    }
                    Ok(msg) = mac_status_rx.recv() => {
                        if let Some(faculty_id) = faculty_id_from_topic(&msg.topic) {
                            self.handle_mac_status(faculty_id, &msg.payload).await;
                        }
                    }
                    Ok(msg) = responses_rx.recv() => {
                        if let Some(faculty_id) = faculty_id_from_topic(&msg.topic) {
                            self.handle_response(faculty_id, &msg.payload).await;
                        }
                    }
                    // Legacy single-faculty deployments published plain status
                    // strings to `professor/status` with no faculty id embedded;
                    // per the open question on this mapping, every legacy
                    // message is attributed to faculty id 1.
                    Ok(msg) = legacy_status_rx.recv() => {
                        self.handle_status(1, &msg.payload).await;
                    }
                }
            }
        });
    }

    async fn handle_status(&self, faculty_id: i64, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        let result = match text.trim() {
            "faculty_present" => self.presence.beacon_present(faculty_id).await,
            "faculty_absent" => self.presence.beacon_absent(faculty_id).await,
            "keychain_connected" => self.presence.update_sync_state(faculty_id, "keychain_connected").await,
            "keychain_disconnected" => {
                self.presence.update_sync_state(faculty_id, "keychain_disconnected").await
            }
            other => {
                warn!("unrecognized status payload '{other}' for faculty {faculty_id}");
                return;
            }
        };
        if let Err(e) = result {
            warn!("failed to apply status update for faculty {faculty_id}: {e}");
        }
    }

    async fn handle_mac_status(&self, faculty_id: i64, payload: &[u8]) {
        #[derive(serde::Deserialize)]
        struct MacStatus {
            status: String,
            #[allow(dead_code)]
            mac: String,
        }
        let parsed: MacStatus = match serde_json::from_slice(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!("malformed mac_status payload for faculty {faculty_id}: {e}");
                return;
            }
        };
        let result = match parsed.status.as_str() {
            "detected" => self.presence.beacon_present(faculty_id).await,
            "lost" => self.presence.beacon_absent(faculty_id).await,
            other => {
                warn!("unrecognized mac_status '{other}' for faculty {faculty_id}");
                return;
            }
        };
        if let Err(e) = result {
            warn!("failed to apply mac_status update for faculty {faculty_id}: {e}");
        }
    }

    async fn handle_response(&self, faculty_id: i64, payload: &[u8]) {
        #[derive(serde::Deserialize)]
        struct Response {
            consultation_id: i64,
            action: String,
        }
        let parsed: Response = match serde_json::from_slice(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!("malformed response payload for faculty {faculty_id}: {e}");
                return;
            }
        };
        let status = match parsed.action.as_str() {
            "accept" => ConsultationStatus::Accepted,
            "busy" => ConsultationStatus::Busy,
            "complete" => ConsultationStatus::Completed,
            other => {
                warn!("unrecognized response action '{other}' for consultation {}", parsed.consultation_id);
                return;
            }
        };
        if let Err(e) = self.consultations.transition(parsed.consultation_id, status).await {
            warn!(
                "rejected transition for consultation {}: {e}",
                parsed.consultation_id
            );
        }
    }

    /// Subscribes to the RFID adapter's scan channel, authenticates each
    /// scan against the student directory, and republishes both a
    /// best-effort domain event (for anything just watching for activity)
    /// and the authentication outcome (for the kiosk-facing caller that
    /// needs the resulting session).
    fn spawn_rfid_routing(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut scans = self.rfid.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    Ok(scan) = scans.recv() => {
                        self.events.publish(DomainEvent::RfidScanned {
                            uid: scan.uid.clone(),
                            at: scan.at,
                        });
                        let outcome = match self.auth.authenticate_student(&scan.uid, None).await {
                            Ok((student, session_id)) => ScanOutcome {
                                uid: scan.uid,
                                student: Some(student),
                                session_id: Some(session_id),
                                error: None,
                            },
                            Err(e) => ScanOutcome {
                                uid: scan.uid,
                                student: None,
                                session_id: None,
                                error: Some(e.to_string()),
                            },
                        };
                        let _ = self.scan_outcomes.send(outcome);
                    }
                }
            }
        });
    }
}

/// Extracts the faculty id from a `consultease/faculty/{id}/...` topic.
fn faculty_id_from_topic(topic: &str) -> Option<i64> {
    let mut parts = topic.split('/');
    if parts.next()? != "consultease" || parts.next()? != "faculty" {
        return None;
    }
    i64::from_str(parts.next()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_faculty_id_from_topic() {
        assert_eq!(
            faculty_id_from_topic("consultease/faculty/7/status"),
            Some(7)
        );
        assert_eq!(faculty_id_from_topic("professor/status"), None);
        assert_eq!(faculty_id_from_topic("consultease/faculty/abc/status"), None);
    }
}
