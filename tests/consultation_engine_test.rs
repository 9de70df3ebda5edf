// tests/consultation_engine_test.rs

//! Integration coverage of the consultation request state machine against a
//! real (tempfile-backed SQLite) database and a disconnected bus client —
//! dispatch is best-effort and queued in memory, so no broker is needed to
//! exercise the durable state transitions and the duplicate-request guard.

mod common;

use common::TestDb;
use consultease::config::{BrokerConfig, ConsultationConfig};
use consultease::core::audit::AuditLog;
use consultease::core::bus::BusClient;
use consultease::core::consultation::{ConsultationEngine, ConsultationStatus};
use consultease::core::events::EventBus;
use tokio::sync::broadcast;

fn disconnected_bus(events: EventBus) -> BusClient {
    // Port 0 never accepts a real connection; the reconnect loop retries
    // harmlessly in the background while publish() just queues in memory.
    let config = BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    BusClient::connect(config, events, shutdown_rx)
}

#[tokio::test]
async fn duplicate_open_request_to_same_faculty_is_rejected() {
    let test_db = TestDb::new().await;
    let student = test_db
        .db
        .create_student("Ana Cruz", "CS", "RFID-0001")
        .await
        .unwrap();
    let faculty = test_db
        .db
        .create_faculty("Dr. Reyes", "CS", "reyes@example.edu")
        .await
        .unwrap();

    let events = EventBus::new();
    let bus = disconnected_bus(events.clone());
    let audit = AuditLog::new(test_db.db.clone());
    let engine = ConsultationEngine::new(
        test_db.db.clone(),
        bus,
        events,
        audit,
        ConsultationConfig::default(),
    )
    .await
    .unwrap();

    let first = engine
        .create(student.id, faculty.id, "Need help with thesis outline", None)
        .await
        .unwrap();
    assert_eq!(first.parsed_status(), ConsultationStatus::Pending);

    let second = engine
        .create(student.id, faculty.id, "Same request again", None)
        .await;
    assert!(second.is_err(), "a second open request to the same faculty must be rejected");
}

#[tokio::test]
async fn transition_rejects_illegal_state_change() {
    let test_db = TestDb::new().await;
    let student = test_db
        .db
        .create_student("Ben Lim", "ECE", "RFID-0002")
        .await
        .unwrap();
    let faculty = test_db
        .db
        .create_faculty("Dr. Santos", "ECE", "santos@example.edu")
        .await
        .unwrap();

    let events = EventBus::new();
    let bus = disconnected_bus(events.clone());
    let audit = AuditLog::new(test_db.db.clone());
    let engine = ConsultationEngine::new(
        test_db.db.clone(),
        bus,
        events,
        audit,
        ConsultationConfig::default(),
    )
    .await
    .unwrap();

    let consultation = engine
        .create(student.id, faculty.id, "Question about the lab report", None)
        .await
        .unwrap();

    // pending -> completed is not a legal transition (must pass through accepted).
    let result = engine
        .transition(consultation.id, ConsultationStatus::Completed)
        .await;
    assert!(result.is_err());

    let accepted = engine
        .transition(consultation.id, ConsultationStatus::Accepted)
        .await
        .unwrap();
    assert_eq!(accepted.parsed_status(), ConsultationStatus::Accepted);

    let completed = engine
        .transition(consultation.id, ConsultationStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.parsed_status(), ConsultationStatus::Completed);
}
