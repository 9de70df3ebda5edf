// tests/presence_tracker_test.rs

//! Integration coverage of the faculty presence tracker's grace-period
//! debounce against a real (tempfile-backed SQLite) database, per the
//! testable properties spec: presence goes absent only after the grace
//! period elapses, and a beacon returning within the grace window cancels
//! the pending absence.

mod common;

use common::TestDb;
use consultease::config::PresenceConfig;
use consultease::core::events::EventBus;
use consultease::core::presence::PresenceTracker;
use std::time::Duration;

#[tokio::test]
async fn beacon_loss_marks_absent_only_after_grace_period() {
    let test_db = TestDb::new().await;
    let faculty = test_db
        .db
        .create_faculty("Dr. Reyes", "CS", "reyes@example.edu")
        .await
        .unwrap();

    let tracker = PresenceTracker::new(
        test_db.db.clone(),
        EventBus::new(),
        PresenceConfig { grace_period_secs: 1 },
    );

    tracker.beacon_present(faculty.id).await.unwrap();
    let present = test_db.db.get_faculty(faculty.id).await.unwrap();
    assert!(present.present);
    assert!(!present.grace_active);

    tracker.beacon_absent(faculty.id).await.unwrap();
    let during_grace = test_db.db.get_faculty(faculty.id).await.unwrap();
    assert!(during_grace.present, "still present during grace period");
    assert!(during_grace.grace_active);

    tokio::time::sleep(Duration::from_millis(1300)).await;
    let after_grace = test_db.db.get_faculty(faculty.id).await.unwrap();
    assert!(!after_grace.present, "absent once the grace period elapses");
    assert!(!after_grace.grace_active);
}

#[tokio::test]
async fn beacon_return_within_grace_cancels_the_pending_absence() {
    let test_db = TestDb::new().await;
    let faculty = test_db
        .db
        .create_faculty("Dr. Santos", "ECE", "santos@example.edu")
        .await
        .unwrap();

    let tracker = PresenceTracker::new(
        test_db.db.clone(),
        EventBus::new(),
        PresenceConfig { grace_period_secs: 1 },
    );

    tracker.beacon_present(faculty.id).await.unwrap();
    tracker.beacon_absent(faculty.id).await.unwrap();
    tracker.beacon_present(faculty.id).await.unwrap();

    // Give the stale grace timer a chance to fire; its generation check
    // should find it's been superseded and do nothing.
    tokio::time::sleep(Duration::from_millis(1300)).await;

    let faculty = test_db.db.get_faculty(faculty.id).await.unwrap();
    assert!(faculty.present, "beacon returned before the grace timer fired");
    assert!(!faculty.grace_active);
}
