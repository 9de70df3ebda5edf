// tests/auth_manager_test.rs

//! Integration coverage of student RFID and admin credential authentication
//! against a real (tempfile-backed SQLite) database: unknown/deactivated
//! cards, wrong passwords, and the lockout threshold.

mod common;

use common::TestDb;
use consultease::config::SecurityConfig;
use consultease::core::audit::AuditLog;
use consultease::core::auth::AuthManager;
use consultease::core::auth::password;
use consultease::core::errors::ConsultEaseError;

fn manager(test_db: &TestDb, config: SecurityConfig) -> AuthManager {
    AuthManager::new(test_db.db.clone(), AuditLog::new(test_db.db.clone()), config)
}

#[tokio::test]
async fn known_active_card_authenticates() {
    let test_db = TestDb::new().await;
    let student = test_db
        .db
        .create_student("Chris Tan", "IT", "RFID-1234")
        .await
        .unwrap();
    let auth = manager(&test_db, SecurityConfig::default());

    let (found, session_id) = auth.authenticate_student("RFID-1234", None).await.unwrap();
    assert_eq!(found.id, student.id);
    assert!(!session_id.is_empty());
}

#[tokio::test]
async fn unknown_card_is_not_found() {
    let test_db = TestDb::new().await;
    let auth = manager(&test_db, SecurityConfig::default());

    let err = auth.authenticate_student("RFID-NOPE", None).await.unwrap_err();
    assert!(matches!(err, ConsultEaseError::NotFound(_)));
}

#[tokio::test]
async fn deactivated_card_is_unauthorized() {
    let test_db = TestDb::new().await;
    let student = test_db
        .db
        .create_student("Dara Kim", "IT", "RFID-5678")
        .await
        .unwrap();
    test_db.db.set_student_active(student.id, false).await.unwrap();
    let auth = manager(&test_db, SecurityConfig::default());

    let err = auth.authenticate_student("RFID-5678", None).await.unwrap_err();
    assert!(matches!(err, ConsultEaseError::Unauthorized));
}

#[tokio::test]
async fn admin_login_with_wrong_password_fails_then_locks_out() {
    let test_db = TestDb::new().await;
    let hash = password::hash_password("correct horse battery staple").unwrap();
    test_db.db.create_admin("eve", &hash, false).await.unwrap();

    let auth = manager(
        &test_db,
        SecurityConfig {
            password_lockout_threshold: 2,
            ..Default::default()
        },
    );

    for _ in 0..2 {
        let err = auth.authenticate_admin("eve", "wrong password", None).await.unwrap_err();
        assert!(matches!(err, ConsultEaseError::Unauthorized));
    }

    let err = auth
        .authenticate_admin("eve", "correct horse battery staple", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsultEaseError::Locked { .. }));
}

#[tokio::test]
async fn admin_login_with_correct_password_succeeds() {
    let test_db = TestDb::new().await;
    let hash = password::hash_password("another-strong-password").unwrap();
    let admin = test_db.db.create_admin("frank", &hash, false).await.unwrap();

    let auth = manager(&test_db, SecurityConfig::default());
    let outcome = auth
        .authenticate_admin("frank", "another-strong-password", None)
        .await
        .unwrap();
    assert_eq!(outcome.admin.id, admin.id);
    assert!(!outcome.force_change);
}
