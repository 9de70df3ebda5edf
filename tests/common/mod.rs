// tests/common/mod.rs

//! Shared test scaffolding, grounded on the teacher's own
//! `tests/integration/test_helpers.rs` — a `TestContext` built against a
//! real (here, tempfile-backed SQLite) database rather than mocks, so
//! integration tests exercise the actual schema and query layer.

use consultease::config::DatabaseConfig;
use consultease::core::persistence::Db;
use tempfile::TempDir;

/// Holds the tempdir alive for the test's duration; the `Db` pool and the
/// sqlite file it opens would otherwise be torn down before assertions run.
pub struct TestDb {
    pub db: Db,
    _dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir for test database");
        let db_path = dir.path().join("consultease-test");
        let config = DatabaseConfig {
            name: db_path.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let db = Db::connect(&config).await.expect("connect to tempfile sqlite db");
        Self { db, _dir: dir }
    }
}
