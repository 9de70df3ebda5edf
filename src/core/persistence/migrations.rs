// src/core/persistence/migrations.rs

//! Schema creation. Statements are plain ANSI-ish SQL that both SQLite and
//! Postgres accept under the `Any` driver; `CREATE TABLE IF NOT EXISTS` and
//! `CREATE INDEX IF NOT EXISTS` keep this idempotent across restarts.

pub fn statements() -> &'static [&'static str] {
    &[
        r#"CREATE TABLE IF NOT EXISTS students (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            rfid_uid TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS faculty (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            email TEXT NOT NULL,
            beacon_id TEXT,
            image_ref TEXT,
            present BOOLEAN NOT NULL DEFAULT FALSE,
            always_present BOOLEAN NOT NULL DEFAULT FALSE,
            grace_active BOOLEAN NOT NULL DEFAULT FALSE,
            sync_state TEXT NOT NULL DEFAULT 'unknown',
            active BOOLEAN NOT NULL DEFAULT TRUE,
            last_seen TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS consultations (
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            faculty_id INTEGER NOT NULL,
            request_text TEXT NOT NULL,
            course_code TEXT,
            status TEXT NOT NULL,
            requested_at TEXT NOT NULL,
            responded_at TEXT,
            completed_at TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS admins (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            force_change BOOLEAN NOT NULL DEFAULT FALSE,
            last_change TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS audit_records (
            id INTEGER PRIMARY KEY,
            actor_id INTEGER,
            actor_name TEXT,
            action TEXT NOT NULL,
            resource TEXT,
            details TEXT NOT NULL,
            source_addr TEXT,
            outcome TEXT NOT NULL,
            at TEXT NOT NULL
        )"#,
    ]
}

pub fn index_statements() -> &'static [&'static str] {
    &[
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_students_rfid_uid ON students (rfid_uid)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_faculty_email ON faculty (email)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_faculty_beacon_id ON faculty (beacon_id)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_admins_username ON admins (username)",
        "CREATE INDEX IF NOT EXISTS idx_consultations_faculty_status ON consultations (faculty_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_consultations_student_status ON consultations (student_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_consultations_status_requested ON consultations (status, requested_at)",
    ]
}
