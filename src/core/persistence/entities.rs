// src/core/persistence/entities.rs

use crate::core::consultation::ConsultationStatus;
use crate::core::errors::ConsultEaseError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::time::Duration;

use super::pool::{Db, with_tx};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub department: String,
    pub rfid_uid: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Faculty {
    pub id: i64,
    pub name: String,
    pub department: String,
    pub email: String,
    pub beacon_id: Option<String>,
    pub image_ref: Option<String>,
    pub present: bool,
    pub always_present: bool,
    pub grace_active: bool,
    pub sync_state: String,
    pub active: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Faculty {
    /// Observed availability per the presence model: always-present
    /// overrides the beacon-derived signal; otherwise `present` only counts
    /// while `last_seen` is within `grace_period`, so a row left over from a
    /// crash mid-grace-period doesn't report available forever.
    pub fn is_available(&self, grace_period: Duration) -> bool {
        if self.always_present {
            return true;
        }
        if !self.present {
            return false;
        }
        match self.last_seen {
            Some(last_seen) => {
                let elapsed = Utc::now().signed_duration_since(last_seen);
                elapsed.num_seconds() <= grace_period.as_secs() as i64
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Consultation {
    pub id: i64,
    pub student_id: i64,
    pub faculty_id: i64,
    pub request_text: String,
    pub course_code: Option<String>,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Consultation {
    pub fn parsed_status(&self) -> ConsultationStatus {
        self.status.parse().unwrap_or(ConsultationStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Admin {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub active: bool,
    pub force_change: bool,
    pub last_change: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Warning,
}

impl AuditOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditRecord {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub actor_name: Option<String>,
    pub action: String,
    pub resource: Option<String>,
    pub details: String,
    pub source_addr: Option<String>,
    pub outcome: String,
    pub at: DateTime<Utc>,
}

impl Db {
    // ---- students ----

    pub async fn create_student(
        &self,
        name: &str,
        department: &str,
        rfid_uid: &str,
    ) -> Result<Student, ConsultEaseError> {
        let now = Utc::now();
        let rec: Student = sqlx::query_as(
            "INSERT INTO students (name, department, rfid_uid, active, created_at, updated_at)
             VALUES ($1, $2, $3, TRUE, $4, $4)
             RETURNING id, name, department, rfid_uid, active, created_at, updated_at",
        )
        .bind(name)
        .bind(department)
        .bind(rfid_uid)
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        Ok(rec)
    }

    /// Exact, case-sensitive match on `rfid_uid`.
    pub async fn find_student_by_rfid_exact(
        &self,
        rfid_uid: &str,
    ) -> Result<Option<Student>, ConsultEaseError> {
        let rec: Option<Student> = sqlx::query_as(
            "SELECT id, name, department, rfid_uid, active, created_at, updated_at
             FROM students WHERE rfid_uid = $1",
        )
        .bind(rfid_uid)
        .fetch_optional(self.pool())
        .await?;
        Ok(rec)
    }

    /// Case-insensitive fallback match, tried only if the exact match misses.
    pub async fn find_student_by_rfid_ci(
        &self,
        rfid_uid: &str,
    ) -> Result<Option<Student>, ConsultEaseError> {
        let rec: Option<Student> = sqlx::query_as(
            "SELECT id, name, department, rfid_uid, active, created_at, updated_at
             FROM students WHERE LOWER(rfid_uid) = LOWER($1)",
        )
        .bind(rfid_uid)
        .fetch_optional(self.pool())
        .await?;
        Ok(rec)
    }

    pub async fn update_student(
        &self,
        id: i64,
        name: &str,
        department: &str,
        rfid_uid: &str,
    ) -> Result<Student, ConsultEaseError> {
        let rec: Student = sqlx::query_as(
            "UPDATE students SET name = $1, department = $2, rfid_uid = $3, updated_at = $4
             WHERE id = $5
             RETURNING id, name, department, rfid_uid, active, created_at, updated_at",
        )
        .bind(name)
        .bind(department)
        .bind(rfid_uid)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ConsultEaseError::NotFound(format!("student {id}")))?;
        Ok(rec)
    }

    pub async fn set_student_active(&self, id: i64, active: bool) -> Result<(), ConsultEaseError> {
        sqlx::query("UPDATE students SET active = $1, updated_at = $2 WHERE id = $3")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_student(&self, id: i64) -> Result<Student, ConsultEaseError> {
        sqlx::query_as(
            "SELECT id, name, department, rfid_uid, active, created_at, updated_at
             FROM students WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ConsultEaseError::NotFound(format!("student {id}")))
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, ConsultEaseError> {
        let rows: Vec<Student> = sqlx::query_as(
            "SELECT id, name, department, rfid_uid, active, created_at, updated_at
             FROM students ORDER BY name",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    // ---- faculty ----

    pub async fn create_faculty(
        &self,
        name: &str,
        department: &str,
        email: &str,
    ) -> Result<Faculty, ConsultEaseError> {
        let now = Utc::now();
        let rec: Faculty = sqlx::query_as(
            "INSERT INTO faculty
               (name, department, email, present, always_present, grace_active,
                sync_state, active, created_at, updated_at)
             VALUES ($1, $2, $3, FALSE, FALSE, FALSE, 'unknown', TRUE, $4, $4)
             RETURNING id, name, department, email, beacon_id, image_ref, present,
                       always_present, grace_active, sync_state, active, last_seen,
                       created_at, updated_at",
        )
        .bind(name)
        .bind(department)
        .bind(email)
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        Ok(rec)
    }

    pub async fn get_faculty(&self, id: i64) -> Result<Faculty, ConsultEaseError> {
        sqlx::query_as(
            "SELECT id, name, department, email, beacon_id, image_ref, present,
                    always_present, grace_active, sync_state, active, last_seen,
                    created_at, updated_at
             FROM faculty WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ConsultEaseError::NotFound(format!("faculty {id}")))
    }

    pub async fn find_faculty_by_beacon(
        &self,
        beacon_id: &str,
    ) -> Result<Option<Faculty>, ConsultEaseError> {
        let rec: Option<Faculty> = sqlx::query_as(
            "SELECT id, name, department, email, beacon_id, image_ref, present,
                    always_present, grace_active, sync_state, active, last_seen,
                    created_at, updated_at
             FROM faculty WHERE beacon_id = $1",
        )
        .bind(beacon_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(rec)
    }

    pub async fn list_faculty(&self) -> Result<Vec<Faculty>, ConsultEaseError> {
        let rows: Vec<Faculty> = sqlx::query_as(
            "SELECT id, name, department, email, beacon_id, image_ref, present,
                    always_present, grace_active, sync_state, active, last_seen,
                    created_at, updated_at
             FROM faculty ORDER BY name",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn update_faculty_presence(
        &self,
        id: i64,
        present: bool,
        grace_active: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), ConsultEaseError> {
        sqlx::query(
            "UPDATE faculty SET present = $1, grace_active = $2, last_seen = $3, updated_at = $3
             WHERE id = $4",
        )
        .bind(present)
        .bind(grace_active)
        .bind(last_seen)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_faculty_always_present(
        &self,
        id: i64,
        always_present: bool,
    ) -> Result<(), ConsultEaseError> {
        sqlx::query("UPDATE faculty SET always_present = $1, updated_at = $2 WHERE id = $3")
            .bind(always_present)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_faculty(
        &self,
        id: i64,
        name: &str,
        department: &str,
        email: &str,
        image_ref: Option<&str>,
    ) -> Result<Faculty, ConsultEaseError> {
        let rec: Faculty = sqlx::query_as(
            "UPDATE faculty SET name = $1, department = $2, email = $3, image_ref = $4,
                updated_at = $5
             WHERE id = $6
             RETURNING id, name, department, email, beacon_id, image_ref, present,
                       always_present, grace_active, sync_state, active, last_seen,
                       created_at, updated_at",
        )
        .bind(name)
        .bind(department)
        .bind(email)
        .bind(image_ref)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ConsultEaseError::NotFound(format!("faculty {id}")))?;
        Ok(rec)
    }

    pub async fn set_faculty_active(&self, id: i64, active: bool) -> Result<(), ConsultEaseError> {
        sqlx::query("UPDATE faculty SET active = $1, updated_at = $2 WHERE id = $3")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_faculty_sync_state(
        &self,
        id: i64,
        sync_state: &str,
    ) -> Result<(), ConsultEaseError> {
        sqlx::query("UPDATE faculty SET sync_state = $1, updated_at = $2 WHERE id = $3")
            .bind(sync_state)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn assign_faculty_beacon(
        &self,
        id: i64,
        beacon_id: Option<&str>,
    ) -> Result<(), ConsultEaseError> {
        sqlx::query("UPDATE faculty SET beacon_id = $1, updated_at = $2 WHERE id = $3")
            .bind(beacon_id)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // ---- consultations ----

    /// Checks for an existing open (`pending`/`accepted`) consultation
    /// between this student and faculty and inserts the new row, all
    /// inside one retried transaction — closing the race a separate
    /// check-then-insert would leave between two concurrent duplicate
    /// submissions from the same student.
    pub async fn create_consultation(
        &self,
        student_id: i64,
        faculty_id: i64,
        request_text: &str,
        course_code: Option<&str>,
    ) -> Result<Consultation, ConsultEaseError> {
        with_tx(self, |mut tx| async move {
            let existing: Option<(i64,)> = sqlx::query_as(
                "SELECT id FROM consultations
                 WHERE student_id = $1 AND faculty_id = $2 AND status IN ('pending', 'accepted')
                 LIMIT 1",
            )
            .bind(student_id)
            .bind(faculty_id)
            .fetch_optional(&mut *tx)
            .await?;
            if existing.is_some() {
                return Err(ConsultEaseError::Conflict(
                    "an open consultation with this faculty member already exists".to_string(),
                ));
            }

            let now = Utc::now();
            let rec: Consultation = sqlx::query_as(
                "INSERT INTO consultations
                   (student_id, faculty_id, request_text, course_code, status, requested_at)
                 VALUES ($1, $2, $3, $4, 'pending', $5)
                 RETURNING id, student_id, faculty_id, request_text, course_code, status,
                           requested_at, responded_at, completed_at",
            )
            .bind(student_id)
            .bind(faculty_id)
            .bind(request_text)
            .bind(course_code)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            Ok((rec, tx))
        })
        .await
    }

    pub async fn get_consultation(&self, id: i64) -> Result<Consultation, ConsultEaseError> {
        sqlx::query_as(
            "SELECT id, student_id, faculty_id, request_text, course_code, status,
                    requested_at, responded_at, completed_at
             FROM consultations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ConsultEaseError::NotFound(format!("consultation {id}")))
    }

    pub async fn list_pending_consultations(&self) -> Result<Vec<Consultation>, ConsultEaseError> {
        let rows: Vec<Consultation> = sqlx::query_as(
            "SELECT id, student_id, faculty_id, request_text, course_code, status,
                    requested_at, responded_at, completed_at
             FROM consultations WHERE status IN ('pending', 'accepted')
             ORDER BY requested_at",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Compare-and-swap status update: the row only moves if it is still in
    /// `expected_from`. Zero rows affected means the durable status no
    /// longer matches what the caller read, so the transition is rejected
    /// rather than silently overwriting whatever won the race.
    pub async fn update_consultation_status(
        &self,
        id: i64,
        expected_from: ConsultationStatus,
        status: ConsultationStatus,
        responded_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), ConsultEaseError> {
        let result = sqlx::query(
            "UPDATE consultations SET status = $1, responded_at = COALESCE($2, responded_at),
             completed_at = COALESCE($3, completed_at) WHERE id = $4 AND status = $5",
        )
        .bind(status.to_string())
        .bind(responded_at)
        .bind(completed_at)
        .bind(id)
        .bind(expected_from.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(ConsultEaseError::Conflict(format!(
                "consultation {id} was not in the expected '{expected_from}' state"
            )));
        }
        Ok(())
    }

    // ---- admins ----

    pub async fn count_admins(&self) -> Result<i64, ConsultEaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admins")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    pub async fn find_admin_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Admin>, ConsultEaseError> {
        let rec: Option<Admin> = sqlx::query_as(
            "SELECT id, username, password_hash, active, force_change, last_change,
                    created_at, updated_at
             FROM admins WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await?;
        Ok(rec)
    }

    pub async fn create_admin(
        &self,
        username: &str,
        password_hash: &str,
        force_change: bool,
    ) -> Result<Admin, ConsultEaseError> {
        let now = Utc::now();
        let rec: Admin = sqlx::query_as(
            "INSERT INTO admins (username, password_hash, active, force_change, last_change,
                created_at, updated_at)
             VALUES ($1, $2, TRUE, $3, $4, $4, $4)
             RETURNING id, username, password_hash, active, force_change, last_change,
                       created_at, updated_at",
        )
        .bind(username)
        .bind(password_hash)
        .bind(force_change)
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        Ok(rec)
    }

    pub async fn update_admin_password(
        &self,
        id: i64,
        password_hash: &str,
        force_change: bool,
    ) -> Result<(), ConsultEaseError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE admins SET password_hash = $1, force_change = $2, last_change = $3,
             updated_at = $3 WHERE id = $4",
        )
        .bind(password_hash)
        .bind(force_change)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_admin(&self, id: i64) -> Result<Admin, ConsultEaseError> {
        sqlx::query_as(
            "SELECT id, username, password_hash, active, force_change, last_change,
                    created_at, updated_at
             FROM admins WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ConsultEaseError::NotFound(format!("admin {id}")))
    }

    pub async fn list_admins(&self) -> Result<Vec<Admin>, ConsultEaseError> {
        let rows: Vec<Admin> = sqlx::query_as(
            "SELECT id, username, password_hash, active, force_change, last_change,
                    created_at, updated_at
             FROM admins ORDER BY username",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn set_admin_active(&self, id: i64, active: bool) -> Result<(), ConsultEaseError> {
        sqlx::query("UPDATE admins SET active = $1, updated_at = $2 WHERE id = $3")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Deactivates `id` unless doing so would empty the active-admin set,
    /// checked and applied inside one transaction so two concurrent
    /// deactivation requests can't both pass a stale "more than one active
    /// admin" check and leave zero.
    pub async fn deactivate_admin_unless_last(&self, id: i64) -> Result<(), ConsultEaseError> {
        with_tx(self, |mut tx| async move {
            let row: Option<(bool,)> = sqlx::query_as("SELECT active FROM admins WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            let currently_active = row
                .ok_or_else(|| ConsultEaseError::NotFound(format!("admin {id}")))?
                .0;

            if currently_active {
                let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admins WHERE active = TRUE")
                    .fetch_one(&mut *tx)
                    .await?;
                if count.0 <= 1 {
                    return Err(ConsultEaseError::Conflict(
                        "cannot deactivate the last active admin".to_string(),
                    ));
                }
            }

            sqlx::query("UPDATE admins SET active = FALSE, updated_at = $1 WHERE id = $2")
                .bind(Utc::now())
                .bind(id)
                .execute(&mut *tx)
                .await?;
            Ok(((), tx))
        })
        .await
    }

    // ---- audit ----

    pub async fn record_audit(
        &self,
        actor_id: Option<i64>,
        actor_name: Option<&str>,
        action: &str,
        resource: Option<&str>,
        details: &str,
        source_addr: Option<&str>,
        outcome: AuditOutcome,
    ) -> Result<(), ConsultEaseError> {
        sqlx::query(
            "INSERT INTO audit_records
               (actor_id, actor_name, action, resource, details, source_addr, outcome, at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(actor_id)
        .bind(actor_name)
        .bind(action)
        .bind(resource)
        .bind(details)
        .bind(source_addr)
        .bind(outcome.as_str())
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_recent_audit(&self, limit: i64) -> Result<Vec<AuditRecord>, ConsultEaseError> {
        let rows: Vec<AuditRecord> = sqlx::query_as(
            "SELECT id, actor_id, actor_name, action, resource, details, source_addr,
                    outcome, at
             FROM audit_records ORDER BY at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
