// src/core/admin_ops/mod.rs

//! Administrative CRUD for students and faculty, beacon assignment, and
//! first-time setup.
//!
//! Beacon identifier validation/normalization is grounded on the teacher's
//! ACL pattern parser (`core/acl/enforcer.rs::parse_pattern_rule`): a small,
//! fixed-syntax validator rather than a general parser, since a beacon id is
//! either a MAC address or a UUID and nothing else.

use crate::core::audit::{Actor, AuditLog};
use crate::core::auth::password;
use crate::core::errors::ConsultEaseError;
use crate::core::persistence::{Admin, Db, Faculty, Student};
use crate::core::presence::PresenceTracker;
use regex::Regex;
use std::sync::{Arc, LazyLock};

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)([0-9A-F]{2}:){5}[0-9A-F]{2}$").expect("static regex is valid")
});
static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[0-9A-F]{8}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{12}$")
        .expect("static regex is valid")
});

/// Admin create/update/deactivate for students and faculty, plus
/// beacon-assignment and first-time-setup flows. Shares the database and
/// audit log with the rest of the core, and drives the presence tracker's
/// reassignment path when a beacon moves to a different faculty member.
pub struct AdminOps {
    db: Db,
    audit: AuditLog,
    presence: Arc<PresenceTracker>,
    min_password_length: usize,
}

impl AdminOps {
    pub fn new(db: Db, audit: AuditLog, presence: Arc<PresenceTracker>, min_password_length: usize) -> Self {
        Self {
            db,
            audit,
            presence,
            min_password_length,
        }
    }

    // ---- students ----

    pub async fn create_student(
        &self,
        actor: Actor<'_>,
        name: &str,
        department: &str,
        rfid_uid: &str,
    ) -> Result<Student, ConsultEaseError> {
        require_non_empty("name", name)?;
        require_non_empty("department", department)?;
        require_non_empty("rfid_uid", rfid_uid)?;
        let student = self.db.create_student(name, department, rfid_uid).await?;
        self.audit
            .success(actor, "student.create", Some(&student.id.to_string()), name, None)
            .await;
        Ok(student)
    }

    pub async fn update_student(
        &self,
        actor: Actor<'_>,
        id: i64,
        name: &str,
        department: &str,
        rfid_uid: &str,
    ) -> Result<Student, ConsultEaseError> {
        require_non_empty("name", name)?;
        require_non_empty("department", department)?;
        require_non_empty("rfid_uid", rfid_uid)?;
        let student = self.db.update_student(id, name, department, rfid_uid).await?;
        self.audit
            .success(actor, "student.update", Some(&id.to_string()), name, None)
            .await;
        Ok(student)
    }

    pub async fn set_student_active(
        &self,
        actor: Actor<'_>,
        id: i64,
        active: bool,
    ) -> Result<(), ConsultEaseError> {
        self.db.set_student_active(id, active).await?;
        let action = if active { "student.activate" } else { "student.deactivate" };
        self.audit.success(actor, action, Some(&id.to_string()), "", None).await;
        Ok(())
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, ConsultEaseError> {
        self.db.list_students().await
    }

    // ---- faculty ----

    pub async fn create_faculty(
        &self,
        actor: Actor<'_>,
        name: &str,
        department: &str,
        email: &str,
    ) -> Result<Faculty, ConsultEaseError> {
        require_non_empty("name", name)?;
        require_non_empty("department", department)?;
        require_non_empty("email", email)?;
        let faculty = self.db.create_faculty(name, department, email).await?;
        self.audit
            .success(actor, "faculty.create", Some(&faculty.id.to_string()), name, None)
            .await;
        Ok(faculty)
    }

    pub async fn update_faculty(
        &self,
        actor: Actor<'_>,
        id: i64,
        name: &str,
        department: &str,
        email: &str,
        image_ref: Option<&str>,
    ) -> Result<Faculty, ConsultEaseError> {
        require_non_empty("name", name)?;
        require_non_empty("department", department)?;
        require_non_empty("email", email)?;
        let faculty = self.db.update_faculty(id, name, department, email, image_ref).await?;
        self.audit
            .success(actor, "faculty.update", Some(&id.to_string()), name, None)
            .await;
        Ok(faculty)
    }

    pub async fn set_faculty_active(
        &self,
        actor: Actor<'_>,
        id: i64,
        active: bool,
    ) -> Result<(), ConsultEaseError> {
        self.db.set_faculty_active(id, active).await?;
        let action = if active { "faculty.activate" } else { "faculty.deactivate" };
        self.audit.success(actor, action, Some(&id.to_string()), "", None).await;
        Ok(())
    }

    pub async fn set_always_present(
        &self,
        actor: Actor<'_>,
        id: i64,
        always_present: bool,
    ) -> Result<(), ConsultEaseError> {
        self.presence.set_always_present(id, always_present).await?;
        self.audit
            .success(
                actor,
                "faculty.always_present",
                Some(&id.to_string()),
                &always_present.to_string(),
                None,
            )
            .await;
        Ok(())
    }

    pub async fn list_faculty(&self) -> Result<Vec<Faculty>, ConsultEaseError> {
        self.db.list_faculty().await
    }

    /// Validates and normalizes a beacon identifier (MAC uppercased with
    /// colons, or a UUID), then assigns it to `faculty_id`. If the beacon
    /// was previously assigned to a different faculty member, drives the
    /// presence tracker's reassignment tie-break so the old faculty
    /// receives a synthesized `beacon_absent`.
    pub async fn assign_beacon(
        &self,
        actor: Actor<'_>,
        faculty_id: i64,
        raw_beacon_id: &str,
    ) -> Result<(), ConsultEaseError> {
        let normalized = normalize_beacon_id(raw_beacon_id)?;
        self.presence.reassign_beacon(&normalized, faculty_id).await?;
        self.audit
            .success(
                actor,
                "faculty.assign_beacon",
                Some(&faculty_id.to_string()),
                &normalized,
                None,
            )
            .await;
        Ok(())
    }

    // ---- admins ----

    pub async fn create_admin(
        &self,
        actor: Actor<'_>,
        username: &str,
        password: &str,
        force_change: bool,
    ) -> Result<Admin, ConsultEaseError> {
        require_non_empty("username", username)?;
        if self.db.find_admin_by_username(username).await?.is_some() {
            return Err(ConsultEaseError::Conflict(format!(
                "username '{username}' already exists"
            )));
        }
        password::validate_strength(password, self.min_password_length)?;
        let hash = password::hash_password(password)?;
        let admin = self.db.create_admin(username, &hash, force_change).await?;
        self.audit
            .success(actor, "admin.create", Some(&admin.id.to_string()), username, None)
            .await;
        Ok(admin)
    }

    /// Refuses to deactivate the last active admin. Deactivation checks and
    /// applies atomically (see `Db::deactivate_admin_unless_last`);
    /// activation has no such invariant to protect.
    pub async fn set_admin_active(
        &self,
        actor: Actor<'_>,
        id: i64,
        active: bool,
    ) -> Result<(), ConsultEaseError> {
        if active {
            self.db.set_admin_active(id, true).await?;
        } else {
            self.db.deactivate_admin_unless_last(id).await?;
        }
        let action = if active { "admin.activate" } else { "admin.deactivate" };
        self.audit.success(actor, action, Some(&id.to_string()), "", None).await;
        Ok(())
    }

    pub async fn list_admins(&self) -> Result<Vec<Admin>, ConsultEaseError> {
        self.db.list_admins().await
    }

    pub async fn change_admin_password(
        &self,
        actor: Actor<'_>,
        id: i64,
        new_password: &str,
    ) -> Result<(), ConsultEaseError> {
        self.db.get_admin(id).await?; // NotFound before a silent no-op UPDATE
        password::validate_strength(new_password, self.min_password_length)?;
        let hash = password::hash_password(new_password)?;
        self.db.update_admin_password(id, &hash, false).await?;
        self.audit
            .success(actor, "admin.change_password", Some(&id.to_string()), "", None)
            .await;
        Ok(())
    }

    // ---- first-time setup ----

    /// Whether the one-shot "create first admin" entry point is still
    /// available. Disabled once any admin account exists.
    pub async fn first_time_setup_available(&self) -> Result<bool, ConsultEaseError> {
        Ok(self.db.count_admins().await? == 0)
    }

    /// Creates the seed admin account. Refused if an admin already exists,
    /// even if called concurrently with another setup attempt (the unique
    /// index on `admins.username` is the final backstop, but this check
    /// covers the common "already initialized" case with a clearer error).
    pub async fn create_first_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Admin, ConsultEaseError> {
        if !self.first_time_setup_available().await? {
            return Err(ConsultEaseError::Conflict(
                "an admin account already exists; first-time setup is disabled".to_string(),
            ));
        }
        self.create_admin(Actor::none(), username, password, false).await
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConsultEaseError> {
    if value.trim().is_empty() {
        return Err(ConsultEaseError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Validates `raw` as either a MAC address or a UUID and normalizes MACs to
/// uppercase colon form. UUIDs are lowercased (their conventional form).
fn normalize_beacon_id(raw: &str) -> Result<String, ConsultEaseError> {
    let trimmed = raw.trim();
    if MAC_PATTERN.is_match(trimmed) {
        return Ok(trimmed.to_uppercase());
    }
    if UUID_PATTERN.is_match(trimmed) {
        return Ok(trimmed.to_lowercase());
    }
    Err(ConsultEaseError::Validation(format!(
        "'{raw}' is not a valid MAC address or UUID beacon identifier"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_mac_to_uppercase_colon_form() {
        assert_eq!(
            normalize_beacon_id("aa:bb:cc:dd:ee:ff").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
    }

    #[test]
    fn normalizes_uuid_to_lowercase() {
        assert_eq!(
            normalize_beacon_id("550E8400-E29B-41D4-A716-446655440000").unwrap(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn rejects_malformed_beacon_id() {
        assert!(normalize_beacon_id("not-a-beacon").is_err());
        assert!(normalize_beacon_id("aa:bb:cc:dd:ee").is_err());
    }
}
