// src/core/auth/password.rs

//! Password hashing and strength policy.
//!
//! New hashes use argon2 (already the teacher's dependency for ACL user
//! secrets). A legacy salted-SHA256 verification path exists so accounts
//! created under the original scheme keep working; a successful legacy
//! verification transparently rehashes to argon2.

use crate::core::errors::ConsultEaseError;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use argon2::Argon2;
use hmac::{Hmac, Mac};
use sha2::Sha256;

const LEGACY_PREFIX: &str = "sha256$";

/// Thresholds lifted from the original admin model's password policy.
const WEAK_FRAGMENTS: &[&str] = &["123", "abc", "qwerty", "password", "admin"];

pub fn hash_password(password: &str) -> Result<String, ConsultEaseError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string();
    Ok(hash)
}

/// Verifies `password` against `stored`, transparently handling the legacy
/// `sha256$<salt>$<digest>` format. Returns `(matches, needs_rehash)`.
pub fn verify_password(password: &str, stored: &str) -> Result<(bool, bool), ConsultEaseError> {
    if let Some(rest) = stored.strip_prefix(LEGACY_PREFIX) {
        let mut parts = rest.splitn(2, '$');
        let salt = parts.next().unwrap_or_default();
        let expected_digest = parts.next().unwrap_or_default();
        let matches = legacy_sha256_digest(password, salt) == expected_digest;
        return Ok((matches, matches));
    }

    let parsed = PasswordHash::new(stored).map_err(ConsultEaseError::from)?;
    let matches = Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok();
    Ok((matches, false))
}

fn legacy_sha256_digest(password: &str, salt: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC accepts any key length");
    mac.update(password.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Password strength policy: length, character-class mix, and a guard
/// against passwords dominated by a well-known weak fragment.
pub fn validate_strength(password: &str, min_length: usize) -> Result<(), ConsultEaseError> {
    if password.len() < min_length {
        return Err(ConsultEaseError::Validation(format!(
            "password must be at least {min_length} characters"
        )));
    }
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| c.is_ascii_punctuation());

    if !(has_upper && has_lower && has_digit) {
        return Err(ConsultEaseError::Validation(
            "password must contain uppercase, lowercase, and digit characters".to_string(),
        ));
    }
    if !has_special {
        return Err(ConsultEaseError::Validation(
            "password must contain a special character".to_string(),
        ));
    }

    let lower = password.to_lowercase();
    for fragment in WEAK_FRAGMENTS {
        if lower.contains(fragment) && fragment.len() * 2 > password.len() {
            return Err(ConsultEaseError::Validation(format!(
                "password is too similar to the common pattern '{fragment}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_verifies_round_trip() {
        let hash = hash_password("Tr0ub4dor&3").unwrap();
        let (matches, needs_rehash) = verify_password("Tr0ub4dor&3", &hash).unwrap();
        assert!(matches);
        assert!(!needs_rehash);
    }

    #[test]
    fn verifies_legacy_hash_and_flags_rehash() {
        let salt = "somesalt";
        let digest = legacy_sha256_digest("Tr0ub4dor&3", salt);
        let stored = format!("{LEGACY_PREFIX}{salt}${digest}");
        let (matches, needs_rehash) = verify_password("Tr0ub4dor&3", &stored).unwrap();
        assert!(matches);
        assert!(needs_rehash);
    }

    #[test]
    fn rejects_weak_passwords() {
        assert!(validate_strength("password", 8).is_err());
        assert!(validate_strength("Password1!", 8).is_ok());
        assert!(validate_strength("short1!", 8).is_err());
    }
}
