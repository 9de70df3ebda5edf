// src/core/secure_store.rs

//! At-rest encryption for sensitive configuration fields.
//!
//! A master secret (32 random bytes) is generated on first run and persisted
//! with owner-only permissions. A key is derived from it with PBKDF2-HMAC-SHA256
//! (100,000 iterations, a fixed application-level salt) and used to seal the
//! JSON document with AES-256-GCM. Only the dotted keys named by the caller
//! are encrypted; everything else is stored in the clear so the file stays
//! diffable and debuggable.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result, anyhow};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use std::fs;
use std::path::{Path, PathBuf};

const KEY_FILE_NAME: &str = ".consultease_key";
const PBKDF2_ITERATIONS: u32 = 100_000;
const PBKDF2_SALT: &[u8] = b"consultease_salt";
const NONCE_LEN: usize = 12;

pub struct SecureStore {
    key: [u8; 32],
}

impl SecureStore {
    /// Loads the master secret from `.consultease_key` in the current
    /// directory, generating and persisting one (mode 0600) if absent.
    pub fn open_default() -> Result<Self> {
        Self::open(Path::new(KEY_FILE_NAME))
    }

    pub fn open(key_path: &Path) -> Result<Self> {
        let master = if key_path.exists() {
            let raw = fs::read(key_path)
                .with_context(|| format!("failed to read master key at {key_path:?}"))?;
            if raw.len() != 32 {
                return Err(anyhow!("master key at {key_path:?} is not 32 bytes"));
            }
            raw
        } else {
            let mut bytes = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            fs::write(key_path, &bytes)
                .with_context(|| format!("failed to persist master key at {key_path:?}"))?;
            set_owner_only(key_path)?;
            bytes
        };

        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(&master, PBKDF2_SALT, PBKDF2_ITERATIONS, &mut key);
        Ok(Self { key })
    }

    /// Decrypts the sensitive fields named in `sensitive_keys` from the blob
    /// at `path`. Returns `Ok(None)` if the file does not exist.
    pub fn load_encrypted(&self, path: &Path, sensitive_keys: &[&str]) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
        let envelope: Envelope =
            serde_json::from_slice(&raw).with_context(|| format!("malformed envelope at {path:?}"))?;

        let mut doc = envelope.document;
        for key in sensitive_keys {
            if let Some(sealed) = get_str_at(&doc, key) {
                let plain = self.decrypt_value(sealed)?;
                set_str_at(&mut doc, key, plain);
            }
        }
        Ok(Some(doc))
    }

    /// Encrypts the fields named in `sensitive_keys` within `doc` and writes
    /// the envelope to `path` with owner-only permissions.
    pub fn save_encrypted(&self, path: &Path, doc: &Value, sensitive_keys: &[&str]) -> Result<()> {
        let mut doc = doc.clone();
        for key in sensitive_keys {
            if let Some(plain) = get_str_at(&doc, key) {
                let sealed = self.encrypt_value(plain)?;
                set_str_at(&mut doc, key, sealed);
            }
        }
        let envelope = Envelope { document: doc };
        let serialized = serde_json::to_vec_pretty(&envelope)?;
        fs::write(path, serialized).with_context(|| format!("failed to write {path:?}"))?;
        set_owner_only(path)?;
        Ok(())
    }

    /// Encrypts a single string value, returning a base64 `nonce || ciphertext` blob.
    pub fn encrypt_value(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("encryption failure"))?;
        let mut out = nonce_bytes.to_vec();
        out.extend(ciphertext);
        Ok(hex::encode(out))
    }

    /// Decrypts a blob produced by [`Self::encrypt_value`].
    pub fn decrypt_value(&self, sealed: &str) -> Result<String> {
        let raw = hex::decode(sealed).context("sealed value is not valid hex")?;
        if raw.len() < NONCE_LEN {
            return Err(anyhow!("sealed value too short"));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow!("decryption failure: wrong key or corrupted value"))?;
        String::from_utf8(plain).context("decrypted value is not valid UTF-8")
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope {
    document: Value,
}

fn get_str_at<'a>(doc: &'a Value, dotted_key: &str) -> Option<&'a str> {
    let mut cur = doc;
    for part in dotted_key.split('.') {
        cur = cur.get(part)?;
    }
    cur.as_str()
}

fn set_str_at(doc: &mut Value, dotted_key: &str, value: String) {
    let parts: Vec<&str> = dotted_key.split('.').collect();
    let mut cur = doc;
    for part in &parts[..parts.len() - 1] {
        cur = cur
            .as_object_mut()
            .map(|m| m.entry(part.to_string()).or_insert(Value::Object(Default::default())))
            .unwrap_or(cur);
    }
    if let Some(obj) = cur.as_object_mut() {
        obj.insert(parts[parts.len() - 1].to_string(), Value::String(value));
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, perms)
        .with_context(|| format!("failed to set permissions on {path:?}"))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}

#[allow(dead_code)]
fn key_file_path() -> PathBuf {
    PathBuf::from(KEY_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecureStore::open(&dir.path().join(KEY_FILE_NAME)).unwrap();
        let sealed = store.encrypt_value("hunter2").unwrap();
        assert_ne!(sealed, "hunter2");
        assert_eq!(store.decrypt_value(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn round_trips_a_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecureStore::open(&dir.path().join(KEY_FILE_NAME)).unwrap();
        let doc = serde_json::json!({
            "database": { "password": "secret", "host": "localhost" }
        });
        let path = dir.path().join("config_secure.enc");
        store
            .save_encrypted(&path, &doc, &["database.password"])
            .unwrap();
        let loaded = store
            .load_encrypted(&path, &["database.password"])
            .unwrap()
            .unwrap();
        assert_eq!(loaded["database"]["password"], "secret");
        assert_eq!(loaded["database"]["host"], "localhost");
    }
}
