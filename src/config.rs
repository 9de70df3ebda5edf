// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.
//!
//! Load order mirrors the original ConsultEase deployment: built-in defaults are
//! overlaid by an encrypted config blob (if one unlocks), then by a plain JSON
//! file, then by environment variables. Sensitive fields never round-trip to
//! disk in the clear once a master secret is available; see
//! [`crate::core::secure_store`].

use crate::core::secure_store::SecureStore;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SENSITIVE_KEYS: &[&str] = &[
    "database.password",
    "broker.password",
    "security.secret_key",
    "email.password",
    "api.secret_key",
];

/// Raw, directly-deserialized configuration document. Every field has a
/// default so a partial file or an empty document both produce a usable
/// config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub security: SecurityConfig,
    pub presence: PresenceConfig,
    pub consultation: ConsultationConfig,
    pub rfid: RfidConfig,
    pub email: EmailConfig,
    pub api: ApiConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            broker: BrokerConfig::default(),
            security: SecurityConfig::default(),
            presence: PresenceConfig::default(),
            consultation: ConsultationConfig::default(),
            rfid: RfidConfig::default(),
            email: EmailConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub edge_api_port: u16,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            edge_api_port: 8420,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_timeout_secs: u64,
    pub pool_recycle_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: DatabaseKind::Sqlite,
            host: "localhost".to_string(),
            port: 5432,
            name: "consultease".to_string(),
            user: String::new(),
            password: String::new(),
            pool_size: 5,
            max_overflow: 10,
            pool_timeout_secs: 30,
            pool_recycle_secs: 1800,
        }
    }
}

impl DatabaseConfig {
    /// The sqlx connection string for this database's configured kind.
    pub fn connection_string(&self) -> String {
        match self.kind {
            DatabaseKind::Sqlite => format!("sqlite://{}.db?mode=rwc", self.name),
            DatabaseKind::Postgres => {
                let auth = if self.user.is_empty() {
                    String::new()
                } else {
                    format!("{}:{}@", self.user, self.password)
                };
                format!(
                    "postgres://{auth}{}:{}/{}",
                    self.host, self.port, self.name
                )
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub outbound_queue_capacity: usize,
    pub batch_max_messages: usize,
    pub batch_max_delay_ms: u64,
    pub initial_reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            use_tls: false,
            username: String::new(),
            password: String::new(),
            client_id: "central_system".to_string(),
            outbound_queue_capacity: 1024,
            batch_max_messages: 32,
            batch_max_delay_ms: 50,
            initial_reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub min_password_length: usize,
    pub password_lockout_threshold: u32,
    pub password_lockout_duration_secs: u64,
    pub session_timeout_secs: u64,
    pub password_rotation_days: i64,
    /// Signing/derivation secret for CSRF tokens and similar. Always encrypted at rest.
    pub secret_key: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            min_password_length: 8,
            password_lockout_threshold: 5,
            password_lockout_duration_secs: 900,
            session_timeout_secs: 1800,
            password_rotation_days: 90,
            secret_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub grace_period_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsultationConfig {
    pub reattempt_interval_secs: u64,
    pub max_dispatch_attempts: u32,
    pub max_request_text_len: usize,
}

impl Default for ConsultationConfig {
    fn default() -> Self {
        Self {
            reattempt_interval_secs: 20,
            max_dispatch_attempts: 5,
            max_request_text_len: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RfidConfig {
    pub device_path: Option<String>,
    pub simulation_mode: bool,
    pub target_vid: String,
    pub target_pid: String,
    pub debounce_ms: u64,
    pub dedup_window_ms: u64,
}

impl Default for RfidConfig {
    fn default() -> Self {
        Self {
            device_path: None,
            simulation_mode: false,
            target_vid: "ffff".to_string(),
            target_pid: "0035".to_string(),
            debounce_ms: 1000,
            dedup_window_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// SMTP auth secret. Always encrypted at rest.
    pub password: String,
    pub from_address: String,
    pub use_tls: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            use_tls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Signing secret for the edge API's bearer/session tokens. Always
    /// encrypted at rest.
    pub secret_key: String,
    pub token_ttl_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            token_ttl_secs: 3600,
        }
    }
}

/// The final, validated, resolved server configuration. Distinct from
/// `RawConfig` so call sites never see an un-validated document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub security: SecurityConfig,
    pub presence: PresenceConfig,
    pub consultation: ConsultationConfig,
    pub rfid: RfidConfig,
    pub email: EmailConfig,
    pub api: ApiConfig,
}

impl Default for Config {
    fn default() -> Self {
        let raw = RawConfig::default();
        Self {
            server: raw.server,
            database: raw.database,
            broker: raw.broker,
            security: raw.security,
            presence: raw.presence,
            consultation: raw.consultation,
            rfid: raw.rfid,
            email: raw.email,
            api: raw.api,
        }
    }
}

impl Config {
    /// Loads configuration using the full layered chain: defaults, then the
    /// encrypted blob next to `path` if present and unlockable, then the
    /// plain file at `path`, then environment variable overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let mut raw = RawConfig::default();

        let store = SecureStore::open_default()?;
        let encrypted_path = Self::encrypted_sibling(path);
        match store.load_encrypted(&encrypted_path, SENSITIVE_KEYS) {
            Ok(Some(doc)) => {
                merge_json(&mut raw, doc)?;
                info!("loaded configuration from encrypted store at {encrypted_path:?}");
            }
            Ok(None) => {
                Self::load_plain(path, &mut raw)?;
            }
            Err(e) => {
                warn!("failed to load encrypted configuration: {e}; falling back to plain file");
                Self::load_plain(path, &mut raw)?;
            }
        }

        Self::override_from_env(&mut raw);

        let config = Config {
            server: raw.server,
            database: raw.database,
            broker: raw.broker,
            security: raw.security,
            presence: raw.presence,
            consultation: raw.consultation,
            rfid: raw.rfid,
            email: raw.email,
            api: raw.api,
        };
        config.validate()?;
        Ok(config)
    }

    fn encrypted_sibling(path: &str) -> PathBuf {
        let p = Path::new(path);
        let dir = p.parent().unwrap_or_else(|| Path::new("."));
        dir.join("config_secure.enc")
    }

    fn load_plain(path: &str, raw: &mut RawConfig) -> Result<()> {
        let candidates = [
            env::var("CONSULTEASE_CONFIG").ok(),
            Some(path.to_string()),
            Some("config.json".to_string()),
        ];
        for candidate in candidates.into_iter().flatten() {
            if Path::new(&candidate).exists() {
                let contents = std::fs::read_to_string(&candidate)
                    .with_context(|| format!("failed to read config file at '{candidate}'"))?;
                let doc: serde_json::Value = serde_json::from_str(&contents)
                    .with_context(|| format!("failed to parse JSON from '{candidate}'"))?;
                merge_json(raw, doc)?;
                info!("loaded configuration from {candidate}");
                return Ok(());
            }
        }
        warn!("no configuration file found, using defaults");
        Ok(())
    }

    fn override_from_env(raw: &mut RawConfig) {
        if let Ok(v) = env::var("DB_TYPE") {
            raw.database.kind = match v.to_lowercase().as_str() {
                "postgres" | "postgresql" => DatabaseKind::Postgres,
                _ => DatabaseKind::Sqlite,
            };
        }
        if let Ok(v) = env::var("DB_HOST") {
            raw.database.host = v;
        }
        if let Ok(v) = env::var("DB_PORT")
            && let Ok(p) = v.parse()
        {
            raw.database.port = p;
        }
        if let Ok(v) = env::var("DB_NAME") {
            raw.database.name = v;
        }
        if let Ok(v) = env::var("DB_USER") {
            raw.database.user = v;
        }
        if let Ok(v) = env::var("DB_PASSWORD") {
            raw.database.password = v;
        }
        if let Ok(v) = env::var("DB_POOL_SIZE")
            && let Ok(p) = v.parse()
        {
            raw.database.pool_size = p;
        }
        if let Ok(v) = env::var("DB_MAX_OVERFLOW")
            && let Ok(p) = v.parse()
        {
            raw.database.max_overflow = p;
        }
        if let Ok(v) = env::var("MQTT_BROKER_HOST") {
            raw.broker.host = v;
        }
        if let Ok(v) = env::var("MQTT_BROKER_PORT")
            && let Ok(p) = v.parse()
        {
            raw.broker.port = p;
        }
        if let Ok(v) = env::var("MQTT_USERNAME") {
            raw.broker.username = v;
        }
        if let Ok(v) = env::var("MQTT_PASSWORD") {
            raw.broker.password = v;
        }
        if let Ok(v) = env::var("SMTP_PASSWORD") {
            raw.email.password = v;
        }
        if let Ok(v) = env::var("API_SECRET_KEY") {
            raw.api.secret_key = v;
        }
        if let Ok(v) = env::var("RFID_DEVICE_PATH") {
            raw.rfid.device_path = Some(v);
        }
        if let Ok(v) = env::var("RFID_SIMULATION_MODE") {
            raw.rfid.simulation_mode = matches!(v.to_lowercase().as_str(), "true" | "yes" | "1");
        }
    }

    /// Validates the resolved configuration for logical consistency.
    fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(anyhow!("server.host cannot be empty"));
        }
        if self.server.edge_api_port == 0 {
            return Err(anyhow!("server.edge_api_port cannot be 0"));
        }
        if self.database.name.trim().is_empty() {
            return Err(anyhow!("database.name cannot be empty"));
        }
        if self.database.pool_size == 0 {
            return Err(anyhow!("database.pool_size cannot be 0"));
        }
        if self.broker.host.trim().is_empty() {
            return Err(anyhow!("broker.host cannot be empty"));
        }
        if self.broker.port == 0 {
            return Err(anyhow!("broker.port cannot be 0"));
        }
        if self.security.min_password_length < 8 {
            return Err(anyhow!("security.min_password_length must be at least 8"));
        }
        if self.security.password_lockout_threshold == 0 {
            return Err(anyhow!(
                "security.password_lockout_threshold cannot be 0"
            ));
        }
        if self.presence.grace_period_secs == 0 {
            warn!("presence.grace_period_secs is 0: beacons will be treated as absent instantly");
        }
        if self.consultation.max_dispatch_attempts == 0 {
            return Err(anyhow!(
                "consultation.max_dispatch_attempts cannot be 0"
            ));
        }
        Ok(())
    }

    /// Persists the configuration, encrypting the fields named in
    /// `SENSITIVE_KEYS`, to the encrypted sibling of `path`.
    pub fn save_encrypted(&self, path: &str) -> Result<()> {
        let store = SecureStore::open_default()?;
        let doc = serde_json::to_value(self)?;
        let encrypted_path = Self::encrypted_sibling(path);
        store.save_encrypted(&encrypted_path, &doc, SENSITIVE_KEYS)
    }
}

/// Recursively merges a JSON document onto a `RawConfig` by round-tripping
/// through `serde_json::Value`, so a partial document (only the keys an
/// operator cares to override) still produces a fully-populated config.
fn merge_json(raw: &mut RawConfig, overlay: serde_json::Value) -> Result<()> {
    let mut base = serde_json::to_value(&*raw)?;
    deep_merge(&mut base, overlay);
    *raw = serde_json::from_value(base)?;
    Ok(())
}

fn deep_merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                deep_merge(base_map.entry(k).or_insert(serde_json::Value::Null), v);
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}
