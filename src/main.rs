// src/main.rs

//! Entry point and operator CLI: starts the central coordination server by
//! default, or runs one of the two narrow one-shot modes (hardware
//! self-check, first-admin creation) that an operator invokes by hand
//! before the server is trusted with real traffic.
//!
//! Argument parsing is manual `env::args()` matching, not a dedicated
//! parsing crate, the same choice the teacher makes for its own handful of
//! flags.

use consultease::config::Config;
use consultease::core::admin_ops::AdminOps;
use consultease::core::audit::AuditLog;
use consultease::core::errors::ConsultEaseError;
use consultease::core::events::EventBus;
use consultease::core::persistence::Db;
use consultease::core::presence::PresenceTracker;
use consultease::core::rfid;
use consultease::server;
use std::env;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

/// Exit codes per the operator CLI contract: 0 success, 2 config error,
/// 3 persistence unavailable, 4 hardware self-check failed.
mod exit_code {
    pub const CONFIG_ERROR: i32 = 2;
    pub const PERSISTENCE_UNAVAILABLE: i32 = 3;
    pub const SELF_CHECK_FAILED: i32 = 4;
    pub const GENERIC_ERROR: i32 = 1;
}

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("consultease {VERSION}");
        return;
    }

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.json");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration from '{config_path}': {e}");
            std::process::exit(exit_code::CONFIG_ERROR);
        }
    };

    let code = match args.get(1).map(String::as_str) {
        Some("self-check") => run_self_check(&config),
        Some("create-first-admin") => run_create_first_admin(&config).await,
        _ => run_server(config).await,
    };
    std::process::exit(code);
}

/// Default mode: boots the coordinator and serves until a shutdown signal.
async fn run_server(config: Config) -> i32 {
    let initial_log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.server.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();
    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config, reload_handle).await {
        error!("server runtime error: {e:#}");
        if error_is_persistence(&e) {
            return exit_code::PERSISTENCE_UNAVAILABLE;
        }
        return exit_code::GENERIC_ERROR;
    }
    0
}

/// Whether `e`'s cause chain bottoms out in a persistence-layer failure,
/// distinguishing "the database is unreachable" from any other fatal
/// startup error so the operator gets exit code 3, not a generic 1.
fn error_is_persistence(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ConsultEaseError>(),
            Some(ConsultEaseError::Transient(_) | ConsultEaseError::Database(_))
        )
    })
}

/// Reports whether a usable RFID reader is reachable (or simulation mode
/// covers its absence) without starting the full server. The only
/// hardware this core coordinates directly; desk-unit and beacon health
/// are the external collaborators' concern.
fn run_self_check(config: &Config) -> i32 {
    tracing_subscriber::fmt().with_ansi(true).init();
    match rfid::self_check(&config.rfid) {
        Ok(msg) => {
            println!("OK: {msg}");
            0
        }
        Err(reason) => {
            eprintln!("FAILED: {reason}");
            exit_code::SELF_CHECK_FAILED
        }
    }
}

/// One-shot seed-admin creation. Refused once any admin account exists.
/// Reads username/password from stdin; there is no terminal-masking crate
/// in this dependency set, matching the teacher's preference for a small
/// number of well-justified third-party crates over one for every
/// convenience.
async fn run_create_first_admin(config: &Config) -> i32 {
    tracing_subscriber::fmt().with_ansi(true).init();

    let db = match Db::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("failed to connect to the persistence layer: {e}");
            return exit_code::PERSISTENCE_UNAVAILABLE;
        }
    };
    let audit = AuditLog::new(db.clone());
    let events = EventBus::new();
    let presence = PresenceTracker::new(db.clone(), events, config.presence.clone());
    let admin_ops = AdminOps::new(db, audit, presence, config.security.min_password_length);

    match admin_ops.first_time_setup_available().await {
        Ok(true) => {}
        Ok(false) => {
            eprintln!("an admin account already exists; first-time setup is disabled");
            return exit_code::GENERIC_ERROR;
        }
        Err(e) => {
            eprintln!("failed to check existing admin accounts: {e}");
            return exit_code::PERSISTENCE_UNAVAILABLE;
        }
    }

    let username = match prompt("admin username: ") {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to read username: {e}");
            return exit_code::GENERIC_ERROR;
        }
    };
    let password = match prompt("admin password: ") {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to read password: {e}");
            return exit_code::GENERIC_ERROR;
        }
    };

    match admin_ops.create_first_admin(&username, &password).await {
        Ok(admin) => {
            println!("created first admin account '{}'", admin.username);
            0
        }
        Err(e) => {
            eprintln!("failed to create first admin: {e}");
            exit_code::GENERIC_ERROR
        }
    }
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
