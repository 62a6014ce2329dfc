//! Test fixture utilities.

use std::sync::atomic::{AtomicU32, Ordering};

use pgmux_client::Config;

static NEXT_NAME: AtomicU32 = AtomicU32::new(1);

/// Build a client configuration for a real server from the environment.
///
/// Reads `PG_HOST`, `PG_PORT`, `PG_USER`, `PG_PASSWORD` and `PG_DATABASE`.
/// Returns `None` when `PG_HOST` is unset, so tests can skip themselves.
#[must_use]
pub fn postgres_config_from_env() -> Option<Config> {
    let host = std::env::var("PG_HOST").ok()?;
    let mut config = Config::new().host(host);

    if let Some(port) = std::env::var("PG_PORT").ok().and_then(|p| p.parse().ok()) {
        config = config.port(port);
    }
    if let Ok(user) = std::env::var("PG_USER") {
        config = config.user(user);
    }
    if let Ok(password) = std::env::var("PG_PASSWORD") {
        config = config.password(password);
    }
    if let Ok(database) = std::env::var("PG_DATABASE") {
        config = config.database(database);
    }
    Some(config)
}

/// A channel or table name unique within the test process.
#[must_use]
pub fn unique_name(prefix: &str) -> String {
    let n = NEXT_NAME.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}
