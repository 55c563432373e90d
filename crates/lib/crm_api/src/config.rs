//! API server configuration.

use std::time::Duration;

use crm_core::auth::jwt::resolve_jwt_secret;
use crm_core::lifecycle::{MAX_RETENTION_DAYS, RETENTION_DAYS, retention_days};
use tracing::warn;

/// Default interval between scheduled archival runs: 24 hours.
pub const DEFAULT_ARCHIVE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Days a deactivated user is kept before archival.
    pub retention_days: i64,
    /// Interval between scheduled archival runs.
    pub archive_interval: Duration,
    /// Mark the session cookie `Secure` (HTTPS deployments).
    pub cookie_secure: bool,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                 | Default                             |
    /// |--------------------------|-------------------------------------|
    /// | `BIND_ADDR`              | `127.0.0.1:3100`                    |
    /// | `DATABASE_URL`           | `postgres://localhost:5432/crm`     |
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file   |
    /// | `ARCHIVE_RETENTION_DAYS` | `60` (1 to 36500)                   |
    /// | `ARCHIVE_INTERVAL_SECS`  | `86400`                             |
    /// | `COOKIE_SECURE`          | `false`                             |
    ///
    /// Unparsable or out-of-range values are logged and replaced by the
    /// default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let retention = match parse(&get, "ARCHIVE_RETENTION_DAYS") {
            Some(days) => match retention_days(days) {
                Ok(_) => days,
                Err(e) => {
                    warn!(error = %e, "ignoring ARCHIVE_RETENTION_DAYS");
                    RETENTION_DAYS
                }
            },
            None => RETENTION_DAYS,
        };
        let archive_interval = match parse::<u64>(&get, "ARCHIVE_INTERVAL_SECS") {
            Some(0) => {
                warn!("ignoring ARCHIVE_INTERVAL_SECS=0");
                DEFAULT_ARCHIVE_INTERVAL
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_ARCHIVE_INTERVAL,
        };
        let jwt_secret = get("JWT_SECRET")
            .or_else(|| get("AUTH_SECRET"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(resolve_jwt_secret);

        Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:3100".into()),
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost:5432/crm".into()),
            jwt_secret,
            retention_days: retention,
            archive_interval,
            cookie_secure: parse(&get, "COOKIE_SECURE").unwrap_or(false),
        }
    }

    /// Configuration with defaults and the given JWT secret. No environment
    /// lookups; used by tests and embedders.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            database_url: "postgres://localhost:5432/crm".into(),
            jwt_secret: jwt_secret.into(),
            retention_days: RETENTION_DAYS,
            archive_interval: DEFAULT_ARCHIVE_INTERVAL,
            cookie_secure: false,
        }
    }

    /// Retention window as a `chrono` duration. `retention_days` is clamped
    /// to `1..=MAX_RETENTION_DAYS`.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days.clamp(1, MAX_RETENTION_DAYS))
    }
}

fn parse<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> ApiConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn with_secret_uses_defaults() {
        let config = ApiConfig::with_secret("s");
        assert_eq!(config.jwt_secret, "s");
        assert_eq!(config.retention(), chrono::Duration::days(60));
        assert_eq!(config.archive_interval, DEFAULT_ARCHIVE_INTERVAL);
        assert!(!config.cookie_secure);
    }

    #[test]
    fn variables_override_defaults() {
        let config = lookup(&[
            ("JWT_SECRET", "from-env"),
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("ARCHIVE_RETENTION_DAYS", "30"),
            ("ARCHIVE_INTERVAL_SECS", "600"),
            ("COOKIE_SECURE", "true"),
        ]);
        assert_eq!(config.jwt_secret, "from-env");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.archive_interval, Duration::from_secs(600));
        assert!(config.cookie_secure);
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        for days in ["0", "100000000", "sixty"] {
            let config = lookup(&[
                ("JWT_SECRET", "s"),
                ("ARCHIVE_RETENTION_DAYS", days),
                ("ARCHIVE_INTERVAL_SECS", "0"),
            ]);
            assert_eq!(config.retention_days, RETENTION_DAYS, "{days}");
            assert_eq!(config.archive_interval, DEFAULT_ARCHIVE_INTERVAL);
        }
    }

    #[test]
    fn retention_is_clamped() {
        let mut config = ApiConfig::with_secret("s");
        config.retention_days = 100_000_000;
        assert_eq!(
            config.retention(),
            chrono::Duration::days(MAX_RETENTION_DAYS)
        );
        config.retention_days = -5;
        assert_eq!(config.retention(), chrono::Duration::days(1));
    }
}
