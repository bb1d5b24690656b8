use crate::error::{AppError, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
    /// Allowed browser origin; any origin is accepted when unset.
    pub cors_origin: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// TTL of the per-department queue hashes in seconds (default: 86400)
    pub queue_ttl_secs: u64,
    /// Upper bound for a single cache command before falling back to PostgreSQL
    pub command_timeout_ms: u64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Reject tokens of deactivated accounts on every request (default: true)
    pub verify_active_accounts: bool,
    /// How long a confirmed active account is trusted without a lookup
    pub account_check_ttl_secs: u64,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("verify_active_accounts", &self.verify_active_accounts)
            .field("account_check_ttl_secs", &self.account_check_ttl_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Linear wait estimate per position ahead
    pub minutes_per_patient: i64,
    /// Offset of the hospital's local day from UTC, used for daily numbering
    pub utc_offset_minutes: i32,
}

impl QueueConfig {
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            minutes_per_patient: 15,
            utc_offset_minutes: 0,
        }
    }
}

fn required(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Config(format!("{} must be set", key))),
    }
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let queue_defaults = QueueConfig::default();
        let queue = QueueConfig {
            minutes_per_patient: parsed("QUEUE_MINUTES_PER_PATIENT", queue_defaults.minutes_per_patient)?,
            utc_offset_minutes: parsed("HOSPITAL_UTC_OFFSET_MINUTES", queue_defaults.utc_offset_minutes)?,
        };
        if queue.minutes_per_patient <= 0 {
            return Err(AppError::Config(
                "QUEUE_MINUTES_PER_PATIENT must be positive".to_string(),
            ));
        }
        if queue.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(AppError::Config(
                "HOSPITAL_UTC_OFFSET_MINUTES must be within one day".to_string(),
            ));
        }

        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parsed("APP_PORT", 8080)?,
                cors_origin: std::env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty()),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 20)?,
                run_migrations: parsed("RUN_MIGRATIONS", true)?,
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                queue_ttl_secs: parsed("REDIS_QUEUE_TTL_SECS", 86_400)?,
                command_timeout_ms: parsed("REDIS_COMMAND_TIMEOUT_MS", 250)?,
            },
            auth: AuthConfig {
                jwt_secret: required("JWT_SECRET")?,
                verify_active_accounts: parsed("AUTH_VERIFY_ACTIVE_ACCOUNTS", true)?,
                account_check_ttl_secs: parsed("AUTH_ACCOUNT_CHECK_TTL_SECS", 30)?,
            },
            queue,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app.env.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 10] = [
        "DATABASE_URL",
        "JWT_SECRET",
        "APP_PORT",
        "QUEUE_MINUTES_PER_PATIENT",
        "HOSPITAL_UTC_OFFSET_MINUTES",
        "REDIS_QUEUE_TTL_SECS",
        "CORS_ORIGIN",
        "RUN_MIGRATIONS",
        "AUTH_VERIFY_ACTIVE_ACCOUNTS",
        "AUTH_ACCOUNT_CHECK_TTL_SECS",
    ];

    fn reset_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn loads_defaults_with_required_values() {
        reset_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/hospital_test");
        std::env::set_var("JWT_SECRET", "test-secret");

        let config = Config::from_env().unwrap();
        assert_eq!(config.app.port, 8080);
        assert_eq!(config.queue.minutes_per_patient, 15);
        assert_eq!(config.redis.queue_ttl_secs, 86_400);
        assert!(config.database.run_migrations);
        assert!(config.app.cors_origin.is_none());
        assert!(config.auth.verify_active_accounts);
        assert_eq!(config.auth.account_check_ttl_secs, 30);

        reset_env();
    }

    #[test]
    #[serial]
    fn missing_jwt_secret_is_an_error() {
        reset_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/hospital_test");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));

        reset_env();
    }

    #[test]
    #[serial]
    fn invalid_numbers_are_rejected() {
        reset_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/hospital_test");
        std::env::set_var("JWT_SECRET", "test-secret");
        std::env::set_var("APP_PORT", "eighty");

        assert!(Config::from_env().is_err());

        std::env::set_var("APP_PORT", "9000");
        std::env::set_var("QUEUE_MINUTES_PER_PATIENT", "0");
        assert!(Config::from_env().is_err());

        reset_env();
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let auth = AuthConfig {
            jwt_secret: "super-secret".into(),
            verify_active_accounts: true,
            account_check_ttl_secs: 30,
        };
        assert!(!format!("{:?}", auth).contains("super-secret"));
    }

    #[test]
    fn local_offset_uses_minutes() {
        let queue = QueueConfig {
            minutes_per_patient: 15,
            utc_offset_minutes: 330,
        };
        assert_eq!(queue.local_offset().local_minus_utc(), 330 * 60);
    }
}
