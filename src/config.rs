//! Application configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is honored when present; real
//! environment variables win. Everything has a development default so the
//! binary starts against a local stack with no setup.

use std::fmt::Debug;
use std::str::FromStr;

use tracing::info;

use crate::error::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct Config {
    pub db_host: String,
    pub db_port: String,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    /// Schema version the bundled migrations are expected to land on.
    pub db_version: i64,
    /// Whether to apply pending migrations on startup.
    pub db_migrate: bool,
    /// Deadline for the startup connection test. The database may take
    /// longer to come up than we do, so we keep pinging until this expires.
    pub db_conn_timeout_seconds: u64,
    pub client_username: String,
    pub client_token: String,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        // Missing .env is fine; containers inject real environment variables.
        let _ = dotenvy::dotenv();

        let cfg = Self {
            db_host: env_or("DB_HOST", "127.0.0.1"),
            db_port: env_or("DB_PORT", "5200"),
            db_user: env_or("DB_USER", "tracker"),
            db_password: env_or("DB_PASSWORD", "unsafepassword"),
            db_name: env_or("DB_NAME", "tracker"),
            db_version: env_parse("DB_VERSION", 1)?,
            db_migrate: env_parse("DB_MIGRATE", false)?,
            db_conn_timeout_seconds: env_parse("DB_CONN_TIMEOUT_SECONDS", 20)?,
            client_username: env_or("CLIENT_USERNAME", "username"),
            client_token: env_or("CLIENT_TOKEN", "invalid_token"),
        };

        info!(
            db_host = %cfg.db_host,
            db_port = %cfg.db_port,
            db_name = %cfg.db_name,
            db_migrate = cfg.db_migrate,
            client_username = %cfg.client_username,
            "configuration loaded"
        );
        Ok(cfg)
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
    T::Err: Debug,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| Error::ParseEnv(key.to_string())),
        Err(_) => Ok(default),
    }
}
