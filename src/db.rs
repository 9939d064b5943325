// src/db.rs

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::time::{interval, timeout, Duration};
use tracing::info;

use crate::config::Config;
use crate::error::Error;

/// Postgres handle owned by the storage layer and closed through its
/// shutdown.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open a pool and wait for the backend to accept connections. The
    /// database may take longer to initialize than we do, so the connection
    /// test retries every second until `DB_CONN_TIMEOUT_SECONDS` expires;
    /// exceeding the deadline is fatal.
    pub async fn connect(cfg: &Config) -> Result<Self, Error> {
        info!("validating database connection...");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&cfg.database_url())?;
        info!("  ✓ database parameters");
        let db = Self { pool };

        info!("testing database connection...");
        db.ping_until(Duration::from_secs(cfg.db_conn_timeout_seconds))
            .await?;
        info!("  ✓ database connection");
        Ok(db)
    }

    async fn ping_until(&self, deadline: Duration) -> Result<(), Error> {
        let attempts = async {
            let mut tick = interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                if sqlx::query("SELECT 1").execute(&self.pool).await.is_ok() {
                    return;
                }
            }
        };
        timeout(deadline, attempts)
            .await
            .map_err(|_| Error::DbConnTimeout)
    }

    /// Apply the bundled migrations. Running against an up-to-date schema is
    /// a no-op, not an error.
    pub async fn migrate(&self, expected_version: i64) -> Result<(), Error> {
        info!("applying migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("  ✓ database is up to date - v{}", expected_version);
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
