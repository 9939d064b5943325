// src/storage/postgres.rs

use async_trait::async_trait;
use sqlx::PgPool;

use super::Driver;
use crate::error::Error;
use crate::models::{Broadcaster, PersistRecord};

/// Relational driver. All writes arrive through the batching path; one
/// transaction per batch.
pub struct PostgresDriver {
    pool: PgPool,
}

impl PostgresDriver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn insert_batch(&self, records: &[PersistRecord]) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO moderation
                    (kind, username, channel_name, channel_id, duration, at, messages, sub)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(record.kind.as_str())
            .bind(&record.username)
            .bind(&record.channel)
            .bind(record.channel_id)
            .bind(record.duration)
            .bind(record.at)
            .bind(&record.messages)
            .bind(record.subscribed.as_db())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn channels(&self) -> Result<Vec<Broadcaster>, Error> {
        let broadcasters = sqlx::query_as::<_, Broadcaster>(
            "SELECT id, name, lang FROM broadcaster ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(broadcasters)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
