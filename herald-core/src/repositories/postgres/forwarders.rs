// herald-core/src/repositories/postgres/forwarders.rs

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::warn;

use herald_common::models::{ActiveForwarder, Forwarder, NewForwarderLog};
use herald_common::traits::repository_traits::ForwarderRepository;

use crate::Error;

#[derive(Clone)]
pub struct PostgresForwarderRepository {
    pool: Pool<Postgres>,
}

impl PostgresForwarderRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ForwarderRepository for PostgresForwarderRepository {
    async fn list_active(&self) -> Result<Vec<ActiveForwarder>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT f.forwarder_id, f.user_id, f.name, f.source_server_id,
                   f.source_channel_id, f.source_thread_id, f.destination_server_id,
                   f.destination_channel_id, f.destination_thread_id, f.keywords,
                   f.match_type, f.is_active, f.created_at, f.updated_at,
                   sc.platform_id AS source_channel_platform_id,
                   dc.platform_id AS destination_channel_platform_id
            FROM forwarders f
            LEFT JOIN channels sc ON sc.channel_id = f.source_channel_id
            LEFT JOIN channels dc ON dc.channel_id = f.destination_channel_id
            WHERE f.is_active
            ORDER BY f.forwarder_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            let forwarder_id: i64 = r.try_get("forwarder_id")?;
            let source: Option<String> = r.try_get("source_channel_platform_id")?;
            let destination: Option<String> = r.try_get("destination_channel_platform_id")?;
            let (Some(source_channel_platform_id), Some(destination_channel_platform_id)) =
                (source, destination)
            else {
                warn!(
                    "Forwarder {} references a missing source or destination channel; skipping.",
                    forwarder_id
                );
                continue;
            };

            let match_type: String = r.try_get("match_type")?;
            out.push(ActiveForwarder {
                forwarder: Forwarder {
                    forwarder_id,
                    user_id: r.try_get("user_id")?,
                    name: r.try_get("name")?,
                    source_server_id: r.try_get("source_server_id")?,
                    source_channel_id: r.try_get("source_channel_id")?,
                    source_thread_id: r.try_get("source_thread_id")?,
                    destination_server_id: r.try_get("destination_server_id")?,
                    destination_channel_id: r.try_get("destination_channel_id")?,
                    destination_thread_id: r.try_get("destination_thread_id")?,
                    keywords: r.try_get("keywords")?,
                    match_type: match_type.parse()?,
                    is_active: r.try_get("is_active")?,
                    created_at: r.try_get("created_at")?,
                    updated_at: r.try_get("updated_at")?,
                },
                source_channel_platform_id,
                destination_channel_platform_id,
            });
        }
        Ok(out)
    }

    async fn insert_log(&self, log: &NewForwarderLog) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO forwarder_logs
                (forwarder_id, forwarded_at, original_message, matched_keyword, status, error)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(log.forwarder_id)
        .bind(log.forwarded_at)
        .bind(&log.original_message)
        .bind(&log.matched_keyword)
        .bind(log.status.as_str())
        .bind(&log.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
