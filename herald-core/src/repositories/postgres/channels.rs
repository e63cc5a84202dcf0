// herald-core/src/repositories/postgres/channels.rs

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use herald_common::models::{Channel, NewChannel};
use herald_common::traits::repository_traits::ChannelRepository;

use crate::Error;

#[derive(Clone)]
pub struct PostgresChannelRepository {
    pool: Pool<Postgres>,
}

impl PostgresChannelRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_channel(r: &PgRow) -> Result<Channel, Error> {
    let kind: String = r.try_get("kind")?;
    Ok(Channel {
        channel_id: r.try_get("channel_id")?,
        platform_id: r.try_get("platform_id")?,
        server_id: r.try_get("server_id")?,
        name: r.try_get("name")?,
        kind: kind.parse()?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

#[async_trait]
impl ChannelRepository for PostgresChannelRepository {
    async fn list_for_server(&self, server_id: i64) -> Result<Vec<Channel>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, platform_id, server_id, name, kind, created_at, updated_at
            FROM channels
            WHERE server_id = $1
            ORDER BY name
            "#,
        )
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_channel).collect()
    }

    async fn get_by_platform_id(&self, platform_id: &str) -> Result<Option<Channel>, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT channel_id, platform_id, server_id, name, kind, created_at, updated_at
            FROM channels
            WHERE platform_id = $1
            "#,
        )
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await?;

        row_opt.as_ref().map(row_to_channel).transpose()
    }

    async fn create(&self, channel: &NewChannel) -> Result<Channel, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO channels (platform_id, server_id, name, kind)
            VALUES ($1, $2, $3, $4)
            RETURNING channel_id, platform_id, server_id, name, kind, created_at, updated_at
            "#,
        )
        .bind(&channel.platform_id)
        .bind(channel.server_id)
        .bind(&channel.name)
        .bind(channel.kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        row_to_channel(&row)
    }

    async fn update(&self, channel: &Channel) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE channels
            SET name = $2,
                kind = $3,
                updated_at = now()
            WHERE channel_id = $1
            "#,
        )
        .bind(channel.channel_id)
        .bind(&channel.name)
        .bind(channel.kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, channel_id: i64) -> Result<(), Error> {
        sqlx::query(r#"DELETE FROM channels WHERE channel_id = $1"#)
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
