// herald-core/src/repositories/postgres/servers.rs

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use herald_common::models::{NewServer, Server};
use herald_common::traits::repository_traits::ServerRepository;

use crate::Error;

#[derive(Clone)]
pub struct PostgresServerRepository {
    pool: Pool<Postgres>,
}

impl PostgresServerRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_server(r: &PgRow) -> Result<Server, Error> {
    Ok(Server {
        server_id: r.try_get("server_id")?,
        platform_id: r.try_get("platform_id")?,
        name: r.try_get("name")?,
        icon_url: r.try_get("icon_url")?,
        member_count: r.try_get("member_count")?,
        is_connected: r.try_get("is_connected")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

#[async_trait]
impl ServerRepository for PostgresServerRepository {
    async fn get_by_platform_id(&self, platform_id: &str) -> Result<Option<Server>, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT server_id, platform_id, name, icon_url, member_count,
                   is_connected, created_at, updated_at
            FROM servers
            WHERE platform_id = $1
            "#,
        )
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await?;

        row_opt.as_ref().map(row_to_server).transpose()
    }

    async fn create(&self, server: &NewServer) -> Result<Server, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO servers (platform_id, name, icon_url, member_count, is_connected)
            VALUES ($1, $2, $3, $4, TRUE)
            RETURNING server_id, platform_id, name, icon_url, member_count,
                      is_connected, created_at, updated_at
            "#,
        )
        .bind(&server.platform_id)
        .bind(&server.name)
        .bind(&server.icon_url)
        .bind(server.member_count)
        .fetch_one(&self.pool)
        .await?;

        row_to_server(&row)
    }

    async fn update(&self, server: &Server) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE servers
            SET name = $2,
                icon_url = $3,
                member_count = $4,
                is_connected = $5,
                updated_at = now()
            WHERE server_id = $1
            "#,
        )
        .bind(server.server_id)
        .bind(&server.name)
        .bind(&server.icon_url)
        .bind(server.member_count)
        .bind(server.is_connected)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
