// herald-core/src/db/mod.rs

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::Error;

/// Connection handle shared by every repository.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        info!("Connected to Postgres");
        Ok(Self { pool })
    }

    /// Run migrations in the workspace `migrations/` folder.
    pub async fn migrate(&self) -> Result<(), Error> {
        info!("Applying migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations applied successfully.");
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}
