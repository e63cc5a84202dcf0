// herald-core/src/repositories/postgres/bot_settings.rs

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use herald_common::models::BotSettings;
use herald_common::traits::repository_traits::BotSettingsRepository;

use crate::Error;

#[derive(Clone)]
pub struct PostgresBotSettingsRepository {
    pool: Pool<Postgres>,
}

impl PostgresBotSettingsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BotSettingsRepository for PostgresBotSettingsRepository {
    async fn get(&self) -> Result<BotSettings, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT settings_id, default_timezone, max_messages_per_minute,
                   enable_analytics, auto_cleanup_days, working_days
            FROM bot_settings
            ORDER BY settings_id
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row_opt {
            Some(r) => Ok(BotSettings {
                settings_id: r.try_get("settings_id")?,
                default_timezone: r.try_get("default_timezone")?,
                max_messages_per_minute: r.try_get("max_messages_per_minute")?,
                enable_analytics: r.try_get("enable_analytics")?,
                auto_cleanup_days: r.try_get("auto_cleanup_days")?,
                working_days: r.try_get("working_days")?,
            }),
            None => Ok(BotSettings::default()),
        }
    }
}
