// herald-core/src/repositories/postgres/notifications.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use herald_common::models::{DueNotification, NewNotificationLog, Notification};
use herald_common::traits::repository_traits::NotificationRepository;

use crate::Error;

#[derive(Clone)]
pub struct PostgresNotificationRepository {
    pool: Pool<Postgres>,
}

impl PostgresNotificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_notification(r: &PgRow) -> Result<Notification, Error> {
    let repeat_type: String = r.try_get("repeat_type")?;
    Ok(Notification {
        notification_id: r.try_get("notification_id")?,
        user_id: r.try_get("user_id")?,
        server_id: r.try_get("server_id")?,
        channel_id: r.try_get("channel_id")?,
        title: r.try_get("title")?,
        message: r.try_get("message")?,
        schedule_date: r.try_get("schedule_date")?,
        repeat_type: repeat_type.parse()?,
        end_date: r.try_get("end_date")?,
        is_active: r.try_get("is_active")?,
        timezone: r.try_get("timezone")?,
        mentions_everyone: r.try_get("mentions_everyone")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
        last_sent: r.try_get("last_sent")?,
        next_scheduled: r.try_get("next_scheduled")?,
    })
}

#[async_trait]
impl NotificationRepository for PostgresNotificationRepository {
    async fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<DueNotification>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT n.notification_id, n.user_id, n.server_id, n.channel_id, n.title,
                   n.message, n.schedule_date, n.repeat_type, n.end_date, n.is_active,
                   n.timezone, n.mentions_everyone, n.created_at, n.updated_at,
                   n.last_sent, n.next_scheduled,
                   c.platform_id AS channel_platform_id,
                   s.platform_id AS server_platform_id
            FROM notifications n
            JOIN channels c ON c.channel_id = n.channel_id
            JOIN servers s ON s.server_id = n.server_id
            WHERE n.is_active
              AND n.next_scheduled IS NOT NULL
              AND n.next_scheduled <= $1
            ORDER BY n.next_scheduled, n.notification_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(DueNotification {
                notification: row_to_notification(r)?,
                channel_platform_id: r.try_get("channel_platform_id")?,
                server_platform_id: r.try_get("server_platform_id")?,
            });
        }
        Ok(out)
    }

    async fn advance_schedule(
        &self,
        notification_id: i64,
        last_sent: DateTime<Utc>,
        next_scheduled: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET last_sent = $2,
                next_scheduled = $3,
                updated_at = now()
            WHERE notification_id = $1
            "#,
        )
        .bind(notification_id)
        .bind(last_sent)
        .bind(next_scheduled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate(
        &self,
        notification_id: i64,
        last_sent: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET last_sent = $2,
                next_scheduled = NULL,
                is_active = FALSE,
                updated_at = now()
            WHERE notification_id = $1
            "#,
        )
        .bind(notification_id)
        .bind(last_sent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn defer_schedule(
        &self,
        notification_id: i64,
        next_scheduled: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET next_scheduled = $2,
                updated_at = now()
            WHERE notification_id = $1
            "#,
        )
        .bind(notification_id)
        .bind(next_scheduled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_log(&self, log: &NewNotificationLog) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO notification_logs (notification_id, sent_at, status, error)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(log.notification_id)
        .bind(log.sent_at)
        .bind(log.status.as_str())
        .bind(&log.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
