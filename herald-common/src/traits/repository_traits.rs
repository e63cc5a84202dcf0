// herald-common/src/traits/repository_traits.rs
//
// The narrow persistence contract consumed by the bot runtime. Any store
// satisfying these traits is acceptable; the runtime performs no multi-row
// transactions and every write here is independent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::models::{
    ActiveForwarder, BotSettings, Channel, DueNotification, NewChannel, NewForwarderLog,
    NewNotificationLog, NewServer, Server,
};

#[async_trait]
pub trait ServerRepository: Send + Sync {
    async fn get_by_platform_id(&self, platform_id: &str) -> Result<Option<Server>, Error>;

    /// Inserts a new server row and returns it with its store-issued ID.
    async fn create(&self, server: &NewServer) -> Result<Server, Error>;

    /// Updates the mutable fields (name, icon, member count, connectivity).
    async fn update(&self, server: &Server) -> Result<(), Error>;
}

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn list_for_server(&self, server_id: i64) -> Result<Vec<Channel>, Error>;
    async fn get_by_platform_id(&self, platform_id: &str) -> Result<Option<Channel>, Error>;

    /// Inserts a new channel row and returns it with its store-issued ID.
    async fn create(&self, channel: &NewChannel) -> Result<Channel, Error>;

    async fn update(&self, channel: &Channel) -> Result<(), Error>;
    async fn delete(&self, channel_id: i64) -> Result<(), Error>;
}

/// Notification reads and the three legal schedule-patch shapes. Splitting
/// the patch keeps `is_active AND next_scheduled IS NULL` inexpressible at
/// the write surface.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// All rows with `is_active` and `next_scheduled <= now`, joined with the
    /// platform IDs of their destination channel and server.
    async fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<DueNotification>, Error>;

    /// Records a fire and moves the row to its next occurrence.
    async fn advance_schedule(
        &self,
        notification_id: i64,
        last_sent: DateTime<Utc>,
        next_scheduled: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// Records a final fire and retires the row (`next_scheduled` cleared).
    async fn deactivate(
        &self,
        notification_id: i64,
        last_sent: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// Pushes the row to a later fire time without recording a fire
    /// (non-working-day skip).
    async fn defer_schedule(
        &self,
        notification_id: i64,
        next_scheduled: DateTime<Utc>,
    ) -> Result<(), Error>;

    async fn insert_log(&self, log: &NewNotificationLog) -> Result<(), Error>;
}

#[async_trait]
pub trait ForwarderRepository: Send + Sync {
    /// All active forwarders joined with the platform IDs of their source and
    /// destination channels.
    async fn list_active(&self) -> Result<Vec<ActiveForwarder>, Error>;

    async fn insert_log(&self, log: &NewForwarderLog) -> Result<(), Error>;
}

#[async_trait]
pub trait BotSettingsRepository: Send + Sync {
    /// Returns the singleton settings row, or the built-in defaults if the
    /// row is missing.
    async fn get(&self) -> Result<BotSettings, Error>;
}
