// herald-common/src/models/server.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a row in the `servers` table: one guild the bot has seen.
///
/// Rows are never deleted; when the bot is removed from a guild the row is
/// kept with `is_connected = false` so notification and forwarder history
/// stays resolvable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub server_id: i64,
    /// Platform-native guild ID, unique per row.
    pub platform_id: String,
    pub name: String,
    pub icon_url: Option<String>,
    pub member_count: Option<i32>,
    pub is_connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a newly sighted guild.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub platform_id: String,
    pub name: String,
    pub icon_url: Option<String>,
    pub member_count: Option<i32>,
}
