// herald-common/src/models/channel.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Channel kinds the bot mirrors. Anything else (voice, forum, categories,
/// threads) is ignored by topology sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Announcement,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Text => "text",
            ChannelKind::Announcement => "announcement",
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ChannelKind::Text),
            "announcement" => Ok(ChannelKind::Announcement),
            other => Err(Error::Parse(format!("unknown channel kind '{other}'"))),
        }
    }
}

/// Represents a row in the `channels` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: i64,
    /// Platform-native channel ID, unique per row.
    pub platform_id: String,
    pub server_id: i64,
    pub name: String,
    pub kind: ChannelKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a channel discovered during topology sync.
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub platform_id: String,
    pub server_id: i64,
    pub name: String,
    pub kind: ChannelKind,
}
