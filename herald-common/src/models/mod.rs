// herald-common/src/models/mod.rs

pub mod channel;
pub mod forwarder;
pub mod notification;
pub mod server;
pub mod settings;

pub use channel::{Channel, ChannelKind, NewChannel};
pub use forwarder::{ActiveForwarder, Forwarder, ForwarderLog, MatchType, NewForwarderLog};
pub use notification::{
    DueNotification, NewNotificationLog, Notification, NotificationLog, RepeatType,
};
pub use server::{NewServer, Server};
pub use settings::BotSettings;

use serde::{Deserialize, Serialize};

/// Outcome recorded in the append-only delivery logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(DeliveryStatus::Success),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(crate::Error::Parse(format!(
                "unknown delivery status '{other}'"
            ))),
        }
    }
}
