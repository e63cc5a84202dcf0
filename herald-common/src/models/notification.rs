// herald-common/src/models/notification.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

use super::DeliveryStatus;

/// Recurrence of a scheduled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatType {
    Once,
    Daily,
    Weekly,
    Monthly,
    WorkingDays,
}

impl RepeatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatType::Once => "once",
            RepeatType::Daily => "daily",
            RepeatType::Weekly => "weekly",
            RepeatType::Monthly => "monthly",
            RepeatType::WorkingDays => "working_days",
        }
    }
}

impl std::str::FromStr for RepeatType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(RepeatType::Once),
            "daily" => Ok(RepeatType::Daily),
            "weekly" => Ok(RepeatType::Weekly),
            "monthly" => Ok(RepeatType::Monthly),
            "working_days" => Ok(RepeatType::WorkingDays),
            other => Err(Error::Parse(format!("unknown repeat type '{other}'"))),
        }
    }
}

/// Represents a row in the `notifications` table.
///
/// The scheduler only ever writes `last_sent`, `next_scheduled` and
/// `is_active`; everything else is owned by the API layer. An active row
/// always carries a `next_scheduled` instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: i64,
    pub user_id: i64,
    pub server_id: i64,
    pub channel_id: i64,
    pub title: Option<String>,
    pub message: String,
    pub schedule_date: DateTime<Utc>,
    pub repeat_type: RepeatType,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Carried through as a label; all arithmetic happens on UTC instants.
    pub timezone: String,
    pub mentions_everyone: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sent: Option<DateTime<Utc>>,
    pub next_scheduled: Option<DateTime<Utc>>,
}

/// A due notification joined with the platform IDs of its destination,
/// as returned by `NotificationRepository::get_due`.
#[derive(Debug, Clone)]
pub struct DueNotification {
    pub notification: Notification,
    pub channel_platform_id: String,
    pub server_platform_id: String,
}

/// Represents a row in the append-only `notification_logs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    pub log_id: i64,
    pub notification_id: i64,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

/// Insert payload for a notification delivery attempt.
#[derive(Debug, Clone)]
pub struct NewNotificationLog {
    pub notification_id: i64,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}
