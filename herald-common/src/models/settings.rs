// herald-common/src/models/settings.rs

use serde::{Deserialize, Serialize};

/// Represents the singleton `bot_settings` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    pub settings_id: i64,
    pub default_timezone: String,
    pub max_messages_per_minute: i32,
    pub enable_analytics: bool,
    pub auto_cleanup_days: i32,
    /// Weekday numbers with Sunday = 0. Read by the scheduler on every tick
    /// for `working_days` notifications.
    pub working_days: Vec<i16>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            settings_id: 0,
            default_timezone: "UTC".to_string(),
            max_messages_per_minute: 60,
            enable_analytics: true,
            auto_cleanup_days: 30,
            working_days: vec![1, 2, 3, 4, 5],
        }
    }
}
