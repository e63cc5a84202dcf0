// herald-common/src/models/forwarder.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

use super::DeliveryStatus;

/// How a forwarder keyword is matched against inbound message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Lowercased substring match.
    Contains,
    /// Token-level match after non-word-character normalization.
    Exact,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Contains => "contains",
            MatchType::Exact => "exact",
        }
    }
}

impl std::str::FromStr for MatchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(MatchType::Contains),
            "exact" => Ok(MatchType::Exact),
            other => Err(Error::Parse(format!("unknown match type '{other}'"))),
        }
    }
}

/// Represents a row in the `forwarders` table: a rule that copies inbound
/// messages matching one of `keywords` from a source channel or thread to a
/// destination channel or thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forwarder {
    pub forwarder_id: i64,
    pub user_id: i64,
    pub name: String,
    pub source_server_id: i64,
    pub source_channel_id: i64,
    /// Platform-native thread ID; when set, the rule only watches that thread.
    pub source_thread_id: Option<String>,
    pub destination_server_id: i64,
    pub destination_channel_id: i64,
    pub destination_thread_id: Option<String>,
    /// Ordered, non-empty; first matching keyword wins.
    pub keywords: Vec<String>,
    pub match_type: MatchType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An active forwarder joined with the platform IDs of its source and
/// destination channels, as returned by `ForwarderRepository::list_active`.
#[derive(Debug, Clone)]
pub struct ActiveForwarder {
    pub forwarder: Forwarder,
    pub source_channel_platform_id: String,
    pub destination_channel_platform_id: String,
}

/// Represents a row in the append-only `forwarder_logs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderLog {
    pub log_id: i64,
    pub forwarder_id: i64,
    pub forwarded_at: DateTime<Utc>,
    pub original_message: String,
    pub matched_keyword: Option<String>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

/// Insert payload for a forwarding attempt.
#[derive(Debug, Clone)]
pub struct NewForwarderLog {
    pub forwarder_id: i64,
    pub forwarded_at: DateTime<Utc>,
    pub original_message: String,
    pub matched_keyword: Option<String>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}
