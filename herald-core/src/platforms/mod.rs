// File: herald-core/src/platforms/mod.rs

use async_trait::async_trait;

use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
    Error(String),
}

/// Outbound messaging seam between the gateway client and the components
/// that deliver messages (scheduler, forwarder). Targets are platform-native
/// channel or thread IDs; threads and channels are addressed uniformly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Checks that the target exists and can receive messages. Returns
    /// `Error::NotFound` for a missing or non-send-capable target.
    async fn resolve_target(&self, channel: &str) -> Result<(), Error>;

    async fn send_message(&self, channel: &str, message: &str) -> Result<(), Error>;
}

pub mod discord;
