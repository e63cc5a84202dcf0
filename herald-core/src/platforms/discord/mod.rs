// File: herald-core/src/platforms/discord/mod.rs

pub mod runtime;

pub use runtime::{BotIdentity, DiscordEvent, DiscordPlatform, InboundMessage, PlatformStatus};
