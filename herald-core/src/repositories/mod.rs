// herald-core/src/repositories/mod.rs

pub mod postgres;

pub use herald_common::traits::repository_traits::{
    BotSettingsRepository, ChannelRepository, ForwarderRepository, NotificationRepository,
    ServerRepository,
};
