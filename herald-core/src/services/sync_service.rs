// herald-core/src/services/sync_service.rs
//
// Mirrors the platform's live guild/channel graph into the repository.
// Servers are upserted by platform ID and never deleted; channels are
// created, renamed, and deleted to match what the guild currently has.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use twilight_model::channel::ChannelType;
use twilight_model::guild::Guild;

use herald_common::models::{Channel, ChannelKind, NewChannel, NewServer};
use herald_common::traits::repository_traits::{ChannelRepository, ServerRepository};

use crate::platforms::discord::DiscordPlatform;
use crate::Error;

/// A text-like channel as the platform currently reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveChannel {
    pub platform_id: String,
    pub name: String,
    pub kind: ChannelKind,
}

/// The writes needed to bring the stored channel set in line with the live
/// one. Unchanged channels produce no entry at all.
#[derive(Debug, Default)]
pub struct ChannelSyncPlan {
    pub create: Vec<LiveChannel>,
    pub update: Vec<Channel>,
    pub delete: Vec<i64>,
}

impl ChannelSyncPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Diffs stored channels against the live set. Pure; the I/O shell in
/// [`TopologySyncService::sync_channels`] applies the result.
pub fn plan_channel_sync(existing: &[Channel], live: &[LiveChannel]) -> ChannelSyncPlan {
    let mut plan = ChannelSyncPlan::default();
    let live_ids: HashSet<&str> = live.iter().map(|c| c.platform_id.as_str()).collect();

    for lc in live {
        match existing.iter().find(|c| c.platform_id == lc.platform_id) {
            Some(stored) => {
                if stored.name != lc.name || stored.kind != lc.kind {
                    let mut updated = stored.clone();
                    updated.name = lc.name.clone();
                    updated.kind = lc.kind;
                    plan.update.push(updated);
                }
            }
            None => plan.create.push(lc.clone()),
        }
    }

    for stored in existing {
        if !live_ids.contains(stored.platform_id.as_str()) {
            plan.delete.push(stored.channel_id);
        }
    }

    plan
}

fn mirrored_kind(kind: ChannelType) -> Option<ChannelKind> {
    match kind {
        ChannelType::GuildText => Some(ChannelKind::Text),
        ChannelType::GuildAnnouncement => Some(ChannelKind::Announcement),
        _ => None,
    }
}

fn guild_icon_url(guild: &Guild) -> Option<String> {
    guild
        .icon
        .map(|hash| format!("https://cdn.discordapp.com/icons/{}/{}.png", guild.id, hash))
}

pub struct TopologySyncService {
    platform: Arc<DiscordPlatform>,
    servers: Arc<dyn ServerRepository>,
    channels: Arc<dyn ChannelRepository>,
}

impl TopologySyncService {
    pub fn new(
        platform: Arc<DiscordPlatform>,
        servers: Arc<dyn ServerRepository>,
        channels: Arc<dyn ChannelRepository>,
    ) -> Self {
        Self {
            platform,
            servers,
            channels,
        }
    }

    /// Syncs every guild the session currently sees. A failure in one guild
    /// does not stop the others.
    pub async fn sync_all(&self) -> Result<(), Error> {
        let guilds = self.platform.fetch_guilds().await?;
        info!("Topology sync => {} guild(s) visible.", guilds.len());

        for guild in &guilds {
            let guild_id = guild.id.to_string();
            if let Err(e) = self.sync_server(&guild_id).await {
                warn!("Topology sync failed for guild {}: {}", guild_id, e);
            }
        }
        Ok(())
    }

    /// Upserts the server row for one guild, then reconciles its channels.
    pub async fn sync_server(&self, guild_platform_id: &str) -> Result<(), Error> {
        let guild = self.platform.fetch_guild(guild_platform_id).await?;
        let icon_url = guild_icon_url(&guild);
        let member_count = guild.approximate_member_count.map(|c| c as i32);

        let server = match self.servers.get_by_platform_id(guild_platform_id).await? {
            Some(mut existing) => {
                existing.name = guild.name.clone();
                existing.icon_url = icon_url;
                existing.member_count = member_count;
                existing.is_connected = true;
                self.servers.update(&existing).await?;
                existing
            }
            None => {
                self.servers
                    .create(&NewServer {
                        platform_id: guild_platform_id.to_string(),
                        name: guild.name.clone(),
                        icon_url,
                        member_count,
                    })
                    .await?
            }
        };

        self.sync_channels(guild_platform_id, server.server_id).await
    }

    /// Reconciles the stored channel set of one server against the live
    /// guild: upserts text-like channels, deletes vanished ones.
    pub async fn sync_channels(
        &self,
        guild_platform_id: &str,
        server_id: i64,
    ) -> Result<(), Error> {
        let fetched = self.platform.fetch_guild_channels(guild_platform_id).await?;

        let live: Vec<LiveChannel> = fetched
            .iter()
            .filter_map(|ch| {
                let kind = mirrored_kind(ch.kind)?;
                Some(LiveChannel {
                    platform_id: ch.id.to_string(),
                    name: ch.name.clone().unwrap_or_else(|| ch.id.to_string()),
                    kind,
                })
            })
            .collect();

        let existing = self.channels.list_for_server(server_id).await?;
        let plan = plan_channel_sync(&existing, &live);
        if plan.is_empty() {
            debug!("Topology sync => guild {} already up to date.", guild_platform_id);
            return Ok(());
        }

        debug!(
            "Topology sync => guild {}: {} create, {} update, {} delete.",
            guild_platform_id,
            plan.create.len(),
            plan.update.len(),
            plan.delete.len()
        );

        for lc in &plan.create {
            // The platform ID is globally unique; a concurrent sync of the
            // same guild may have inserted the row since the plan was built.
            match self.channels.get_by_platform_id(&lc.platform_id).await? {
                Some(mut existing) => {
                    existing.name = lc.name.clone();
                    existing.kind = lc.kind;
                    self.channels.update(&existing).await?;
                }
                None => {
                    self.channels
                        .create(&NewChannel {
                            platform_id: lc.platform_id.clone(),
                            server_id,
                            name: lc.name.clone(),
                            kind: lc.kind,
                        })
                        .await?;
                }
            }
        }
        for ch in &plan.update {
            self.channels.update(ch).await?;
        }
        for channel_id in &plan.delete {
            self.channels.delete(*channel_id).await?;
        }

        Ok(())
    }

    /// Flags the server row as disconnected after the bot leaves a guild.
    /// Channels are kept; notification and forwarder history still points at
    /// them.
    pub async fn mark_disconnected(&self, guild_platform_id: &str) -> Result<(), Error> {
        match self.servers.get_by_platform_id(guild_platform_id).await? {
            Some(mut server) => {
                server.is_connected = false;
                self.servers.update(&server).await?;
                info!("Server {} marked disconnected.", guild_platform_id);
                Ok(())
            }
            None => {
                warn!("GuildDelete for unknown server {}", guild_platform_id);
                Ok(())
            }
        }
    }
}
