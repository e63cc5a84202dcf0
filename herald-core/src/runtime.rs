// herald-core/src/runtime.rs
//
// Composite lifecycle over the gateway client, topology sync, forwarder
// cache, and notification scheduler. Boot order after the session reports
// Ready: sync topology, load the forwarder cache, start the scheduler, then
// drain gateway events until stopped.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use herald_common::traits::repository_traits::{
    BotSettingsRepository, ChannelRepository, ForwarderRepository, NotificationRepository,
    ServerRepository,
};

use crate::platforms::discord::{DiscordEvent, DiscordPlatform, PlatformStatus};
use crate::services::{ForwardService, TopologySyncService};
use crate::tasks::NotificationScheduler;
use crate::Error;

pub struct BotRuntime {
    token: Option<String>,
    servers: Arc<dyn ServerRepository>,
    channels: Arc<dyn ChannelRepository>,
    notifications: Arc<dyn NotificationRepository>,
    forwarders: Arc<dyn ForwarderRepository>,
    settings: Arc<dyn BotSettingsRepository>,

    state: Mutex<Option<RunningState>>,
}

struct RunningState {
    platform: Arc<DiscordPlatform>,
    forward_service: Arc<ForwardService>,
    scheduler_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
}

impl BotRuntime {
    pub fn new(
        token: Option<String>,
        servers: Arc<dyn ServerRepository>,
        channels: Arc<dyn ChannelRepository>,
        notifications: Arc<dyn NotificationRepository>,
        forwarders: Arc<dyn ForwarderRepository>,
        settings: Arc<dyn BotSettingsRepository>,
    ) -> Self {
        Self {
            token,
            servers,
            channels,
            notifications,
            forwarders,
            settings,
            state: Mutex::new(None),
        }
    }

    /// Connects to the gateway and brings every component up. Resolves once
    /// the session is Ready and the initial sync/cache-load has run. Without
    /// a token the runtime stays off and this is a no-op.
    pub async fn start(&self) -> Result<(), Error> {
        {
            let state = self.state.lock().await;
            if state.is_some() {
                info!("BotRuntime::start => already running; skipping.");
                return Ok(());
            }
        }

        let token = match self.token.as_deref() {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => {
                warn!("DISCORD_BOT_TOKEN is not set; bot runtime stays offline.");
                return Ok(());
            }
        };

        let mut platform = DiscordPlatform::new(token);
        platform.connect().await?;
        let mut rx = platform
            .take_event_receiver()
            .ok_or_else(|| Error::Platform("Gateway event receiver already taken".into()))?;

        // Block until the session reports Ready so topology sync sees the
        // full guild set.
        loop {
            match rx.recv().await {
                Some(DiscordEvent::Ready(identity)) => {
                    info!(
                        "Gateway ready as {} (ID={}).",
                        identity.username, identity.user_id
                    );
                    break;
                }
                Some(other) => {
                    debug!("Pre-ready gateway event ignored: {:?}", other);
                }
                None => {
                    return Err(Error::Platform(
                        "Gateway closed before the session became ready".into(),
                    ));
                }
            }
        }

        let platform = Arc::new(platform);

        let sync = Arc::new(TopologySyncService::new(
            platform.clone(),
            self.servers.clone(),
            self.channels.clone(),
        ));
        if let Err(e) = sync.sync_all().await {
            error!("Initial topology sync failed: {}", e);
        }

        let forward_service = Arc::new(ForwardService::new(
            self.forwarders.clone(),
            platform.clone(),
        ));
        if let Err(e) = forward_service.load().await {
            error!("Initial forwarder cache load failed: {}", e);
        }

        let scheduler = Arc::new(NotificationScheduler::new(
            self.notifications.clone(),
            self.settings.clone(),
            platform.clone(),
        ));
        let scheduler_task = scheduler.spawn();

        let event_task = tokio::spawn(event_loop(
            rx,
            sync,
            forward_service.clone(),
        ));

        *self.state.lock().await = Some(RunningState {
            platform,
            forward_service,
            scheduler_task,
            event_task,
        });
        info!("Bot runtime started.");
        Ok(())
    }

    /// Stops the scheduler first, then the event loop, then closes the
    /// gateway session.
    pub async fn stop(&self) {
        let taken = self.state.lock().await.take();
        let Some(running) = taken else {
            debug!("BotRuntime::stop => not running.");
            return;
        };

        running.scheduler_task.abort();
        running.event_task.abort();
        if let Err(e) = running.platform.disconnect().await {
            warn!("Gateway disconnect reported: {}", e);
        }
        info!("Bot runtime stopped.");
    }

    /// Read-side projection for the status API. Safe to call at any time.
    pub async fn status(&self) -> PlatformStatus {
        match self.state.lock().await.as_ref() {
            Some(running) => running.platform.status().await,
            None => PlatformStatus::offline(),
        }
    }

    /// Asks the forwarder cache to rebuild from the repository. Idempotent
    /// and non-blocking; the swap lands before the next inbound event that
    /// follows it.
    pub async fn reload_forwarders(&self) {
        let Some(forward_service) = self
            .state
            .lock()
            .await
            .as_ref()
            .map(|r| r.forward_service.clone())
        else {
            debug!("reload_forwarders => runtime not running; nothing to reload.");
            return;
        };

        tokio::spawn(async move {
            if let Err(e) = forward_service.load().await {
                error!("Forwarder cache reload failed: {}", e);
            }
        });
    }
}

/// Drains gateway events for the lifetime of the session. Every handler is
/// contained: a failure is logged and the loop keeps going.
async fn event_loop(
    mut rx: UnboundedReceiver<DiscordEvent>,
    sync: Arc<TopologySyncService>,
    forward_service: Arc<ForwardService>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            DiscordEvent::Ready(identity) => {
                // A Ready after startup means the session resumed from a
                // reconnect; refresh everything the gap may have staled.
                info!("Gateway re-ready as {}; refreshing state.", identity.username);
                if let Err(e) = sync.sync_all().await {
                    error!("Topology sync after reconnect failed: {}", e);
                }
                if let Err(e) = forward_service.load().await {
                    error!("Forwarder cache reload after reconnect failed: {}", e);
                }
            }
            DiscordEvent::GuildCreate { guild_id } => {
                if let Err(e) = sync.sync_server(&guild_id).await {
                    error!("Topology sync for guild {} failed: {}", guild_id, e);
                }
            }
            DiscordEvent::GuildDelete {
                guild_id,
                unavailable,
            } => {
                if unavailable {
                    // Platform outage, not a removal; the guild will come back.
                    debug!("Guild {} temporarily unavailable.", guild_id);
                    continue;
                }
                if let Err(e) = sync.mark_disconnected(&guild_id).await {
                    error!("Disconnect handling for guild {} failed: {}", guild_id, e);
                }
            }
            DiscordEvent::Message(msg) => {
                forward_service.handle_message(&msg).await;
            }
        }
    }
    info!("Gateway event loop ended.");
}
