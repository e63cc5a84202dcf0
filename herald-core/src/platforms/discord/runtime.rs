// File: herald-core/src/platforms/discord/runtime.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use twilight_cache_inmemory::{InMemoryCache, ResourceType};
use twilight_gateway::{
    self as gateway, CloseFrame, Event, EventTypeFlags, Intents, MessageSender, Shard, StreamExt,
};
use twilight_http::client::ClientBuilder;
use twilight_http::Client as HttpClient;
use twilight_model::channel::{Channel, ChannelType};
use twilight_model::gateway::payload::incoming::GuildCreate;
use twilight_model::guild::Guild;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};
use twilight_model::id::Id;
use twilight_model::user::CurrentUserGuild;

use crate::platforms::{ChatSender, ConnectionStatus};
use crate::Error;

/// The identity the gateway authenticated as, taken from the `Ready` payload.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub user_id: String,
    pub username: String,
}

/// An inbound guild message with the channel context the forwarder needs.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub is_thread: bool,
    pub parent_channel_id: Option<String>,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
}

/// Gateway events surfaced to the runtime supervisor.
#[derive(Debug, Clone)]
pub enum DiscordEvent {
    Ready(BotIdentity),
    GuildCreate { guild_id: String },
    GuildDelete { guild_id: String, unavailable: bool },
    Message(InboundMessage),
}

/// Read-side projection consumed by the status API.
#[derive(Debug, Clone)]
pub struct PlatformStatus {
    pub online: bool,
    pub identity_name: Option<String>,
    pub identity_id: Option<String>,
    pub server_count: u64,
}

impl PlatformStatus {
    pub fn offline() -> Self {
        Self {
            online: false,
            identity_name: None,
            identity_id: None,
            server_count: 0,
        }
    }
}

pub async fn shard_runner(
    mut shard: Shard,
    tx: UnboundedSender<DiscordEvent>,
    http: Arc<HttpClient>,
    cache: Arc<InMemoryCache>,
    identity_tx: Arc<watch::Sender<Option<BotIdentity>>>,
) {
    let shard_id = shard.id().number();
    info!("(ShardRunner) Shard {} started. Listening for events.", shard_id);

    while let Some(event_res) = shard.next_event(EventTypeFlags::all()).await {
        match event_res {
            Ok(event) => {
                // The cache tracks guilds/channels/threads so inbound messages
                // can be resolved without a round trip per message.
                cache.update(&event);

                match &event {
                    Event::Ready(ready) => {
                        let user = &ready.user;
                        info!(
                            "(ShardRunner) Shard {} => READY as {} (ID={})",
                            shard_id, user.name, user.id
                        );
                        let identity = BotIdentity {
                            user_id: user.id.to_string(),
                            username: user.name.clone(),
                        };
                        let _ = identity_tx.send(Some(identity.clone()));
                        let _ = tx.send(DiscordEvent::Ready(identity));
                    }
                    Event::GuildCreate(guild_create) => {
                        let guild_id = match guild_create.as_ref() {
                            GuildCreate::Available(g) => g.id,
                            GuildCreate::Unavailable(u) => u.id,
                        };
                        debug!("(ShardRunner) Shard {} => GUILD_CREATE {}", shard_id, guild_id);
                        let _ = tx.send(DiscordEvent::GuildCreate {
                            guild_id: guild_id.to_string(),
                        });
                    }
                    Event::GuildDelete(guild_delete) => {
                        debug!(
                            "(ShardRunner) Shard {} => GUILD_DELETE {} (unavailable={:?})",
                            shard_id, guild_delete.id, guild_delete.unavailable
                        );
                        let _ = tx.send(DiscordEvent::GuildDelete {
                            guild_id: guild_delete.id.to_string(),
                            unavailable: guild_delete.unavailable.unwrap_or(false),
                        });
                    }
                    Event::MessageCreate(msg) => {
                        let (is_thread, parent_channel_id) =
                            channel_context(&cache, &http, msg.channel_id).await;

                        let _ = tx.send(DiscordEvent::Message(InboundMessage {
                            guild_id: msg.guild_id.map(|id| id.to_string()),
                            channel_id: msg.channel_id.to_string(),
                            is_thread,
                            parent_channel_id,
                            author_name: msg.author.name.clone(),
                            author_is_bot: msg.author.bot,
                            content: msg.content.clone(),
                        }));
                    }
                    _ => {
                        trace!("(ShardRunner) Shard {} => unhandled event", shard_id);
                    }
                }
            }
            Err(err) => {
                error!(
                    "(ShardRunner) Shard {} => error receiving event: {:?}",
                    shard_id, err
                );
            }
        }
    }

    warn!("(ShardRunner) Shard {} event loop ended.", shard_id);
}

/// Whether a message in `channel_id` sits in a thread, and the parent channel
/// if so. Resolved from the cache, falling back to an HTTP fetch for channels
/// the gateway has not announced yet.
async fn channel_context(
    cache: &InMemoryCache,
    http: &HttpClient,
    channel_id: Id<ChannelMarker>,
) -> (bool, Option<String>) {
    if let Some(cached) = cache.channel(channel_id) {
        let is_thread = cached.kind.is_thread();
        let parent = cached.parent_id.map(|id| id.to_string());
        return (is_thread, parent);
    }

    match http.channel(channel_id).await {
        Ok(response) => match response.model().await {
            Ok(channel) => {
                let is_thread = channel.kind.is_thread();
                let parent = channel.parent_id.map(|id| id.to_string());
                (is_thread, parent)
            }
            Err(e) => {
                error!("Error parsing channel {} => {:?}", channel_id, e);
                (false, None)
            }
        },
        Err(e) => {
            error!("Error fetching channel {} => {:?}", channel_id, e);
            (false, None)
        }
    }
}

pub struct DiscordPlatform {
    token: String,
    connection_status: std::sync::RwLock<ConnectionStatus>,

    rx: Option<UnboundedReceiver<DiscordEvent>>,
    shard_tasks: Mutex<Vec<JoinHandle<()>>>,
    shard_senders: Vec<MessageSender>,

    http: Option<Arc<HttpClient>>,
    cache: Option<Arc<InMemoryCache>>,

    identity_tx: Arc<watch::Sender<Option<BotIdentity>>>,
    identity_rx: watch::Receiver<Option<BotIdentity>>,
}

impl DiscordPlatform {
    pub fn new(token: String) -> Self {
        info!("DiscordPlatform::new token=(masked)");
        let (identity_tx, identity_rx) = watch::channel(None);
        let identity_tx = Arc::new(identity_tx);
        Self {
            token,
            connection_status: std::sync::RwLock::new(ConnectionStatus::Disconnected),
            rx: None,
            shard_tasks: Mutex::new(Vec::new()),
            shard_senders: Vec::new(),
            http: None,
            cache: None,
            identity_tx,
            identity_rx,
        }
    }

    /// Connect to the gateway and spawn one runner task per shard. Events
    /// begin flowing into the receiver returned by [`take_event_receiver`].
    ///
    /// [`take_event_receiver`]: DiscordPlatform::take_event_receiver
    pub async fn connect(&mut self) -> Result<(), Error> {
        if matches!(
            *self.connection_status.read().unwrap_or_else(|e| e.into_inner()),
            ConnectionStatus::Connected
        ) {
            info!("(DiscordPlatform) connect => already connected; skipping.");
            return Ok(());
        }
        if self.token.is_empty() {
            return Err(Error::Auth("Empty Discord token".into()));
        }

        info!("(DiscordPlatform) connect => starting Discord shards...");
        let (tx, rx) = unbounded_channel::<DiscordEvent>();
        self.rx = Some(rx);

        let http_client = Arc::new(
            ClientBuilder::new()
                .token(self.token.clone())
                .timeout(Duration::from_secs(30))
                .build(),
        );
        self.http = Some(http_client.clone());

        let cache = InMemoryCache::builder()
            .resource_types(ResourceType::GUILD | ResourceType::CHANNEL)
            .build();
        let cache = Arc::new(cache);
        self.cache = Some(cache.clone());

        let config = gateway::Config::new(
            self.token.clone(),
            Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT,
        );

        let shards = gateway::create_recommended(&http_client, config, |_, b| b.build())
            .await
            .map_err(|e| Error::Platform(format!("Error creating recommended shards: {e:?}")))?;

        info!("(DiscordPlatform) create_recommended => {} shard(s).", shards.len());

        let mut tasks = Vec::new();
        for shard in shards {
            self.shard_senders.push(shard.sender());

            let tx_for_shard = tx.clone();
            let http_for_shard = http_client.clone();
            let cache_for_shard = cache.clone();
            let identity_for_shard = self.identity_tx.clone();

            tasks.push(tokio::spawn(async move {
                shard_runner(
                    shard,
                    tx_for_shard,
                    http_for_shard,
                    cache_for_shard,
                    identity_for_shard,
                )
                .await;
            }));
        }
        *self.shard_tasks.lock().await = tasks;

        *self
            .connection_status
            .write()
            .unwrap_or_else(|e| e.into_inner()) = ConnectionStatus::Connected;
        Ok(())
    }

    /// Hands the event receiver to the supervisor. Yields `None` after the
    /// first call.
    pub fn take_event_receiver(&mut self) -> Option<UnboundedReceiver<DiscordEvent>> {
        self.rx.take()
    }

    /// Close every shard and wait for the runner tasks to drain.
    pub async fn disconnect(&self) -> Result<(), Error> {
        info!("(DiscordPlatform) disconnect => shutting down shards...");
        *self
            .connection_status
            .write()
            .unwrap_or_else(|e| e.into_inner()) = ConnectionStatus::Disconnected;
        let _ = self.identity_tx.send(None);

        for (i, sender) in self.shard_senders.iter().enumerate() {
            debug!("(DiscordPlatform) closing shard #{}...", i);
            let _ = sender.close(CloseFrame::NORMAL);
        }
        let mut tasks = self.shard_tasks.lock().await;
        for (i, task) in tasks.drain(..).enumerate() {
            debug!("(DiscordPlatform) waiting for shard #{} to finish...", i);
            let _ = task.await;
        }
        info!("(DiscordPlatform) disconnected.");
        Ok(())
    }

    fn http(&self) -> Result<&Arc<HttpClient>, Error> {
        self.http
            .as_ref()
            .ok_or_else(|| Error::Platform("No HTTP client available for DiscordPlatform".into()))
    }

    /// Guilds the current session is in.
    pub async fn fetch_guilds(&self) -> Result<Vec<CurrentUserGuild>, Error> {
        let http = self.http()?;
        let response = http
            .current_user_guilds()
            .await
            .map_err(|e| Error::Platform(format!("Discord HTTP error while listing guilds: {e}")))?;
        response
            .models()
            .await
            .map_err(|e| Error::Platform(format!("Discord parse error while listing guilds: {e}")))
    }

    /// Full guild object with approximate member counts.
    pub async fn fetch_guild(&self, guild_platform_id: &str) -> Result<Guild, Error> {
        let http = self.http()?;
        let guild_id = parse_id::<GuildMarker>(guild_platform_id)?;
        let response = http
            .guild(guild_id)
            .with_counts(true)
            .await
            .map_err(|e| Error::Platform(format!("Error fetching guild {guild_platform_id} => {e}")))?;
        response
            .model()
            .await
            .map_err(|e| Error::Platform(format!("Parse error for guild {guild_platform_id} => {e}")))
    }

    pub async fn fetch_guild_channels(
        &self,
        guild_platform_id: &str,
    ) -> Result<Vec<Channel>, Error> {
        let http = self.http()?;
        let guild_id = parse_id::<GuildMarker>(guild_platform_id)?;
        let response = http.guild_channels(guild_id).await.map_err(|e| {
            Error::Platform(format!("Error fetching channels for guild {guild_platform_id} => {e}"))
        })?;
        response.models().await.map_err(|e| {
            Error::Platform(format!("Parse error for channels in guild {guild_platform_id} => {e}"))
        })
    }

    /// Threads currently active in the guild. Thread targets that fall out
    /// of this set have been archived or deleted and will fail resolution.
    pub async fn fetch_active_threads(
        &self,
        guild_platform_id: &str,
    ) -> Result<Vec<Channel>, Error> {
        let http = self.http()?;
        let guild_id = parse_id::<GuildMarker>(guild_platform_id)?;
        let response = http.active_threads(guild_id).await.map_err(|e| {
            Error::Platform(format!(
                "Error fetching active threads for guild {guild_platform_id} => {e}"
            ))
        })?;
        let listing = response.model().await.map_err(|e| {
            Error::Platform(format!(
                "Parse error for active threads in guild {guild_platform_id} => {e}"
            ))
        })?;
        Ok(listing.threads)
    }

    pub async fn status(&self) -> PlatformStatus {
        let online = matches!(
            *self.connection_status.read().unwrap_or_else(|e| e.into_inner()),
            ConnectionStatus::Connected
        );
        let identity = self.identity_rx.borrow().clone();
        let server_count = self
            .cache
            .as_ref()
            .map(|c| c.stats().guilds() as u64)
            .unwrap_or(0);

        PlatformStatus {
            online: online && identity.is_some(),
            identity_name: identity.as_ref().map(|i| i.username.clone()),
            identity_id: identity.as_ref().map(|i| i.user_id.clone()),
            server_count,
        }
    }
}

#[async_trait]
impl ChatSender for DiscordPlatform {
    async fn resolve_target(&self, channel: &str) -> Result<(), Error> {
        let http = self.http()?;
        let channel_id = parse_id::<ChannelMarker>(channel)?;

        // Cache hit is authoritative for channels the gateway announced.
        let cached_kind = self
            .cache
            .as_ref()
            .and_then(|c| c.channel(channel_id).map(|ch| ch.kind));
        let kind = match cached_kind {
            Some(kind) => kind,
            None => {
                let response = http
                    .channel(channel_id)
                    .await
                    .map_err(|_| Error::NotFound(format!("channel {channel} not found")))?;
                response
                    .model()
                    .await
                    .map_err(|e| Error::Platform(format!("Parse error for channel {channel} => {e}")))?
                    .kind
            }
        };

        if send_capable(kind) {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "channel {channel} is not a sendable channel or thread"
            )))
        }
    }

    async fn send_message(&self, channel: &str, message: &str) -> Result<(), Error> {
        let http = self.http()?;
        let channel_id = parse_id::<ChannelMarker>(channel)?;

        http.create_message(channel_id)
            .content(message)
            .await
            .map_err(|err| Error::Platform(format!("Error sending Discord message: {err:?}")))?;
        Ok(())
    }
}

fn parse_id<M>(raw: &str) -> Result<Id<M>, Error> {
    let value: u64 = raw
        .parse()
        .map_err(|_| Error::Platform(format!("Invalid channel/guild ID '{raw}' (must be numeric)")))?;
    Id::new_checked(value)
        .ok_or_else(|| Error::Platform(format!("Invalid channel/guild ID '{raw}' (must be non-zero)")))
}

fn send_capable(kind: ChannelType) -> bool {
    matches!(
        kind,
        ChannelType::GuildText
            | ChannelType::GuildAnnouncement
            | ChannelType::PublicThread
            | ChannelType::PrivateThread
            | ChannelType::AnnouncementThread
    )
}
