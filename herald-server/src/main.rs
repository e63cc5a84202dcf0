// =============================================================================
// herald-server/src/main.rs
//   Wires the Postgres repositories into the bot runtime and runs it until
//   interrupted.
// =============================================================================

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use herald_core::repositories::postgres::{
    PostgresBotSettingsRepository, PostgresChannelRepository, PostgresForwarderRepository,
    PostgresNotificationRepository, PostgresServerRepository,
};
use herald_core::{BotRuntime, Database};

#[derive(Parser, Debug, Clone)]
#[command(name = "herald")]
#[command(author, version, about = "herald - scheduled notifications and keyword forwarding for Discord")]
struct Args {
    /// Postgres connection URL.
    #[arg(long, default_value = "postgres://herald@localhost:5432/herald")]
    db_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let db = Database::new(&args.db_url).await?;
    db.migrate().await?;
    let pool = db.pool().clone();

    let token = std::env::var("DISCORD_BOT_TOKEN").ok();
    if token.is_none() {
        warn!("DISCORD_BOT_TOKEN is not set; starting with the gateway offline.");
    }

    let runtime = Arc::new(BotRuntime::new(
        token,
        Arc::new(PostgresServerRepository::new(pool.clone())),
        Arc::new(PostgresChannelRepository::new(pool.clone())),
        Arc::new(PostgresNotificationRepository::new(pool.clone())),
        Arc::new(PostgresForwarderRepository::new(pool.clone())),
        Arc::new(PostgresBotSettingsRepository::new(pool)),
    ));

    runtime.start().await?;

    let status = runtime.status().await;
    if status.online {
        info!(
            "herald online as {} ({} server(s)).",
            status.identity_name.as_deref().unwrap_or("unknown"),
            status.server_count
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received; shutting down...");
    runtime.stop().await;

    Ok(())
}
