use anyhow::Result;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{Level, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use moderation_core::{
    CacheLayer, Collaborators, ModerationConfig, PunishmentEngine,
    api::{ModerationApiState, create_router},
    moderation::{
        ChatBroadcaster, TracingSink, spawn_ban_reminder, spawn_receiver,
        memory::{LocalBus, MemoryDirectory, MemoryPresence, MemoryStore, RecordingEnforcer},
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ModerationConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check MODERATION_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    if !config.enabled {
        warn!(service = %config.service, "Moderation disabled by configuration, exiting");
        return Ok(());
    }

    info!(service = %config.service, "Starting moderation node");
    info!(
        "Cache settings: evasion expiry={}s, recent retention={}s, match bans={}",
        config.cache.evasion_expiry.as_secs(),
        config.cache.recent_retention.as_secs(),
        config.cache.match_ban_duration.is_some()
    );

    // Single-process wiring; a clustered deployment swaps in real backends
    let bus = LocalBus::new(1024);
    let (transport, inbound) = bus.join();

    let directory = Arc::new(MemoryDirectory::new());
    let broadcaster = Arc::new(ChatBroadcaster::new(
        config.broadcast.clone(),
        directory.clone(),
        Arc::new(TracingSink),
    ));

    let cache = Arc::new(CacheLayer::new(&config.cache));
    let engine = Arc::new(PunishmentEngine::new(
        &config,
        cache,
        Collaborators {
            store: Arc::new(MemoryStore::new()),
            directory,
            enforcer: Arc::new(RecordingEnforcer::new()),
            presence: Arc::new(MemoryPresence::new()),
            broadcaster,
            transport,
        },
    ));

    let sync_tasks = spawn_receiver(engine.clone(), inbound);
    info!("Network receiver started");

    let reminder = if config.broadcast.observer_ban_overlay {
        Some(spawn_ban_reminder(
            engine.clone(),
            config.broadcast.reminder_interval,
        ))
    } else {
        None
    };

    let app = create_router(ModerationApiState {
        engine: engine.clone(),
    })
    .layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Moderation admin API listening on {}", bind_addr);

    let served = axum::serve(listener, app).await;

    sync_tasks.abort();
    if let Some(reminder) = reminder {
        reminder.abort();
    }

    served?;
    Ok(())
}

/// Initialize the fmt subscriber from the configured level
fn init_logging(config: &ModerationConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
