use std::sync::Arc;

use anyhow::Context;
use partycache::{MediaCacheConfigExt, MediaCacheExt};
use partyconfig::get_config;
use partyplayer::{AdminConsole, PartyController, PartyPlayerExt, PlayerConfigExt};
use partyqueue::QueueConfigExt;
use partyserver::ServerBuilder;
use partysource::{CatalogSource, SourceRegistry};
use partystream::{LiveBroadcast, PartyStreamExt, ProxyStreamer, StreamConfigExt, StreamTokens};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config();

    // ========== PHASE 1 : Serveur et logs ==========

    let mut server = ServerBuilder::new_configured().build();
    server.init_logging().await;
    let shutdown = server.shutdown_token();

    server
        .add_route("/info", || async {
            serde_json::json!({"name": "MusicParty", "version": env!("CARGO_PKG_VERSION")})
        })
        .await;

    // ========== PHASE 2 : Sources, cache, file ==========

    info!("🎵 Loading track catalog...");
    let catalog = CatalogSource::from_config()
        .await
        .context("cannot load the track catalog")?;
    let mut sources = SourceRegistry::new();
    sources.register(Arc::new(catalog));
    info!("✅ {} platform(s) registered", sources.platforms().len());

    let cache = config
        .create_media_cache()
        .context("cannot initialize the media cache")?;
    cache.spawn_worker(shutdown.clone());

    let queue = Arc::new(config.create_queue_scheduler());

    // ========== PHASE 3 : Lecteur et diffusion ==========

    let controller = PartyController::new(
        config.player_settings(),
        sources,
        queue,
        Some(cache.clone()),
    );
    controller.spawn_tasks(shutdown.clone());

    let proxy = ProxyStreamer::new(config.proxy_settings())?;
    proxy.spawn_binder(controller.clone(), shutdown.clone());

    let live = LiveBroadcast::new(config.transcoder_settings(), controller.clone());
    live.spawn(shutdown.clone());

    let tokens = Arc::new(StreamTokens::new(config.token_settings()));
    tokens.spawn_cleanup(shutdown.clone());

    let password = config.get_admin_password();
    if password.is_empty() {
        warn!("⚠️ No admin password configured, admin commands are disabled");
    }
    let admin = Arc::new(AdminConsole::new(controller.clone(), password).with_broadcast(live.clone()));

    // ========== PHASE 4 : Routes ==========

    server.init_media_cache(cache).await;
    server.init_party_player(controller, admin).await;
    server.init_party_stream(proxy, live, tokens).await;

    info!("🌐 Starting HTTP server...");
    server.start().await?;

    info!("✅ MusicParty is ready!");
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    shutdown.cancel();
    Ok(())
}
