use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use taowatch::config::Config;
use taowatch::monitor::{seed_baseline, MonitorContext, MonitorController};
use taowatch::notify::{NotificationLog, XApiNotifier};
use taowatch::server::{self, AppState};
use taowatch::taostats::TaostatsClient;
use taowatch::tracker::{cache::SNAPSHOT_TTL, LastKnownState, SnapshotCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = if Path::new("taowatch.toml").exists() {
        Config::load(Path::new("taowatch.toml"))?
    } else {
        info!("no taowatch.toml found, using env-only config");
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("taowatch v{} starting", env!("CARGO_PKG_VERSION"));

    if config.taostats.address.is_empty() {
        anyhow::bail!("no tracked address configured (set TRACKED_ADDRESS or [taostats].address)");
    }
    if !config.has_api_key() {
        warn!("no Taostats API key configured - feed requests will likely be rejected");
    }
    if !config.has_notifier_token() {
        warn!(
            "no X access token configured - enable test_mode or posts will fail \
             (set X_ACCESS_TOKEN)"
        );
    }

    // --- Shared engine state ---
    let source = Arc::new(TaostatsClient::new(
        config.taostats.base_url.clone(),
        config.taostats.api_key.clone(),
        config.taostats.network.clone(),
        config.taostats.address.clone(),
        config.taostats.page_limit,
    ));
    let notifier = Arc::new(XApiNotifier::new(
        config.notifier.base_url.clone(),
        config.notifier.access_token.clone(),
    ));

    let ctx = MonitorContext {
        source,
        notifier,
        known: Arc::new(LastKnownState::new()),
        settings: Arc::new(Mutex::new(config.monitor.initial_settings())),
        history: Arc::new(Mutex::new(NotificationLog::new())),
        treasury: config.taostats.treasury.clone(),
        tracked: config.taostats.address.clone(),
    };

    let cache = Arc::new(SnapshotCache::new(
        SNAPSHOT_TTL,
        config.taostats.treasury.clone(),
        config.taostats.address.clone(),
    ));

    // --- Monitor ---
    let controller = Arc::new(MonitorController::new(ctx.clone()));
    if config.monitor.enabled {
        info!("seeding transfer baseline before monitoring starts");
        seed_baseline(&ctx).await;
        controller.start().await;
    } else {
        info!("transfer monitor disabled by config");
    }

    // --- API server ---
    let state = AppState {
        cache,
        controller: controller.clone(),
    };
    let bind_addr = config.server.bind_addr.clone();
    let serve_result = server::serve(state, &bind_addr).await;

    // Server exit takes the monitor down with it.
    controller.stop().await;

    serve_result
}
