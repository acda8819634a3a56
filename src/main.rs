//! AI Quota Monitor — Binary Entrypoint
//! Boots the local ingestion server, the fetch orchestrator, and the
//! dashboard consumer loop. Rendering is handled by the widget layer on
//! top of this core; here the dashboard state is surfaced via tracing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ai_quota_monitor::config;
use ai_quota_monitor::sources::{browser::BrowserSource, openai_api::OpenAiApiSource};
use ai_quota_monitor::{
    Dashboard, DataSource, FetchOrchestrator, IngestServer, RefreshSequencer, VersionedStore,
};

/// How often the dashboard owner drains the result queue.
const DRAIN_INTERVAL: Duration = Duration::from_millis(200);

/// Delay before startup priming, so "waiting for data" states render right
/// after the server had a chance to come up.
const PRIME_DELAY: Duration = Duration::from_millis(250);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ai_quota_monitor=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op elsewhere.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default()?;

    let store = Arc::new(VersionedStore::new());
    let sequencer = Arc::new(RefreshSequencer::new());
    let server = Arc::new(IngestServer::new(Arc::clone(&store), Arc::clone(&sequencer)));
    // A failed bind is tolerated: the dashboard still runs, browser cards
    // just report that the local server is down.
    server.start(cfg.server_port).await;

    let mut sources: Vec<Arc<dyn DataSource>> = BrowserSource::defaults(&server);
    sources.push(Arc::new(OpenAiApiSource::new()));
    let source_keys: Vec<String> = sources.iter().map(|s| s.source_key().to_string()).collect();

    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = Arc::new(FetchOrchestrator::new(
        Arc::clone(&server),
        sources,
        cfg.clone(),
        tx,
    ));
    let mut dashboard = Dashboard::new(rx, &source_keys);

    let watcher = Arc::clone(&orchestrator).spawn_change_watcher();

    // Initial refresh, then prime the push-fed cards once.
    let launched = orchestrator.refresh_all();
    dashboard.mark_loading(&launched);
    tokio::time::sleep(PRIME_DELAY).await;
    orchestrator.prime();

    let mut drain = tokio::time::interval(DRAIN_INTERVAL);
    let mut auto = tokio::time::interval(Duration::from_secs(
        cfg.auto_refresh_minutes_clamped() * 60,
    ));
    auto.tick().await; // the first tick fires immediately; we already refreshed

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = drain.tick() => {
                dashboard.tick();
            }
            _ = auto.tick() => {
                let launched = orchestrator.refresh_all();
                dashboard.mark_loading(&launched);
            }
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    watcher.abort();
    server.stop().await;
    Ok(())
}
