// tests/browser_sources.rs
//
// Push-fed source behavior against the real store and server lifecycle:
// "server down" vs "waiting for browser" vs data with display annotations.

use std::sync::Arc;

use serde_json::json;

use ai_quota_monitor::config::SourceConfig;
use ai_quota_monitor::sources::browser::BrowserSource;
use ai_quota_monitor::{DataSource, IngestServer, RefreshSequencer, VersionedStore};

fn make_server() -> Arc<IngestServer> {
    let store = Arc::new(VersionedStore::new());
    let sequencer = Arc::new(RefreshSequencer::new());
    Arc::new(IngestServer::new(store, sequencer))
}

#[tokio::test]
async fn no_data_and_server_down_reports_server_state() {
    let server = make_server();
    let source = BrowserSource::new("openai_billing", "OpenAI Billing (browser)", server);

    let result = source.fetch(&SourceConfig::default()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("local server not running"));
}

#[tokio::test]
async fn no_data_with_server_up_is_a_waiting_state() {
    let server = make_server();
    // Port 0 binds an ephemeral loopback port; good enough for lifecycle.
    assert!(server.start(0).await);
    assert!(server.is_running());
    let port = server.port().expect("running server reports its port");
    assert_ne!(port, 0, "the actually bound port, not the requested one");

    let source = BrowserSource::new(
        "openai_billing",
        "OpenAI Billing (browser)",
        Arc::clone(&server),
    );
    let result = source.fetch(&SourceConfig::default()).await.unwrap();
    assert!(!result.success);
    let msg = result.error.as_deref().unwrap();
    assert!(
        msg.contains("waiting for browser connection"),
        "waiting state must be distinguishable from a hard failure: {msg}"
    );

    server.stop().await;
    assert!(!server.is_running());
    assert_eq!(server.port(), None);
    // stop() is safe to call again when not running.
    server.stop().await;
}

#[tokio::test]
async fn ingested_data_is_annotated_with_display_time() {
    let server = make_server();
    server
        .store()
        .put("claude_usage", json!({"source": "claude_usage", "used_pct": 40}).as_object().cloned().unwrap());

    let source = BrowserSource::new("claude_usage", "Claude.ai Usage (browser)", server);
    let result = source.fetch(&SourceConfig::default()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.data.get("used_pct"), Some(&json!(40)));
    let shown = result
        .data
        .get("updated_at")
        .and_then(|v| v.as_str())
        .expect("updated_at display time");
    assert_eq!(shown.len(), 8, "HH:MM:SS, got {shown}");
    assert!(
        result.data.get("stale_warning").is_none(),
        "fresh data carries no staleness warning"
    );
}

#[tokio::test]
async fn default_set_covers_the_four_monitored_pages() {
    let server = make_server();
    let sources = BrowserSource::defaults(&server);
    let keys: Vec<&str> = sources.iter().map(|s| s.source_key()).collect();
    assert_eq!(
        keys,
        vec!["openai_billing", "claude_usage", "claude_billing", "github_copilot"]
    );
    assert!(sources.iter().all(|s| s.is_push_fed()));
}
