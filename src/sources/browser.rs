// src/sources/browser.rs
//
// Push-fed sources: the data arrives via the local ingestion server (a
// browser userscript POSTs snapshots of the monitored page), so `fetch`
// only reads the store and annotates the latest snapshot.

use std::sync::Arc;

use anyhow::Result;

use crate::config::SourceConfig;
use crate::server::IngestServer;
use crate::sources::{DataSource, FetchResult};
use crate::staleness;

/// `(store source key, display name)` for the four monitored pages. The
/// store key is the contract with the userscript.
pub const BROWSER_SOURCES: &[(&str, &str)] = &[
    ("openai_billing", "OpenAI Billing (browser)"),
    ("claude_usage", "Claude.ai Usage (browser)"),
    ("claude_billing", "Claude API Billing (browser)"),
    ("github_copilot", "GitHub Copilot (browser)"),
];

pub struct BrowserSource {
    key: String,
    display_name: String,
    server: Arc<IngestServer>,
}

impl BrowserSource {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>, server: Arc<IngestServer>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            server,
        }
    }

    /// The standard set of browser sources.
    pub fn defaults(server: &Arc<IngestServer>) -> Vec<Arc<dyn DataSource>> {
        BROWSER_SOURCES
            .iter()
            .map(|(key, name)| {
                Arc::new(BrowserSource::new(*key, *name, Arc::clone(server))) as Arc<dyn DataSource>
            })
            .collect()
    }

    fn not_connected(&self) -> FetchResult {
        if !self.server.is_running() {
            FetchResult::err(&self.display_name, "local server not running")
        } else {
            FetchResult::err(
                &self.display_name,
                "waiting for browser connection...\nopen the monitored page (with the userscript installed)",
            )
        }
    }
}

#[async_trait::async_trait]
impl DataSource for BrowserSource {
    fn name(&self) -> &str {
        &self.display_name
    }

    fn source_key(&self) -> &str {
        &self.key
    }

    fn is_push_fed(&self) -> bool {
        true
    }

    async fn fetch(&self, _config: &SourceConfig) -> Result<FetchResult> {
        let Some(entry) = self.server.store().get(&self.key) else {
            return Ok(self.not_connected());
        };

        let mut data = entry.payload;
        data.insert(
            "updated_at".to_string(),
            staleness::ts_display(&entry.received_at).into(),
        );
        if let Some(warn) = staleness::stale_warning(&entry.received_at) {
            data.insert("stale_warning".to_string(), warn.into());
        }

        Ok(FetchResult::ok(&self.display_name, data))
    }
}
