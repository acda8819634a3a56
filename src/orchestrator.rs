//! orchestrator.rs — concurrent fetch orchestration.
//!
//! One independent task per triggered source; failures (including panics)
//! become `FetchResult` failures so no source can take down another or the
//! dashboard. Exactly one update is queued per invocation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::server::IngestServer;
use crate::sources::{DataSource, FetchResult, SourceUpdate};

/// How often the change watcher compares store timestamps.
pub const CHANGE_WATCH_INTERVAL: Duration = Duration::from_millis(1500);

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_results_total", "Fetch invocations completed.");
        describe_counter!(
            "fetch_failures_total",
            "Fetch invocations converted to failure results."
        );
    });
}

pub struct FetchOrchestrator {
    server: Arc<IngestServer>,
    sources: Vec<Arc<dyn DataSource>>,
    config: AppConfig,
    tx: mpsc::UnboundedSender<SourceUpdate>,
    // Keys with a fetch currently in flight; prevents the change watcher
    // from double-spawning while a result is still pending.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl FetchOrchestrator {
    pub fn new(
        server: Arc<IngestServer>,
        sources: Vec<Arc<dyn DataSource>>,
        config: AppConfig,
        tx: mpsc::UnboundedSender<SourceUpdate>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            server,
            sources,
            config,
            tx,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Explicit refresh: fire every enabled pull source and bump the
    /// refresh sequence so push-fed browser clients re-submit too.
    /// Returns the keys actually launched, so the dashboard owner can mark
    /// those cards as loading.
    pub fn refresh_all(&self) -> Vec<String> {
        self.server.sequencer().request_refresh();

        let mut launched = Vec::new();
        for source in &self.sources {
            if source.is_push_fed() {
                continue; // driven by the change watcher
            }
            if !self.config.is_enabled(source.source_key()) {
                continue;
            }
            if self.trigger(source) {
                launched.push(source.source_key().to_string());
            }
        }
        launched
    }

    /// Startup priming: one fetch per enabled push-fed source, so cards
    /// show a "waiting for data" state instead of staying blank until the
    /// first ingestion.
    pub fn prime(&self) {
        for source in &self.sources {
            if source.is_push_fed() && self.config.is_enabled(source.source_key()) {
                self.trigger(source);
            }
        }
    }

    /// One pass of the change watcher: re-fire any push-fed source whose
    /// stored `received_at` differs from the last value we observed.
    /// Returns how many fetches were triggered.
    pub fn scan_changes(&self, last_seen: &mut HashMap<String, String>) -> usize {
        let mut triggered = 0;
        for source in &self.sources {
            if !source.is_push_fed() {
                continue;
            }
            let key = source.source_key();
            if !self.config.is_enabled(key) {
                continue;
            }
            let Some(entry) = self.server.store().get(key) else {
                continue;
            };
            if last_seen.get(key) != Some(&entry.received_at) {
                // Only record the stamp once a fetch actually launched;
                // a change landing while a fetch is in flight stays
                // pending and is retried on the next tick.
                if self.trigger(source) {
                    last_seen.insert(key.to_string(), entry.received_at.clone());
                    triggered += 1;
                }
            }
        }
        triggered
    }

    /// Low-frequency loop around `scan_changes`.
    pub fn spawn_change_watcher(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_seen: HashMap<String, String> = HashMap::new();
            let mut ticker = tokio::time::interval(CHANGE_WATCH_INTERVAL);
            loop {
                ticker.tick().await;
                let n = self.scan_changes(&mut last_seen);
                if n > 0 {
                    tracing::debug!(triggered = n, "browser data changed");
                }
            }
        })
    }

    /// Launch one fetch for `source` unless one is already in flight for
    /// its key. The fetch runs in its own task; a panic surfaces as a
    /// `JoinError` and is converted like any other failure.
    pub fn trigger(&self, source: &Arc<dyn DataSource>) -> bool {
        let key = source.source_key().to_string();
        {
            let mut guard = self.in_flight.lock().expect("in-flight mutex poisoned");
            if !guard.insert(key.clone()) {
                return false;
            }
        }

        let cfg = self.config.source(&key);
        let tx = self.tx.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let source = Arc::clone(source);

        tokio::spawn(async move {
            let name = source.name().to_string();
            let worker = {
                let source = Arc::clone(&source);
                let cfg = cfg.clone();
                tokio::spawn(async move { source.fetch(&cfg).await })
            };

            let result = match worker.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    counter!("fetch_failures_total").increment(1);
                    tracing::warn!(source = %key, error = ?e, "fetch failed");
                    FetchResult::err(&name, format!("{e:#}"))
                }
                Err(join_err) => {
                    counter!("fetch_failures_total").increment(1);
                    tracing::warn!(source = %key, error = %join_err, "fetch task aborted");
                    FetchResult::err(&name, format!("fetch task failed: {join_err}"))
                }
            };
            counter!("fetch_results_total").increment(1);

            in_flight
                .lock()
                .expect("in-flight mutex poisoned")
                .remove(&key);
            // The dashboard owner may be gone during shutdown; dropping the
            // update then is fine.
            let _ = tx.send(SourceUpdate {
                source_key: key,
                result,
            });
        });
        true
    }
}
