//! store.rs — in-memory versioned store for browser-pushed snapshots, plus
//! the refresh sequence the poll protocol is built on.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{Local, SecondsFormat};
use serde::Serialize;
use serde_json::{Map, Value};

/// Latest snapshot received for one `source_key`. The payload keeps the
/// ingested object verbatim with `received_at` merged in; the field mirrors
/// that stamp for quick access without a map lookup.
#[derive(Debug, Clone, Serialize)]
pub struct StoreEntry {
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(skip)]
    pub received_at: String,
}

/// Thread-safe map `source_key -> StoreEntry`. Writers are the ingestion
/// server's handlers; readers are the orchestrator and the browser sources.
/// Entries are wholly replaced on each put and live for the process lifetime.
#[derive(Debug, Default)]
pub struct VersionedStore {
    inner: Mutex<BTreeMap<String, StoreEntry>>,
}

impl VersionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `received_at` with the current local time and replace any
    /// existing entry for `source_key`. Safe under arbitrary concurrent
    /// callers; the critical section is a single map insert.
    pub fn put(&self, source_key: &str, mut payload: Map<String, Value>) {
        let stamp = now_stamp();
        payload.insert("received_at".to_string(), Value::String(stamp.clone()));
        let entry = StoreEntry {
            payload,
            received_at: stamp,
        };
        let mut map = self.inner.lock().expect("store mutex poisoned");
        map.insert(source_key.to_string(), entry);
    }

    pub fn get(&self, source_key: &str) -> Option<StoreEntry> {
        let map = self.inner.lock().expect("store mutex poisoned");
        map.get(source_key).cloned()
    }

    /// Point-in-time copy of the whole store (diagnostics, /status).
    pub fn get_all(&self) -> BTreeMap<String, StoreEntry> {
        let map = self.inner.lock().expect("store mutex poisoned");
        map.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now_stamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Monotonically increasing refresh epoch. The server cannot push to the
/// browser clients, so they short-poll `/poll?seq=N`; a strictly greater
/// sequence means "re-fetch your page data and re-submit".
#[derive(Debug, Default)]
pub struct RefreshSequencer {
    seq: AtomicU64,
}

impl RefreshSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the UI side to tell all browser clients to re-fetch now.
    pub fn request_refresh(&self) {
        self.seq.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}
