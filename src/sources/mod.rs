// src/sources/mod.rs
pub mod browser;
pub mod openai_api;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::config::SourceConfig;

/// Outcome of one data-source invocation. Exactly one of `data`/`error` is
/// meaningful, per the `success` flag.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FetchResult {
    pub service_name: String,
    pub success: bool,
    pub data: Map<String, Value>,
    pub error: Option<String>,
}

impl FetchResult {
    pub fn ok(service_name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            service_name: service_name.into(),
            success: true,
            data,
            error: None,
        }
    }

    pub fn err(service_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            success: false,
            data: Map::new(),
            error: Some(msg.into()),
        }
    }
}

/// One update flowing from a worker task to the dashboard owner.
#[derive(Debug, Clone)]
pub struct SourceUpdate {
    pub source_key: String,
    pub result: FetchResult,
}

/// A named unit of work producing quota/usage data for one monitored
/// service or page. Vendor-specific parsing stays behind this boundary.
///
/// `fetch` should return `Err` only for genuinely unexpected failures; the
/// orchestrator converts anything escaping it (including panics) into a
/// `FetchResult` failure, so one broken source never affects another.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Display identity, e.g. "OpenAI Billing (browser)".
    fn name(&self) -> &str;

    /// Stable store key for this source, e.g. "openai_billing".
    fn source_key(&self) -> &str;

    /// Push-fed sources read the ingestion store instead of calling out;
    /// they are driven by the change watcher, not by refresh-all.
    fn is_push_fed(&self) -> bool {
        false
    }

    async fn fetch(&self, config: &SourceConfig) -> Result<FetchResult>;
}
