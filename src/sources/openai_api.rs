// src/sources/openai_api.rs
//
// Pull source: queries the OpenAI dashboard billing endpoints directly.
// Each endpoint failure is tolerated and recorded in the payload so a
// partially reachable dashboard still renders something useful.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde_json::{Map, Value};

use crate::config::SourceConfig;
use crate::sources::{DataSource, FetchResult};

const BASE_URL: &str = "https://api.openai.com/v1/dashboard/billing";
const REQUEST_TIMEOUT_SECS: u64 = 10;

pub struct OpenAiApiSource {
    client: reqwest::Client,
    base_url: String,
}

impl Default for OpenAiApiSource {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiApiSource {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get_json(&self, path: &str, api_key: &str, query: &[(&str, String)]) -> Result<(u16, Value)> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(api_key)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }
}

#[async_trait::async_trait]
impl DataSource for OpenAiApiSource {
    fn name(&self) -> &str {
        "OpenAI API"
    }

    fn source_key(&self) -> &str {
        "openai_api"
    }

    async fn fetch(&self, config: &SourceConfig) -> Result<FetchResult> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Ok(FetchResult::err(self.name(), "API key not configured"));
        }

        let mut data = Map::new();
        let now = Utc::now();

        // Credit grants / remaining balance.
        match self.get_json("/credit_grants", api_key, &[]).await {
            Ok((401, _)) => return Ok(FetchResult::err(self.name(), "invalid API key")),
            Ok((200, grants)) => {
                for k in ["total_granted", "total_used", "total_available"] {
                    data.insert(k.into(), grants.get(k).cloned().unwrap_or(0.into()));
                }
                data.insert("has_credits".into(), true.into());
            }
            Ok((404, _)) => {
                // No credit grants; likely pay-as-you-go.
                data.insert("has_credits".into(), false.into());
            }
            Ok(_) => {}
            Err(e) => {
                data.insert("credits_error".into(), format!("{e:#}").into());
            }
        }

        // Subscription plan and limits.
        match self.get_json("/subscription", api_key, &[]).await {
            Ok((200, sub)) => {
                let plan = sub
                    .pointer("/plan/title")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown");
                data.insert("plan".into(), plan.into());
                data.insert(
                    "has_payment_method".into(),
                    sub.get("has_payment_method").cloned().unwrap_or(false.into()),
                );
                for k in ["hard_limit_usd", "soft_limit_usd"] {
                    if let Some(v) = sub.get(k).and_then(Value::as_f64) {
                        data.insert(k.into(), v.into());
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                data.insert("subscription_error".into(), format!("{e:#}").into());
            }
        }

        // Usage for the current month (reported in cents).
        let start_date = now.format("%Y-%m-01").to_string();
        let end_date = (now + Duration::days(1)).format("%Y-%m-%d").to_string();
        match self
            .get_json(
                "/usage",
                api_key,
                &[("start_date", start_date.clone()), ("end_date", end_date)],
            )
            .await
        {
            Ok((200, usage)) => {
                let total_cents = usage
                    .get("total_usage")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                data.insert("month_usage_usd".into(), (total_cents / 100.0).into());
                data.insert("month_start".into(), start_date.into());
            }
            Ok(_) => {}
            Err(e) => {
                data.insert("usage_error".into(), format!("{e:#}").into());
            }
        }

        if data.is_empty() {
            return Ok(FetchResult::err(self.name(), "no data available"));
        }
        Ok(FetchResult::ok(self.name(), data))
    }
}
