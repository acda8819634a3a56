//! dashboard.rs — the single-owner consumer side of the result queue.
//!
//! Exactly one task owns a `Dashboard`; worker tasks only reach it through
//! the queue. `tick` never waits: it drains whatever is ready and returns,
//! so the owning task is free to run its timers.

use std::collections::BTreeMap;

use chrono::Local;
use tokio::sync::mpsc;

use crate::sources::{FetchResult, SourceUpdate};

#[derive(Debug, Clone, PartialEq)]
pub enum CardState {
    /// No fetch has run for this source yet.
    Idle,
    Loading,
    Ready(FetchResult),
    Failed(FetchResult),
}

impl CardState {
    pub fn is_loading(&self) -> bool {
        matches!(self, CardState::Loading)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverallStatus {
    /// Any card still waiting on a fetch.
    pub busy: bool,
    /// Wall-clock time of the last tick where everything had settled.
    pub last_updated: Option<String>,
}

pub struct Dashboard {
    rx: mpsc::UnboundedReceiver<SourceUpdate>,
    cards: BTreeMap<String, CardState>,
    overall: OverallStatus,
}

impl Dashboard {
    pub fn new(rx: mpsc::UnboundedReceiver<SourceUpdate>, source_keys: &[String]) -> Self {
        let cards = source_keys
            .iter()
            .map(|k| (k.clone(), CardState::Idle))
            .collect();
        Self {
            rx,
            cards,
            overall: OverallStatus::default(),
        }
    }

    /// Mark the given cards as loading (called on the owner task when a
    /// refresh is launched, before any result can arrive).
    pub fn mark_loading(&mut self, keys: &[String]) {
        for k in keys {
            self.cards.insert(k.clone(), CardState::Loading);
        }
        self.overall.busy = true;
    }

    /// Drain the queue without waiting and apply each result exactly once.
    /// Returns the number of updates applied.
    pub fn tick(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.rx.try_recv() {
            self.apply(update);
            applied += 1;
        }

        let busy = self.cards.values().any(CardState::is_loading);
        self.overall.busy = busy;
        if applied > 0 && !busy {
            let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            tracing::info!(last_updated = %now, "all sources settled");
            self.overall.last_updated = Some(now);
        }
        applied
    }

    fn apply(&mut self, update: SourceUpdate) {
        let SourceUpdate { source_key, result } = update;
        if result.success {
            tracing::debug!(source = %source_key, service = %result.service_name, "source updated");
            self.cards.insert(source_key, CardState::Ready(result));
        } else {
            tracing::debug!(
                source = %source_key,
                service = %result.service_name,
                error = result.error.as_deref().unwrap_or(""),
                "source unavailable"
            );
            self.cards.insert(source_key, CardState::Failed(result));
        }
    }

    pub fn card(&self, key: &str) -> Option<&CardState> {
        self.cards.get(key)
    }

    pub fn cards(&self) -> &BTreeMap<String, CardState> {
        &self.cards
    }

    pub fn overall(&self) -> &OverallStatus {
        &self.overall
    }

    pub fn result_for(&self, key: &str) -> Option<&FetchResult> {
        match self.cards.get(key)? {
            CardState::Ready(r) | CardState::Failed(r) => Some(r),
            _ => None,
        }
    }
}
