// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod dashboard;
pub mod orchestrator;
pub mod server;
pub mod sources;
pub mod staleness;
pub mod store;

// ---- Re-exports for stable public API ----
// Convenient router access: `crate_root::server::router` and `crate_root::router`
pub use crate::server::{router, IngestServer};

pub use crate::dashboard::{CardState, Dashboard, OverallStatus};
pub use crate::orchestrator::FetchOrchestrator;
pub use crate::sources::{DataSource, FetchResult, SourceUpdate};
pub use crate::store::{RefreshSequencer, StoreEntry, VersionedStore};
