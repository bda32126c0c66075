//! apt-exporter-core — package state collection for the APT exporter.
//!
//! Provides:
//! - `parser` — `apt list` output → `PackageRecord`s
//! - `cache` — last-known-good snapshot per listing kind
//! - `collector` — filesystem and package-listing abstractions (real + mock)
//! - `watcher` — polling filesystem watcher producing change events
//! - `refresh` — maps watch events to cache refreshes
//! - `metrics` — Prometheus collector reading the cache on every scrape
//! - `config` — well-known APT paths

pub mod cache;
pub mod collector;
pub mod config;
pub mod metrics;
pub mod model;
pub mod parser;
pub mod refresh;
pub mod watcher;

pub use cache::SnapshotCache;
pub use config::AptPaths;
pub use metrics::AptMetrics;
pub use model::{ListingKind, PackageRecord, Snapshot};
pub use refresh::{RefreshAction, RefreshTrigger, StartupError};
pub use watcher::{ChangeKind, FsEvent, WatchError, WatchStream, Watcher};

/// Crate version, shared by the exporter binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
