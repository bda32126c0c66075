//! Shared application state and the global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use axum::extract::State;
use prometheus::Registry;

use apt_exporter_core::SnapshotCache;

pub(crate) struct WebAppInner {
    /// Holds the `AptMetrics` collector.
    pub(crate) registry: Registry,
    pub(crate) telemetry_path: String,
    // Read-only here; the refresh loop is the only writer.
    pub(crate) cache: SnapshotCache,
}

pub(crate) type SharedState = Arc<WebAppInner>;

pub(crate) type AppState = State<SharedState>;
