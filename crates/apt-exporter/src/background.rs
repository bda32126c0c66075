//! Background processing: startup refresh, event-driven refresh loop, shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use apt_exporter_core::collector::{AptLister, RealFs};
use apt_exporter_core::{RefreshTrigger, StartupError, Watcher};

/// Running refresh machinery: the poller and the loop consuming its events.
pub(crate) struct Refresher {
    watcher: Watcher<RealFs>,
    task: JoinHandle<()>,
}

impl Refresher {
    /// Populates the cache, registers the signal paths and starts the
    /// refresh loop. Must run on the multi-threaded runtime.
    pub(crate) fn start(
        trigger: Arc<RefreshTrigger<AptLister>>,
        poll_interval: Duration,
    ) -> Result<Self, StartupError> {
        let (watcher, stream) = Watcher::spawn(RealFs::new(), poll_interval);

        // The initial listings run apt twice; keep other tasks moving meanwhile.
        tokio::task::block_in_place(|| trigger.start(&watcher))?;
        info!(
            history_log = %trigger.paths().history_log.display(),
            periodic_dir = %trigger.paths().periodic_dir.display(),
            interval_ms = poll_interval.as_millis() as u64,
            "watching for package changes"
        );

        let task = tokio::spawn(trigger.run(stream));
        Ok(Self { watcher, task })
    }

    /// Stops polling and waits for an in-flight refresh to finish.
    pub(crate) async fn stop(self) {
        self.watcher.close();
        if let Err(e) = self.task.await {
            warn!(error = %e, "refresh loop ended abnormally");
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
