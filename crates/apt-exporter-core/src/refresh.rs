//! Keeps the snapshot cache current.
//!
//! `RefreshTrigger` runs the package listing command, parses it and stores
//! the result. It is driven once at startup and afterwards by filesystem
//! events:
//!
//! | event on                               | refreshes               |
//! |----------------------------------------|-------------------------|
//! | history log                            | installed + upgradeable |
//! | `update-stamp`, `update-success-stamp` | upgradeable             |
//! | anything else                          | nothing                 |

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::cache::SnapshotCache;
use crate::collector::{FileSystem, ListError, PackageLister};
use crate::config::AptPaths;
use crate::model::{ListingKind, Snapshot};
use crate::parser::parse_apt_output;
use crate::watcher::{FsEvent, WatchError, WatchStream, Watcher};

/// What a filesystem event asks to be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshAction {
    /// A package operation ran: both listings may have changed.
    All,
    /// APT refreshed its package lists: only upgradeable may have changed.
    UpgradeableOnly,
}

impl RefreshAction {
    pub fn kinds(self) -> &'static [ListingKind] {
        match self {
            RefreshAction::All => &ListingKind::ALL,
            RefreshAction::UpgradeableOnly => &[ListingKind::Upgradeable],
        }
    }
}

/// Failure of the startup sequence. The exporter cannot serve without it.
#[derive(Debug)]
pub enum StartupError {
    Refresh {
        kind: ListingKind,
        source: ListError,
    },
    Watch(WatchError),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Refresh { kind, source } => {
                write!(f, "initial {} refresh failed: {}", kind, source)
            }
            StartupError::Watch(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::Refresh { source, .. } => Some(source),
            StartupError::Watch(e) => Some(e),
        }
    }
}

impl From<WatchError> for StartupError {
    fn from(e: WatchError) -> Self {
        StartupError::Watch(e)
    }
}

/// Sole writer of the snapshot cache.
pub struct RefreshTrigger<L> {
    lister: L,
    cache: SnapshotCache,
    paths: AptPaths,
}

impl<L: PackageLister> RefreshTrigger<L> {
    pub fn new(lister: L, cache: SnapshotCache, paths: AptPaths) -> Self {
        Self {
            lister,
            cache,
            paths,
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn paths(&self) -> &AptPaths {
        &self.paths
    }

    /// Re-lists `kind` and replaces its snapshot.
    ///
    /// On error the cache is left untouched. Blocks for as long as the
    /// listing command runs.
    pub fn refresh(&self, kind: ListingKind) -> Result<usize, ListError> {
        let t0 = Instant::now();
        let raw = self.lister.list(kind)?;
        let snapshot = Snapshot::new(kind, parse_apt_output(&raw));
        let packages = snapshot.records.len();
        let series = snapshot.suite_entries();
        self.cache.set(snapshot);

        info!(
            %kind,
            packages,
            series,
            duration_ms = t0.elapsed().as_millis() as u64,
            "cached packages"
        );
        Ok(packages)
    }

    pub fn refresh_installed(&self) -> Result<usize, ListError> {
        self.refresh(ListingKind::Installed)
    }

    pub fn refresh_upgradeable(&self) -> Result<usize, ListError> {
        self.refresh(ListingKind::Upgradeable)
    }

    /// Initial population: each listing is refreshed, then the path that
    /// signals its future changes is registered. Any failure is fatal.
    pub fn start<F: FileSystem + 'static>(&self, watcher: &Watcher<F>) -> Result<(), StartupError> {
        for (kind, signal) in [
            (ListingKind::Installed, &self.paths.history_log),
            (ListingKind::Upgradeable, &self.paths.periodic_dir),
        ] {
            self.refresh(kind)
                .map_err(|source| StartupError::Refresh { kind, source })?;
            watcher.add(signal)?;
        }

        Ok(())
    }

    /// Maps a changed path to the refresh it calls for.
    pub fn action_for(&self, path: &Path) -> Option<RefreshAction> {
        if path == self.paths.history_log {
            Some(RefreshAction::All)
        } else if self.paths.is_periodic_stamp(path) {
            Some(RefreshAction::UpgradeableOnly)
        } else {
            None
        }
    }

    /// Runs the refreshes `action` calls for. Failures are logged; stale
    /// snapshots stay in place.
    pub fn apply(&self, action: RefreshAction) {
        for &kind in action.kinds() {
            if let Err(e) = self.refresh(kind) {
                error!(%kind, error = %e, "refresh failed, keeping previous snapshot");
            }
        }
    }

    /// Reacts to one watch event. Returns the action taken, if any.
    pub fn handle_event(&self, event: &FsEvent) -> Option<RefreshAction> {
        let Some(action) = self.action_for(&event.path) else {
            debug!(path = %event.path.display(), "ignoring change");
            return None;
        };
        debug!(path = %event.path.display(), kind = ?event.kind, ?action, "change detected");
        self.apply(action);
        Some(action)
    }
}

impl<L: PackageLister + 'static> RefreshTrigger<L> {
    /// Consumes watch events until the event channel closes. A closed error
    /// channel only stops error reporting.
    ///
    /// Refreshes run on the blocking pool one at a time, so at most one
    /// listing command is in flight and async workers are never held by it.
    pub async fn run(self: Arc<Self>, mut stream: WatchStream) {
        let mut errors_open = true;
        loop {
            tokio::select! {
                event = stream.events.recv() => {
                    let Some(event) = event else { break };
                    let trigger = self.clone();
                    let handled =
                        tokio::task::spawn_blocking(move || trigger.handle_event(&event)).await;
                    if let Err(e) = handled {
                        error!(error = %e, "refresh panicked");
                    }
                }
                err = stream.errors.recv(), if errors_open => match err {
                    Some(err) => warn!(error = %err, "watch error"),
                    None => {
                        debug!("watch error channel closed");
                        errors_open = false;
                    }
                },
            }
        }
        info!("refresh loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{MockFs, MockLister};
    use crate::metrics::AptMetrics;
    use crate::watcher::ChangeKind;
    use prometheus::core::Collector;
    use std::io;
    use std::path::PathBuf;
    use std::time::Duration;

    const INSTALLED: &str = "\
Listing... Done
bash/stable,now 5.2.15-2+b2 amd64 [installed]
nginx/stable,stable-updates 1.18.0 amd64 [installed]
";
    const UPGRADEABLE: &str = "\
Listing... Done
nginx/stable-updates 1.18.1 amd64 [upgradable from: 1.18.0]
";

    fn scripted_lister() -> Arc<MockLister> {
        Arc::new(
            MockLister::new()
                .with_output(ListingKind::Installed, INSTALLED)
                .with_output(ListingKind::Upgradeable, UPGRADEABLE),
        )
    }

    fn trigger(lister: &Arc<MockLister>) -> RefreshTrigger<Arc<MockLister>> {
        RefreshTrigger::new(lister.clone(), SnapshotCache::new(), AptPaths::default())
    }

    fn apt_fs() -> MockFs {
        let paths = AptPaths::default();
        let mut fs = MockFs::new();
        fs.add_file(&paths.history_log, "");
        fs.add_dir(&paths.periodic_dir);
        fs
    }

    fn event(path: impl Into<PathBuf>) -> FsEvent {
        FsEvent {
            path: path.into(),
            kind: ChangeKind::Modified,
        }
    }

    #[test]
    fn test_refresh_populates_cache() {
        let lister = scripted_lister();
        let trigger = trigger(&lister);

        assert_eq!(trigger.refresh_installed().unwrap(), 2);
        assert_eq!(trigger.refresh_upgradeable().unwrap(), 1);

        let installed = trigger.cache().get(ListingKind::Installed).unwrap();
        assert_eq!(installed.kind, ListingKind::Installed);
        assert_eq!(installed.records[1].name, "nginx");
        let upgradeable = trigger.cache().get(ListingKind::Upgradeable).unwrap();
        assert_eq!(upgradeable.records[0].suites, vec!["stable-updates"]);
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let lister = scripted_lister();
        let trigger = trigger(&lister);

        trigger.refresh_installed().unwrap();
        let first = trigger.cache().get(ListingKind::Installed).unwrap();
        trigger.refresh_installed().unwrap();
        let second = trigger.cache().get(ListingKind::Installed).unwrap();

        assert_eq!(first.records, second.records);
    }

    #[test]
    fn test_failed_refresh_keeps_stale_snapshot() {
        let lister = scripted_lister();
        let trigger = trigger(&lister);
        trigger.refresh_installed().unwrap();
        let before = trigger.cache().get(ListingKind::Installed).unwrap();

        lister.fail(ListingKind::Installed);
        assert!(trigger.refresh_installed().is_err());
        trigger.apply(RefreshAction::All);

        let after = trigger.cache().get(ListingKind::Installed).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        // Upgradeable still refreshed by apply()
        assert!(trigger.cache().get(ListingKind::Upgradeable).is_some());
    }

    #[test]
    fn test_action_for_paths() {
        let lister = scripted_lister();
        let trigger = trigger(&lister);

        assert_eq!(
            trigger.action_for(Path::new("/var/log/apt/history.log")),
            Some(RefreshAction::All)
        );
        assert_eq!(
            trigger.action_for(Path::new("/var/lib/apt/periodic/update-stamp")),
            Some(RefreshAction::UpgradeableOnly)
        );
        assert_eq!(
            trigger.action_for(Path::new("/var/lib/apt/periodic/update-success-stamp")),
            Some(RefreshAction::UpgradeableOnly)
        );
        assert_eq!(
            trigger.action_for(Path::new("/var/lib/apt/periodic/unattended-upgrades-stamp")),
            None
        );
        assert_eq!(trigger.action_for(Path::new("/var/log/apt/term.log")), None);
    }

    #[tokio::test]
    async fn test_start_populates_both_kinds() {
        let lister = scripted_lister();
        let trigger = trigger(&lister);
        let (watcher, _stream) = Watcher::spawn(apt_fs(), Duration::from_secs(60));

        trigger.start(&watcher).unwrap();

        assert!(trigger.cache().get(ListingKind::Installed).is_some());
        assert!(trigger.cache().get(ListingKind::Upgradeable).is_some());
        assert_eq!(lister.calls(ListingKind::Installed), 1);
        assert_eq!(lister.calls(ListingKind::Upgradeable), 1);
    }

    #[tokio::test]
    async fn test_start_fails_when_history_log_unwatchable() {
        let lister = scripted_lister();
        let trigger = trigger(&lister);
        let mut fs = apt_fs();
        fs.remove(&trigger.paths().history_log);
        let (watcher, _stream) = Watcher::spawn(fs, Duration::from_secs(60));

        let err = trigger.start(&watcher).unwrap_err();
        assert!(matches!(err, StartupError::Watch(WatchError::Register { .. })));
        // Installed refresh ran before registration, upgradeable never did.
        assert_eq!(lister.calls(ListingKind::Installed), 1);
        assert_eq!(lister.calls(ListingKind::Upgradeable), 0);
    }

    #[tokio::test]
    async fn test_start_fails_on_initial_refresh_error() {
        let lister = scripted_lister();
        lister.fail(ListingKind::Upgradeable);
        let trigger = trigger(&lister);
        let (watcher, _stream) = Watcher::spawn(apt_fs(), Duration::from_secs(60));

        let err = trigger.start(&watcher).unwrap_err();
        assert!(matches!(
            err,
            StartupError::Refresh {
                kind: ListingKind::Upgradeable,
                ..
            }
        ));
        assert!(err.to_string().starts_with("initial upgradeable refresh failed"));
    }

    #[tokio::test]
    async fn test_run_maps_events_to_refreshes() {
        let lister = scripted_lister();
        let trigger = Arc::new(trigger(&lister));
        let (events_tx, errors_tx, stream) = WatchStream::channel();
        let handle = tokio::spawn(trigger.clone().run(stream));

        // history log: both
        events_tx.send(event("/var/log/apt/history.log")).await.unwrap();
        // stamps: upgradeable only
        events_tx
            .send(event("/var/lib/apt/periodic/update-stamp"))
            .await
            .unwrap();
        events_tx
            .send(event("/var/lib/apt/periodic/update-success-stamp"))
            .await
            .unwrap();
        // unrelated: nothing
        events_tx.send(event("/var/log/apt/eipp.log.xz")).await.unwrap();
        // stream errors don't stop the loop
        errors_tx
            .send(WatchError::Poll {
                path: PathBuf::from("/var/lib/apt/periodic"),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            })
            .await
            .unwrap();
        events_tx.send(event("/var/log/apt/history.log")).await.unwrap();

        drop(events_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(lister.calls(ListingKind::Installed), 2);
        assert_eq!(lister.calls(ListingKind::Upgradeable), 4);
    }

    #[tokio::test]
    async fn test_run_continues_after_error_stream_closes() {
        let lister = scripted_lister();
        let trigger = Arc::new(trigger(&lister));
        let (events_tx, errors_tx, stream) = WatchStream::channel();
        drop(errors_tx);
        let handle = tokio::spawn(trigger.clone().run(stream));

        events_tx.send(event("/var/log/apt/history.log")).await.unwrap();
        events_tx
            .send(event("/var/lib/apt/periodic/update-success-stamp"))
            .await
            .unwrap();
        drop(events_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(lister.calls(ListingKind::Installed), 1);
        assert_eq!(lister.calls(ListingKind::Upgradeable), 2);
    }

    #[test]
    fn test_failed_refresh_still_scraped() {
        let lister = scripted_lister();
        let trigger = trigger(&lister);
        trigger.refresh_installed().unwrap();
        trigger.refresh_upgradeable().unwrap();
        let cache = trigger.cache().clone();
        let metrics = AptMetrics::new(cache, MockFs::new(), "/run/reboot-required").unwrap();

        lister.fail(ListingKind::Installed);
        trigger.apply(RefreshAction::All);

        let families = metrics.collect();
        let names: Vec<_> = families.iter().map(|f| f.get_name()).collect();
        assert_eq!(
            names,
            vec![
                "apt_packages_installed",
                "apt_packages_upgradeable",
                "apt_reboot_required",
                "apt_up",
            ]
        );
        let installed: u64 = families[0]
            .get_metric()
            .iter()
            .map(|m| m.get_counter().get_value() as u64)
            .sum();
        // bash: stable, now; nginx: stable, stable-updates
        assert_eq!(installed, 4);
        let up = families.iter().find(|f| f.get_name() == "apt_up").unwrap();
        assert_eq!(up.get_metric()[0].get_gauge().get_value(), 1.0);
    }

    #[tokio::test]
    async fn test_run_survives_refresh_failure() {
        let lister = scripted_lister();
        let trigger = Arc::new(trigger(&lister));
        trigger.refresh_installed().unwrap();
        trigger.refresh_upgradeable().unwrap();
        lister.fail(ListingKind::Installed);

        let (events_tx, _errors_tx, stream) = WatchStream::channel();
        let handle = tokio::spawn(trigger.clone().run(stream));
        events_tx.send(event("/var/log/apt/history.log")).await.unwrap();
        events_tx.send(event("/var/log/apt/history.log")).await.unwrap();
        drop(events_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(lister.calls(ListingKind::Installed), 3);
        assert_eq!(lister.calls(ListingKind::Upgradeable), 3);
        assert_eq!(
            trigger.cache().get(ListingKind::Installed).unwrap().records.len(),
            2
        );
    }
}
