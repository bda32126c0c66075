//! Polling filesystem watcher.
//!
//! Registered paths are stat'd on every tick and compared against the previous
//! stamp (inode, size, mtime). A watched file reports changes to itself; a
//! watched directory reports changes to its direct children. Changes are
//! delivered as `FsEvent`s on one channel and stream-level failures as
//! `WatchError`s on another; both channels close once the watcher stops.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::collector::{FileStamp, FileSystem};

/// Buffered events per channel before the poller waits on the consumer.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A change observed on a watched path (or a child of a watched directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl FsEvent {
    fn new(path: PathBuf, kind: ChangeKind) -> Self {
        Self { path, kind }
    }
}

#[derive(Debug)]
pub enum WatchError {
    /// The path could not be stat'd when it was added.
    Register { path: PathBuf, source: io::Error },
    /// A previously registered path could not be polled.
    Poll { path: PathBuf, source: io::Error },
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::Register { path, source } => {
                write!(f, "cannot watch {}: {}", path.display(), source)
            }
            WatchError::Poll { path, source } => {
                write!(f, "polling {} failed: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchError::Register { source, .. } | WatchError::Poll { source, .. } => Some(source),
        }
    }
}

/// Receiving side of a watcher.
#[derive(Debug)]
pub struct WatchStream {
    pub events: mpsc::Receiver<FsEvent>,
    pub errors: mpsc::Receiver<WatchError>,
}

impl WatchStream {
    /// Creates a stream fed by the returned senders instead of a poller.
    pub fn channel() -> (mpsc::Sender<FsEvent>, mpsc::Sender<WatchError>, Self) {
        let (events_tx, events) = mpsc::channel(CHANNEL_CAPACITY);
        let (errors_tx, errors) = mpsc::channel(CHANNEL_CAPACITY);
        (events_tx, errors_tx, Self { events, errors })
    }
}

// ============================================================
// Change detection
// ============================================================

#[derive(Debug)]
enum Target {
    /// Last stamp of the file, `None` while it doesn't exist.
    File(Option<FileStamp>),
    /// Last stamps of the directory's children.
    Dir(HashMap<PathBuf, FileStamp>),
}

#[derive(Debug)]
struct WatchEntry {
    path: PathBuf,
    target: Target,
    /// Set after a poll error so a persistent failure is reported once.
    failing: bool,
}

/// Registered paths and their last observed state.
#[derive(Debug)]
struct WatchSet<F> {
    fs: F,
    entries: Vec<WatchEntry>,
}

impl<F: FileSystem> WatchSet<F> {
    fn new(fs: F) -> Self {
        Self {
            fs,
            entries: Vec::new(),
        }
    }

    fn add(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.entries.iter().any(|e| e.path == path) {
            return Ok(());
        }

        let register_err = |source| WatchError::Register {
            path: path.to_path_buf(),
            source,
        };
        let stamp = self.fs.stat(path).map_err(register_err)?;
        let target = if stamp.is_dir {
            Target::Dir(children(&self.fs, path).map_err(register_err)?)
        } else {
            Target::File(Some(stamp))
        };

        self.entries.push(WatchEntry {
            path: path.to_path_buf(),
            target,
            failing: false,
        });
        Ok(())
    }

    fn poll(&mut self) -> (Vec<FsEvent>, Vec<WatchError>) {
        let mut events = Vec::new();
        let mut errors = Vec::new();

        for entry in &mut self.entries {
            let result = match &mut entry.target {
                Target::File(last) => poll_file(&self.fs, &entry.path, last, &mut events),
                Target::Dir(last) => poll_dir(&self.fs, &entry.path, last, &mut events),
            };
            match result {
                Ok(()) => entry.failing = false,
                Err(source) if !entry.failing => {
                    entry.failing = true;
                    errors.push(WatchError::Poll {
                        path: entry.path.clone(),
                        source,
                    });
                }
                Err(_) => {}
            }
        }

        (events, errors)
    }
}

fn poll_file<F: FileSystem>(
    fs: &F,
    path: &Path,
    last: &mut Option<FileStamp>,
    events: &mut Vec<FsEvent>,
) -> io::Result<()> {
    let current = match fs.stat(path) {
        Ok(stamp) => Some(stamp),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    let kind = match (&*last, &current) {
        (None, Some(_)) => Some(ChangeKind::Created),
        (Some(_), None) => Some(ChangeKind::Removed),
        (Some(old), Some(new)) if old != new => Some(ChangeKind::Modified),
        _ => None,
    };
    if let Some(kind) = kind {
        events.push(FsEvent::new(path.to_path_buf(), kind));
    }
    *last = current;
    Ok(())
}

fn poll_dir<F: FileSystem>(
    fs: &F,
    path: &Path,
    last: &mut HashMap<PathBuf, FileStamp>,
    events: &mut Vec<FsEvent>,
) -> io::Result<()> {
    let current = match children(fs, path) {
        Ok(current) => current,
        Err(e) => {
            // Directory gone: its children went with it.
            if e.kind() == io::ErrorKind::NotFound {
                let mut removed: Vec<_> = last.drain().map(|(p, _)| p).collect();
                removed.sort();
                events.extend(
                    removed
                        .into_iter()
                        .map(|p| FsEvent::new(p, ChangeKind::Removed)),
                );
            }
            return Err(e);
        }
    };

    let mut changed: Vec<FsEvent> = current
        .iter()
        .filter_map(|(child, stamp)| match last.get(child) {
            None => Some(FsEvent::new(child.clone(), ChangeKind::Created)),
            Some(old) if old != stamp => Some(FsEvent::new(child.clone(), ChangeKind::Modified)),
            Some(_) => None,
        })
        .chain(
            last.keys()
                .filter(|child| !current.contains_key(*child))
                .map(|child| FsEvent::new(child.clone(), ChangeKind::Removed)),
        )
        .collect();
    changed.sort_by(|a, b| a.path.cmp(&b.path));
    events.extend(changed);

    *last = current;
    Ok(())
}

/// Stamps of a directory's direct children. Children vanishing mid-scan are skipped.
fn children<F: FileSystem>(fs: &F, dir: &Path) -> io::Result<HashMap<PathBuf, FileStamp>> {
    let mut stamps = HashMap::new();
    for child in fs.read_dir(dir)? {
        match fs.stat(&child) {
            Ok(stamp) => {
                stamps.insert(child, stamp);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(stamps)
}

// ============================================================
// Poll loop
// ============================================================

/// Handle to a background poller.
///
/// Dropping the handle (or calling `close`) stops polling, which closes both
/// channels of the associated `WatchStream`.
pub struct Watcher<F> {
    set: Arc<Mutex<WatchSet<F>>>,
    shutdown: Arc<Notify>,
}

impl<F: FileSystem + 'static> Watcher<F> {
    /// Starts polling every `interval`. Must be called within a tokio runtime.
    pub fn spawn(fs: F, interval: Duration) -> (Self, WatchStream) {
        let set = Arc::new(Mutex::new(WatchSet::new(fs)));
        let shutdown = Arc::new(Notify::new());
        let (events_tx, errors_tx, stream) = WatchStream::channel();

        tokio::spawn(poll_loop(
            set.clone(),
            shutdown.clone(),
            interval,
            events_tx,
            errors_tx,
        ));

        (Self { set, shutdown }, stream)
    }

    /// Starts watching `path`. Adding an already watched path is a no-op.
    pub fn add(&self, path: impl AsRef<Path>) -> Result<(), WatchError> {
        let path = path.as_ref();
        lock(&self.set).add(path)?;
        debug!(path = %path.display(), "watching");
        Ok(())
    }

    pub fn close(&self) {
        self.shutdown.notify_one();
    }
}

impl<F> Drop for Watcher<F> {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

fn lock<F>(set: &Mutex<WatchSet<F>>) -> std::sync::MutexGuard<'_, WatchSet<F>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn poll_loop<F: FileSystem + 'static>(
    set: Arc<Mutex<WatchSet<F>>>,
    shutdown: Arc<Notify>,
    interval: Duration,
    events_tx: mpsc::Sender<FsEvent>,
    errors_tx: mpsc::Sender<WatchError>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = tick.tick() => {}
        }

        // stat/read_dir are blocking calls
        let set = set.clone();
        let (events, errors) = match tokio::task::spawn_blocking(move || lock(&set).poll()).await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "watch poll panicked");
                continue;
            }
        };

        for err in errors {
            if errors_tx.send(err).await.is_err() {
                return;
            }
        }
        for event in events {
            if events_tx.send(event).await.is_err() {
                return;
            }
        }
    }

    debug!("watcher stopped");
}
