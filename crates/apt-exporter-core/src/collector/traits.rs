//! Filesystem and package-listing abstractions with their real implementations.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::model::ListingKind;

/// Identity and change markers of a filesystem entry.
///
/// Two stamps of the same path differ whenever the entry was replaced
/// (inode), grown or truncated (len), or rewritten (modified).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub inode: u64,
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub is_dir: bool,
}

/// Read-only view of the filesystem.
pub trait FileSystem: Send + Sync {
    /// False only when the path is known not to exist. Any other stat
    /// failure counts as present.
    fn exists(&self, path: &Path) -> bool;

    fn stat(&self, path: &Path) -> io::Result<FileStamp>;

    /// Direct children of a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn exists(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot stat, assuming present");
                true
            }
        }
    }

    fn stat(&self, path: &Path) -> io::Result<FileStamp> {
        let metadata = fs::metadata(path)?;
        Ok(FileStamp {
            inode: get_inode(&metadata),
            len: metadata.len(),
            modified: metadata.modified().ok(),
            is_dir: metadata.is_dir(),
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }
}

#[cfg(unix)]
fn get_inode(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

/// Non-Unix: replacement detection falls back to size and mtime.
#[cfg(not(unix))]
fn get_inode(_metadata: &fs::Metadata) -> u64 {
    0
}

/// Failure to obtain a package listing.
#[derive(Debug)]
pub enum ListError {
    /// The command could not be started.
    Spawn { command: String, source: io::Error },
    /// The command ran but exited unsuccessfully.
    Status {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

impl fmt::Display for ListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListError::Spawn { command, source } => {
                write!(f, "failed to run `{}`: {}", command, source)
            }
            ListError::Status {
                command,
                status,
                stderr,
            } if stderr.is_empty() => write!(f, "`{}` exited with {}", command, status),
            ListError::Status {
                command,
                status,
                stderr,
            } => write!(f, "`{}` exited with {}: {}", command, status, stderr),
        }
    }
}

impl std::error::Error for ListError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListError::Spawn { source, .. } => Some(source),
            ListError::Status { .. } => None,
        }
    }
}

/// Produces the raw text of a package listing.
///
/// Implementations block for as long as the underlying command runs.
pub trait PackageLister: Send + Sync {
    fn list(&self, kind: ListingKind) -> Result<Vec<u8>, ListError>;
}

impl<T: PackageLister + ?Sized> PackageLister for Arc<T> {
    fn list(&self, kind: ListingKind) -> Result<Vec<u8>, ListError> {
        (**self).list(kind)
    }
}

/// Runs `apt list --installed` / `apt list --upgradable`.
#[derive(Debug, Clone)]
pub struct AptLister {
    binary: PathBuf,
}

impl AptLister {
    pub const DEFAULT_BINARY: &'static str = "/usr/bin/apt";

    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command_line(&self, kind: ListingKind) -> String {
        format!("{} list {}", self.binary.display(), kind.apt_flag())
    }
}

impl Default for AptLister {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BINARY)
    }
}

impl PackageLister for AptLister {
    fn list(&self, kind: ListingKind) -> Result<Vec<u8>, ListError> {
        let command = self.command_line(kind);
        debug!(%command, "running package listing");

        let output = Command::new(&self.binary)
            .args(["list", kind.apt_flag()])
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ListError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ListError::Status {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_fs_stat_and_read_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("update-stamp");
        std::fs::write(&file, "").unwrap();

        let fs = RealFs::new();
        assert!(fs.exists(&file));

        let stamp = fs.stat(&file).unwrap();
        assert_eq!(stamp.len, 0);
        assert!(!stamp.is_dir);
        assert!(fs.stat(dir.path()).unwrap().is_dir);

        let entries = fs.read_dir(dir.path()).unwrap();
        assert_eq!(entries, vec![file]);
    }

    #[test]
    fn test_real_fs_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("reboot-required");

        let fs = RealFs::new();
        assert!(!fs.exists(&missing));
        assert_eq!(
            fs.stat(&missing).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_real_fs_exists_when_unreadable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        let marker = locked.join("reboot-required");
        std::fs::write(&marker, "").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // root bypasses permission checks, so the stat may still succeed
        let denied = std::fs::metadata(&marker)
            .is_err_and(|e| e.kind() == io::ErrorKind::PermissionDenied);
        let fs = RealFs::new();
        assert!(fs.exists(&marker));
        if denied {
            // Unknown is not the same as absent.
            assert!(fs.exists(&locked.join("missing")));
        }

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(!fs.exists(&locked.join("missing")));
    }

    // Kept in one test: writing an executable while another test thread forks
    // can fail with ETXTBSY.
    #[cfg(unix)]
    #[test]
    fn test_apt_lister() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let write_script = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        // Echo the arguments back in listing format.
        let echo = write_script("apt", "#!/bin/sh\necho \"pkg/$1 1.0 $2\"\n");
        let broken = write_script("apt-broken", "#!/bin/sh\necho 'E: broken' >&2\nexit 100\n");

        let out = AptLister::new(&echo).list(ListingKind::Upgradeable).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "pkg/list 1.0 --upgradable\n");

        match AptLister::new(&broken).list(ListingKind::Installed) {
            Err(ListError::Status { stderr, status, .. }) => {
                assert_eq!(stderr, "E: broken");
                assert_eq!(status.code(), Some(100));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let err = AptLister::new(dir.path().join("no-such-apt"))
            .list(ListingKind::Installed)
            .unwrap_err();
        assert!(matches!(err, ListError::Spawn { .. }));
        assert!(err.to_string().contains("list --installed"));
    }
}
