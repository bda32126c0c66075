//! In-memory mock filesystem for testing without touching real APT paths.

use crate::collector::traits::{FileStamp, FileSystem};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

/// In-memory filesystem for testing.
///
/// Every write gets a new generation number, exposed as the entry's inode and
/// modification time, so overwriting a file with identical content still
/// changes its stamp.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Path → (contents, generation of last write).
    files: HashMap<PathBuf, (String, u64)>,
    directories: HashSet<PathBuf>,
    generation: u64,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or overwrites a file. Parent directories are created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.generation += 1;
        self.files.insert(path, (content.into(), self.generation));
    }

    /// Adds an empty directory (and its parents).
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Removes a file or an empty directory. Missing paths are ignored.
    pub fn remove(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.files.remove(path);
        self.directories.remove(path);
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl FileSystem for MockFs {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStamp> {
        if let Some((content, generation)) = self.files.get(path) {
            return Ok(FileStamp {
                inode: *generation,
                len: content.len() as u64,
                modified: Some(UNIX_EPOCH + Duration::from_secs(*generation)),
                is_dir: false,
            });
        }
        if self.directories.contains(path) {
            return Ok(FileStamp {
                inode: 0,
                len: 0,
                modified: None,
                is_dir: true,
            });
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("file not found: {:?}", path),
        ))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let files = self.files.keys();
        let dirs = self.directories.iter().filter(|d| d.as_path() != path);
        let mut entries: Vec<PathBuf> = files
            .chain(dirs)
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        entries.sort();
        Ok(entries)
    }
}
