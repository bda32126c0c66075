//! Well-known APT paths used as refresh signals and flags.

use std::path::{Path, PathBuf};

pub const DEFAULT_HISTORY_LOG: &str = "/var/log/apt/history.log";
pub const DEFAULT_PERIODIC_DIR: &str = "/var/lib/apt/periodic";
pub const DEFAULT_REBOOT_MARKER: &str = "/run/reboot-required";

/// Stamp files touched by `apt-daily` inside the periodic directory.
pub const PERIODIC_STAMPS: [&str; 2] = ["update-stamp", "update-success-stamp"];

/// Filesystem locations the exporter watches or checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptPaths {
    /// Appended to on every install/remove/upgrade.
    pub history_log: PathBuf,
    /// Holds the periodic update stamps.
    pub periodic_dir: PathBuf,
    /// Present while a restart is pending.
    pub reboot_marker: PathBuf,
}

impl Default for AptPaths {
    fn default() -> Self {
        Self {
            history_log: PathBuf::from(DEFAULT_HISTORY_LOG),
            periodic_dir: PathBuf::from(DEFAULT_PERIODIC_DIR),
            reboot_marker: PathBuf::from(DEFAULT_REBOOT_MARKER),
        }
    }
}

impl AptPaths {
    /// Full paths of the periodic stamp files.
    pub fn periodic_stamps(&self) -> impl Iterator<Item = PathBuf> + '_ {
        PERIODIC_STAMPS
            .iter()
            .map(|stamp| self.periodic_dir.join(stamp))
    }

    pub fn is_periodic_stamp(&self, path: &Path) -> bool {
        self.periodic_stamps().any(|stamp| stamp == path)
    }
}
