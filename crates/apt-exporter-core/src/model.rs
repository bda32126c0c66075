//! Package records and cached snapshots.

use std::fmt;

use chrono::{DateTime, Utc};

/// Which package enumeration a snapshot or refresh concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingKind {
    Installed,
    Upgradeable,
}

impl ListingKind {
    pub const ALL: [ListingKind; 2] = [ListingKind::Installed, ListingKind::Upgradeable];

    pub fn as_str(self) -> &'static str {
        match self {
            ListingKind::Installed => "installed",
            ListingKind::Upgradeable => "upgradeable",
        }
    }

    /// Flag passed to `apt list` to produce this listing.
    pub fn apt_flag(self) -> &'static str {
        match self {
            ListingKind::Installed => "--installed",
            ListingKind::Upgradeable => "--upgradable",
        }
    }
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed line of `apt list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    /// Deduplicated, in order of first appearance. Never empty.
    pub suites: Vec<String>,
    pub architecture: String,
}

/// Result of one successful refresh for one listing kind.
///
/// Snapshots are immutable once built; a refresh replaces the whole value.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub kind: ListingKind,
    pub records: Vec<PackageRecord>,
    /// When the listing command finished. Informational only.
    pub refreshed_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(kind: ListingKind, records: Vec<PackageRecord>) -> Self {
        Self {
            kind,
            records,
            refreshed_at: Utc::now(),
        }
    }

    /// Number of (record, suite) pairs, i.e. the sum of all exported counters.
    pub fn suite_entries(&self) -> usize {
        self.records.iter().map(|r| r.suites.len()).sum()
    }
}
