//! Prometheus collector over the snapshot cache.
//!
//! Every scrape reads whatever the cache currently holds; it never runs a
//! listing command. Exported series:
//!
//! - `apt_up` — 1 if both snapshots were available, 0 otherwise
//! - `apt_packages_installed{architecture,suite}`
//! - `apt_packages_upgradeable{architecture,suite}`
//! - `apt_reboot_required` — 1 while the reboot marker exists
//!
//! The package counters are not part of `desc()` because their label values
//! depend on the data; they only appear in `collect()`.

use std::collections::HashMap;
use std::path::PathBuf;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounterVec, IntGauge, Opts};
use tracing::{debug, error};

use crate::cache::SnapshotCache;
use crate::collector::FileSystem;
use crate::model::{ListingKind, Snapshot};

const UP: (&str, &str) = ("apt_up", "Whether collecting APT's metrics was successful.");
const REBOOT_REQUIRED: (&str, &str) = (
    "apt_reboot_required",
    "Whether a system restart is required.",
);
const INSTALLED: (&str, &str) = (
    "apt_packages_installed",
    "How many APT packages are installed by architecture and suite.",
);
const UPGRADEABLE: (&str, &str) = (
    "apt_packages_upgradeable",
    "How many APT packages are upgradeable by architecture and suite.",
);

const PACKAGE_LABELS: [&str; 2] = ["architecture", "suite"];

/// Scrape-time view of the cached package state.
pub struct AptMetrics<F> {
    cache: SnapshotCache,
    fs: F,
    reboot_marker: PathBuf,
    descs: [Desc; 2],
}

impl<F: FileSystem> AptMetrics<F> {
    pub fn new(
        cache: SnapshotCache,
        fs: F,
        reboot_marker: impl Into<PathBuf>,
    ) -> prometheus::Result<Self> {
        let desc = |(name, help): (&str, &str)| {
            Desc::new(name.to_string(), help.to_string(), Vec::new(), HashMap::new())
        };
        Ok(Self {
            cache,
            fs,
            reboot_marker: reboot_marker.into(),
            descs: [desc(UP)?, desc(REBOOT_REQUIRED)?],
        })
    }

    pub fn reboot_required(&self) -> bool {
        self.fs.exists(&self.reboot_marker)
    }

    /// Appends package and reboot metrics. Returns `false` as soon as a
    /// snapshot is missing, leaving what was already appended in place.
    fn collect_packages(&self, out: &mut Vec<MetricFamily>) -> prometheus::Result<bool> {
        for (kind, family) in [
            (ListingKind::Installed, INSTALLED),
            (ListingKind::Upgradeable, UPGRADEABLE),
        ] {
            let Some(snapshot) = self.cache.get(kind) else {
                debug!(%kind, "no snapshot cached yet");
                return Ok(false);
            };
            out.extend(count_packages(family, &snapshot)?);
        }

        out.extend(gauge(REBOOT_REQUIRED, i64::from(self.reboot_required()))?);
        Ok(true)
    }
}

impl<F: FileSystem> Collector for AptMetrics<F> {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        let up = match self.collect_packages(&mut families) {
            Ok(complete) => complete,
            Err(e) => {
                error!(error = %e, "failed to build package metrics");
                false
            }
        };

        match gauge(UP, i64::from(up)) {
            Ok(up) => families.extend(up),
            Err(e) => error!(error = %e, "failed to build apt_up"),
        }
        families
    }
}

/// Counts (record, suite) pairs per architecture and suite.
fn count_packages(
    (name, help): (&str, &str),
    snapshot: &Snapshot,
) -> prometheus::Result<Vec<MetricFamily>> {
    let counter = IntCounterVec::new(Opts::new(name, help), &PACKAGE_LABELS)?;
    for record in &snapshot.records {
        for suite in &record.suites {
            counter
                .with_label_values(&[record.architecture.as_str(), suite.as_str()])
                .inc();
        }
    }

    let mut families = counter.collect();
    families.retain(|family| !family.get_metric().is_empty());
    Ok(families)
}

fn gauge((name, help): (&str, &str), value: i64) -> prometheus::Result<Vec<MetricFamily>> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    gauge.set(value);
    Ok(gauge.collect())
}
