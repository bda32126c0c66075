//! Scripted package lister with invocation counters.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::collector::traits::{ListError, PackageLister};
use crate::model::ListingKind;

/// Returns canned `apt list` output per kind, or a failure when told to.
///
/// Share it behind an `Arc` to keep scripting and counting after handing it
/// to a `RefreshTrigger`.
#[derive(Debug, Default)]
pub struct MockLister {
    outputs: Mutex<HashMap<ListingKind, Option<String>>>,
    installed_calls: AtomicUsize,
    upgradeable_calls: AtomicUsize,
}

impl MockLister {
    /// A lister that returns empty output for both kinds.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(self, kind: ListingKind, output: impl Into<String>) -> Self {
        self.set_output(kind, output);
        self
    }

    pub fn set_output(&self, kind: ListingKind, output: impl Into<String>) {
        self.outputs().insert(kind, Some(output.into()));
    }

    /// Makes every following listing of `kind` fail until `set_output` is called.
    pub fn fail(&self, kind: ListingKind) {
        self.outputs().insert(kind, None);
    }

    /// Number of `list` calls for `kind`, failed ones included.
    pub fn calls(&self, kind: ListingKind) -> usize {
        self.counter(kind).load(Ordering::SeqCst)
    }

    fn counter(&self, kind: ListingKind) -> &AtomicUsize {
        match kind {
            ListingKind::Installed => &self.installed_calls,
            ListingKind::Upgradeable => &self.upgradeable_calls,
        }
    }

    fn outputs(&self) -> std::sync::MutexGuard<'_, HashMap<ListingKind, Option<String>>> {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PackageLister for MockLister {
    fn list(&self, kind: ListingKind) -> Result<Vec<u8>, ListError> {
        self.counter(kind).fetch_add(1, Ordering::SeqCst);
        match self.outputs().get(&kind) {
            Some(Some(output)) => Ok(output.clone().into_bytes()),
            Some(None) => Err(ListError::Spawn {
                command: format!("mock list {}", kind.apt_flag()),
                source: io::Error::other("scripted failure"),
            }),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_lister_script() {
        let lister = MockLister::new().with_output(ListingKind::Installed, "bash/stable 5.2 amd64");

        assert_eq!(
            lister.list(ListingKind::Installed).unwrap(),
            b"bash/stable 5.2 amd64"
        );
        assert!(lister.list(ListingKind::Upgradeable).unwrap().is_empty());

        lister.fail(ListingKind::Installed);
        assert!(lister.list(ListingKind::Installed).is_err());

        assert_eq!(lister.calls(ListingKind::Installed), 2);
        assert_eq!(lister.calls(ListingKind::Upgradeable), 1);
    }
}
