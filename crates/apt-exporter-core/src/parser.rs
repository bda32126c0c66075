//! Parser for `apt list` output.
//!
//! Pure functions only: no I/O, no failure modes. Lines that do not look like
//! a package entry are skipped, so headers (`Listing...`), blank lines and the
//! CLI stability warning never produce records.

use std::collections::HashSet;

use crate::model::PackageRecord;

/// Parses the raw stdout of `apt list --installed` / `apt list --upgradable`.
///
/// Line format: `<name>/<suite>[,<suite>...] <version> <architecture>[ ...]`,
/// fields separated by single spaces. Output order is preserved.
pub fn parse_apt_output(raw: &[u8]) -> Vec<PackageRecord> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(parse_apt_line)
        .collect()
}

/// Parses a single listing line, returning `None` if it doesn't match.
pub fn parse_apt_line(line: &str) -> Option<PackageRecord> {
    let mut fields = line.split(' ');

    let head = fields.next()?;
    let _version = fields.next().filter(|v| !v.is_empty())?;
    let architecture = fields.next().filter(|a| !a.is_empty())?;

    // The name may itself contain '/', the suite list never does.
    let slash = head.rfind('/')?;
    let (name, suite_list) = (&head[..slash], &head[slash + 1..]);
    if name.is_empty() {
        return None;
    }

    let suites = unique_suites(suite_list);
    if suites.is_empty() {
        return None;
    }

    Some(PackageRecord {
        name: name.to_string(),
        suites,
        architecture: architecture.to_string(),
    })
}

/// Splits a comma-separated suite list, dropping empty and repeated entries.
fn unique_suites(list: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    list.split(',')
        .filter(|s| !s.is_empty() && seen.insert(*s))
        .map(str::to_string)
        .collect()
}
