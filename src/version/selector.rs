// Recommended-version selection

use crate::version::Version;
use std::collections::BTreeMap;

/// Configuration for recommended-version selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Lists at or below this size are recommended in full
    pub threshold: usize,
    /// Newest entries kept per major version otherwise
    pub per_major: usize,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            threshold: 10,
            per_major: 3,
        }
    }
}

impl SelectionPolicy {
    pub fn new(threshold: usize, per_major: usize) -> Self {
        Self {
            threshold,
            per_major,
        }
    }
}

/// Group versions by their major segment, each group sorted ascending
pub fn group_by_major(versions: &[Version]) -> BTreeMap<u64, Vec<Version>> {
    let mut groups: BTreeMap<u64, Vec<Version>> = BTreeMap::new();
    for version in versions {
        groups.entry(version.major()).or_default().push(version.clone());
    }
    for group in groups.values_mut() {
        group.sort();
    }
    groups
}

/// Reduce a full version list to its recommended subset
///
/// Small lists are returned unchanged. Larger ones keep the newest
/// `per_major` entries of every major line, so each line still has a
/// current release without the config growing with upstream history.
pub fn select(all: &[Version], policy: &SelectionPolicy) -> Vec<Version> {
    if all.len() <= policy.threshold {
        let mut unchanged = all.to_vec();
        unchanged.sort();
        return unchanged;
    }

    let mut selected: Vec<Version> = group_by_major(all)
        .into_values()
        .flat_map(|group| {
            let skip = group.len().saturating_sub(policy.per_major);
            group.into_iter().skip(skip)
        })
        .collect();

    selected.sort();
    selected
}
