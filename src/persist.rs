// Persistence of discovered versions as on-disk config artifacts
//
// Two layouts exist. The single layout keeps one `<name>.json` per target.
// The split layout keeps `<name>/index.json` plus one directory per major
// version. The presence of the index decides which path a write takes, so
// data written by older tooling keeps round-tripping.

use crate::config::CatalogTarget;
use crate::constants;
use crate::error::MirrorError;
use crate::version::{self, Version};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Provenance metadata block carried by every artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactMetadata {
    pub total_discovered: usize,
    pub total_recommended: usize,
    pub last_updated: String,
    pub discovery_source: String,
    /// True when the file was written by discovery rather than by hand
    pub auto_updated: bool,
}

/// Single-layout artifact, also the shape `load` hands back for both layouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub all_versions: Vec<String>,
    #[serde(default)]
    pub recommended_versions: Vec<String>,
    #[serde(default)]
    pub metadata: ArtifactMetadata,
    /// Hand-authored fields, preserved across rewrites
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-major summary inside the split index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub total_versions: usize,
    pub recommended_versions: usize,
    pub min_version: String,
    pub max_version: String,
    pub versions_file: String,
    pub metadata_file: String,
}

/// Top-level index artifact of the split layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitIndex {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub layout: String,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupSummary>,
    #[serde(default)]
    pub metadata: ArtifactMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `<major>/versions.json` in the split layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupVersions {
    pub major: u64,
    pub all_versions: Vec<String>,
    pub recommended_versions: Vec<String>,
}

/// `<major>/metadata.json` in the split layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub major: u64,
    pub total_discovered: usize,
    pub total_recommended: usize,
    pub min_version: String,
    pub max_version: String,
    pub last_updated: String,
    pub auto_updated: bool,
}

/// Where a discovery result came from and when
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub discovered_at: DateTime<Utc>,
    pub source: String,
}

impl Provenance {
    pub fn now(source: impl Into<String>) -> Self {
        Self {
            discovered_at: Utc::now(),
            source: source.into(),
        }
    }

    fn timestamp(&self) -> String {
        self.discovered_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Single,
    Split,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Single => "single",
            Layout::Split => "split",
        }
    }
}

/// Reads and writes version config artifacts under one root directory
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn group_dir(&self, target: &CatalogTarget) -> PathBuf {
        self.root.join(target.group())
    }

    pub fn single_path(&self, target: &CatalogTarget) -> PathBuf {
        self.group_dir(target).join(format!("{}.json", target.name))
    }

    pub fn split_dir(&self, target: &CatalogTarget) -> PathBuf {
        self.group_dir(target).join(&target.name)
    }

    pub fn index_path(&self, target: &CatalogTarget) -> PathBuf {
        self.split_dir(target).join(constants::SPLIT_INDEX_FILE)
    }

    /// The split layout is in effect exactly when its index artifact exists
    pub fn layout(&self, target: &CatalogTarget) -> Layout {
        if self.index_path(target).is_file() {
            Layout::Split
        } else {
            Layout::Single
        }
    }

    /// Write discovered and recommended versions for a target
    pub fn persist(
        &self,
        target: &CatalogTarget,
        all: &[Version],
        recommended: &[Version],
        provenance: &Provenance,
    ) -> Result<Layout, MirrorError> {
        let layout = self.layout(target);
        match layout {
            Layout::Split => self.write_split(target, all, recommended, provenance)?,
            Layout::Single => self.write_single(target, all, recommended, provenance)?,
        }
        info!(
            "Wrote {} version(s) ({} recommended) for '{}' [{}]",
            all.len(),
            recommended.len(),
            target.name,
            layout.as_str()
        );
        Ok(layout)
    }

    fn metadata(all: usize, recommended: usize, provenance: &Provenance) -> ArtifactMetadata {
        ArtifactMetadata {
            total_discovered: all,
            total_recommended: recommended,
            last_updated: provenance.timestamp(),
            discovery_source: provenance.source.clone(),
            auto_updated: true,
        }
    }

    fn write_single(
        &self,
        target: &CatalogTarget,
        all: &[Version],
        recommended: &[Version],
        provenance: &Provenance,
    ) -> Result<(), MirrorError> {
        let path = self.single_path(target);
        let extra = match read_json::<VersionConfig>(&path) {
            Ok(Some(existing)) => existing.extra,
            Ok(None) => Map::new(),
            Err(e) => {
                warn!(
                    "Existing config '{}' is unreadable, rewriting it: {}",
                    path.display(),
                    e
                );
                Map::new()
            }
        };

        let artifact = VersionConfig {
            name: target.name.clone(),
            kind: target.kind.to_string(),
            all_versions: to_strings(all),
            recommended_versions: to_strings(recommended),
            metadata: Self::metadata(all.len(), recommended.len(), provenance),
            extra,
        };
        write_json_atomic(&path, &artifact)
    }

    fn write_split(
        &self,
        target: &CatalogTarget,
        all: &[Version],
        recommended: &[Version],
        provenance: &Provenance,
    ) -> Result<(), MirrorError> {
        let dir = self.split_dir(target);
        let index_path = self.index_path(target);
        let previous = read_json::<SplitIndex>(&index_path).ok().flatten();

        let all_groups = version::group_by_major(all);
        let recommended_groups = version::group_by_major(recommended);
        let mut groups = BTreeMap::new();

        for (major, versions) in &all_groups {
            let group_recommended = recommended_groups.get(major).cloned().unwrap_or_default();
            let min_version = versions.first().map(|v| v.to_string()).unwrap_or_default();
            let max_version = versions.last().map(|v| v.to_string()).unwrap_or_default();
            let versions_file = format!("{}/{}", major, constants::SPLIT_VERSIONS_FILE);
            let metadata_file = format!("{}/{}", major, constants::SPLIT_METADATA_FILE);

            write_json_atomic(
                &dir.join(&versions_file),
                &GroupVersions {
                    major: *major,
                    all_versions: to_strings(versions),
                    recommended_versions: to_strings(&group_recommended),
                },
            )?;
            write_json_atomic(
                &dir.join(&metadata_file),
                &GroupMetadata {
                    major: *major,
                    total_discovered: versions.len(),
                    total_recommended: group_recommended.len(),
                    min_version: min_version.clone(),
                    max_version: max_version.clone(),
                    last_updated: provenance.timestamp(),
                    auto_updated: true,
                },
            )?;

            groups.insert(
                major.to_string(),
                GroupSummary {
                    total_versions: versions.len(),
                    recommended_versions: group_recommended.len(),
                    min_version,
                    max_version,
                    versions_file,
                    metadata_file,
                },
            );
        }

        let extra = match &previous {
            Some(index) => {
                // Drop directories of major lines that disappeared upstream
                for stale in index.groups.keys().filter(|k| !groups.contains_key(*k)) {
                    let stale_dir = dir.join(stale);
                    if stale_dir.is_dir() && fs::remove_dir_all(&stale_dir).is_ok() {
                        debug!("Removed stale group {}", stale_dir.display());
                    }
                }
                index.extra.clone()
            }
            None => Map::new(),
        };

        let index = SplitIndex {
            name: target.name.clone(),
            kind: target.kind.to_string(),
            layout: Layout::Split.as_str().to_string(),
            groups,
            metadata: Self::metadata(all.len(), recommended.len(), provenance),
            extra,
        };
        write_json_atomic(&index_path, &index)
    }

    /// Read a target's config back, whichever layout it uses
    pub fn load(&self, target: &CatalogTarget) -> anyhow::Result<Option<VersionConfig>> {
        match self.layout(target) {
            Layout::Single => read_json(&self.single_path(target)),
            Layout::Split => self.load_split(target).map(Some),
        }
    }

    fn load_split(&self, target: &CatalogTarget) -> anyhow::Result<VersionConfig> {
        let dir = self.split_dir(target);
        let index: SplitIndex = read_json(&self.index_path(target))?
            .ok_or_else(|| anyhow::anyhow!("Split index vanished for '{}'", target.name))?;

        let mut majors: Vec<(u64, &GroupSummary)> = index
            .groups
            .iter()
            .map(|(k, v)| (k.parse::<u64>().unwrap_or(u64::MAX), v))
            .collect();
        majors.sort_by_key(|(major, _)| *major);

        let mut all_versions = Vec::new();
        let mut recommended_versions = Vec::new();
        for (_, summary) in majors {
            let path = dir.join(&summary.versions_file);
            let group: GroupVersions = read_json(&path)?.ok_or_else(|| {
                anyhow::anyhow!("Missing group file '{}'", path.display())
            })?;
            all_versions.extend(group.all_versions);
            recommended_versions.extend(group.recommended_versions);
        }

        Ok(VersionConfig {
            name: index.name,
            kind: index.kind,
            all_versions,
            recommended_versions,
            metadata: index.metadata,
            extra: index.extra,
        })
    }

    /// Convert a target's single artifact into the split layout
    pub fn split(&self, target: &CatalogTarget) -> anyhow::Result<()> {
        if self.layout(target) == Layout::Split {
            anyhow::bail!("'{}' already uses the split layout", target.name);
        }

        let single_path = self.single_path(target);
        let existing: VersionConfig = read_json(&single_path)?.ok_or_else(|| {
            anyhow::anyhow!(
                "No config for '{}' at '{}'. Run discover first.",
                target.name,
                single_path.display()
            )
        })?;

        let all = version::normalize_all(&existing.all_versions, false);
        let recommended = version::normalize_all(&existing.recommended_versions, false);
        let provenance = Provenance::now(existing.metadata.discovery_source.clone());

        // Seed the index with the hand-authored fields before the first split write
        let seed = SplitIndex {
            name: target.name.clone(),
            kind: existing.kind.clone(),
            layout: Layout::Split.as_str().to_string(),
            groups: BTreeMap::new(),
            metadata: existing.metadata.clone(),
            extra: existing.extra.clone(),
        };
        write_json_atomic(&self.index_path(target), &seed)?;
        self.write_split(target, &all, &recommended, &provenance)?;

        fs::remove_file(&single_path)?;
        info!("Converted '{}' to the split layout", target.name);
        Ok(())
    }
}

fn to_strings(versions: &[Version]) -> Vec<String> {
    versions.iter().map(|v| v.to_string()).collect()
}

/// Read a JSON file, `Ok(None)` when it does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in '{}': {}", path.display(), e))?;
    Ok(Some(value))
}

/// Write JSON through a temp file, fsync, then rename over the target
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), MirrorError> {
    let fail = |source: io::Error| MirrorError::config_write(path, source);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(fail)?;
    }

    let mut text = serde_json::to_string_pretty(value).map_err(|e| fail(io::Error::other(e)))?;
    text.push('\n');

    let tmp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp_path).map_err(fail)?;
    file.write_all(text.as_bytes()).map_err(fail)?;
    file.sync_all().map_err(fail)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(fail)
}
