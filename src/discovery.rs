// Discovery pipeline: harvest, normalize, select and persist versions per target

use crate::catalog::CatalogRegistry;
use crate::config::{CatalogTarget, DiscoveryConfig};
use crate::error::MirrorError;
use crate::persist::{ConfigStore, Layout, Provenance};
use crate::version::{self, SelectionPolicy, Version};
use chrono::{DateTime, Utc};
use log::{info, warn};

/// Provenance and counts of one discovery run for one target
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMetadata {
    pub discovered_count: usize,
    pub recommended_count: usize,
    pub discovered_at: DateTime<Utc>,
    pub source: String,
}

/// Outcome of discovering one target, built once and never mutated
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResult {
    pub target: CatalogTarget,
    pub all_versions: Vec<Version>,
    pub recommended_versions: Vec<Version>,
    pub metadata: DiscoveryMetadata,
}

impl DiscoveryResult {
    /// Run the pure part of the pipeline over raw upstream strings
    pub fn from_raw<I, S>(
        target: &CatalogTarget,
        raw: I,
        stable_only: bool,
        policy: &SelectionPolicy,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let all_versions = version::normalize_all(raw, stable_only);
        let recommended_versions = version::select(&all_versions, policy);
        Self {
            target: target.clone(),
            metadata: DiscoveryMetadata {
                discovered_count: all_versions.len(),
                recommended_count: recommended_versions.len(),
                discovered_at: Utc::now(),
                source: describe_source(target),
            },
            all_versions,
            recommended_versions,
        }
    }

    pub fn provenance(&self) -> Provenance {
        Provenance {
            discovered_at: self.metadata.discovered_at,
            source: self.metadata.source.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all_versions.is_empty()
    }
}

/// Human-readable origin recorded in artifact metadata
fn describe_source(target: &CatalogTarget) -> String {
    match &target.fallback {
        Some(fallback) => format!("{}:{} (fallback {})", target.kind, target.source, fallback),
        None => format!("{}:{}", target.kind, target.source),
    }
}

/// What happened to one target during a run
#[derive(Debug)]
pub enum TargetOutcome {
    Updated {
        result: DiscoveryResult,
        layout: Layout,
    },
    /// Dry run: computed but not written
    Previewed(DiscoveryResult),
    /// Upstream gave nothing; existing config left untouched
    Skipped,
    Failed(MirrorError),
}

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub entries: Vec<(String, TargetOutcome)>,
}

impl DiscoveryReport {
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Updated { .. } | TargetOutcome::Previewed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&TargetOutcome) -> bool) -> usize {
        self.entries.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Batch discovery over configured targets
///
/// Targets run one after another. A failure in one target is recorded in
/// the report and never stops the others.
pub struct Discovery {
    registry: CatalogRegistry,
    store: ConfigStore,
    policy: SelectionPolicy,
    stable_only: bool,
}

impl Discovery {
    pub fn new(registry: CatalogRegistry, store: ConfigStore, config: &DiscoveryConfig) -> Self {
        Self {
            registry,
            store,
            policy: SelectionPolicy::new(config.recommend_threshold, config.per_major),
            stable_only: config.stable_only,
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> anyhow::Result<Self> {
        let registry = CatalogRegistry::new(config)?;
        let store = ConfigStore::new(config.config_dir.clone());
        Ok(Self::new(registry, store, config))
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Discover one target without writing anything
    pub async fn discover(&self, target: &CatalogTarget) -> DiscoveryResult {
        let raw = self.registry.discover(target).await;
        DiscoveryResult::from_raw(
            target,
            raw,
            target.stable_only(self.stable_only),
            &self.policy,
        )
    }

    /// Discover and persist one target
    pub async fn run_target(&self, target: &CatalogTarget, dry_run: bool) -> TargetOutcome {
        let result = self.discover(target).await;

        if result.is_empty() {
            warn!(
                "No versions discovered for '{}', keeping existing config",
                target.name
            );
            return TargetOutcome::Skipped;
        }

        if dry_run {
            return TargetOutcome::Previewed(result);
        }

        match self.store.persist(
            target,
            &result.all_versions,
            &result.recommended_versions,
            &result.provenance(),
        ) {
            Ok(layout) => TargetOutcome::Updated { result, layout },
            Err(e) => {
                warn!("Failed to persist '{}': {}", target.name, e);
                TargetOutcome::Failed(e)
            }
        }
    }

    /// Discover every target in order, isolating failures per target
    pub async fn run(&self, targets: &[CatalogTarget], dry_run: bool) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for target in targets {
            info!("Discovering versions for '{}'", target.name);
            let outcome = self.run_target(target, dry_run).await;
            report.entries.push((target.name.clone(), outcome));
        }
        info!(
            "Discovery finished: {} updated, {} skipped, {} failed",
            report.updated(),
            report.skipped(),
            report.failed()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSource;
    use crate::config::TargetKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Catalog that hands back a fixed list, or fails
    struct FixedSource {
        kind: TargetKind,
        versions: Option<Vec<&'static str>>,
    }

    #[async_trait::async_trait]
    impl CatalogSource for FixedSource {
        fn kind(&self) -> TargetKind {
            self.kind
        }

        fn validate_target(&self, _target: &CatalogTarget) -> anyhow::Result<()> {
            Ok(())
        }

        async fn fetch_versions(&self, _target: &CatalogTarget) -> anyhow::Result<Vec<String>> {
            match &self.versions {
                Some(v) => Ok(v.iter().map(|s| s.to_string()).collect()),
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    fn discovery(dir: &TempDir, sources: Vec<FixedSource>) -> Discovery {
        let mut registry = CatalogRegistry::empty();
        for source in sources {
            registry.register(Arc::new(source));
        }
        Discovery::new(
            registry,
            ConfigStore::new(dir.path()),
            &DiscoveryConfig::default(),
        )
    }

    fn texts(versions: &[Version]) -> Vec<&str> {
        versions.iter().map(|v| v.as_str()).collect()
    }

    #[test]
    fn test_end_to_end_scenario() {
        let target = CatalogTarget::new("demo", TargetKind::TagSource, "acme/demo");
        let result = DiscoveryResult::from_raw(
            &target,
            ["1.0.0", "1.0.1", "2.0.0", "2.0.1", "2.0.2", "2.1.0-beta"],
            true,
            &SelectionPolicy::default(),
        );

        let expected = vec!["1.0.0", "1.0.1", "2.0.0", "2.0.1", "2.0.2"];
        assert_eq!(texts(&result.all_versions), expected);
        assert_eq!(texts(&result.recommended_versions), expected);
        assert_eq!(result.metadata.discovered_count, 5);
        assert_eq!(result.metadata.recommended_count, 5);
        assert_eq!(result.metadata.source, "tag-source:acme/demo");
    }

    #[tokio::test]
    async fn test_run_persists_and_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let discovery = discovery(
            &dir,
            vec![
                FixedSource {
                    kind: TargetKind::TagSource,
                    versions: Some(vec!["v1.0.0", "v1.1.0", "v1.2.0-rc1"]),
                },
                FixedSource {
                    kind: TargetKind::RegistryFeed,
                    versions: None,
                },
            ],
        );

        let targets = vec![
            CatalogTarget::new("broken", TargetKind::RegistryFeed, "broken"),
            CatalogTarget::new("tool", TargetKind::TagSource, "acme/tool"),
        ];
        let report = discovery.run(&targets, false).await;

        assert_eq!(report.updated(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 0);

        let loaded = discovery.store().load(&targets[1]).unwrap().unwrap();
        assert_eq!(loaded.all_versions, vec!["1.0.0", "1.1.0"]);
        assert!(discovery.store().load(&targets[0]).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_discovery_keeps_existing_config() {
        let dir = TempDir::new().unwrap();
        let target = CatalogTarget::new("tool", TargetKind::TagSource, "acme/tool");

        let first = discovery(
            &dir,
            vec![FixedSource {
                kind: TargetKind::TagSource,
                versions: Some(vec!["1.0.0"]),
            }],
        );
        first.run(&[target.clone()], false).await;

        let second = discovery(
            &dir,
            vec![FixedSource {
                kind: TargetKind::TagSource,
                versions: Some(vec![]),
            }],
        );
        let report = second.run(&[target.clone()], false).await;
        assert_eq!(report.skipped(), 1);

        let loaded = second.store().load(&target).unwrap().unwrap();
        assert_eq!(loaded.all_versions, vec!["1.0.0"]);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let discovery = discovery(
            &dir,
            vec![FixedSource {
                kind: TargetKind::TagSource,
                versions: Some(vec!["1.0.0"]),
            }],
        );
        let target = CatalogTarget::new("tool", TargetKind::TagSource, "acme/tool");
        let report = discovery.run(&[target.clone()], true).await;

        assert!(matches!(report.entries[0].1, TargetOutcome::Previewed(_)));
        assert!(discovery.store().load(&target).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_per_target() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tag-source"), "blocker").unwrap();

        let discovery = discovery(
            &dir,
            vec![
                FixedSource {
                    kind: TargetKind::TagSource,
                    versions: Some(vec!["1.0.0"]),
                },
                FixedSource {
                    kind: TargetKind::RegistryFeed,
                    versions: Some(vec!["2.0.0"]),
                },
            ],
        );
        let targets = vec![
            CatalogTarget::new("tool", TargetKind::TagSource, "acme/tool"),
            CatalogTarget::new("ext", TargetKind::RegistryFeed, "ext"),
        ];
        let report = discovery.run(&targets, false).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.updated(), 1);
        assert!(discovery.store().load(&targets[1]).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_target_can_opt_out_of_stable_filter() {
        let dir = TempDir::new().unwrap();
        let discovery = discovery(
            &dir,
            vec![FixedSource {
                kind: TargetKind::RegistryFeed,
                versions: Some(vec!["6.0.0", "6.1.0RC1"]),
            }],
        );
        let mut target = CatalogTarget::new("redis", TargetKind::RegistryFeed, "redis");
        target.stable_only = Some(false);

        let result = discovery.discover(&target).await;
        assert_eq!(texts(&result.all_versions), vec!["6.0.0", "6.1.0RC1"]);
    }
}
