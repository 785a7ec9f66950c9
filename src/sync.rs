// Sync module for downloading recommended versions into the mirror

use crate::catalog::CatalogHttp;
use crate::catalog::http::filename_from_url;
use crate::config::{CatalogTarget, MirrorConfig};
use crate::constants::CHECKSUMS_FILE;
use crate::persist::{ConfigStore, read_json, write_json_atomic};
use crate::server::container::{self, ContainerKind};
use futures::StreamExt;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Downloads in flight at once
pub const SYNC_CONCURRENCY: usize = 4;

/// `checksums.json`: file name -> `sha256:<hex>`
pub type Checksums = BTreeMap<String, String>;

/// One artifact to mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub target: String,
    pub version: String,
    pub url: String,
    pub file_name: String,
    pub dir: PathBuf,
}

impl SyncItem {
    pub fn dest(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    fn part_path(&self) -> PathBuf {
        self.dir.join(format!("{}.part", self.file_name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Downloaded { checksum: String },
    UpToDate,
    /// Dry run: would be downloaded
    Pending,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub entries: Vec<(SyncItem, SyncOutcome)>,
    /// Targets skipped before planning, with the reason
    pub skipped_targets: Vec<(String, String)>,
}

impl SyncReport {
    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Downloaded { .. }))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::UpToDate))
    }

    pub fn pending(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Pending))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.entries.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// SHA-256 of a file on disk, as `sha256:<hex>`
pub fn file_checksum(path: &Path) -> anyhow::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

pub fn load_checksums(dir: &Path) -> Checksums {
    match read_json::<Checksums>(&dir.join(CHECKSUMS_FILE)) {
        Ok(Some(sums)) => sums,
        Ok(None) => Checksums::new(),
        Err(e) => {
            warn!("Ignoring unreadable checksums in {}: {}", dir.display(), e);
            Checksums::new()
        }
    }
}

/// True when the file exists, is structurally valid and matches its recorded checksum
fn is_current(item: &SyncItem, sums: &Checksums) -> bool {
    let dest = item.dest();
    let Some(recorded) = sums.get(&item.file_name) else {
        return false;
    };
    if !dest.is_file() || container::validate(&dest).is_err() {
        return false;
    }
    matches!(file_checksum(&dest), Ok(actual) if &actual == recorded)
}

pub struct MirrorSync {
    http: CatalogHttp,
    data_dir: PathBuf,
    store: ConfigStore,
}

impl MirrorSync {
    pub fn new(config: &MirrorConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.discovery.timeout_secs.max(1));
        Ok(Self {
            http: CatalogHttp::for_downloads(timeout)?,
            data_dir: config.server.data_dir.clone(),
            store: ConfigStore::new(config.discovery.config_dir.clone()),
        })
    }

    /// Where a target's artifacts live under the data directory
    pub fn target_dir(&self, target: &CatalogTarget) -> PathBuf {
        self.data_dir.join(target.group()).join(&target.name)
    }

    /// Items for one target's recommended versions
    pub fn plan_target(&self, target: &CatalogTarget) -> anyhow::Result<Vec<SyncItem>> {
        if target.download_url.is_none() {
            anyhow::bail!("no download_url configured");
        }
        let Some(config) = self.store.load(target)? else {
            anyhow::bail!("no version config yet, run discover first");
        };

        let dir = self.target_dir(target);
        let mut items = Vec::new();
        for version in &config.recommended_versions {
            let Some(url) = target.download_url_for(version) else {
                continue;
            };
            let file_name = filename_from_url(&url)
                .filter(|name| !name.contains(['/', '\\']) && name != "..")
                .unwrap_or_else(|| format!("{}-{}", target.name, version));
            items.push(SyncItem {
                target: target.name.clone(),
                version: version.clone(),
                url,
                file_name,
                dir: dir.clone(),
            });
        }
        Ok(items)
    }

    /// Mirror the recommended versions of every target
    pub async fn run(&self, targets: &[CatalogTarget], dry_run: bool) -> SyncReport {
        let mut report = SyncReport::default();
        let mut work = Vec::new();

        for target in targets {
            let items = match self.plan_target(target) {
                Ok(items) => items,
                Err(e) => {
                    debug!("Skipping sync for '{}': {}", target.name, e);
                    report.skipped_targets.push((target.name.clone(), e.to_string()));
                    continue;
                }
            };
            let sums = items
                .first()
                .map(|item| load_checksums(&item.dir))
                .unwrap_or_default();
            for item in items {
                if is_current(&item, &sums) {
                    report.entries.push((item, SyncOutcome::UpToDate));
                } else if dry_run {
                    report.entries.push((item, SyncOutcome::Pending));
                } else {
                    work.push(item);
                }
            }
        }

        let results: Vec<(SyncItem, SyncOutcome)> = futures::stream::iter(work)
            .map(|item| async move {
                let outcome = match self.fetch(&item).await {
                    Ok(checksum) => SyncOutcome::Downloaded { checksum },
                    Err(e) => {
                        warn!("Failed to mirror {}: {}", item.url, e);
                        SyncOutcome::Failed(e.to_string())
                    }
                };
                (item, outcome)
            })
            .buffer_unordered(SYNC_CONCURRENCY)
            .collect()
            .await;

        record_checksums(&results);
        report.entries.extend(results);
        report
    }

    /// Stream one artifact to `<file>.part`, validate it, then move it into place
    async fn fetch(&self, item: &SyncItem) -> anyhow::Result<String> {
        info!("Downloading {}", item.url);
        tokio::fs::create_dir_all(&item.dir).await?;

        let part = item.part_path();
        let response = self.http.download(&item.url).await?;
        let mut stream = Box::pin(response.bytes_stream());
        let mut file = tokio::fs::File::create(&part).await?;
        let mut hasher = Sha256::new();

        let streamed = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        drop(file);

        if let Err(e) = streamed {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        let kind = ContainerKind::from_path(&item.dest());
        if let Err(reason) = container::validate_as(&part, kind) {
            let _ = tokio::fs::remove_file(&part).await;
            anyhow::bail!("downloaded {} is not a valid {}: {}", item.file_name, kind.as_str(), reason);
        }

        tokio::fs::rename(&part, item.dest()).await?;
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }
}

/// Merge fresh checksums into each touched directory's `checksums.json`
fn record_checksums(results: &[(SyncItem, SyncOutcome)]) {
    let mut by_dir: BTreeMap<&Path, Vec<(&str, &str)>> = BTreeMap::new();
    for (item, outcome) in results {
        if let SyncOutcome::Downloaded { checksum } = outcome {
            by_dir
                .entry(item.dir.as_path())
                .or_default()
                .push((item.file_name.as_str(), checksum.as_str()));
        }
    }

    for (dir, fresh) in by_dir {
        let mut sums = load_checksums(dir);
        for (name, checksum) in fresh {
            sums.insert(name.to_string(), checksum.to_string());
        }
        if let Err(e) = write_json_atomic(&dir.join(CHECKSUMS_FILE), &sums) {
            warn!("Failed to record checksums in {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetKind;
    use crate::persist::Provenance;
    use crate::version;
    use tempfile::TempDir;

    fn mirror(dir: &TempDir) -> (MirrorConfig, MirrorSync) {
        let mut config = MirrorConfig::default();
        config.server.data_dir = dir.path().join("data");
        config.discovery.config_dir = dir.path().join("versions");
        let sync = MirrorSync::new(&config).unwrap();
        (config, sync)
    }

    fn target() -> CatalogTarget {
        let mut target = CatalogTarget::new("tool", TargetKind::TagSource, "acme/tool");
        target.download_url = Some("http://127.0.0.1:9/tool-{version}.txt".to_string());
        target
    }

    fn seed(config: &MirrorConfig, target: &CatalogTarget, versions: &[&str]) {
        let all = version::normalize_all(versions.iter().copied(), true);
        ConfigStore::new(config.discovery.config_dir.clone())
            .persist(target, &all, &all, &Provenance::now("test"))
            .unwrap();
    }

    #[test]
    fn test_plan_uses_recommended_versions() {
        let dir = TempDir::new().unwrap();
        let (config, sync) = mirror(&dir);
        seed(&config, &target(), &["1.0.0", "1.1.0"]);

        let items = sync.plan_target(&target()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "http://127.0.0.1:9/tool-1.0.0.txt");
        assert_eq!(items[0].file_name, "tool-1.0.0.txt");
        assert_eq!(items[1].dest(), dir.path().join("data/tag-source/tool/tool-1.1.0.txt"));
    }

    #[test]
    fn test_plan_requires_template_and_config() {
        let dir = TempDir::new().unwrap();
        let (_, sync) = mirror(&dir);

        let bare = CatalogTarget::new("bare", TargetKind::TagSource, "acme/bare");
        assert!(sync.plan_target(&bare).is_err());
        assert!(sync.plan_target(&target()).is_err());
    }

    #[tokio::test]
    async fn test_current_files_are_not_downloaded() {
        let dir = TempDir::new().unwrap();
        let (config, sync) = mirror(&dir);
        seed(&config, &target(), &["1.0.0"]);

        let item = sync.plan_target(&target()).unwrap().remove(0);
        std::fs::create_dir_all(&item.dir).unwrap();
        std::fs::write(item.dest(), b"release 1.0.0").unwrap();
        let mut sums = Checksums::new();
        sums.insert(item.file_name.clone(), file_checksum(&item.dest()).unwrap());
        write_json_atomic(&item.dir.join(CHECKSUMS_FILE), &sums).unwrap();

        let report = sync.run(&[target()], false).await;
        assert_eq!(report.up_to_date(), 1);
        assert_eq!(report.failed(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_lists_pending_downloads() {
        let dir = TempDir::new().unwrap();
        let (config, sync) = mirror(&dir);
        seed(&config, &target(), &["1.0.0", "2.0.0"]);

        let report = sync.run(&[target()], true).await;
        assert_eq!(report.pending(), 2);
        assert!(!sync.target_dir(&target()).exists());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_reported() {
        let dir = TempDir::new().unwrap();
        let (config, sync) = mirror(&dir);
        seed(&config, &target(), &["1.0.0"]);

        let report = sync.run(&[target()], false).await;
        assert_eq!(report.failed(), 1);
        let item = &report.entries[0].0;
        assert!(!item.dest().exists());
        assert!(!item.part_path().exists());
    }

    #[test]
    fn test_checksum_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_checksum(&path).unwrap(),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
