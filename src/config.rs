// Config module for loading mirror.toml and resolving paths

use crate::constants;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub fn config_dir() -> PathBuf {
    PathBuf::from(std::env::var(constants::MIRROR_DIR_ENV).unwrap_or_else(|_| ".".to_string()))
}

pub fn config_path() -> PathBuf {
    config_dir().join(constants::CONFIG_FILE)
}

/// Upstream catalog kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// JSON release index (e.g. a language runtime's releases endpoint)
    ReleaseIndex,
    /// Paginated tag listing on a source-hosting platform
    TagSource,
    /// XML "all releases" feed of an extension registry
    RegistryFeed,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::ReleaseIndex => "release-index",
            TargetKind::TagSource => "tag-source",
            TargetKind::RegistryFeed => "registry-feed",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream thing whose versions are discovered and mirrored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTarget {
    pub name: String,
    pub kind: TargetKind,
    /// URL, `owner/repo` coordinate or package name depending on `kind`
    pub source: String,
    /// Secondary `owner/repo` tried by the release-index client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    /// Tag shape with a `{version}` placeholder, e.g. `php-{version}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_pattern: Option<String>,
    /// Registry-feed stability states to accept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<String>>,
    /// Per-target override of `discovery.stable_only`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_only: Option<bool>,
    /// Artifact URL template with a `{version}` placeholder, used by sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Sub-directory under the config and data dirs, defaults to the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl CatalogTarget {
    pub fn new(name: impl Into<String>, kind: TargetKind, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            source: source.into(),
            fallback: None,
            tag_pattern: None,
            states: None,
            stable_only: None,
            download_url: None,
            group: None,
        }
    }

    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or_else(|| self.kind.as_str())
    }

    pub fn tag_pattern(&self) -> &str {
        self.tag_pattern.as_deref().unwrap_or("{version}")
    }

    pub fn stable_only(&self, default: bool) -> bool {
        self.stable_only.unwrap_or(default)
    }

    /// Render the download URL for a version, if the target has a template
    pub fn download_url_for(&self, version: &str) -> Option<String> {
        self.download_url
            .as_ref()
            .map(|template| template.replace("{version}", version))
    }
}

const CONFIG_HEADER: &str = "\
# Package mirror configuration
#
# Relative paths resolve against the directory holding this file.
# [access]      IP allow-list (exact or IPv4 CIDR) and basic auth; users map
#               names to bcrypt hashes, sha256:<hex> digests or plaintext
# [resources]   download_speed_limit is bytes/s shared by all downloads, 0 = unlimited
# [[targets]]   kind is release-index, tag-source or registry-feed

";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicAuthConfig {
    pub enabled: bool,
    /// Accept credentials stored without a hash marker
    pub allow_plaintext: bool,
    pub users: BTreeMap<String, String>,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_plaintext: true,
            users: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub enabled: bool,
    pub allowed_ips: Vec<String>,
    pub trust_proxy_headers: bool,
    pub realm: String,
    pub basic_auth: BasicAuthConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_ips: Vec::new(),
            trust_proxy_headers: true,
            realm: "Package Mirror".to_string(),
            basic_auth: BasicAuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub enabled: bool,
    pub max_concurrent_downloads: u32,
    pub max_requests_per_minute: u32,
    /// Total bytes per second shared by all downloads, 0 = unlimited
    pub download_speed_limit: u64,
    pub state_file: PathBuf,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_downloads: 10,
            max_requests_per_minute: 60,
            download_speed_limit: 0,
            state_file: PathBuf::from("runtime/resource_state.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub timeout_secs: u64,
    pub stable_only: bool,
    pub config_dir: PathBuf,
    pub recommend_threshold: usize,
    pub per_major: usize,
    pub github_api: String,
    pub max_pages: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            stable_only: true,
            config_dir: PathBuf::from("config/versions"),
            recommend_threshold: 10,
            per_major: 3,
            github_api: "https://api.github.com".to_string(),
            max_pages: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub server: ServerConfig,
    pub access: AccessConfig,
    pub resources: ResourceConfig,
    pub discovery: DiscoveryConfig,
    pub targets: Vec<CatalogTarget>,
}

impl MirrorConfig {
    /// Load `mirror.toml` from the mirror directory
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config '{}': {}", path.display(), e)
        })?;
        let mut config: MirrorConfig = toml::from_str(&text).map_err(|e| {
            anyhow::anyhow!("Failed to parse config '{}': {}", path.display(), e)
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let dir = config_dir();
        std::fs::create_dir_all(&dir)?;
        let text = format!("{}{}", CONFIG_HEADER, toml::to_string_pretty(self)?);
        std::fs::write(config_path(), text)?;
        Ok(())
    }

    /// Anchor relative paths at the directory holding the config file
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        anchor(&mut self.server.data_dir);
        anchor(&mut self.resources.state_file);
        anchor(&mut self.discovery.config_dir);
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                anyhow::bail!("Target name cannot be empty");
            }
            if target.name.contains('/') || target.name.contains("..") {
                anyhow::bail!("Invalid target name: '{}'", target.name);
            }
            let group = target.group();
            if group.is_empty() || group.contains('/') || group.contains("..") {
                anyhow::bail!("Invalid group '{}' for target '{}'", group, target.name);
            }
            if !seen.insert((target.group().to_string(), target.name.clone())) {
                anyhow::bail!("Duplicate target: '{}'", target.name);
            }
        }
        Ok(())
    }

    pub fn target(&self, name: &str) -> anyhow::Result<&CatalogTarget> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown target: '{}'. Configured targets: {}",
                    name,
                    self.targets
                        .iter()
                        .map(|t| t.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }

    /// Starter configuration written by `init`
    pub fn starter() -> Self {
        let mut php = CatalogTarget::new(
            "php",
            TargetKind::ReleaseIndex,
            "https://www.php.net/releases/index.php?json=1&max=1000",
        );
        php.fallback = Some("php/php-src".to_string());
        php.tag_pattern = Some("php-{version}".to_string());
        php.download_url = Some("https://www.php.net/distributions/php-{version}.tar.gz".to_string());

        let mut redis = CatalogTarget::new("redis", TargetKind::RegistryFeed, "redis");
        redis.download_url = Some("https://pecl.php.net/get/redis-{version}.tgz".to_string());

        let mut composer = CatalogTarget::new("composer", TargetKind::TagSource, "composer/composer");
        composer.download_url =
            Some("https://getcomposer.org/download/{version}/composer.phar".to_string());

        Self {
            targets: vec![php, redis, composer],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: MirrorConfig = toml::from_str(
            r#"
            [[targets]]
            name = "php"
            kind = "release-index"
            source = "https://example.com/releases.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].kind, TargetKind::ReleaseIndex);
        assert_eq!(config.targets[0].group(), "release-index");
        assert_eq!(config.targets[0].tag_pattern(), "{version}");
        assert_eq!(config.resources.max_concurrent_downloads, 10);
        assert!(config.discovery.stable_only);
    }

    #[test]
    fn test_resolve_paths_is_relative_to_config() {
        let mut config = MirrorConfig::default();
        config.resolve_paths(Path::new("/srv/mirror"));
        assert_eq!(config.server.data_dir, PathBuf::from("/srv/mirror/data"));
        assert_eq!(
            config.resources.state_file,
            PathBuf::from("/srv/mirror/runtime/resource_state.json")
        );
    }

    #[test]
    fn test_download_url_template() {
        let mut target = CatalogTarget::new("redis", TargetKind::RegistryFeed, "redis");
        assert_eq!(target.download_url_for("6.0.2"), None);
        target.download_url = Some("https://pecl.php.net/get/redis-{version}.tgz".into());
        assert_eq!(
            target.download_url_for("6.0.2").as_deref(),
            Some("https://pecl.php.net/get/redis-6.0.2.tgz")
        );
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mirror.toml");
        std::fs::write(
            &path,
            r#"
            [[targets]]
            name = "redis"
            kind = "registry-feed"
            source = "redis"

            [[targets]]
            name = "redis"
            kind = "registry-feed"
            source = "redis"
            "#,
        )
        .unwrap();

        let err = MirrorConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Duplicate target"));
    }

    #[test]
    fn test_starter_round_trips_through_toml() {
        let text = toml::to_string_pretty(&MirrorConfig::starter()).unwrap();
        let parsed: MirrorConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.targets, MirrorConfig::starter().targets);
    }

    #[test]
    fn test_basic_auth_table_keeps_plaintext_default() {
        let config: MirrorConfig = toml::from_str(
            r#"
            [access.basic_auth]
            enabled = true
            users = { admin = "secret" }
            "#,
        )
        .unwrap();

        let auth = &config.access.basic_auth;
        assert!(auth.enabled);
        assert!(auth.allow_plaintext);
        assert_eq!(auth.users.get("admin").map(String::as_str), Some("secret"));
        assert_eq!(config.access.realm, "Package Mirror");
    }
}
