// Status module: health report over config, discovered versions and mirrored files

use crate::config::{CatalogTarget, MirrorConfig};
use crate::constants::{self, CHECKSUMS_FILE};
use crate::persist::ConfigStore;
use crate::server::ResourceState;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub severity: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Issue {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new("error", code, message)
    }

    fn warning(code: &str, message: impl Into<String>) -> Self {
        Self::new("warning", code, message)
    }

    fn new(severity: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: severity.to_string(),
            code: code.to_string(),
            message: message.into(),
            target: None,
            path: None,
        }
    }

    fn for_target(mut self, name: &str) -> Self {
        self.target = Some(name.to_string());
        self
    }

    fn at(mut self, path: &Path) -> Self {
        self.path = Some(path.display().to_string());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigInfo {
    pub present: bool,
    pub valid: bool,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct TargetStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub config_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    pub total_versions: usize,
    pub recommended_versions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    pub mirrored_files: usize,
}

#[derive(Debug, Serialize)]
pub struct ResourcesInfo {
    pub enabled: bool,
    pub state_present: bool,
    pub active_downloads: u32,
    pub tracked_ips: usize,
    pub max_concurrent_downloads: u32,
    pub max_requests_per_minute: u32,
    pub download_speed_limit: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub schema_version: u32,
    pub status: String,
    pub exit_code: i32,
    pub config: ConfigInfo,
    pub targets: Vec<TargetStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesInfo>,
    pub issues: Vec<Issue>,
}

/// Count mirrored artifacts in a target directory
fn count_mirrored(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name != CHECKSUMS_FILE && !name.starts_with('.') && !name.ends_with(".part")
        })
        .count()
}

fn check_target(
    config: &MirrorConfig,
    store: &ConfigStore,
    target: &CatalogTarget,
) -> (TargetStatus, Vec<Issue>) {
    let mut issues = Vec::new();
    let mirrored_files = count_mirrored(
        &config
            .server
            .data_dir
            .join(target.group())
            .join(&target.name),
    );
    let mut status = TargetStatus {
        name: target.name.clone(),
        kind: target.kind.as_str().to_string(),
        config_present: false,
        layout: None,
        total_versions: 0,
        recommended_versions: 0,
        last_updated: None,
        mirrored_files,
    };

    match store.load(target) {
        Ok(Some(loaded)) => {
            status.config_present = true;
            status.layout = Some(store.layout(target).as_str().to_string());
            status.total_versions = loaded.all_versions.len();
            status.recommended_versions = loaded.recommended_versions.len();
            if !loaded.metadata.last_updated.is_empty() {
                status.last_updated = Some(loaded.metadata.last_updated.clone());
            }
            if target.download_url.is_some() && mirrored_files < status.recommended_versions {
                issues.push(
                    Issue::warning(
                        "NOT_MIRRORED",
                        format!(
                            "{} of {} recommended versions mirrored",
                            mirrored_files, status.recommended_versions
                        ),
                    )
                    .for_target(&target.name),
                );
            }
        }
        Ok(None) => issues.push(
            Issue::warning("CONFIG_MISSING", "No version config; run discover")
                .for_target(&target.name)
                .at(&store.single_path(target)),
        ),
        Err(e) => issues.push(
            Issue::error("CONFIG_INVALID", format!("Version config unreadable: {}", e))
                .for_target(&target.name),
        ),
    }

    (status, issues)
}

fn check_resources(config: &MirrorConfig) -> (ResourcesInfo, Vec<Issue>) {
    let resources = &config.resources;
    let mut issues = Vec::new();
    let state = match ResourceState::read(&resources.state_file) {
        Ok(state) => state,
        Err(e) => {
            issues.push(
                Issue::warning("STATE_INVALID", format!("Resource state unreadable: {}", e))
                    .at(&resources.state_file),
            );
            None
        }
    };

    let info = ResourcesInfo {
        enabled: resources.enabled,
        state_present: state.is_some(),
        active_downloads: state.as_ref().map_or(0, |s| s.active_downloads),
        tracked_ips: state.as_ref().map_or(0, |s| s.ip_request_counter.len()),
        max_concurrent_downloads: resources.max_concurrent_downloads,
        max_requests_per_minute: resources.max_requests_per_minute,
        download_speed_limit: resources.download_speed_limit,
    };
    (info, issues)
}

/// Build the status report for the configuration at `config_path`
pub fn collect(config_path: &Path) -> StatusOutput {
    let mut issues = Vec::new();
    let mut targets = Vec::new();
    let mut resources = None;

    let present = config_path.exists();
    let mut valid = false;

    if !present {
        issues.push(
            Issue::error("CONFIG_MISSING", "Mirror configuration not found; run init")
                .at(config_path),
        );
    } else {
        match MirrorConfig::load_from(config_path) {
            Ok(config) => {
                valid = true;
                let store = ConfigStore::new(config.discovery.config_dir.clone());
                for target in &config.targets {
                    let (status, target_issues) = check_target(&config, &store, target);
                    targets.push(status);
                    issues.extend(target_issues);
                }
                let (info, resource_issues) = check_resources(&config);
                resources = Some(info);
                issues.extend(resource_issues);
            }
            Err(e) => issues.push(Issue::error("CONFIG_INVALID", e.to_string()).at(config_path)),
        }
    }

    issues.sort_by(|a, b| {
        a.code
            .cmp(&b.code)
            .then_with(|| a.target.cmp(&b.target))
            .then_with(|| a.message.cmp(&b.message))
    });

    let has_errors = issues.iter().any(|i| i.severity == "error");
    let has_warnings = issues.iter().any(|i| i.severity == "warning");
    let (status, exit_code) = if has_errors {
        ("error", 2)
    } else if has_warnings {
        ("warning", 1)
    } else {
        ("ok", 0)
    };

    StatusOutput {
        schema_version: constants::SCHEMA_VERSION,
        status: status.to_string(),
        exit_code,
        config: ConfigInfo {
            present,
            valid,
            path: config_path.display().to_string(),
        },
        targets,
        resources,
        issues,
    }
}
