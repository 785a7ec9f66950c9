// Release-index source (single JSON document listing a runtime's releases)

use crate::catalog::http::CatalogHttp;
use crate::catalog::source_trait::CatalogSource;
use crate::catalog::tags::TagSource;
use crate::config::{CatalogTarget, TargetKind};
use crate::version;
use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;

/// Entry flags marking a release as archived or out of support
const RETIRED_FLAGS: &[&str] = &["museum", "archived"];

fn is_retired(entry: &Value) -> bool {
    RETIRED_FLAGS
        .iter()
        .any(|flag| entry.get(flag).and_then(Value::as_bool).unwrap_or(false))
}

fn entry_version(entry: &Value) -> Option<String> {
    entry
        .get("version")
        .and_then(Value::as_str)
        .map(|v| v.to_string())
}

/// Pull version strings out of a release-index document
///
/// Two shapes are accepted: an object keyed by version (values may carry
/// their own `version` field, which wins over the key), or an array of
/// entries with a `version` field. Retired entries are dropped.
pub fn parse_release_index(document: &Value) -> Vec<String> {
    match document {
        Value::Object(map) => map
            .iter()
            .filter(|(_, entry)| !is_retired(entry))
            .map(|(key, entry)| entry_version(entry).unwrap_or_else(|| key.clone()))
            .collect(),
        Value::Array(entries) => entries
            .iter()
            .filter(|entry| !is_retired(entry))
            .filter_map(entry_version)
            .collect(),
        _ => Vec::new(),
    }
}

/// Release-index client with a tag-listing fallback
///
/// The primary document is tried first. When it is unreachable or yields
/// no parseable version, the target's `fallback` repository is walked instead.
pub struct ReleaseIndexSource {
    http: Arc<CatalogHttp>,
    tags: Arc<TagSource>,
}

impl ReleaseIndexSource {
    pub fn new(http: Arc<CatalogHttp>, tags: Arc<TagSource>) -> Self {
        Self { http, tags }
    }

    async fn fetch_primary(&self, target: &CatalogTarget) -> Result<Vec<String>> {
        let document: Value = self.http.fetch_json(&target.source).await?;
        Ok(parse_release_index(&document))
    }
}

#[async_trait]
impl CatalogSource for ReleaseIndexSource {
    fn kind(&self) -> TargetKind {
        TargetKind::ReleaseIndex
    }

    fn validate_target(&self, target: &CatalogTarget) -> Result<()> {
        if !target.source.starts_with("http://") && !target.source.starts_with("https://") {
            anyhow::bail!(
                "Release index source must be an http(s) URL, got '{}'",
                target.source
            );
        }
        Ok(())
    }

    async fn fetch_versions(&self, target: &CatalogTarget) -> Result<Vec<String>> {
        let primary_error = match self.fetch_primary(target).await {
            // Entries that all fail the version grammar count as an empty index
            Ok(versions) if versions.iter().any(|v| version::normalize(v, false).is_some()) => {
                return Ok(versions);
            }
            Ok(_) => "release index returned no usable versions".to_string(),
            Err(e) => e.to_string(),
        };

        let Some(repo) = target.fallback.as_deref() else {
            anyhow::bail!(primary_error);
        };

        warn!(
            "Primary index for '{}' failed ({}), falling back to tags of {}",
            target.name, primary_error, repo
        );
        let versions = self.tags.versions_for(repo, target.tag_pattern()).await?;
        info!(
            "Fallback for '{}' found {} tag version(s)",
            target.name,
            versions.len()
        );
        Ok(versions)
    }
}
