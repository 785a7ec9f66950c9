// Tag-listing source (paginated repository tags)

use crate::catalog::http::CatalogHttp;
use crate::catalog::source_trait::CatalogSource;
use crate::config::{CatalogTarget, TargetKind};
use crate::constants;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

/// Placeholder marking where the version sits inside a tag name
const VERSION_PLACEHOLDER: &str = "{version}";

/// Build the matcher for a tag pattern such as `php-{version}`
///
/// Everything around the placeholder must match literally; the placeholder
/// captures a version-like token which the normalizer validates later.
pub fn tag_matcher(pattern: &str) -> Result<Regex> {
    if !pattern.contains(VERSION_PLACEHOLDER) {
        anyhow::bail!(
            "Tag pattern '{}' must contain a {} placeholder",
            pattern,
            VERSION_PLACEHOLDER
        );
    }

    let escaped = regex::escape(pattern);
    let placeholder = regex::escape(VERSION_PLACEHOLDER);
    let body = escaped.replacen(&placeholder, r"(?P<version>[vV]?[0-9][0-9A-Za-z.\-]*)", 1);
    Ok(Regex::new(&format!("^{}$", body))?)
}

/// Extract version substrings from tag names, dropping tags that don't match
pub fn extract_versions(tags: &[String], matcher: &Regex) -> Vec<String> {
    tags.iter()
        .filter_map(|tag| matcher.captures(tag))
        .filter_map(|caps| caps.name("version").map(|m| m.as_str().to_string()))
        .collect()
}

pub struct TagSource {
    http: Arc<CatalogHttp>,
    api_base: String,
    max_pages: usize,
}

impl TagSource {
    pub fn new(http: Arc<CatalogHttp>, api_base: impl Into<String>, max_pages: usize) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            max_pages: max_pages.max(1),
        }
    }

    fn validate_repo(repo: &str) -> Result<()> {
        let parts: Vec<&str> = repo.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            anyhow::bail!(
                "Invalid repository format. Expected 'owner/repo', got '{}'",
                repo
            );
        }
        Ok(())
    }

    fn page_url(&self, repo: &str, page: usize) -> String {
        format!(
            "{}/repos/{}/tags?per_page={}&page={}",
            self.api_base,
            repo,
            constants::TAG_PAGE_SIZE,
            page
        )
    }

    /// Walk the tag listing one page at a time until a short page arrives
    pub async fn list_tags(&self, repo: &str) -> Result<Vec<String>> {
        Self::validate_repo(repo)?;

        let mut names = Vec::new();
        for page in 1..=self.max_pages {
            let url = self.page_url(repo, page);
            let tags: Vec<Tag> = self.http.fetch_api_json(&url).await?;
            let count = tags.len();
            names.extend(tags.into_iter().map(|t| t.name));

            debug!("Fetched {} tag(s) from page {} of {}", count, page, repo);
            if count < constants::TAG_PAGE_SIZE {
                return Ok(names);
            }
        }

        debug!(
            "Stopped tag pagination for {} after {} page(s)",
            repo, self.max_pages
        );
        Ok(names)
    }

    /// Tags of `repo` reduced to version substrings via `pattern`
    pub async fn versions_for(&self, repo: &str, pattern: &str) -> Result<Vec<String>> {
        let matcher = tag_matcher(pattern)?;
        let tags = self.list_tags(repo).await?;
        Ok(extract_versions(&tags, &matcher))
    }
}

#[async_trait]
impl CatalogSource for TagSource {
    fn kind(&self) -> TargetKind {
        TargetKind::TagSource
    }

    fn validate_target(&self, target: &CatalogTarget) -> Result<()> {
        Self::validate_repo(&target.source)?;
        tag_matcher(target.tag_pattern())?;
        Ok(())
    }

    async fn fetch_versions(&self, target: &CatalogTarget) -> Result<Vec<String>> {
        self.versions_for(&target.source, target.tag_pattern()).await
    }
}
