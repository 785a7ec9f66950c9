// Registry-feed source (XML "all releases" feed of an extension registry)

use crate::catalog::http::CatalogHttp;
use crate::catalog::source_trait::CatalogSource;
use crate::config::{CatalogTarget, TargetKind};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Default registry REST root used when a target names a bare package
pub const DEFAULT_REGISTRY_BASE: &str = "https://pecl.php.net/rest/r";

/// Stability state accepted when a target does not ask for more
pub const STABLE_STATE: &str = "stable";

#[derive(Debug, Deserialize)]
struct AllReleases {
    #[serde(rename = "r", default)]
    releases: Vec<FeedRelease>,
}

#[derive(Debug, Deserialize)]
struct FeedRelease {
    #[serde(rename = "v")]
    version: String,
    #[serde(rename = "s", default)]
    stability: String,
}

/// Parse a feed body into (version, stability) pairs
pub fn parse_feed(xml: &str) -> Result<Vec<(String, String)>> {
    let feed: AllReleases = quick_xml::de::from_str(xml)
        .map_err(|e| anyhow::anyhow!("Failed to parse release feed: {}", e))?;
    Ok(feed
        .releases
        .into_iter()
        .map(|r| (r.version.trim().to_string(), r.stability.trim().to_lowercase()))
        .collect())
}

/// Keep versions whose stability is one of `states`
pub fn filter_states(releases: Vec<(String, String)>, states: &[String]) -> Vec<String> {
    releases
        .into_iter()
        .filter(|(_, stability)| states.iter().any(|s| s.eq_ignore_ascii_case(stability)))
        .map(|(version, _)| version)
        .collect()
}

pub struct RegistryFeedSource {
    http: Arc<CatalogHttp>,
}

impl RegistryFeedSource {
    pub fn new(http: Arc<CatalogHttp>) -> Self {
        Self { http }
    }

    /// Feed URL for a target: full URLs pass through, bare names are expanded
    pub fn feed_url(source: &str) -> String {
        if source.starts_with("http://") || source.starts_with("https://") {
            source.to_string()
        } else {
            format!(
                "{}/{}/allreleases.xml",
                DEFAULT_REGISTRY_BASE,
                urlencoding::encode(&source.to_lowercase())
            )
        }
    }

    fn states(target: &CatalogTarget) -> Vec<String> {
        match &target.states {
            Some(states) if !states.is_empty() => states.clone(),
            _ => vec![STABLE_STATE.to_string()],
        }
    }
}

#[async_trait]
impl CatalogSource for RegistryFeedSource {
    fn kind(&self) -> TargetKind {
        TargetKind::RegistryFeed
    }

    fn validate_target(&self, target: &CatalogTarget) -> Result<()> {
        if target.source.trim().is_empty() {
            anyhow::bail!("Registry package name cannot be empty");
        }
        Ok(())
    }

    async fn fetch_versions(&self, target: &CatalogTarget) -> Result<Vec<String>> {
        let url = Self::feed_url(&target.source);
        let body = self.http.fetch_text(&url).await?;
        let releases = parse_feed(&body)?;
        Ok(filter_states(releases, &Self::states(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<a xmlns="http://pear.php.net/dtd/rest.allreleases">
 <p>redis</p>
 <c>pecl.php.net</c>
 <r><v>6.0.2</v><s>stable</s></r>
 <r><v>6.0.1</v><s>stable</s></r>
 <r><v>6.0.0RC2</v><s>beta</s></r>
 <r><v>5.3.7</v><s>stable</s></r>
 <r><v>2.0.0a1</v><s>alpha</s></r>
</a>"#;

    #[test]
    fn test_parse_feed() {
        let releases = parse_feed(FEED).unwrap();
        assert_eq!(releases.len(), 5);
        assert_eq!(releases[0], ("6.0.2".to_string(), "stable".to_string()));
        assert_eq!(releases[2], ("6.0.0RC2".to_string(), "beta".to_string()));
    }

    #[test]
    fn test_stable_only_by_default() {
        let target = CatalogTarget::new("redis", TargetKind::RegistryFeed, "redis");
        let versions = filter_states(parse_feed(FEED).unwrap(), &RegistryFeedSource::states(&target));
        assert_eq!(versions, vec!["6.0.2", "6.0.1", "5.3.7"]);
    }

    #[test]
    fn test_broader_states_on_request() {
        let states = vec!["stable".to_string(), "beta".to_string()];
        let versions = filter_states(parse_feed(FEED).unwrap(), &states);
        assert_eq!(versions, vec!["6.0.2", "6.0.1", "6.0.0RC2", "5.3.7"]);
    }

    #[test]
    fn test_empty_feed() {
        let releases = parse_feed("<a><p>empty</p></a>").unwrap();
        assert!(releases.is_empty());
    }

    #[test]
    fn test_malformed_feed_is_an_error() {
        assert!(parse_feed("<a><r><v>1.0</r></a>").is_err());
    }

    #[test]
    fn test_feed_url() {
        assert_eq!(
            RegistryFeedSource::feed_url("Redis"),
            "https://pecl.php.net/rest/r/redis/allreleases.xml"
        );
        assert_eq!(
            RegistryFeedSource::feed_url("http://localhost:1234/feed.xml"),
            "http://localhost:1234/feed.xml"
        );
    }
}
