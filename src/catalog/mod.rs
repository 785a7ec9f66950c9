// Catalog module for upstream version sources

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod http;
pub mod registry_feed;
pub mod release_index;
pub mod source_trait;
pub mod tags;

pub use http::CatalogHttp;
pub use registry_feed::RegistryFeedSource;
pub use release_index::ReleaseIndexSource;
pub use source_trait::CatalogSource;
pub use tags::TagSource;

use crate::config::{CatalogTarget, DiscoveryConfig, TargetKind};

/// Registry mapping each target kind to its catalog client
pub struct CatalogRegistry {
    sources: HashMap<TargetKind, Arc<dyn CatalogSource>>,
}

impl CatalogRegistry {
    /// Build the three clients around one shared HTTP client
    pub fn new(config: &DiscoveryConfig) -> anyhow::Result<Self> {
        let http = Arc::new(CatalogHttp::new(Duration::from_secs(config.timeout_secs.max(1)))?);
        let tags = Arc::new(TagSource::new(
            http.clone(),
            config.github_api.clone(),
            config.max_pages,
        ));

        let mut registry = Self::empty();
        registry.register(Arc::new(ReleaseIndexSource::new(http.clone(), tags.clone())));
        registry.register(tags);
        registry.register(Arc::new(RegistryFeedSource::new(http)));
        Ok(registry)
    }

    pub fn empty() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    pub fn register(&mut self, source: Arc<dyn CatalogSource>) {
        self.sources.insert(source.kind(), source);
    }

    pub fn get(&self, kind: TargetKind) -> Option<&Arc<dyn CatalogSource>> {
        self.sources.get(&kind)
    }

    pub fn get_or_error(&self, kind: TargetKind) -> anyhow::Result<&Arc<dyn CatalogSource>> {
        self.get(kind)
            .ok_or_else(|| anyhow::anyhow!("No catalog client registered for '{}'", kind))
    }

    /// Discover versions for a target through the client for its kind
    ///
    /// Like [`CatalogSource::discover`], an unregistered kind yields an
    /// empty list rather than an error.
    pub async fn discover(&self, target: &CatalogTarget) -> Vec<String> {
        match self.get_or_error(target.kind) {
            Ok(source) => source.discover(target).await,
            Err(e) => {
                log::warn!("{}", e);
                Vec::new()
            }
        }
    }
}
