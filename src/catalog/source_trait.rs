// Trait definition for upstream catalog clients

use crate::config::{CatalogTarget, TargetKind};
use crate::error::MirrorError;
use crate::version;
use anyhow::Result;
use log::{debug, warn};

/// Trait for upstream catalogs (release index, tag listing, registry feed)
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    /// The target kind this client serves
    fn kind(&self) -> TargetKind;

    /// Validate the target's source locator for this catalog
    fn validate_target(&self, target: &CatalogTarget) -> Result<()>;

    /// Fetch raw version strings from upstream
    ///
    /// May fail on transport, HTTP-status or parse errors. Callers normally
    /// go through [`CatalogSource::discover`] instead.
    async fn fetch_versions(&self, target: &CatalogTarget) -> Result<Vec<String>>;

    /// Discover versions for a target
    ///
    /// Never fails: any error is logged and reported as an empty list, so
    /// one unreachable upstream cannot abort a discovery run. The result is
    /// normalized, deduplicated and sorted ascending; stable filtering is
    /// left to the caller.
    async fn discover(&self, target: &CatalogTarget) -> Vec<String> {
        if let Err(e) = self.validate_target(target) {
            warn!("Skipping target '{}': {}", target.name, e);
            return Vec::new();
        }

        match self.fetch_versions(target).await {
            Ok(raw) => {
                let total = raw.len();
                let versions: Vec<String> = version::normalize_all(raw, false)
                    .into_iter()
                    .map(|v| v.to_string())
                    .collect();
                debug!(
                    "Discovered {} version(s) for '{}' ({} raw entries)",
                    versions.len(),
                    target.name,
                    total
                );
                versions
            }
            Err(e) => {
                let err = MirrorError::UpstreamUnavailable {
                    target: target.name.clone(),
                    reason: format!("{} ({})", e, target.source),
                };
                warn!("{}", err);
                Vec::new()
            }
        }
    }
}
