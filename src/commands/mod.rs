// Commands module for CLI command handlers

pub mod discover;
pub mod init;
pub mod serve;
pub mod split;
pub mod status;
pub mod sync;

use pkgmirror::config::{CatalogTarget, MirrorConfig};

/// Targets a command should work on: one named target, or all of them
pub(crate) fn select_targets(
    config: &MirrorConfig,
    name: Option<&str>,
) -> anyhow::Result<Vec<CatalogTarget>> {
    match name {
        Some(name) => Ok(vec![config.target(name)?.clone()]),
        None if config.targets.is_empty() => {
            anyhow::bail!("No targets configured. Add [[targets]] to mirror.toml.")
        }
        None => Ok(config.targets.clone()),
    }
}
