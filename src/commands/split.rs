// Split command for converting a target to the per-major layout

use crate::ui;
use pkgmirror::config::MirrorConfig;
use pkgmirror::persist::{ConfigStore, Layout};

pub fn split(name: &str) -> anyhow::Result<()> {
    let config = MirrorConfig::load()?;
    let target = config.target(name)?;
    let store = ConfigStore::new(config.discovery.config_dir.clone());

    if store.layout(target) == Layout::Split {
        ui::dim(&format!("'{}' already uses the split layout", name));
        return Ok(());
    }

    store.split(target)?;
    ui::success(&format!(
        "Split '{}' into {}",
        name,
        store.split_dir(target).display()
    ));
    Ok(())
}
