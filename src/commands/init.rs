// Init command for writing a starter mirror configuration

use crate::ui;
use pkgmirror::config::{self, MirrorConfig};
use pkgmirror::constants;

pub fn init() -> anyhow::Result<()> {
    if config::config_path().exists() {
        ui::dim("Configuration detected. Skipping initialization.");
        return Ok(());
    }

    let starter = MirrorConfig::starter();
    starter.save()?;
    ui::success(&format!(
        "Initialized {} with {} target(s)",
        constants::CONFIG_FILE,
        starter.targets.len()
    ));
    ui::dim("Next: run `pkgmirror discover` to fetch available versions");
    Ok(())
}
