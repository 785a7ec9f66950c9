// Sync command for mirroring recommended versions

use crate::commands::select_targets;
use crate::ui;
use pkgmirror::config::MirrorConfig;
use pkgmirror::sync::{MirrorSync, SyncOutcome};

pub async fn sync(target: Option<String>, dry_run: bool) -> anyhow::Result<i32> {
    let config = MirrorConfig::load()?;
    let targets = select_targets(&config, target.as_deref())?;
    let mirror = MirrorSync::new(&config)?;

    if dry_run {
        ui::status("[DRY RUN]", "Previewing sync changes...");
    }

    let pb = ui::spinner("Syncing mirror...");
    let report = mirror.run(&targets, dry_run).await;
    if report.failed() > 0 {
        ui::finish_spinner_error(&pb, "Sync finished with failures");
    } else {
        ui::finish_spinner_success(&pb, "Sync finished");
    }

    for (name, reason) in &report.skipped_targets {
        ui::dim(&format!("  - {} skipped: {}", name, reason));
    }

    for (item, outcome) in &report.entries {
        let label = format!("{} {}", item.target, item.version);
        match outcome {
            SyncOutcome::Downloaded { checksum } => {
                ui::success(&format!("{} ({})", label, checksum));
            }
            SyncOutcome::UpToDate => ui::dim(&format!("  ✓ {} (already synced)", label)),
            SyncOutcome::Pending => {
                ui::action(&format!("Would download {} from {}", label, item.url));
            }
            SyncOutcome::Failed(reason) => ui::error(&format!("{}: {}", label, reason)),
        }
    }

    if dry_run {
        ui::dim(&format!("{} file(s) would be downloaded", report.pending()));
    } else {
        ui::dim(&format!(
            "{} downloaded, {} up to date, {} failed",
            report.downloaded(),
            report.up_to_date(),
            report.failed()
        ));
    }

    Ok(if report.failed() > 0 { 1 } else { 0 })
}
