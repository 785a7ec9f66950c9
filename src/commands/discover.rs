// Discover command for refreshing version configs from upstream catalogs

use crate::commands::select_targets;
use crate::ui;
use pkgmirror::config::MirrorConfig;
use pkgmirror::discovery::{Discovery, DiscoveryResult, TargetOutcome};

fn summary(result: &DiscoveryResult) -> String {
    format!(
        "{} version(s), {} recommended",
        result.metadata.discovered_count, result.metadata.recommended_count
    )
}

pub async fn discover(target: Option<String>, dry_run: bool) -> anyhow::Result<i32> {
    let config = MirrorConfig::load()?;
    let targets = select_targets(&config, target.as_deref())?;
    let discovery = Discovery::from_config(&config.discovery)?;

    if dry_run {
        ui::status("[DRY RUN]", "Previewing discovery, nothing will be written");
    }

    let pb = ui::spinner(&format!("Discovering {} target(s)...", targets.len()));
    let report = discovery.run(&targets, dry_run).await;
    if report.failed() > 0 {
        ui::finish_spinner_error(&pb, "Discovery finished with failures");
    } else {
        ui::finish_spinner_success(&pb, "Discovery finished");
    }

    for (name, outcome) in &report.entries {
        match outcome {
            TargetOutcome::Updated { result, layout } => {
                ui::success(&format!("{}: {} ({} layout)", name, summary(result), layout.as_str()));
            }
            TargetOutcome::Previewed(result) => {
                ui::action(&format!("{}: would write {}", name, summary(result)));
                let recommended: Vec<&str> =
                    result.recommended_versions.iter().map(|v| v.as_str()).collect();
                ui::dim(&format!("    recommended: {}", recommended.join(", ")));
            }
            TargetOutcome::Skipped => {
                ui::warning(&format!("{}: no versions discovered, existing config kept", name));
            }
            TargetOutcome::Failed(e) => ui::error(&format!("{}: {}", name, e)),
        }
    }

    ui::dim(&format!(
        "{} updated, {} skipped, {} failed",
        report.updated(),
        report.skipped(),
        report.failed()
    ));

    Ok(if report.failed() > 0 { 1 } else { 0 })
}
