// Status command for reporting mirror health

use crate::ui;
use pkgmirror::config;
use pkgmirror::status::{self, StatusOutput};

pub fn status(json: bool) -> anyhow::Result<i32> {
    let output = status::collect(&config::config_path());

    if json {
        ui::raw(&serde_json::to_string_pretty(&output)?);
    } else {
        output_human_readable(&output);
    }

    Ok(output.exit_code)
}

fn output_human_readable(output: &StatusOutput) {
    ui::header("Mirror status");
    ui::dim(&format!("  config: {}", output.config.path));

    for target in &output.targets {
        if target.config_present {
            ui::success(&format!(
                "{} ({}): {} version(s), {} recommended, {} mirrored",
                target.name,
                target.kind,
                target.total_versions,
                target.recommended_versions,
                target.mirrored_files
            ));
            if let (Some(layout), Some(updated)) = (&target.layout, &target.last_updated) {
                ui::dim(&format!("    {} layout, updated {}", layout, updated));
            }
        } else {
            ui::warning(&format!("{} ({}): not discovered yet", target.name, target.kind));
        }
    }

    if let Some(resources) = &output.resources {
        let state = if resources.enabled { "enabled" } else { "disabled" };
        ui::dim(&format!(
            "  resources {}: {}/{} active downloads, {} tracked IP(s)",
            state,
            resources.active_downloads,
            resources.max_concurrent_downloads,
            resources.tracked_ips
        ));
    }

    if output.issues.is_empty() {
        ui::success("No issues found");
        return;
    }

    for issue in &output.issues {
        let subject = issue
            .target
            .as_deref()
            .map(|t| format!("[{}] ", t))
            .unwrap_or_default();
        let line = format!("{}: {}{}", issue.code, subject, issue.message);
        if issue.severity == "error" {
            ui::error(&line);
        } else {
            ui::warning(&line);
        }
    }
}
