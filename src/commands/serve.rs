// Serve command for running the mirror's HTTP gateway

use crate::ui;
use pkgmirror::config::MirrorConfig;
use pkgmirror::server::{MirrorServer, MirrorService};

pub async fn serve(listen: Option<String>) -> anyhow::Result<()> {
    let mut config = MirrorConfig::load()?;
    if let Some(listen) = listen {
        config.server.listen = listen;
    }

    if !config.server.data_dir.is_dir() {
        ui::warning(&format!(
            "Data directory {} does not exist yet; run `pkgmirror sync`",
            config.server.data_dir.display()
        ));
    }

    let service = MirrorService::new(&config);
    let server = MirrorServer::bind(&config.server.listen, service)?;
    let addr = server
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| config.server.listen.clone());
    ui::success(&format!(
        "Serving {} on http://{}",
        config.server.data_dir.display(),
        addr
    ));

    // tiny_http blocks; keep it off the async workers
    tokio::task::spawn_blocking(move || server.run()).await?;
    Ok(())
}
