mod cli;
mod commands;
mod ui;

use clap::Parser;
use cli::{Cli, Commands};
use env_logger::Env;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match cli.command {
        Commands::Init => commands::init::init().map(|_| 0)?,
        Commands::Discover { target, dry_run } => {
            commands::discover::discover(target, dry_run).await?
        }
        Commands::Serve { listen } => commands::serve::serve(listen).await.map(|_| 0)?,
        Commands::Sync { target, dry_run } => commands::sync::sync(target, dry_run).await?,
        Commands::Status { json } => commands::status::status(json)?,
        Commands::Split { name } => commands::split::split(&name).map(|_| 0)?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
