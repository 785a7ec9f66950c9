// CLI module for handling command-line interface

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pkgmirror")]
#[command(about = "Mirror third-party package catalogs and serve them under resource limits")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter mirror.toml
    Init,
    /// Discover available versions and update version configs
    Discover {
        /// Only discover this target
        #[arg(long)]
        target: Option<String>,
        /// Show what would be written without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Serve mirrored files over HTTP
    Serve {
        /// Listen address, overrides [server].listen
        #[arg(long)]
        listen: Option<String>,
    },
    /// Download recommended versions into the data directory
    Sync {
        /// Only sync this target
        #[arg(long)]
        target: Option<String>,
        /// Show what would be downloaded without downloading
        #[arg(long)]
        dry_run: bool,
    },
    /// Report mirror health
    Status {
        /// Output machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Convert a target's version config to the per-major layout
    Split {
        /// Target name
        name: String,
    },
}
