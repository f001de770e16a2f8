use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use syncvfs_kernel::{StoreConfig, Vfs, VfsConfig, paths};

/// Interactive shell over a synchronous virtual filesystem.
#[derive(Debug, Parser)]
#[command(name = "syncvfs", version)]
struct Args {
    /// Config file (defaults to the XDG config path when it exists)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Instance name, used for default store and symlink locations
    #[arg(long)]
    name: Option<String>,

    /// Back the filesystem with this host directory
    #[arg(long, conflicts_with = "memory")]
    root: Option<PathBuf>,

    /// Keep everything in memory
    #[arg(long)]
    memory: bool,

    /// Initial working directory inside the filesystem
    #[arg(long)]
    cwd: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<VfsConfig> {
        let mut config = match self.config {
            Some(path) => VfsConfig::load(&path)?,
            None => {
                let default = paths::config_file();
                if default.exists() {
                    VfsConfig::load(&default)?
                } else {
                    VfsConfig::default()
                }
            }
        };

        if let Some(name) = self.name {
            config.name = name;
        }
        if self.memory {
            config.store = StoreConfig::Memory;
        } else if let Some(root) = self.root {
            config.store = StoreConfig::Local { root: Some(root) };
        }
        if let Some(cwd) = self.cwd {
            config.cwd = cwd;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let config = Args::parse().into_config()?;
    tracing::debug!(?config, "starting");
    let vfs = Vfs::from_config(&config).context("failed to open filesystem")?;
    syncvfs_repl::run(vfs)
}
