// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use strata::{HostExecutor, LayerConfig, Subvolume, artifacts_dir, compile_items};
use tracing::info;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about = "Compile declarative items into an immutable image layer", long_about = None)]
struct Cli {
    /// Log every privileged command
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one layer into a subvolume
    Build {
        /// Layer file ([layer] options and [[item]] tables)
        #[arg(short, long)]
        config: PathBuf,
        /// Subvolume to build into
        #[arg(short, long)]
        subvol: PathBuf,
        /// Leave the result writable
        #[arg(long)]
        no_readonly: bool,
    },
    /// Print the per-repository artifacts directory, creating it if needed
    ArtifactsDir {
        /// Any path inside the repository (default: current directory)
        #[arg(long)]
        path_in_repo: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Build {
            config,
            subvol,
            no_readonly,
        } => {
            let layer = LayerConfig::load(&config)
                .with_context(|| format!("Failed to load {}", config.display()))?;
            let executor = HostExecutor::detect();
            info!("Privilege escalation: {:?}", executor.escalation());

            let mut target = Subvolume::new(&subvol, Arc::new(executor));
            compile_items(layer.items, &layer.layer, &target)
                .with_context(|| format!("Failed to build {}", subvol.display()))?;
            if !no_readonly {
                target.set_readonly(true)?;
            }
            println!("{}", subvol.display());
            Ok(())
        }
        Commands::ArtifactsDir { path_in_repo } => {
            let dir = artifacts_dir::ensure_per_repo_artifacts_dir_exists(path_in_repo.as_deref())?;
            println!("{}", dir.display());
            Ok(())
        }
    }
}
