//! Capstan CLI - webhook-triggered deployment agent
//!
//! Usage: capstan <COMMAND>
//!
//! Commands:
//!   serve  Listen for webhook deliveries and deploy on push
//!   check  Validate the deployment configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use capstan::config::{self, DeploymentConfig};
use capstan::hooks::HookRegistry;
use capstan::server;
use capstan::sync::{NoopCache, SyncEngine};

/// Capstan - webhook-triggered deployment agent
#[derive(Parser, Debug)]
#[command(name = "capstan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen for webhook deliveries and deploy on push
    Serve {
        /// Path to the deployment configuration
        #[arg(short, long, default_value = "capstan.toml")]
        config: PathBuf,

        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        listen: SocketAddr,
    },

    /// Validate the deployment configuration
    Check {
        /// Path to the deployment configuration
        #[arg(short, long, default_value = "capstan.toml")]
        config: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve { config, listen } => {
            let deployment = DeploymentConfig::load(&config)
                .with_context(|| format!("couldn't load {}", config.display()))?;

            // The engine's HTTP client is blocking; build it off the async
            // workers. Hosts embedding capstan as a library register hooks
            // in the registry; the standalone binary serves hook-less
            // configurations.
            let engine = tokio::task::spawn_blocking(move || {
                let registry = HookRegistry::new();
                SyncEngine::new(deployment, &registry, Box::new(NoopCache))
            })
            .await
            .context("engine construction failed")??;

            server::serve(Arc::new(engine), listen).await
        }
        Commands::Check { config } => check(&config),
    }
}

fn check(path: &Path) -> Result<()> {
    let (deployment, warnings) = config::load_with_warnings(path)
        .with_context(|| format!("couldn't load {}", path.display()))?;

    for warning in &warnings {
        match warning.line {
            Some(line) => println!(
                "warning: unknown key '{}' in {}:{}",
                warning.key,
                warning.file.display(),
                line
            ),
            None => println!(
                "warning: unknown key '{}' in {}",
                warning.key,
                warning.file.display()
            ),
        }
    }

    println!(
        "{}: {} repositories, maintenance {}",
        path.display(),
        deployment.repositories.len(),
        if deployment.maintenance { "on" } else { "off" }
    );
    for (name, repo) in &deployment.repositories {
        println!(
            "  {}: {} -> {}{}",
            name,
            repo.download_url(),
            repo.directory.display(),
            if repo.key.is_some() { " (signed)" } else { "" }
        );
    }

    Ok(())
}
