//! CourseGate operator CLI
//!
//! Runs administrative actions directly against the configured document
//! store, bypassing the admin membership check:
//! - Issue, revoke and look up access keys
//! - Lock and unlock identities
//! - Remove courses and inspect their ratings
//! - Show the audit log, IP records and locked identities
//! - Run the eviction sweep once or as a long-running task

use std::path::PathBuf;

use anyhow::{Context, Result};
use cg_admission::{AdminCommand, AdmissionServices};
use cg_config::{AppConfig, ConfigLoader};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

/// Name recorded as the actor in the audit trail
const OPERATOR: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "cg-admin")]
#[command(about = "CourseGate operator CLI")]
struct Args {
    /// Configuration file (defaults to the standard search paths)
    #[arg(long, short, env = "COURSEGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a key for an identity, or print the existing one
    AddKey { identity: String },
    /// Revoke the key of an identity
    RemoveKey { identity: String },
    /// Print the identity owning a key
    WhoIs { key: String },
    /// Lock an identity
    Lock { identity: String },
    /// Unlock an identity
    Unlock { identity: String },
    /// Remove a course and its file
    RemoveCourse { code: String },
    /// Print the likes and dislikes of a course
    Rating { code: String },
    /// Print the audit log
    Logs,
    /// Print per-identity IP records
    Records,
    /// Print locked identities
    Locks,
    /// Prune stale rate-limit entries and IP records once
    Sweep,
    /// Run the eviction sweep until interrupted
    Watch,
    /// Print an example configuration file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    cg_common::logging::init_logging("cg-admin");

    let args = Args::parse();

    if let Command::ExampleConfig = args.command {
        println!("{}", AppConfig::example_toml());
        return Ok(());
    }

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("failed to load configuration")?;
    let services = AdmissionServices::open(&config)
        .await
        .context("failed to open admission services")?;

    let command = match args.command {
        Command::AddKey { identity } => AdminCommand::AddKey(identity),
        Command::RemoveKey { identity } => AdminCommand::RemoveKey(identity),
        Command::Lock { identity } => AdminCommand::LockUser(identity),
        Command::Unlock { identity } => AdminCommand::UnlockUser(identity),
        Command::RemoveCourse { code } => AdminCommand::RemoveCourse(code),
        Command::Logs => AdminCommand::ShowLogs,
        Command::Records => AdminCommand::ShowRecords,
        Command::Locks => AdminCommand::ShowLocks,
        Command::WhoIs { key } => {
            match services.keys.identity_for_key(&key).await? {
                Some(identity) => println!("{identity}"),
                None => anyhow::bail!("no identity owns that key"),
            }
            return Ok(());
        }
        Command::Rating { code } => {
            let rating = services.ratings.rating(&code).await?;
            println!("{}", serde_json::to_string_pretty(&rating)?);
            return Ok(());
        }
        Command::Sweep => {
            let report = services.sweeper().sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        Command::Watch => return watch(&services).await,
        // Printed before configuration is loaded
        Command::ExampleConfig => return Ok(()),
    };

    let outcome = services.admin.apply(OPERATOR, command).await?;
    println!("{}", outcome.message);
    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn watch(services: &AdmissionServices) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let Some(handle) = services.spawn_eviction(shutdown_tx.clone()) else {
        anyhow::bail!("eviction is disabled in the configuration");
    };

    signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    handle.await?;
    Ok(())
}
