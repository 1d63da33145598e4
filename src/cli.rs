//! Command-line structure and command handlers.

use crate::report;
use clap::{Parser, Subcommand};
use gymvault_backup::BackupCoordinator;
use std::path::PathBuf;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;

/// Back up, verify and restore the gym membership database.
#[derive(Parser)]
#[command(name = "gymvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "GYMVAULT_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Take a backup now
    Create {
        /// Free-text label stored with the backup
        #[arg(short, long, default_value = "Manual backup")]
        description: String,
    },
    /// Replace the live database with a backup (a safety backup is taken first)
    Restore { filename: String },
    /// List backups, newest first
    List {
        /// Print the catalog entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a backup and its catalog entry
    Delete { filename: String },
    /// Check a backup against its recorded digest
    Verify { filename: String },
    /// Take today's backup unless one exists already
    Daily,
    /// Drop catalog entries whose backup file is gone
    Repair,
    /// Take the daily backup, then back up on a timer until Ctrl-C
    Run,
}

impl Command {
    pub async fn execute(self, backups: &Arc<BackupCoordinator>) -> miette::Result<()> {
        match self {
            Self::Create { description } => {
                let created = backups.create_backup(&description).await.map_err(report)?;
                println!("{}", created.filename);
            },
            Self::Restore { filename } => {
                let restored = backups.restore_backup(&filename).await.map_err(report)?;
                println!("Restored {} (previous state saved as {})", restored.filename, restored.safety_backup);
            },
            Self::List { json: true } => {
                let records = backups.list_backups().await;
                let json = serde_json::to_string_pretty(&records).map_err(|e| miette::miette!("{e}"))?;
                println!("{json}");
            },
            Self::List { json: false } => {
                for record in backups.list_backups().await {
                    let created = record.created_at.format(&Rfc3339).unwrap_or_else(|_| record.created_at.to_string());
                    let size = record.compressed_size_bytes.unwrap_or(record.file_size_bytes);
                    let state = record.compression.map_or("raw", |c| c.as_str());
                    println!("{}\t{created}\t{size:>12}\t{state:<6}\t{}", record.filename, record.description);
                }
            },
            Self::Delete { filename } => {
                backups.delete_backup(&filename).await.map_err(report)?;
                println!("Deleted {filename}");
            },
            Self::Verify { filename } => {
                if backups.get_backup(&filename).await.map_err(report)?.is_none() {
                    miette::bail!("{filename}: no catalog entry, nothing to verify against");
                }
                match backups.verify_backup(&filename).await.map_err(report)? {
                    true => println!("{filename}: OK"),
                    false => miette::bail!("{filename}: integrity check failed"),
                }
            },
            Self::Daily => match backups.ensure_daily_backup().await.map_err(report)? {
                Some(created) => println!("{}", created.filename),
                None => println!("A backup for today already exists"),
            },
            Self::Repair => {
                let removed = backups.repair_catalog().await.map_err(report)?;
                println!("Removed {removed} stale catalog entries");
            },
            Self::Run => {
                if let Err(e) = backups.ensure_daily_backup().await {
                    tracing::warn!(error = ?e, "Daily backup failed");
                }
                backups.start_scheduled_backups();
                tokio::signal::ctrl_c().await.map_err(|e| miette::miette!("could not listen for Ctrl-C: {e}"))?;
                tracing::info!("Shutting down");
                backups.stop_scheduled_backups().await;
            },
        }
        Ok(())
    }
}
