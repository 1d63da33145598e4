//! gymvault: backups for the gym membership database.
//!
//! Usage:
//!   gymvault [-c config.toml] [-v] <subcommand>
//!
//! Subcommands:
//!   create   - Take a backup now
//!   restore  - Replace the live database with a backup
//!   list     - List backups, newest first
//!   delete   - Delete a backup
//!   verify   - Check a backup's integrity
//!   daily    - Take today's backup if missing
//!   repair   - Drop stale catalog entries
//!   run      - Scheduled backups until Ctrl-C

mod cli;

use clap::Parser;
use cli::Cli;
use gymvault_backup::BackupCoordinator;
use gymvault_config::Config;
use gymvault_database::Database;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(cli.config.as_deref()).map_err(report)?;
    let db = Arc::new(Database::connect(&config.database).await.map_err(report)?);
    let backups = Arc::new(BackupCoordinator::new(db.clone(), config.backup).map_err(report)?);

    let result = cli.command.execute(&backups).await;
    db.close().await;
    result
}

/// Turn an error tree into a report: the top-level kind as the message, the
/// full tree underneath.
pub(crate) fn report<K>(err: exn::Exn<K>) -> miette::Report
where
    K: std::error::Error + Send + Sync + 'static,
{
    miette::miette!("{}\n\n{err:?}", *err)
}
