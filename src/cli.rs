//! Command-line surface for the batch pipeline.
//!
//! Every command exits successfully once it has run to completion, even
//! when individual tokens or backfill days failed; only setup errors
//! (configuration, credentials, tag table, database) end in a non-zero exit.

use std::{path::PathBuf, time::Duration};

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    configuration::{get_configuration, set_configuration, AppState, Config, State},
    error::Error,
    handler::{backfill::Backfill, pipeline, tag_import},
    helpers::{BackfillMode, TimeWindow},
    migration,
    provider::DatabasePool,
};

/// Stablecoin ETL
#[derive(Parser)]
#[command(name = "stablecoin-etl")]
#[command(about = "Stablecoin transfer and supply ETL", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract transfers and snapshots (default if no command specified)
    Run {
        /// Transfer window in hours, defaults to DEFAULT_LOOKBACK_HOURS
        #[arg(long)]
        lookback_hours: Option<u32>,
    },

    /// Extract, tag and store transfers only
    Transfers {
        #[arg(long)]
        lookback_hours: Option<u32>,
    },

    /// Take one supply/TVL snapshot per configured token
    Snapshots,

    /// Replay history one day at a time
    Backfill {
        /// Number of days to go back
        #[arg(long)]
        days: u32,

        /// `test` runs only the most recent day, `full` runs all of them
        #[arg(long, default_value = "test")]
        mode: BackfillMode,
    },

    /// Run database migrations
    Migrate {
        /// Mark migrations as applied without running them.
        /// Use alone to fake all migrations, or with a version number to fake up to that version.
        #[arg(long)]
        fake: Option<Option<u32>>,
    },

    /// Manage the address tag table
    Tags {
        #[command(subcommand)]
        command: TagCommands,
    },
}

#[derive(Subcommand)]
pub enum TagCommands {
    /// Upsert tags from a JSON file: [{address, chain, category, label, source}]
    Import { file: PathBuf },
}

pub fn init_config() -> Result<Config, Error> {
    set_configuration()?;
    get_configuration()
}

async fn init_state(cancel: CancellationToken) -> Result<AppState<State>, Error> {
    let config = init_config()?;
    migration::run_migrations(&config.database_url).await?;

    let database = DatabasePool::new(&config).await?;
    let state = State::new(config, database, cancel)?;

    Ok(AppState::new(state))
}

pub async fn run_pipeline(
    cancel: CancellationToken,
    lookback_hours: Option<u32>,
) -> Result<(), Error> {
    let state = init_state(cancel).await?;
    let window = lookback(&state, lookback_hours);

    let report = pipeline::run(state, window).await?;
    info!("run complete: {}", report);

    Ok(())
}

pub async fn run_transfers(
    cancel: CancellationToken,
    lookback_hours: Option<u32>,
) -> Result<(), Error> {
    let state = init_state(cancel).await?;
    let window = lookback(&state, lookback_hours);

    pipeline::run_transfers(state, window).await?;

    Ok(())
}

pub async fn run_snapshots(cancel: CancellationToken) -> Result<(), Error> {
    let state = init_state(cancel).await?;

    pipeline::run_snapshots(state).await?;

    Ok(())
}

pub async fn run_backfill(
    cancel: CancellationToken,
    days: u32,
    mode: BackfillMode,
) -> Result<(), Error> {
    let state = init_state(cancel.clone()).await?;

    let backfill = Backfill::new(
        days,
        mode,
        state.config.backfill_attempts,
        Duration::from_secs(state.config.backfill_cooldown_secs),
        cancel,
    );

    let report = backfill
        .run(Utc::now(), |_, window| {
            pipeline::run_transfers(state.clone(), window)
        })
        .await;

    if report.failed > 0 {
        warn!(days = ?report.failed_days, "backfill finished with failed days");
    }
    if !report.truncated_days.is_empty() {
        warn!(days = ?report.truncated_days, "backfill days only partly covered");
    }
    info!(
        "Backfill complete: attempted={} succeeded={} failed={}",
        report.attempted, report.succeeded, report.failed
    );

    if !report.cancelled {
        pipeline::run_snapshots(state).await?;
    }

    Ok(())
}

pub async fn run_migrate(fake: Option<Option<u32>>) -> Result<(), Error> {
    let config = init_config()?;

    match fake {
        Some(None) => {
            info!("Marking all migrations as applied without running them...");
            migration::run_migrations_fake(&config.database_url, None).await?;
        },
        Some(Some(version)) => {
            info!("Marking migrations up to V{:03} as applied...", version);
            migration::run_migrations_fake(&config.database_url, Some(version))
                .await?;
            migration::run_migrations(&config.database_url).await?;
        },
        None => {
            migration::run_migrations(&config.database_url).await?;
        },
    }

    info!("Migrations complete");

    Ok(())
}

pub async fn run_tag_import(file: PathBuf) -> Result<(), Error> {
    let config = init_config()?;
    migration::run_migrations(&config.database_url).await?;
    let database = DatabasePool::new(&config).await?;

    tag_import::import_file(&database, &file).await?;

    Ok(())
}

fn lookback(state: &AppState<State>, hours: Option<u32>) -> TimeWindow {
    TimeWindow::lookback_hours(
        Utc::now(),
        hours.unwrap_or(state.config.default_lookback_hours),
    )
}
