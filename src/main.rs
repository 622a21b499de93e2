use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use etl::{
    cli::{self, Cli, Commands, TagCommands},
    error::Error,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let result = app_main().await;

    if let Err(err) = &result {
        error!("{}", err);
    }

    result
}

async fn app_main() -> Result<(), Error> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match cli.command.unwrap_or(Commands::Run {
        lookback_hours: None,
    }) {
        Commands::Run { lookback_hours } => {
            cli::run_pipeline(cancel, lookback_hours).await
        },
        Commands::Transfers { lookback_hours } => {
            cli::run_transfers(cancel, lookback_hours).await
        },
        Commands::Snapshots => cli::run_snapshots(cancel).await,
        Commands::Backfill { days, mode } => {
            cli::run_backfill(cancel, days, mode).await
        },
        Commands::Migrate { fake } => cli::run_migrate(fake).await,
        Commands::Tags {
            command: TagCommands::Import { file },
        } => cli::run_tag_import(file).await,
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown requested, cancelling in-flight work");
            cancel.cancel();
        },
        Err(e) => warn!("unable to listen for shutdown signal: {}", e),
    }
}
