//! Schema migrations, embedded at compile time with refinery and tracked in
//! `refinery_schema_history`.

use refinery::{embed_migrations, Report, Target};
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::error::Error;

embed_migrations!("migrations");

/// Applies every pending migration in version order.
pub async fn run_migrations(database_url: &str) -> Result<(), Error> {
    info!("Running database migrations...");

    let mut client = connect(database_url).await?;
    let report = migrations::runner()
        .run_async(&mut client)
        .await
        .map_err(|e| Error::ConfigurationError(format!("Migration failed: {}", e)))?;

    log_report(&report, "Applied migration", "No new migrations to apply");

    Ok(())
}

/// Marks migrations as applied without executing them, for databases whose
/// tables were created by hand. `None` marks all of them, `Some(n)` marks
/// V001..Vn.
pub async fn run_migrations_fake(
    database_url: &str,
    up_to_version: Option<u32>,
) -> Result<(), Error> {
    let mut client = connect(database_url).await?;

    let target = match up_to_version {
        None => Target::Fake,
        Some(v) => Target::FakeVersion(v),
    };

    let report = migrations::runner()
        .set_target(target)
        .run_async(&mut client)
        .await
        .map_err(|e| Error::ConfigurationError(format!("Migration failed: {}", e)))?;

    log_report(
        &report,
        "Marked as applied",
        "No migrations to mark as applied",
    );

    Ok(())
}

async fn connect(database_url: &str) -> Result<Client, Error> {
    let config: tokio_postgres::Config = database_url.parse().map_err(|e| {
        Error::ConfigurationError(format!("Invalid database URL: {}", e))
    })?;

    let (client, connection) = config.connect(NoTls).await.map_err(|e| {
        Error::ConfigurationError(format!(
            "Failed to connect for migrations: {}",
            e
        ))
    })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Migration connection error: {}", e);
        }
    });

    Ok(client)
}

fn log_report(report: &Report, action: &str, empty: &str) {
    let applied = report.applied_migrations();
    if applied.is_empty() {
        info!("{}", empty);
        return;
    }

    for migration in applied {
        info!(
            "{}: V{:03}__{} (checksum: {})",
            action,
            migration.version(),
            migration.name(),
            migration.checksum()
        );
    }
    info!("{} migration(s) processed", applied.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_embedded() {
        let runner = migrations::runner();
        let migrations = runner.get_migrations();

        let mut versions: Vec<u32> =
            migrations.iter().map(|m| m.version()).collect();
        versions.sort();

        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_natural_key_constraint_is_declared() {
        let runner = migrations::runner();
        let transfers = runner
            .get_migrations()
            .iter()
            .find(|m| m.name() == "categorized_transfers")
            .and_then(|m| m.sql())
            .unwrap_or_default()
            .to_owned();

        assert!(transfers.contains(
            "UNIQUE (tx_hash, token_address, from_address, to_address, amount)"
        ));
    }
}
