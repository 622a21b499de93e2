use std::{fmt, num::NonZeroUsize, sync::Arc};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{error, info, warn};

use crate::{
    configuration::{AppState, State, Token},
    error::Error,
    futures_set::fold_bounded,
    helpers::{Chain, TimeWindow},
    model::Categorized_Transfer,
    validation::validate_snapshot,
};

use super::{
    snapshots::extract_snapshot,
    tag_resolver::{self, TagMap},
    transfers::ChainExtractor,
};

#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub chain: Chain,
    pub token: String,
    pub error: String,
}

/// What a single (chain, token) unit of work ended with.
#[derive(Debug)]
pub enum UnitOutcome {
    Transfers {
        chain: Chain,
        token: String,
        attempted: u64,
        written: u64,
        untagged: u64,
        truncated: bool,
    },
    Snapshot {
        chain: Chain,
        token: String,
        written: bool,
    },
    SnapshotRejected {
        chain: Chain,
        token: String,
        reason: String,
    },
    Failed(UnitFailure),
    Cancelled,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunReport {
    pub units: u64,
    pub attempted: u64,
    pub written: u64,
    pub duplicates: u64,
    pub untagged: u64,
    pub snapshots_written: u64,
    pub snapshots_duplicate: u64,
    pub snapshots_rejected: u64,
    pub failed: Vec<UnitFailure>,
    pub skipped: Vec<String>,
    /// `chain:token` units whose extraction stopped short of the window
    /// start.
    pub truncated: Vec<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn record(mut self, outcome: UnitOutcome) -> RunReport {
        self.units += 1;

        match outcome {
            UnitOutcome::Transfers {
                chain,
                token,
                attempted,
                written,
                untagged,
                truncated,
            } => {
                info!(
                    chain = %chain,
                    token = %token,
                    attempted,
                    written,
                    untagged,
                    "transfers stored"
                );
                if truncated {
                    warn!(chain = %chain, token = %token, "window only partly covered");
                    self.truncated.push(format!("{}:{}", chain, token));
                }
                self.attempted += attempted;
                self.written += written;
                self.duplicates += attempted.saturating_sub(written);
                self.untagged += untagged;
            },
            UnitOutcome::Snapshot {
                chain,
                token,
                written,
            } => {
                if written {
                    info!(chain = %chain, token = %token, "snapshot stored");
                    self.snapshots_written += 1;
                } else {
                    info!(
                        chain = %chain,
                        token = %token,
                        "snapshot bucket already stored"
                    );
                    self.snapshots_duplicate += 1;
                }
            },
            UnitOutcome::SnapshotRejected {
                chain,
                token,
                reason,
            } => {
                warn!(chain = %chain, token = %token, "snapshot rejected: {}", reason);
                self.snapshots_rejected += 1;
            },
            UnitOutcome::Failed(failure) => {
                error!(
                    chain = %failure.chain,
                    token = %failure.token,
                    "unit failed: {}",
                    failure.error
                );
                self.failed.push(failure);
            },
            UnitOutcome::Cancelled => {
                self.cancelled = true;
            },
        }

        self
    }

    pub fn merge(mut self, other: RunReport) -> RunReport {
        self.units += other.units;
        self.attempted += other.attempted;
        self.written += other.written;
        self.duplicates += other.duplicates;
        self.untagged += other.untagged;
        self.snapshots_written += other.snapshots_written;
        self.snapshots_duplicate += other.snapshots_duplicate;
        self.snapshots_rejected += other.snapshots_rejected;
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
        self.truncated.extend(other.truncated);
        self.cancelled |= other.cancelled;
        self
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "units={} transfers attempted={} written={} duplicates={} untagged={} \
             snapshots written={} duplicate={} rejected={} failed={} skipped={} \
             truncated={}",
            self.units,
            self.attempted,
            self.written,
            self.duplicates,
            self.untagged,
            self.snapshots_written,
            self.snapshots_duplicate,
            self.snapshots_rejected,
            self.failed.len(),
            self.skipped.len(),
            self.truncated.len(),
        )
    }
}

/// Transfers and snapshots for `window`.
pub async fn run(
    state: AppState<State>,
    window: TimeWindow,
) -> Result<RunReport, Error> {
    let transfers = run_transfers(state.clone(), window).await?;
    if transfers.cancelled {
        return Ok(transfers);
    }

    let snapshots = run_snapshots(state).await?;

    Ok(transfers.merge(snapshots))
}

pub async fn run_transfers(
    state: AppState<State>,
    window: TimeWindow,
) -> Result<RunReport, Error> {
    let mut report = RunReport::default();
    let mut units: Vec<BoxFuture<'static, UnitOutcome>> = Vec::new();

    info!(start = %window.start, end = %window.end, "transfer run started");

    for chain in state.config.active_chains() {
        let mut tokens: Vec<Token> = Vec::new();

        for token in state.config.tokens_on(chain) {
            if state.config.is_transfer_excluded(chain, &token.symbol) {
                report.skipped.push(format!("{}:{}", chain, token.symbol));
                continue;
            }
            tokens.push(token.clone());
        }

        if tokens.is_empty() {
            continue;
        }

        let tags = tag_resolver::load(&state.database, chain).await?;
        let extractor =
            ChainExtractor::for_chain(&state.config, chain, state.source.clone())?;

        for token in tokens {
            units.push(Box::pin(transfer_unit(
                state.clone(),
                extractor.clone(),
                tags.clone(),
                token,
                window,
            )));
        }
    }

    let report = run_units(&state, units, report).await?;
    info!("transfer run finished: {}", report);

    Ok(report)
}

pub async fn run_snapshots(state: AppState<State>) -> Result<RunReport, Error> {
    let now = Utc::now();
    let mut units: Vec<BoxFuture<'static, UnitOutcome>> = Vec::new();

    for chain in state.config.active_chains() {
        let extractor =
            ChainExtractor::for_chain(&state.config, chain, state.source.clone())?;

        for token in state.config.tokens_on(chain) {
            units.push(Box::pin(snapshot_unit(
                state.clone(),
                extractor.clone(),
                token.clone(),
                now,
            )));
        }
    }

    let report = run_units(&state, units, RunReport::default()).await?;

    if report.snapshots_written > 0 {
        if let Err(e) = state.database.stablecoin_metric.refresh_daily_view().await
        {
            warn!("daily aggregate refresh failed: {}", e);
        }
    }

    info!("snapshot run finished: {}", report);

    Ok(report)
}

async fn run_units(
    state: &AppState<State>,
    units: Vec<BoxFuture<'static, UnitOutcome>>,
    report: RunReport,
) -> Result<RunReport, Error> {
    let capacity = NonZeroUsize::new(state.config.max_tasks)
        .unwrap_or(NonZeroUsize::MIN);

    let report = fold_bounded(units, capacity, report, RunReport::record).await?;

    Ok(report)
}

/// One token's transfers for a window, tagged and ready to store.
#[derive(Debug)]
pub struct TaggedTransfers {
    pub rows: Vec<Categorized_Transfer>,
    pub untagged: u64,
    pub truncated: bool,
}

/// Extract and tag one token's transfers. A failure comes back as the
/// unit's final outcome.
pub async fn extract_unit(
    extractor: &ChainExtractor,
    tags: &TagMap,
    token: &Token,
    window: &TimeWindow,
) -> Result<TaggedTransfers, UnitOutcome> {
    let extraction = extractor
        .extract(token, window)
        .await
        .map_err(|e| failure(extractor.chain(), token, e))?;

    let ingestion_time = Utc::now();
    let rows: Vec<Categorized_Transfer> = extraction
        .transfers
        .into_iter()
        .map(|transfer| tags.classify(transfer, ingestion_time))
        .collect();
    let untagged = rows.iter().filter(|row| row.is_untagged()).count() as u64;

    Ok(TaggedTransfers {
        rows,
        untagged,
        truncated: extraction.truncated,
    })
}

/// Extract, tag and store one token's transfers. Every failure stays
/// inside the unit.
async fn transfer_unit(
    state: AppState<State>,
    extractor: ChainExtractor,
    tags: Arc<TagMap>,
    token: Token,
    window: TimeWindow,
) -> UnitOutcome {
    let chain = extractor.chain();

    let tagged = match extract_unit(&extractor, &tags, &token, &window).await {
        Ok(tagged) => tagged,
        Err(outcome) => return outcome,
    };

    match state
        .database
        .categorized_transfer
        .insert_many(&tagged.rows)
        .await
    {
        Ok(written) => UnitOutcome::Transfers {
            chain,
            token: token.symbol,
            attempted: tagged.rows.len() as u64,
            written,
            untagged: tagged.untagged,
            truncated: tagged.truncated,
        },
        Err(e) => failure(chain, &token, Error::SQL(e)),
    }
}

async fn snapshot_unit(
    state: AppState<State>,
    extractor: ChainExtractor,
    token: Token,
    now: DateTime<Utc>,
) -> UnitOutcome {
    let chain = extractor.chain();

    let metric =
        match extract_snapshot(&state.config, &state.http, &extractor, &token, now)
            .await
        {
            Ok(metric) => metric,
            Err(e) => return failure(chain, &token, e),
        };

    if let Err(e) = validate_snapshot(&metric) {
        return UnitOutcome::SnapshotRejected {
            chain,
            token: token.symbol,
            reason: e.to_string(),
        };
    }

    match state
        .database
        .stablecoin_metric
        .insert_if_not_exists(&metric)
        .await
    {
        Ok(written) => UnitOutcome::Snapshot {
            chain,
            token: token.symbol,
            written,
        },
        Err(e) => failure(chain, &token, Error::SQL(e)),
    }
}

pub fn failure(chain: Chain, token: &Token, error: Error) -> UnitOutcome {
    if error.is_cancelled() {
        return UnitOutcome::Cancelled;
    }

    UnitOutcome::Failed(UnitFailure {
        chain,
        token: token.symbol.clone(),
        error: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfers(attempted: u64, written: u64, untagged: u64) -> UnitOutcome {
        UnitOutcome::Transfers {
            chain: Chain::Ethereum,
            token: String::from("EURC"),
            attempted,
            written,
            untagged,
            truncated: false,
        }
    }

    #[test]
    fn test_report_counts_duplicates_and_failures() {
        let report = RunReport::default()
            .record(transfers(10, 7, 4))
            .record(transfers(5, 5, 0))
            .record(UnitOutcome::Failed(UnitFailure {
                chain: Chain::Solana,
                token: String::from("VGBP"),
                error: String::from("gave up"),
            }));

        assert_eq!(report.units, 3);
        assert_eq!(report.attempted, 15);
        assert_eq!(report.written, 12);
        assert_eq!(report.duplicates, 3);
        assert_eq!(report.untagged, 4);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_report_snapshots_and_merge() {
        let snapshots = RunReport::default()
            .record(UnitOutcome::Snapshot {
                chain: Chain::Base,
                token: String::from("EURC"),
                written: true,
            })
            .record(UnitOutcome::Snapshot {
                chain: Chain::Base,
                token: String::from("EURC"),
                written: false,
            })
            .record(UnitOutcome::SnapshotRejected {
                chain: Chain::Base,
                token: String::from("EURC"),
                reason: String::from("supply out of range"),
            });

        let report = RunReport::default()
            .record(transfers(2, 2, 2))
            .merge(snapshots);

        assert_eq!(report.units, 4);
        assert_eq!(report.snapshots_written, 1);
        assert_eq!(report.snapshots_duplicate, 1);
        assert_eq!(report.snapshots_rejected, 1);
        assert!(report.is_success());
    }

    #[test]
    fn test_cancelled_unit_is_not_a_failure() {
        let token = Token {
            chain: Chain::Ethereum,
            symbol: String::from("EURC"),
            address: String::from("0x1aBaEA1f7C830bD89Acc67eC4af516284b1bC33c"),
        };

        let outcome = failure(Chain::Ethereum, &token, Error::Cancelled);
        let report = RunReport::default().record(outcome);

        assert!(report.failed.is_empty());
        assert!(report.cancelled);
        assert!(!report.is_success());
    }

    #[test]
    fn test_truncated_unit_is_reported_but_succeeds() {
        let report = RunReport::default()
            .record(UnitOutcome::Transfers {
                chain: Chain::Solana,
                token: String::from("VGBP"),
                attempted: 4,
                written: 4,
                untagged: 1,
                truncated: true,
            })
            .merge(RunReport::default().record(transfers(1, 1, 0)));

        assert_eq!(report.truncated, vec![String::from("solana:VGBP")]);
        assert!(report.is_success());
        assert!(report.to_string().ends_with("truncated=1"));
    }
}
