//! Sanity checks applied to snapshots before they are stored.

use bigdecimal::{BigDecimal, Zero};
use thiserror::Error;

use crate::model::Stablecoin_Metric;

/// Largest supply accepted as real; anything above is a decoding error.
const MAX_SUPPLY: u64 = 1_000_000_000_000_000;

#[derive(Error, Debug, PartialEq)]
pub enum InvalidSnapshot {
    #[error("supply {0} out of range")]
    SupplyOutOfRange(BigDecimal),

    #[error("negative transfer count {0}")]
    NegativeCount(i64),

    #[error("negative transfer volume {0}")]
    NegativeVolume(BigDecimal),

    #[error("negative tvl {0}")]
    NegativeTvl(BigDecimal),
}

pub fn validate_snapshot(metric: &Stablecoin_Metric) -> Result<(), InvalidSnapshot> {
    if metric.supply < BigDecimal::zero()
        || metric.supply > BigDecimal::from(MAX_SUPPLY)
    {
        return Err(InvalidSnapshot::SupplyOutOfRange(metric.supply.clone()));
    }

    if metric.transfers_count < 0 {
        return Err(InvalidSnapshot::NegativeCount(metric.transfers_count));
    }

    if metric.transfers_volume < BigDecimal::zero() {
        return Err(InvalidSnapshot::NegativeVolume(
            metric.transfers_volume.clone(),
        ));
    }

    if metric.tvl < BigDecimal::zero() {
        return Err(InvalidSnapshot::NegativeTvl(metric.tvl.clone()));
    }

    Ok(())
}
