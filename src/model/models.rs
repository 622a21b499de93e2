//! Consolidated database models

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// =============================================================================
// TRANSFERS
// =============================================================================

/// One on-chain transfer event annotated with counterparty tags.
///
/// Natural key: (`tx_hash`, `token_address`, `from_address`, `to_address`,
/// `amount`). Rows are immutable once written.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Categorized_Transfer {
    pub timestamp: DateTime<Utc>,
    pub chain: String,
    pub token_symbol: String,
    pub token_address: String,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: BigDecimal,
    pub category_sender: Option<String>,
    pub label_sender: Option<String>,
    pub category_receiver: Option<String>,
    pub label_receiver: Option<String>,
    pub ingestion_time: DateTime<Utc>,
}

impl Categorized_Transfer {
    pub fn is_untagged(&self) -> bool {
        self.category_sender.is_none() && self.category_receiver.is_none()
    }
}

// =============================================================================
// METRICS
// =============================================================================

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Stablecoin_Metric {
    pub coin: String,
    pub currency: String,
    pub chain: String,
    pub timestamp: DateTime<Utc>,
    pub supply: BigDecimal,
    pub transfers_count: i64,
    pub transfers_volume: BigDecimal,
    pub tvl: BigDecimal,
    pub peg_deviation: Option<BigDecimal>,
    pub usd_equivalent_volume: BigDecimal,
}

// =============================================================================
// REFERENCE DATA
// =============================================================================

#[derive(Debug, Clone, PartialEq, FromRow, Deserialize, Serialize)]
pub struct Tagged_Address {
    pub address: String,
    pub chain: String,
    pub category: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}
