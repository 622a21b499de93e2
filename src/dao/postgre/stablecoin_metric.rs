use chrono::{DateTime, Utc};
use sqlx::Error;

use crate::model::{Stablecoin_Metric, Table};

impl Table<Stablecoin_Metric> {
    /// Append-only insert. A second snapshot for the same
    /// (coin, chain, timestamp) bucket is rejected; returns whether the row
    /// was written.
    pub async fn insert_if_not_exists(
        &self,
        data: &Stablecoin_Metric,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO stablecoin_metrics (
                coin,
                currency,
                chain,
                timestamp,
                supply,
                transfers_count,
                transfers_volume,
                tvl,
                peg_deviation,
                usd_equivalent_volume
            )
            VALUES($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (coin, chain, timestamp) DO NOTHING
            "#,
        )
        .bind(&data.coin)
        .bind(&data.currency)
        .bind(&data.chain)
        .bind(data.timestamp)
        .bind(&data.supply)
        .bind(data.transfers_count)
        .bind(&data.transfers_volume)
        .bind(&data.tvl)
        .bind(&data.peg_deviation)
        .bind(&data.usd_equivalent_volume)
        .persistent(true)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_bucket(
        &self,
        coin: &str,
        chain: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, Error> {
        let (value,): (i64,) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*)
            FROM stablecoin_metrics
            WHERE coin = $1 AND chain = $2 AND timestamp = $3
            "#,
        )
        .bind(coin)
        .bind(chain)
        .bind(timestamp)
        .persistent(true)
        .fetch_one(&self.pool)
        .await?;

        Ok(value)
    }

    /// Rebuilds the daily aggregate view. CONCURRENTLY relies on the
    /// unique (coin, chain, day) index.
    pub async fn refresh_daily_view(&self) -> Result<(), Error> {
        sqlx::query(
            r#"
            REFRESH MATERIALIZED VIEW CONCURRENTLY stablecoin_metrics_daily
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
