use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    configuration::{Config, Token},
    error::Error,
    helpers::{hour_bucket, Chain, PegCurrency, TimeWindow},
    model::Stablecoin_Metric,
    provider::HTTP,
};

use super::transfers::{ChainExtractor, RawTransfer};

/// Measures one token on one chain: on-chain supply, recent transfer
/// activity, TVL and the USD-equivalent volume.
pub async fn extract_snapshot(
    config: &Config,
    http: &HTTP,
    extractor: &ChainExtractor,
    token: &Token,
    now: DateTime<Utc>,
) -> Result<Stablecoin_Metric, Error> {
    let chain = extractor.chain();
    let currency = config.currency_of(&token.symbol);

    let supply = extractor.total_supply(token).await?;

    let window = TimeWindow::lookback_hours(now, config.snapshot_window_hours);
    let transfers = match extractor.extract(token, &window).await {
        Ok(extraction) => extraction.transfers,
        Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
        Err(e) => {
            warn!(
                chain = %chain,
                token = %token.symbol,
                "transfer activity unavailable, counting zero: {}",
                e
            );
            vec![]
        },
    };

    let tvl = http.get_tvl(&token.symbol, chain, currency).await?;
    let usd_rate = http.get_usd_rate(currency).await?;

    debug!(
        chain = %chain,
        token = %token.symbol,
        %supply,
        %tvl,
        %usd_rate,
        "snapshot inputs"
    );

    Ok(build_snapshot(
        token,
        chain,
        currency,
        hour_bucket(now),
        supply,
        &transfers,
        tvl,
        &usd_rate,
    ))
}

#[allow(clippy::too_many_arguments)]
pub fn build_snapshot(
    token: &Token,
    chain: Chain,
    currency: PegCurrency,
    timestamp: DateTime<Utc>,
    supply: BigDecimal,
    transfers: &[RawTransfer],
    tvl: BigDecimal,
    usd_rate: &BigDecimal,
) -> Stablecoin_Metric {
    let transfers_volume = transfers
        .iter()
        .fold(BigDecimal::from(0), |acc, transfer| acc + &transfer.value);
    let usd_equivalent_volume = &transfers_volume * usd_rate;

    Stablecoin_Metric {
        coin: token.symbol.clone(),
        currency: currency.to_string(),
        chain: chain.to_string(),
        timestamp,
        supply,
        transfers_count: transfers.len() as i64,
        transfers_volume,
        tvl,
        peg_deviation: None,
        usd_equivalent_volume,
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::TimeZone;

    use super::*;

    fn transfer(value: &str) -> RawTransfer {
        RawTransfer {
            timestamp: Utc::now(),
            chain: Chain::Solana,
            token_symbol: String::from("VGBP"),
            token_address: String::from(
                "5H4voZhzySsVvwVYDAKku8MZGuYBC7cXaBKDPW4YHWW1",
            ),
            tx_hash: String::from("sig"),
            sender: String::from("a"),
            receiver: String::from("b"),
            value: BigDecimal::from_str(value).unwrap(),
        }
    }

    #[test]
    fn test_build_snapshot() {
        let token = Token {
            chain: Chain::Solana,
            symbol: String::from("VGBP"),
            address: String::from("5H4voZhzySsVvwVYDAKku8MZGuYBC7cXaBKDPW4YHWW1"),
        };
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();

        let metric = build_snapshot(
            &token,
            Chain::Solana,
            PegCurrency::GBP,
            timestamp,
            BigDecimal::from(1_000),
            &[transfer("60.5"), transfer("39.5")],
            BigDecimal::from(0),
            &PegCurrency::GBP.fallback_usd_rate(),
        );

        assert_eq!(metric.coin, "VGBP");
        assert_eq!(metric.currency, "GBP");
        assert_eq!(metric.chain, "solana");
        assert_eq!(metric.transfers_count, 2);
        assert_eq!(metric.transfers_volume, BigDecimal::from(100));
        assert_eq!(metric.usd_equivalent_volume, BigDecimal::from(127));
        assert_eq!(metric.peg_deviation, None);
    }
}
