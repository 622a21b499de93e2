use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    configuration::Token,
    error::Error,
    helpers::{parse_hex_quantity, parse_hex_u64, scale_amount, Chain, TimeWindow},
    provider::Source,
};

use super::transfers::{Extraction, RawTransfer};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
const DECIMALS_SELECTOR: &str = "0x313ce567";
const TOTAL_SUPPLY_SELECTOR: &str = "0x18160ddd";
const DEFAULT_DECIMALS: u32 = 18;
/// Widest `eth_getLogs` range most providers accept.
const MAX_BLOCK_RANGE: u64 = 1000;
/// Block times drift; the estimated range is padded by 1/20 of its
/// distance from the head plus a fixed number of blocks on each side.
const RANGE_MARGIN_DIVISOR: u64 = 20;
const MIN_RANGE_MARGIN: u64 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub transaction_hash: String,
    pub block_number: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: String,
}

#[derive(Debug, Clone)]
pub struct EvmExtractor {
    chain: Chain,
    endpoint: String,
    source: Source,
}

impl EvmExtractor {
    pub fn new(chain: Chain, endpoint: &str, source: Source) -> EvmExtractor {
        EvmExtractor {
            chain,
            endpoint: endpoint.to_owned(),
            source,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub async fn extract(
        &self,
        token: &Token,
        window: &TimeWindow,
    ) -> Result<Extraction, Error> {
        if !self.chain.is_valid_address(&token.address) {
            warn!(
                chain = %self.chain,
                token = %token.symbol,
                "skipping token with invalid contract address"
            );
            return Ok(Extraction::default());
        }

        let Some(head) = self.block_number().await? else {
            warn!(chain = %self.chain, "no head block, nothing to extract");
            return Ok(Extraction::default());
        };

        let mut timestamps: HashMap<u64, Option<DateTime<Utc>>> = HashMap::new();
        let head_time = self.block_timestamp(head).await?;
        timestamps.insert(head, head_time);

        let Some((from_block, to_block)) = block_range(
            head,
            head_time.unwrap_or_else(Utc::now),
            window,
            self.chain.block_time_ms(),
        ) else {
            debug!(chain = %self.chain, "window starts after head block");
            return Ok(Extraction::default());
        };

        let decimals = self.decimals(&token.address).await?;
        let mut transfers = Vec::new();
        let mut start = from_block;

        while start <= to_block {
            let end = (start + MAX_BLOCK_RANGE - 1).min(to_block);
            let logs = self.get_logs(&token.address, start, end).await?;

            debug!(
                chain = %self.chain,
                token = %token.symbol,
                from = start,
                to = end,
                count = logs.len(),
                "fetched transfer logs"
            );

            for log in logs {
                let Some(parsed) = parse_transfer_log(&log) else {
                    continue;
                };
                let Some(height) = parse_hex_u64(&log.block_number) else {
                    continue;
                };

                let timestamp = match timestamps.get(&height) {
                    Some(timestamp) => *timestamp,
                    None => {
                        let timestamp = self.block_timestamp(height).await?;
                        timestamps.insert(height, timestamp);
                        timestamp
                    },
                };

                let Some(timestamp) = timestamp else {
                    continue;
                };
                if !window.contains(&timestamp) {
                    continue;
                }

                let (sender, receiver, raw) = parsed;
                transfers.push(RawTransfer {
                    timestamp,
                    chain: self.chain,
                    token_symbol: token.symbol.clone(),
                    token_address: token.address.clone(),
                    tx_hash: log.transaction_hash.to_lowercase(),
                    sender,
                    receiver,
                    value: scale_amount(raw, decimals),
                });
            }

            start = end + 1;
        }

        Ok(Extraction::complete(transfers))
    }

    pub async fn total_supply(&self, token: &Token) -> Result<BigDecimal, Error> {
        if !self.chain.is_valid_address(&token.address) {
            return Ok(BigDecimal::from(0));
        }

        let decimals = self.decimals(&token.address).await?;
        let raw = self
            .call(&token.address, TOTAL_SUPPLY_SELECTOR)
            .await?
            .and_then(|value| parse_hex_quantity(&value))
            .unwrap_or_else(|| BigDecimal::from(0));

        Ok(scale_amount(raw, decimals))
    }

    async fn block_number(&self) -> Result<Option<u64>, Error> {
        let head: Option<String> = self
            .source
            .rpc(&self.endpoint, "eth_blockNumber", json!([]))
            .await?;

        Ok(head.and_then(|value| parse_hex_u64(&value)))
    }

    async fn decimals(&self, address: &str) -> Result<u32, Error> {
        let decimals = self
            .call(address, DECIMALS_SELECTOR)
            .await?
            .and_then(|value| parse_hex_u64(&value))
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| *value <= 36)
            .unwrap_or(DEFAULT_DECIMALS);

        Ok(decimals)
    }

    async fn call(
        &self,
        address: &str,
        selector: &str,
    ) -> Result<Option<String>, Error> {
        let value: Option<String> = self
            .source
            .rpc(
                &self.endpoint,
                "eth_call",
                json!([{ "to": address, "data": selector }, "latest"]),
            )
            .await?;

        Ok(value.filter(|value| value.len() > 2))
    }

    async fn get_logs(
        &self,
        address: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, Error> {
        let logs: Option<Vec<Log>> = self
            .source
            .rpc(
                &self.endpoint,
                "eth_getLogs",
                json!([{
                    "address": address,
                    "fromBlock": format!("0x{:x}", from),
                    "toBlock": format!("0x{:x}", to),
                    "topics": [TRANSFER_TOPIC],
                }]),
            )
            .await?;

        Ok(logs.unwrap_or_default())
    }

    async fn block_timestamp(
        &self,
        height: u64,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        let block: Option<BlockHeader> = self
            .source
            .rpc(
                &self.endpoint,
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", height), false]),
            )
            .await?;

        Ok(block
            .and_then(|block| parse_hex_u64(&block.timestamp))
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0)))
    }
}

/// Inclusive block range covering `window`, estimated backwards from the
/// `head` block mined at `head_time`. The range is padded on both sides; the
/// timestamp filter in `extract` makes the exact cut. `None` when the window
/// starts after the head block.
pub fn block_range(
    head: u64,
    head_time: DateTime<Utc>,
    window: &TimeWindow,
    block_time_ms: u64,
) -> Option<(u64, u64)> {
    if window.start > head_time {
        return None;
    }

    let block_time_ms = block_time_ms.max(1);
    let lag_ms = (head_time - window.end).num_milliseconds().max(0) as u64;
    let lag = lag_ms / block_time_ms;
    let span = window.duration_ms().div_ceil(block_time_ms);
    let margin = (lag + span) / RANGE_MARGIN_DIVISOR + MIN_RANGE_MARGIN;

    let to_block = head.saturating_sub(lag.saturating_sub(margin));
    let from_block = head.saturating_sub(lag + span + margin);

    Some((from_block, to_block))
}

/// `(sender, receiver, raw amount)` of an ERC-20 Transfer log.
pub fn parse_transfer_log(log: &Log) -> Option<(String, String, BigDecimal)> {
    if log.removed || log.topics.len() < 3 {
        return None;
    }
    if !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return None;
    }

    let sender = topic_to_address(&log.topics[1])?;
    let receiver = topic_to_address(&log.topics[2])?;
    let amount = parse_hex_quantity(&log.data)?;

    Some((sender, receiver, amount))
}

fn topic_to_address(topic: &str) -> Option<String> {
    let digits = topic.strip_prefix("0x").unwrap_or(topic);
    if digits.len() < 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    Some(format!("0x{}", &digits[digits.len() - 40..]).to_lowercase())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn log(topics: Vec<&str>, data: &str) -> Log {
        Log {
            transaction_hash: String::from("0xABC"),
            block_number: String::from("0x10"),
            topics: topics.into_iter().map(String::from).collect(),
            data: String::from(data),
            removed: false,
        }
    }

    #[test]
    fn test_parse_transfer_log() {
        let parsed = parse_transfer_log(&log(
            vec![
                TRANSFER_TOPIC,
                "0x000000000000000000000000A9D1e08C7793af67e9d92fe308d5697FB81d3E43",
                "0x00000000000000000000000028c6c06298d514db089934071355e5743bf21d60",
            ],
            "0x00000000000000000000000000000000000000000000000000000000000f4240",
        ))
        .unwrap();

        assert_eq!(parsed.0, "0xa9d1e08c7793af67e9d92fe308d5697fb81d3e43");
        assert_eq!(parsed.1, "0x28c6c06298d514db089934071355e5743bf21d60");
        assert_eq!(parsed.2, BigDecimal::from(1_000_000));
    }

    #[test]
    fn test_non_transfer_logs_are_ignored() {
        let approval = log(
            vec![
                "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925",
                "0x000000000000000000000000a9d1e08c7793af67e9d92fe308d5697fb81d3e43",
                "0x00000000000000000000000028c6c06298d514db089934071355e5743bf21d60",
            ],
            "0x01",
        );
        assert!(parse_transfer_log(&approval).is_none());

        let truncated = log(vec![TRANSFER_TOPIC], "0x01");
        assert!(parse_transfer_log(&truncated).is_none());

        let mut removed = log(
            vec![
                TRANSFER_TOPIC,
                "0x000000000000000000000000a9d1e08c7793af67e9d92fe308d5697fb81d3e43",
                "0x00000000000000000000000028c6c06298d514db089934071355e5743bf21d60",
            ],
            "0x01",
        );
        removed.removed = true;
        assert!(parse_transfer_log(&removed).is_none());
    }

    #[test]
    fn test_block_range_follows_window_into_the_past() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let head = 20_000_000;

        let (from, to) =
            block_range(head, now, &TimeWindow::day(now, 3), 12_000).unwrap();

        assert_eq!((from, to), (19_977_310, 19_986_690));
        assert!(from <= head - 21_600);
        assert!(to >= head - 14_400);
        assert!(to < head - 7_200);
    }

    #[test]
    fn test_block_range_for_recent_window() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();

        let range = block_range(
            1_000,
            now,
            &TimeWindow::lookback_hours(now, 1),
            12_000,
        );
        assert_eq!(range, Some((675, 1_000)));

        let ahead = TimeWindow::new(now + Duration::hours(1), now + Duration::hours(2));
        assert_eq!(block_range(1_000, now, &ahead, 12_000), None);

        let (from, _) =
            block_range(100, now, &TimeWindow::day(now, 30), 2_000).unwrap();
        assert_eq!(from, 0);
    }
}
