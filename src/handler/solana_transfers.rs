use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    configuration::Token,
    error::Error,
    helpers::{parse_raw_amount, Chain, TimeWindow},
    provider::Source,
};

use super::transfers::{Extraction, RawTransfer};

const SIGNATURE_PAGE_SIZE: usize = 1000;
const MAX_SIGNATURE_PAGES: usize = 20;
const DEFAULT_DECIMALS: u32 = 6;
const TOKEN_PROGRAMS: [&str; 2] = ["spl-token", "spl-token-2022"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub err: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcValue<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAmount {
    #[serde(default)]
    amount: String,
    #[serde(default)]
    decimals: u32,
    #[serde(default)]
    ui_amount_string: Option<String>,
}

/// A token account seen in a transaction, keyed by its address.
#[derive(Debug, Clone, PartialEq)]
struct TokenAccount {
    mint: String,
    owner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SolanaExtractor {
    endpoint: String,
    source: Source,
}

impl SolanaExtractor {
    pub fn new(endpoint: &str, source: Source) -> SolanaExtractor {
        SolanaExtractor {
            endpoint: endpoint.to_owned(),
            source,
        }
    }

    pub async fn extract(
        &self,
        token: &Token,
        window: &TimeWindow,
    ) -> Result<Extraction, Error> {
        if !Chain::Solana.is_valid_address(&token.address) {
            warn!(
                chain = %Chain::Solana,
                token = %token.symbol,
                "skipping token with invalid mint address"
            );
            return Ok(Extraction::default());
        }

        let decimals = self.decimals(&token.address).await?;
        let (signatures, truncated) =
            self.signatures(&token.address, window).await?;

        debug!(
            token = %token.symbol,
            count = signatures.len(),
            "signatures inside window"
        );

        let mut transfers = Vec::new();

        for (signature, timestamp) in signatures {
            let transaction: Option<Value> = self
                .source
                .rpc(
                    &self.endpoint,
                    "getTransaction",
                    json!([
                        signature,
                        {
                            "encoding": "jsonParsed",
                            "maxSupportedTransactionVersion": 0
                        }
                    ]),
                )
                .await?;

            let Some(transaction) = transaction else {
                continue;
            };

            for (sender, receiver, value) in
                parse_transaction(&transaction, &token.address, decimals)
            {
                transfers.push(RawTransfer {
                    timestamp,
                    chain: Chain::Solana,
                    token_symbol: token.symbol.clone(),
                    token_address: token.address.clone(),
                    tx_hash: signature.clone(),
                    sender,
                    receiver,
                    value,
                });
            }
        }

        Ok(Extraction {
            transfers,
            truncated,
        })
    }

    pub async fn total_supply(&self, token: &Token) -> Result<BigDecimal, Error> {
        if !Chain::Solana.is_valid_address(&token.address) {
            return Ok(BigDecimal::from(0));
        }

        let supply = self.token_supply(&token.address).await?;

        Ok(supply
            .and_then(|supply| parse_raw_amount(&supply.amount, supply.decimals))
            .unwrap_or_else(|| BigDecimal::from(0)))
    }

    async fn token_supply(&self, mint: &str) -> Result<Option<TokenAmount>, Error> {
        let supply: Option<RpcValue<TokenAmount>> = self
            .source
            .rpc(&self.endpoint, "getTokenSupply", json!([mint]))
            .await?;

        Ok(supply.map(|supply| supply.value))
    }

    async fn decimals(&self, mint: &str) -> Result<u32, Error> {
        Ok(self
            .token_supply(mint)
            .await?
            .map(|supply| supply.decimals)
            .unwrap_or(DEFAULT_DECIMALS))
    }

    /// Successful signatures touching `mint` inside `window`, newest first,
    /// and whether paging stopped at the page limit before `window.start`.
    async fn signatures(
        &self,
        mint: &str,
        window: &TimeWindow,
    ) -> Result<(Vec<(String, DateTime<Utc>)>, bool), Error> {
        let mut selected = Vec::new();
        let mut before: Option<String> = None;

        for _ in 0..MAX_SIGNATURE_PAGES {
            let mut options = json!({ "limit": SIGNATURE_PAGE_SIZE });
            if let Some(signature) = &before {
                options["before"] = json!(signature);
            }

            let page: Vec<SignatureInfo> = self
                .source
                .rpc(
                    &self.endpoint,
                    "getSignaturesForAddress",
                    json!([mint, options]),
                )
                .await?
                .unwrap_or_default();

            let (mut batch, reached_start) = select_signatures(&page, window);
            selected.append(&mut batch);

            if reached_start || page.len() < SIGNATURE_PAGE_SIZE {
                return Ok((selected, false));
            }

            before = page.last().map(|info| info.signature.clone());
        }

        warn!(
            mint,
            pages = MAX_SIGNATURE_PAGES,
            "signature page limit reached, window truncated"
        );
        Ok((selected, true))
    }
}

/// Picks the successful signatures inside `window` from one page and
/// reports whether the page already went past the window start.
fn select_signatures(
    page: &[SignatureInfo],
    window: &TimeWindow,
) -> (Vec<(String, DateTime<Utc>)>, bool) {
    let mut selected = Vec::new();

    for info in page {
        let Some(timestamp) =
            info.block_time.and_then(|secs| DateTime::from_timestamp(secs, 0))
        else {
            continue;
        };

        if timestamp < window.start {
            return (selected, true);
        }
        if timestamp > window.end || info.err.as_ref().is_some_and(|e| !e.is_null())
        {
            continue;
        }

        selected.push((info.signature.clone(), timestamp));
    }

    (selected, false)
}

/// SPL token transfers of `mint` in a `jsonParsed` transaction as
/// `(sender, receiver, amount)`. Failed transactions yield nothing.
pub fn parse_transaction(
    transaction: &Value,
    mint: &str,
    decimals: u32,
) -> Vec<(String, String, BigDecimal)> {
    let meta = &transaction["meta"];
    if !meta["err"].is_null() {
        return vec![];
    }

    let accounts = token_accounts(transaction);
    let mut instructions: Vec<&Value> = transaction["transaction"]["message"]
        ["instructions"]
        .as_array()
        .map(|items| items.iter().collect())
        .unwrap_or_default();

    if let Some(inner) = meta["innerInstructions"].as_array() {
        for group in inner {
            if let Some(items) = group["instructions"].as_array() {
                instructions.extend(items.iter());
            }
        }
    }

    instructions
        .into_iter()
        .filter_map(|instruction| {
            parse_instruction(instruction, &accounts, mint, decimals)
        })
        .collect()
}

fn parse_instruction(
    instruction: &Value,
    accounts: &HashMap<String, TokenAccount>,
    mint: &str,
    decimals: u32,
) -> Option<(String, String, BigDecimal)> {
    let program = instruction["program"].as_str()?;
    if !TOKEN_PROGRAMS.contains(&program) {
        return None;
    }

    let parsed = &instruction["parsed"];
    let info = &parsed["info"];
    let source = info["source"].as_str()?;
    let destination = info["destination"].as_str()?;

    let amount = match parsed["type"].as_str()? {
        "transferChecked" => {
            if info["mint"].as_str()? != mint {
                return None;
            }
            let token_amount: TokenAmount =
                serde_json::from_value(info["tokenAmount"].clone()).ok()?;
            match &token_amount.ui_amount_string {
                Some(ui) => parse_raw_amount(ui, 0)?,
                None => parse_raw_amount(&token_amount.amount, token_amount.decimals)?,
            }
        },
        "transfer" => {
            let holds_mint = |account: &str| {
                accounts.get(account).is_some_and(|a| a.mint == mint)
            };
            if !holds_mint(source) && !holds_mint(destination) {
                return None;
            }
            parse_raw_amount(info["amount"].as_str()?, decimals)?
        },
        _ => return None,
    };

    let sender = info["authority"]
        .as_str()
        .or_else(|| info["multisigAuthority"].as_str())
        .unwrap_or(source)
        .to_owned();
    let receiver = accounts
        .get(destination)
        .and_then(|account| account.owner.clone())
        .unwrap_or_else(|| destination.to_owned());

    Some((sender, receiver, amount))
}

/// Token accounts from pre/post balances, resolved to their addresses via
/// the message account keys.
fn token_accounts(transaction: &Value) -> HashMap<String, TokenAccount> {
    let keys: Vec<&str> = transaction["transaction"]["message"]["accountKeys"]
        .as_array()
        .map(|keys| {
            keys.iter()
                .filter_map(|key| key["pubkey"].as_str().or_else(|| key.as_str()))
                .collect()
        })
        .unwrap_or_default();

    let mut accounts = HashMap::new();

    for field in ["preTokenBalances", "postTokenBalances"] {
        let Some(balances) = transaction["meta"][field].as_array() else {
            continue;
        };

        for balance in balances {
            let Some(index) = balance["accountIndex"].as_u64() else {
                continue;
            };
            let (Some(address), Some(mint)) =
                (keys.get(index as usize), balance["mint"].as_str())
            else {
                continue;
            };

            accounts.insert(
                (*address).to_owned(),
                TokenAccount {
                    mint: mint.to_owned(),
                    owner: balance["owner"].as_str().map(str::to_owned),
                },
            );
        }
    }

    accounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const MINT: &str = "HzwqbKZw8HxMN6bF2yFZNrht3c2iXXzpKcFu7uBEDKtr";

    fn transaction(instructions: Value, inner: Value) -> Value {
        json!({
            "meta": {
                "err": null,
                "innerInstructions": inner,
                "preTokenBalances": [
                    {"accountIndex": 1, "mint": MINT, "owner": "SenderOwner111111111111111111111111111111111"}
                ],
                "postTokenBalances": [
                    {"accountIndex": 1, "mint": MINT, "owner": "SenderOwner111111111111111111111111111111111"},
                    {"accountIndex": 2, "mint": MINT, "owner": "ReceiverOwner1111111111111111111111111111111"}
                ]
            },
            "transaction": {
                "message": {
                    "accountKeys": [
                        {"pubkey": "FeePayer11111111111111111111111111111111111"},
                        {"pubkey": "SourceAta111111111111111111111111111111111"},
                        {"pubkey": "DestAta11111111111111111111111111111111111"}
                    ],
                    "instructions": instructions
                }
            }
        })
    }

    #[test]
    fn test_parse_transfer_checked() {
        let tx = transaction(
            json!([{
                "program": "spl-token",
                "parsed": {
                    "type": "transferChecked",
                    "info": {
                        "source": "SourceAta111111111111111111111111111111111",
                        "destination": "DestAta11111111111111111111111111111111111",
                        "authority": "SenderOwner111111111111111111111111111111111",
                        "mint": MINT,
                        "tokenAmount": {"amount": "2500000", "decimals": 6, "uiAmountString": "2.5"}
                    }
                }
            }]),
            json!([]),
        );

        let transfers = parse_transaction(&tx, MINT, 6);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].0, "SenderOwner111111111111111111111111111111111");
        assert_eq!(transfers[0].1, "ReceiverOwner1111111111111111111111111111111");
        assert_eq!(transfers[0].2, BigDecimal::from_str("2.5").unwrap());
    }

    #[test]
    fn test_parse_inner_plain_transfer() {
        let tx = transaction(
            json!([]),
            json!([{
                "index": 0,
                "instructions": [{
                    "program": "spl-token",
                    "parsed": {
                        "type": "transfer",
                        "info": {
                            "source": "SourceAta111111111111111111111111111111111",
                            "destination": "DestAta11111111111111111111111111111111111",
                            "authority": "SenderOwner111111111111111111111111111111111",
                            "amount": "1000000"
                        }
                    }
                }]
            }]),
        );

        let transfers = parse_transaction(&tx, MINT, 6);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].2, BigDecimal::from(1));

        assert!(parse_transaction(&tx, "OtherMint1111111111111111111111111111111111", 6)
            .is_empty());
    }

    #[test]
    fn test_failed_transaction_is_ignored() {
        let mut tx = transaction(
            json!([{
                "program": "spl-token",
                "parsed": {
                    "type": "transferChecked",
                    "info": {
                        "source": "SourceAta111111111111111111111111111111111",
                        "destination": "DestAta11111111111111111111111111111111111",
                        "authority": "SenderOwner111111111111111111111111111111111",
                        "mint": MINT,
                        "tokenAmount": {"amount": "1", "decimals": 6}
                    }
                }
            }]),
            json!([]),
        );
        tx["meta"]["err"] = json!({"InstructionError": [0, "Custom"]});

        assert!(parse_transaction(&tx, MINT, 6).is_empty());
    }

    #[test]
    fn test_select_signatures_stops_at_window_start() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let window = TimeWindow::lookback_hours(now, 1);
        let info = |signature: &str, offset: i64, err: Option<Value>| SignatureInfo {
            signature: signature.to_owned(),
            block_time: Some(now.timestamp() - offset),
            err,
        };

        let page = vec![
            info("future", -60, None),
            info("inside", 60, None),
            info("failed", 120, Some(json!({"InstructionError": [0, "Custom"]}))),
            info("edge", 3600, None),
            info("outside", 3601, None),
            info("older", 7200, None),
        ];

        let (selected, reached_start) = select_signatures(&page, &window);
        let names: Vec<&str> = selected.iter().map(|(s, _)| s.as_str()).collect();

        assert_eq!(names, vec!["inside", "edge"]);
        assert!(reached_start);
    }
}
