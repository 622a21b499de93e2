#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wiremock::{Match, Request};

use etl::{
    configuration::{Config, Token},
    helpers::{Chain, PegCurrency},
    provider::{RetryPolicy, Source},
};

/// Retry schedule short enough for tests: 3 attempts, millisecond delays.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(1),
        3,
        Duration::from_millis(1),
        Duration::ZERO..Duration::ZERO,
    )
}

pub fn source(policy: RetryPolicy) -> Source {
    Source::new(Duration::from_secs(5), policy, CancellationToken::new()).unwrap()
}

pub fn token(chain: Chain, symbol: &str, address: &str) -> Token {
    Token {
        chain,
        symbol: symbol.to_owned(),
        address: address.to_owned(),
    }
}

pub fn config(uri: &str) -> Config {
    Config {
        database_url: String::from("postgres://localhost/unused"),
        rpc_urls: HashMap::from([
            (Chain::Ethereum, uri.to_owned()),
            (Chain::Solana, uri.to_owned()),
        ]),
        tokens: vec![],
        peg_currencies: HashMap::from([
            (String::from("VGBP"), PegCurrency::GBP),
            (String::from("EURC"), PegCurrency::EUR),
        ]),
        tvl_ids: HashMap::from([(String::from("EURC"), String::from("eurc"))]),
        transfer_excluded_tokens: HashSet::new(),
        tvl_api_url: uri.to_owned(),
        fx_api_url: format!("{}/v4/latest", uri),
        timeout: 5,
        max_tasks: 2,
        retry_base_ms: 1,
        retry_max_attempts: 3,
        rate_limit_floor_ms: 1,
        jitter_min_ms: 0,
        jitter_max_ms: 0,
        backfill_attempts: 3,
        backfill_cooldown_secs: 0,
        default_lookback_hours: 1,
        snapshot_window_hours: 1,
    }
}

/// Matches a JSON-RPC request by method and, optionally, by the contract
/// address in its first parameter object.
pub struct RpcCall {
    pub method: &'static str,
    pub address: Option<&'static str>,
}

pub fn rpc(method: &'static str) -> RpcCall {
    RpcCall {
        method,
        address: None,
    }
}

pub fn rpc_for(method: &'static str, address: &'static str) -> RpcCall {
    RpcCall {
        method,
        address: Some(address),
    }
}

impl Match for RpcCall {
    fn matches(&self, request: &Request) -> bool {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return false;
        };

        if body["method"] != self.method {
            return false;
        }

        match self.address {
            None => true,
            Some(address) => body["params"][0]["address"]
                .as_str()
                .is_some_and(|value| value.eq_ignore_ascii_case(address)),
        }
    }
}

pub fn rpc_result(result: Value) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": result })
}
