mod common;

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use etl::{
    handler::{snapshots::build_snapshot, transfers::RawTransfer},
    helpers::{hour_bucket, Chain, PegCurrency},
    provider::HTTP,
};

use common::{config, fast_policy, source, token};

const VGBP: &str = "5H4voZhzySsVvwVYDAKku8MZGuYBC7cXaBKDPW4YHWW1";

fn transfer(value: u64) -> RawTransfer {
    RawTransfer {
        timestamp: Utc::now(),
        chain: Chain::Solana,
        token_symbol: String::from("VGBP"),
        token_address: String::from(VGBP),
        tx_hash: String::from("5j7s"),
        sender: String::from("sender"),
        receiver: String::from("receiver"),
        value: BigDecimal::from(value),
    }
}

#[tokio::test]
async fn test_fx_failure_uses_fallback_rate() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v4/latest/GBP"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let http = HTTP::new(config(&mock_server.uri()), source(fast_policy()));
    let rate = http.get_usd_rate(PegCurrency::GBP).await.unwrap();

    assert_eq!(rate, BigDecimal::from_str("1.27").unwrap());

    let snapshot = build_snapshot(
        &token(Chain::Solana, "VGBP", VGBP),
        Chain::Solana,
        PegCurrency::GBP,
        hour_bucket(Utc::now()),
        BigDecimal::from(1_000_000),
        &[transfer(60), transfer(40)],
        BigDecimal::from(0),
        &rate,
    );

    assert_eq!(snapshot.transfers_volume, BigDecimal::from(100));
    assert_eq!(snapshot.usd_equivalent_volume, BigDecimal::from(127));
}

#[tokio::test]
async fn test_live_fx_rate_and_malformed_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v4/latest/EUR"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "base": "EUR",
            "rates": {"USD": 1.08, "GBP": 0.85}
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v4/latest/GBP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rates": {}})))
        .mount(&mock_server)
        .await;

    let http = HTTP::new(config(&mock_server.uri()), source(fast_policy()));

    assert_eq!(
        http.get_usd_rate(PegCurrency::EUR).await.unwrap(),
        BigDecimal::from_str("1.08").unwrap()
    );
    assert_eq!(
        http.get_usd_rate(PegCurrency::GBP).await.unwrap(),
        BigDecimal::from_str("1.27").unwrap()
    );
    assert_eq!(
        http.get_usd_rate(PegCurrency::USD).await.unwrap(),
        BigDecimal::from(1)
    );
}

#[tokio::test]
async fn test_tvl_lookup_and_unmapped_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stablecoin/eurc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "currentChainBalances": {
                "Ethereum": {"peggedEUR": 150000000.5},
                "Solana": {"peggedUSD": 21000000}
            }
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let http = HTTP::new(config(&mock_server.uri()), source(fast_policy()));

    assert_eq!(
        http.get_tvl("EURC", Chain::Ethereum, PegCurrency::EUR)
            .await
            .unwrap(),
        BigDecimal::from_str("150000000.5").unwrap()
    );
    assert_eq!(
        http.get_tvl("EURC", Chain::Solana, PegCurrency::EUR)
            .await
            .unwrap(),
        BigDecimal::from(21_000_000)
    );
    assert_eq!(
        http.get_tvl("VGBP", Chain::Solana, PegCurrency::GBP)
            .await
            .unwrap(),
        BigDecimal::from(0)
    );
}
