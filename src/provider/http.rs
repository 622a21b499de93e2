use std::collections::HashMap;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    configuration::Config,
    error::Error,
    helpers::{decimal_from_f64, Chain, PegCurrency},
};

use super::{FetchError, Source};

#[derive(Debug, Deserialize)]
pub struct StablecoinBalances {
    #[serde(rename = "currentChainBalances", default)]
    pub current_chain_balances: HashMap<String, HashMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeRates {
    pub rates: HashMap<String, f64>,
}

/// TVL and FX lookups. Both degrade instead of failing; only a
/// cancellation is reported to the caller.
#[derive(Debug, Clone)]
pub struct HTTP {
    pub config: Config,
    source: Source,
}

impl HTTP {
    pub fn new(config: Config, source: Source) -> HTTP {
        HTTP { config, source }
    }

    pub async fn get_tvl(
        &self,
        symbol: &str,
        chain: Chain,
        currency: PegCurrency,
    ) -> Result<BigDecimal, Error> {
        let zero = BigDecimal::from(0);

        let Some(url) = self.config.get_tvl_url(symbol) else {
            debug!(symbol, "no TVL mapping, using 0");
            return Ok(zero);
        };

        let balances = match self.source.get_json::<StablecoinBalances>(url).await
        {
            Ok(Some(balances)) => balances,
            Ok(None) => return Ok(zero),
            Err(e) => return degrade(e, zero),
        };

        Ok(balances.tvl_on(chain, currency).unwrap_or(zero))
    }

    pub async fn get_usd_rate(
        &self,
        currency: PegCurrency,
    ) -> Result<BigDecimal, Error> {
        if currency == PegCurrency::USD {
            return Ok(BigDecimal::from(1));
        }

        let fallback = currency.fallback_usd_rate();
        let url = self.config.get_fx_url(currency);

        let rates = match self.source.get_json::<ExchangeRates>(url).await {
            Ok(Some(rates)) => rates,
            Ok(None) => {
                warn!(%currency, "FX payload unusable, using fallback rate");
                return Ok(fallback);
            },
            Err(e) => return degrade(e, fallback),
        };

        match rates
            .rates
            .get(PegCurrency::USD.as_str())
            .copied()
            .filter(|rate| *rate > 0.0)
            .and_then(decimal_from_f64)
        {
            Some(rate) => Ok(rate),
            None => {
                warn!(%currency, "FX payload has no USD rate, using fallback");
                Ok(fallback)
            },
        }
    }
}

impl StablecoinBalances {
    /// Circulating amount on `chain`, preferring the peg-denominated key.
    pub fn tvl_on(
        &self,
        chain: Chain,
        currency: PegCurrency,
    ) -> Option<BigDecimal> {
        let (_, balances) = self
            .current_chain_balances
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(chain.display_name()))?;

        let pegged = format!("pegged{}", currency.as_str());

        balances
            .get(&pegged)
            .or_else(|| balances.get("peggedUSD"))
            .and_then(Value::as_f64)
            .and_then(decimal_from_f64)
    }
}

fn degrade(
    error: FetchError,
    value: BigDecimal,
) -> Result<BigDecimal, Error> {
    if error.is_cancelled() {
        return Err(Error::Cancelled);
    }

    warn!("{}, degrading to {}", error, value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_tvl_prefers_peg_denominated_balance() {
        let balances: StablecoinBalances = serde_json::from_str(
            r#"{
                "currentChainBalances": {
                    "Ethereum": {"peggedEUR": 1250.5, "peggedUSD": 1300.0},
                    "Solana": {"peggedUSD": 42.0}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            balances.tvl_on(Chain::Ethereum, PegCurrency::EUR),
            Some(BigDecimal::from_str("1250.5").unwrap())
        );
        assert_eq!(
            balances.tvl_on(Chain::Solana, PegCurrency::EUR),
            Some(BigDecimal::from(42))
        );
        assert_eq!(balances.tvl_on(Chain::Base, PegCurrency::EUR), None);
    }

    #[test]
    fn test_missing_balances_key_defaults_to_empty() {
        let balances: StablecoinBalances =
            serde_json::from_str(r#"{"name": "Euro Coin"}"#).unwrap();
        assert_eq!(balances.tvl_on(Chain::Ethereum, PegCurrency::EUR), None);
    }
}
