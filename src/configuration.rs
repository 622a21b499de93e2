use std::{
    collections::{HashMap, HashSet},
    env, fs,
    ops::Deref,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    error::Error,
    helpers::{parse_tuple_string, Chain, PegCurrency},
    provider::{DatabasePool, RetryPolicy, Source, HTTP},
};

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

#[derive(Debug)]
pub struct State {
    pub config: Config,
    pub database: DatabasePool,
    pub source: Source,
    pub http: HTTP,
    pub cancel: CancellationToken,
}

impl State {
    pub fn new(
        config: Config,
        database: DatabasePool,
        cancel: CancellationToken,
    ) -> Result<State, Error> {
        let source = Source::new(
            Duration::from_secs(config.timeout),
            config.retry_policy(),
            cancel.clone(),
        )?;
        let http = HTTP::new(config.clone(), source.clone());

        Ok(State {
            config,
            database,
            source,
            http,
            cancel,
        })
    }
}

/// One entry of the static token registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub chain: Chain,
    pub symbol: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rpc_urls: HashMap<Chain, String>,
    pub tokens: Vec<Token>,
    pub peg_currencies: HashMap<String, PegCurrency>,
    pub tvl_ids: HashMap<String, String>,
    pub transfer_excluded_tokens: HashSet<(Chain, String)>,
    pub tvl_api_url: String,
    pub fx_api_url: String,
    pub timeout: u64,
    pub max_tasks: usize,
    pub retry_base_ms: u64,
    pub retry_max_attempts: u32,
    pub rate_limit_floor_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub backfill_attempts: u32,
    pub backfill_cooldown_secs: u64,
    pub default_lookback_hours: u32,
    pub snapshot_window_hours: u32,
}

impl Config {
    pub fn get_tvl_url(&self, symbol: &str) -> Option<String> {
        self.tvl_ids.get(symbol).map(|id| {
            format!("{}/stablecoin/{}", self.tvl_api_url.trim_end_matches('/'), id)
        })
    }

    pub fn get_fx_url(&self, currency: PegCurrency) -> String {
        format!("{}/{}", self.fx_api_url.trim_end_matches('/'), currency)
    }

    pub fn rpc_url(&self, chain: Chain) -> Option<&str> {
        self.rpc_urls.get(&chain).map(String::as_str)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_ms),
            self.retry_max_attempts,
            Duration::from_millis(self.rate_limit_floor_ms),
            Duration::from_millis(self.jitter_min_ms)
                ..Duration::from_millis(self.jitter_max_ms),
        )
    }

    /// Peg currency of a token symbol. Unmapped symbols are treated as USD
    /// so that no FX conversion is applied to them.
    pub fn currency_of(&self, symbol: &str) -> PegCurrency {
        match self.peg_currencies.get(symbol) {
            Some(currency) => *currency,
            None => {
                warn!(symbol, "no peg currency configured, assuming USD");
                PegCurrency::USD
            },
        }
    }

    pub fn is_transfer_excluded(&self, chain: Chain, symbol: &str) -> bool {
        self.transfer_excluded_tokens
            .contains(&(chain, symbol.to_owned()))
    }

    /// Chains that have at least one token and an RPC endpoint.
    pub fn active_chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self
            .tokens
            .iter()
            .map(|token| token.chain)
            .filter(|chain| self.rpc_urls.contains_key(chain))
            .collect();
        chains.sort();
        chains.dedup();
        chains
    }

    pub fn tokens_on(&self, chain: Chain) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(move |token| token.chain == chain)
    }
}

pub fn get_configuration() -> Result<Config, Error> {
    build_configuration(|key| env::var(key).ok())
}

fn build_configuration<F>(lookup: F) -> Result<Config, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |key: &str| -> Result<String, Error> {
        lookup(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| Error::MissingCredential(key.to_owned()))
    };
    let optional = |key: &str, default: &str| -> String {
        lookup(key)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default.to_owned())
    };

    let database_url = required("DATABASE_URL")?;

    let mut rpc_urls = HashMap::new();
    for chain in [Chain::Ethereum, Chain::Solana] {
        rpc_urls.insert(chain, required(chain.rpc_env_var())?);
    }
    for chain in [Chain::Polygon, Chain::Base] {
        if let Some(url) =
            lookup(chain.rpc_env_var()).filter(|v| !v.trim().is_empty())
        {
            rpc_urls.insert(chain, url);
        }
    }

    let tokens = get_tokens(&optional("TOKENS", ""))?;
    let peg_currencies = get_peg_currencies(&optional("PEG_CURRENCIES", ""))?;
    let tvl_ids = get_pairs(&optional("TVL_IDS", ""))?
        .into_iter()
        .collect::<HashMap<String, String>>();
    let transfer_excluded_tokens = get_pairs(&optional(
        "TRANSFER_EXCLUDED_TOKENS",
        "",
    ))?
    .into_iter()
    .map(|(chain, symbol)| Ok((Chain::from_str(&chain)?, symbol)))
    .collect::<Result<HashSet<(Chain, String)>, Error>>()?;

    for token in &tokens {
        if !rpc_urls.contains_key(&token.chain) {
            warn!(
                chain = %token.chain,
                symbol = %token.symbol,
                "no RPC endpoint configured, token will be skipped"
            );
        }
    }

    let config = Config {
        database_url,
        rpc_urls,
        tokens,
        peg_currencies,
        tvl_ids,
        transfer_excluded_tokens,
        tvl_api_url: optional("TVL_API_URL", "https://stablecoins.llama.fi"),
        fx_api_url: optional(
            "FX_API_URL",
            "https://api.exchangerate-api.com/v4/latest",
        ),
        timeout: optional("TIMEOUT", "10").parse()?,
        max_tasks: optional("MAX_TASKS", "4").parse::<usize>()?.max(1),
        retry_base_ms: optional("RETRY_BASE_MS", "1000").parse()?,
        retry_max_attempts: optional("RETRY_MAX_ATTEMPTS", "3").parse()?,
        rate_limit_floor_ms: optional("RATE_LIMIT_FLOOR_MS", "5000").parse()?,
        jitter_min_ms: optional("JITTER_MIN_MS", "250").parse()?,
        jitter_max_ms: optional("JITTER_MAX_MS", "750").parse()?,
        backfill_attempts: optional("BACKFILL_ATTEMPTS", "3").parse()?,
        backfill_cooldown_secs: optional("BACKFILL_COOLDOWN_SECS", "5")
            .parse()?,
        default_lookback_hours: optional("DEFAULT_LOOKBACK_HOURS", "6")
            .parse()?,
        snapshot_window_hours: optional("SNAPSHOT_WINDOW_HOURS", "1").parse()?,
    };

    Ok(config)
}

/// Loads `etl.conf` (static registry) and, when present, `.env`
/// (credentials) into the process environment. Variables that are already
/// set win, so the scheduler can override any of them.
pub fn set_configuration() -> Result<(), Error> {
    let directory = env!("CARGO_MANIFEST_DIR");
    let etl_config_path = format!("{}/{}", directory, "etl.conf");
    let env_path = format!("{}/{}", directory, ".env");

    let etl_config_string = fs::read_to_string(etl_config_path)?;
    parse_config_string(etl_config_string);

    if let Ok(env_string) = fs::read_to_string(env_path) {
        parse_config_string(env_string);
    }

    Ok(())
}

fn parse_config_string(config: String) {
    for (key, value) in parse_config_lines(&config) {
        if env::var_os(&key).is_none() {
            env::set_var(key, value);
        }
    }
}

fn parse_config_lines(config: &str) -> Vec<(String, String)> {
    config
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect()
}

fn get_tokens(value: &str) -> Result<Vec<Token>, Error> {
    let mut data: Vec<Token> = Vec::new();

    for c in parse_tuple_string(value.to_owned()) {
        let items: Vec<&str> = c.split(',').map(str::trim).collect();
        if items.len() != 3 {
            return Err(Error::ConfigurationError(format!(
                "token entry must be (chain,symbol,address): ({})",
                c
            )));
        }

        data.push(Token {
            chain: Chain::from_str(items[0])?,
            symbol: items[1].to_owned(),
            address: items[2].to_owned(),
        });
    }

    Ok(data)
}

fn get_peg_currencies(
    value: &str,
) -> Result<HashMap<String, PegCurrency>, Error> {
    get_pairs(value)?
        .into_iter()
        .map(|(symbol, currency)| {
            Ok((symbol, PegCurrency::from_str(&currency)?))
        })
        .collect()
}

fn get_pairs(value: &str) -> Result<Vec<(String, String)>, Error> {
    parse_tuple_string(value.to_owned())
        .into_iter()
        .map(|c| match c.split_once(',') {
            Some((a, b)) => Ok((a.trim().to_owned(), b.trim().to_owned())),
            None => Err(Error::ConfigurationError(format!(
                "expected a pair: ({})",
                c
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(
        pairs: &[(&str, &str)],
    ) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DATABASE_URL", "postgres://localhost/etl"),
            ("ETHEREUM_RPC_URL", "https://eth.example.com"),
            ("SOLANA_RPC_URL", "https://sol.example.com"),
            (
                "TOKENS",
                "(ethereum,EURC,0x1aBaEA1f7C830bD89Acc67eC4af516284b1bC33c),(solana,VGBP,5H4voZhzySsVvwVYDAKku8MZGuYBC7cXaBKDPW4YHWW1),(polygon,EURC,0xE111178A87A3BFf0c8d18DECBa5798827539Ae99)",
            ),
            ("PEG_CURRENCIES", "(EURC,EUR),(VGBP,GBP)"),
            ("TVL_IDS", "(EURC,eurc)"),
            ("TRANSFER_EXCLUDED_TOKENS", "(ethereum,USDC)"),
        ]
    }

    #[test]
    fn test_build_configuration() {
        let config = build_configuration(lookup_from(&base_pairs())).unwrap();

        assert_eq!(config.tokens.len(), 3);
        assert_eq!(config.tokens[1].chain, Chain::Solana);
        assert_eq!(config.currency_of("VGBP"), PegCurrency::GBP);
        assert_eq!(config.currency_of("UNLISTED"), PegCurrency::USD);
        assert!(config.is_transfer_excluded(Chain::Ethereum, "USDC"));
        assert!(!config.is_transfer_excluded(Chain::Solana, "USDC"));
        assert_eq!(config.active_chains(), vec![Chain::Ethereum, Chain::Solana]);
        assert_eq!(config.timeout, 10);
        assert_eq!(config.max_tasks, 4);
        assert_eq!(
            config.get_tvl_url("EURC").as_deref(),
            Some("https://stablecoins.llama.fi/stablecoin/eurc")
        );
        assert_eq!(config.get_tvl_url("VGBP"), None);
        assert_eq!(
            config.get_fx_url(PegCurrency::GBP),
            "https://api.exchangerate-api.com/v4/latest/GBP"
        );
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        let pairs: Vec<_> = base_pairs()
            .into_iter()
            .filter(|(k, _)| *k != "SOLANA_RPC_URL")
            .collect();

        match build_configuration(lookup_from(&pairs)) {
            Err(Error::MissingCredential(key)) => {
                assert_eq!(key, "SOLANA_RPC_URL")
            },
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_malformed_token_entry() {
        let mut pairs = base_pairs();
        pairs.push(("TOKENS", "(ethereum,EURC)"));
        let pairs: Vec<_> = pairs
            .into_iter()
            .rev()
            .fold(Vec::new(), |mut acc, (k, v)| {
                if !acc.iter().any(|(key, _)| *key == k) {
                    acc.push((k, v));
                }
                acc
            });

        assert!(matches!(
            build_configuration(lookup_from(&pairs)),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_parse_config_lines() {
        let lines = parse_config_lines(
            "# registry\nTOKENS=(a,b,c)\n\nURL=https://x/?a=b\r\n",
        );
        assert_eq!(
            lines,
            vec![
                ("TOKENS".to_owned(), "(a,b,c)".to_owned()),
                ("URL".to_owned(), "https://x/?a=b".to_owned()),
            ]
        );
    }
}
