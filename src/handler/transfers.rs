use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

use crate::{
    configuration::{Config, Token},
    error::Error,
    helpers::{Chain, ChainFamily, TimeWindow},
    provider::Source,
};

use super::{evm_transfers::EvmExtractor, solana_transfers::SolanaExtractor};

/// Chain-agnostic transfer event, before tagging.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransfer {
    pub timestamp: DateTime<Utc>,
    pub chain: Chain,
    pub token_symbol: String,
    pub token_address: String,
    pub tx_hash: String,
    pub sender: String,
    pub receiver: String,
    pub value: BigDecimal,
}

/// Transfers found for one token. `truncated` is set when the source
/// stopped paging before reaching the start of the window.
#[derive(Debug, Default)]
pub struct Extraction {
    pub transfers: Vec<RawTransfer>,
    pub truncated: bool,
}

impl Extraction {
    pub fn complete(transfers: Vec<RawTransfer>) -> Extraction {
        Extraction {
            transfers,
            truncated: false,
        }
    }
}

/// One extractor per chain family. Both variants return the same shape.
#[derive(Debug, Clone)]
pub enum ChainExtractor {
    Evm(EvmExtractor),
    Solana(SolanaExtractor),
}

impl ChainExtractor {
    pub fn new(chain: Chain, endpoint: &str, source: Source) -> ChainExtractor {
        match chain.family() {
            ChainFamily::Evm => {
                ChainExtractor::Evm(EvmExtractor::new(chain, endpoint, source))
            },
            ChainFamily::Solana => {
                ChainExtractor::Solana(SolanaExtractor::new(endpoint, source))
            },
        }
    }

    pub fn for_chain(
        config: &Config,
        chain: Chain,
        source: Source,
    ) -> Result<ChainExtractor, Error> {
        let endpoint = config.rpc_url(chain).ok_or_else(|| {
            Error::NotSupportedChain(format!("{} has no RPC endpoint", chain))
        })?;

        Ok(ChainExtractor::new(chain, endpoint, source))
    }

    pub fn chain(&self) -> Chain {
        match self {
            ChainExtractor::Evm(extractor) => extractor.chain(),
            ChainExtractor::Solana(_) => Chain::Solana,
        }
    }

    /// Every transfer of `token` whose timestamp lies inside `window`.
    pub async fn extract(
        &self,
        token: &Token,
        window: &TimeWindow,
    ) -> Result<Extraction, Error> {
        match self {
            ChainExtractor::Evm(extractor) => {
                extractor.extract(token, window).await
            },
            ChainExtractor::Solana(extractor) => {
                extractor.extract(token, window).await
            },
        }
    }

    pub async fn total_supply(&self, token: &Token) -> Result<BigDecimal, Error> {
        match self {
            ChainExtractor::Evm(extractor) => extractor.total_supply(token).await,
            ChainExtractor::Solana(extractor) => {
                extractor.total_supply(token).await
            },
        }
    }
}
