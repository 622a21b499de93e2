use std::{fmt, io, str::FromStr};

use bigdecimal::BigDecimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chain {
    Ethereum,
    Polygon,
    Base,
    Solana,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    Evm,
    Solana,
}

impl Chain {
    pub const ALL: [Chain; 4] =
        [Chain::Ethereum, Chain::Polygon, Chain::Base, Chain::Solana];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Base => "base",
            Chain::Solana => "solana",
        }
    }

    /// Name used by the TVL provider for per-chain balances.
    pub fn display_name(&self) -> &'static str {
        match self {
            Chain::Ethereum => "Ethereum",
            Chain::Polygon => "Polygon",
            Chain::Base => "Base",
            Chain::Solana => "Solana",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Chain::Ethereum | Chain::Polygon | Chain::Base => ChainFamily::Evm,
            Chain::Solana => ChainFamily::Solana,
        }
    }

    pub fn block_time_ms(&self) -> u64 {
        match self {
            Chain::Ethereum => 12_000,
            Chain::Polygon => 2_000,
            Chain::Base => 2_000,
            Chain::Solana => 400,
        }
    }

    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETHEREUM_RPC_URL",
            Chain::Polygon => "POLYGON_RPC_URL",
            Chain::Base => "BASE_RPC_URL",
            Chain::Solana => "SOLANA_RPC_URL",
        }
    }

    /// Whether a token address is well formed for this chain. Placeholder
    /// entries in the registry are skipped rather than queried.
    pub fn is_valid_address(&self, address: &str) -> bool {
        match self.family() {
            ChainFamily::Evm => {
                address.len() == 42
                    && address.starts_with("0x")
                    && address[2..].chars().all(|c| c.is_ascii_hexdigit())
            },
            ChainFamily::Solana => {
                (32..=44).contains(&address.len())
                    && address.chars().all(|c| {
                        c.is_ascii_alphanumeric()
                            && !matches!(c, '0' | 'O' | 'I' | 'l')
                    })
            },
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Chain> for String {
    fn from(value: Chain) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for Chain {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Chain, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "ethereum" => Ok(Chain::Ethereum),
            "polygon" => Ok(Chain::Polygon),
            "base" => Ok(Chain::Base),
            "solana" => Ok(Chain::Solana),
            _ => Err(io::Error::other(format!(
                "Chain not supported: {}",
                value
            ))),
        }
    }
}

/// Counterparty classification stored alongside each transfer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Exchange,
    Bridge,
    Contract,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Exchange => "EXCHANGE",
            Category::Bridge => "BRIDGE",
            Category::Contract => "CONTRACT",
            Category::Unknown => "UNKNOWN",
        }
    }

    /// Folds the free-form categories found in tag sources into the
    /// closed set. Never fails.
    pub fn normalize(value: &str) -> Category {
        match value.trim().to_uppercase().as_str() {
            "EXCHANGE" | "CEX" => Category::Exchange,
            "BRIDGE" => Category::Bridge,
            "CONTRACT" | "DEX" | "DEFI" => Category::Contract,
            _ => Category::Unknown,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PegCurrency {
    GBP,
    EUR,
    USD,
}

impl PegCurrency {
    pub fn as_str(&self) -> &'static str {
        match self {
            PegCurrency::GBP => "GBP",
            PegCurrency::EUR => "EUR",
            PegCurrency::USD => "USD",
        }
    }

    /// Approximate currency to USD rate used whenever the live FX lookup
    /// cannot be completed.
    pub fn fallback_usd_rate(&self) -> BigDecimal {
        match self {
            PegCurrency::GBP => BigDecimal::from(127) / BigDecimal::from(100),
            PegCurrency::EUR => BigDecimal::from(109) / BigDecimal::from(100),
            PegCurrency::USD => BigDecimal::from(1),
        }
    }
}

impl fmt::Display for PegCurrency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PegCurrency {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<PegCurrency, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "GBP" => Ok(PegCurrency::GBP),
            "EUR" => Ok(PegCurrency::EUR),
            "USD" => Ok(PegCurrency::USD),
            _ => Err(io::Error::other(format!(
                "PegCurrency not supported: {}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillMode {
    Test,
    Full,
}

impl fmt::Display for BackfillMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackfillMode::Test => write!(f, "test"),
            BackfillMode::Full => write!(f, "full"),
        }
    }
}

impl FromStr for BackfillMode {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<BackfillMode, Self::Err> {
        match value {
            "test" => Ok(BackfillMode::Test),
            "full" => Ok(BackfillMode::Full),
            _ => Err(io::Error::other("BackfillMode not supported")),
        }
    }
}
