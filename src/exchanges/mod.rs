//! Exchanges module - normalized adapter contract and venue bindings

pub mod adapter;
pub mod binance;
pub mod bybit;
pub mod credentials;
pub mod error;
pub mod okx;
pub mod signer;
pub mod transport;
pub mod types;

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub use adapter::ExchangeAdapter;
pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use credentials::ExchangeCredentials;
pub use error::{ExchangeError, ExchangeErrorCode, ExchangeResult};
pub use okx::OkxAdapter;
pub use types::*;

use crate::core::{Error, Result, VenueSettings};

/// Supported venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    #[default]
    Binance,
    Bybit,
    Okx,
}

impl ExchangeId {
    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Okx => "okx",
        }
    }

    /// Prefix of the credential environment variables.
    pub fn env_prefix(self) -> &'static str {
        match self {
            ExchangeId::Binance => "BINANCE",
            ExchangeId::Bybit => "BYBIT",
            ExchangeId::Okx => "OKX",
        }
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(ExchangeId::Binance),
            "bybit" => Ok(ExchangeId::Bybit),
            "okx" => Ok(ExchangeId::Okx),
            other => Err(Error::Config(format!("unsupported exchange '{other}'"))),
        }
    }
}

/// Build the adapter for the configured venue.
pub fn build_adapter(
    venue: &VenueSettings,
    credentials: &ExchangeCredentials,
) -> Result<Arc<dyn ExchangeAdapter>> {
    if venue.exchange != credentials.exchange {
        return Err(Error::Config(format!(
            "venue is {} but credentials are for {}",
            venue.exchange, credentials.exchange
        )));
    }

    let adapter: Arc<dyn ExchangeAdapter> = match venue.exchange {
        ExchangeId::Binance => Arc::new(BinanceAdapter::new(credentials, venue)?),
        ExchangeId::Bybit => Arc::new(BybitAdapter::new(credentials, venue)?),
        ExchangeId::Okx => Arc::new(OkxAdapter::new(credentials, venue)?),
    };
    Ok(adapter)
}
