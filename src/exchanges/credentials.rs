//! API credentials - loaded once, shape-checked, never logged in clear

use serde::Deserialize;

use crate::core::{Error, Result};
use crate::exchanges::ExchangeId;

const MIN_KEY_LEN: usize = 16;

/// Fragments that indicate an unfilled template value
const PLACEHOLDER_MARKERS: &[&str] = &[
    "your_", "your-", "changeme", "change_me", "placeholder", "replace", "xxxx", "<", ">",
];

#[derive(Clone, Deserialize)]
pub struct ExchangeCredentials {
    pub exchange: ExchangeId,
    pub api_key: String,
    pub secret_key: String,
    pub testnet: bool,
    pub subaccount: Option<String>,
    /// Required by OKX
    pub passphrase: Option<String>,
}

impl ExchangeCredentials {
    /// Read `<VENUE>_API_KEY`, `<VENUE>_SECRET_KEY`, `<VENUE>_TESTNET`,
    /// `<VENUE>_PASSPHRASE` and `<VENUE>_SUBACCOUNT` from the environment.
    pub fn from_env(exchange: ExchangeId) -> Result<Self> {
        Self::from_lookup(exchange, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(exchange: ExchangeId, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = exchange.env_prefix();
        let get = |suffix: &str| {
            lookup(&format!("{prefix}_{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("API_KEY")
            .ok_or_else(|| Error::Config(format!("{prefix}_API_KEY is not set")))?;
        let secret_key = get("SECRET_KEY")
            .ok_or_else(|| Error::Config(format!("{prefix}_SECRET_KEY is not set")))?;
        // Testnet unless explicitly turned off.
        let testnet = !matches!(
            get("TESTNET").map(|v| v.to_ascii_lowercase()).as_deref(),
            Some("false" | "0" | "no" | "off")
        );

        let credentials = Self {
            exchange,
            api_key,
            secret_key,
            testnet,
            subaccount: get("SUBACCOUNT"),
            passphrase: get("PASSPHRASE"),
        };
        credentials.validate()?;
        Ok(credentials)
    }

    /// Shape validation: length, placeholder detection, venue requirements.
    pub fn validate(&self) -> Result<()> {
        check_secret(self.exchange, "api key", &self.api_key)?;
        check_secret(self.exchange, "secret key", &self.secret_key)?;

        if self.exchange == ExchangeId::Okx {
            match self.passphrase.as_deref() {
                Some(p) if !p.trim().is_empty() && !looks_like_placeholder(p) => {}
                _ => {
                    return Err(Error::Config(
                        "okx credentials require a passphrase".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// First and last four characters of the api key.
    pub fn masked_key(&self) -> String {
        mask(&self.api_key)
    }
}

impl std::fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("exchange", &self.exchange)
            .field("api_key", &self.masked_key())
            .field("secret_key", &"***")
            .field("testnet", &self.testnet)
            .field("subaccount", &self.subaccount)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

fn check_secret(exchange: ExchangeId, what: &str, value: &str) -> Result<()> {
    if value.len() < MIN_KEY_LEN {
        return Err(Error::Config(format!(
            "{exchange} {what} is too short ({} chars, expected at least {MIN_KEY_LEN})",
            value.len()
        )));
    }
    if looks_like_placeholder(value) {
        return Err(Error::Config(format!(
            "{exchange} {what} looks like a placeholder ({})",
            mask(value)
        )));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(Error::Config(format!("{exchange} {what} contains whitespace")));
    }
    Ok(())
}

fn looks_like_placeholder(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m))
}

pub(crate) fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
