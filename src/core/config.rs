//! Configuration - Type-safe, validated config
//!
//! Settings come from an optional TOML file and are then overridden by the
//! environment (a `.env` file is honoured by the binary). Every default is
//! the safe one: no setting that is absent can turn live trading on.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::{Error, Result, Symbol};
use crate::exchanges::ExchangeId;

/// Promotion mode of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMode {
    /// Nothing is ever promoted
    #[default]
    PaperOnly,
    /// Only allowlisted symbols are promoted
    Canary,
    /// Every symbol is eligible
    Live,
}

impl std::fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeMode::PaperOnly => write!(f, "PAPER_ONLY"),
            BridgeMode::Canary => write!(f, "CANARY"),
            BridgeMode::Live => write!(f, "LIVE"),
        }
    }
}

impl FromStr for BridgeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PAPER_ONLY" | "PAPER" => Ok(BridgeMode::PaperOnly),
            "CANARY" => Ok(BridgeMode::Canary),
            "LIVE" => Ok(BridgeMode::Live),
            other => Err(Error::Config(format!("unknown bridge mode '{other}'"))),
        }
    }
}

/// Business authorization settings consulted by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Master switch, false unless an operator sets it
    pub live_enabled: bool,
    /// Canary allowlist
    pub allowed_symbols: BTreeSet<Symbol>,
    pub max_orders_per_day: u32,
    pub max_notional_per_day: Decimal,
    pub mode: BridgeMode,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            live_enabled: false,
            allowed_symbols: BTreeSet::new(),
            max_orders_per_day: 0,
            max_notional_per_day: Decimal::ZERO,
            mode: BridgeMode::PaperOnly,
        }
    }
}

/// Kill-switch state applied at process start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSwitchDefaults {
    pub global: bool,
    pub symbols: BTreeSet<Symbol>,
    pub reason: Option<String>,
}

/// Venue connection settings (credentials are loaded separately).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueSettings {
    pub exchange: ExchangeId,
    /// Per-call wall-clock timeout
    pub timeout_ms: u64,
    /// Receive window sent with signed requests
    pub recv_window_ms: u64,
    /// Overrides the venue's default REST endpoint
    pub base_url: Option<String>,
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            exchange: ExchangeId::Binance,
            timeout_ms: 10_000,
            recv_window_ms: 5_000,
            base_url: None,
        }
    }
}

/// Top-level settings for the bridge process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bridge: BridgeConfig,
    pub kill_switch: KillSwitchDefaults,
    pub venue: VenueSettings,
    /// Directory holding one JSON file per lifecycle entry
    pub state_dir: PathBuf,
    /// Position reconciliation period
    pub reconcile_interval_secs: u64,
    /// Terminal entries older than this are removed at startup
    pub retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            kill_switch: KillSwitchDefaults::default(),
            venue: VenueSettings::default(),
            state_dir: PathBuf::from("data/live-orders"),
            reconcile_interval_secs: 60,
            retention_days: 30,
        }
    }
}

impl Settings {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load the optional file, then apply process environment overrides.
    pub fn from_env(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply overrides from any key/value source.
    ///
    /// Unparseable values are errors rather than silently ignored, so a typo
    /// in `LIVE_BRIDGE_MODE` fails startup instead of picking a mode.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LIVE_BRIDGE_ENABLED") {
            self.bridge.live_enabled = parse_bool("LIVE_BRIDGE_ENABLED", &v)?;
        }
        if let Some(v) = lookup("LIVE_BRIDGE_MODE") {
            self.bridge.mode = v.parse()?;
        }
        if let Some(v) = lookup("LIVE_BRIDGE_ALLOWED_SYMBOLS") {
            self.bridge.allowed_symbols = parse_symbols(&v);
        }
        if let Some(v) = lookup("LIVE_BRIDGE_MAX_ORDERS_PER_DAY") {
            self.bridge.max_orders_per_day = parse_num("LIVE_BRIDGE_MAX_ORDERS_PER_DAY", &v)?;
        }
        if let Some(v) = lookup("LIVE_BRIDGE_MAX_NOTIONAL_PER_DAY") {
            self.bridge.max_notional_per_day = parse_num("LIVE_BRIDGE_MAX_NOTIONAL_PER_DAY", &v)?;
        }
        if let Some(v) = lookup("KILL_SWITCH_GLOBAL") {
            self.kill_switch.global = parse_bool("KILL_SWITCH_GLOBAL", &v)?;
        }
        if let Some(v) = lookup("KILL_SWITCH_SYMBOLS") {
            self.kill_switch.symbols = parse_symbols(&v);
        }
        if let Some(v) = lookup("KILL_SWITCH_REASON") {
            let v = v.trim();
            self.kill_switch.reason = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = lookup("LIVE_BRIDGE_EXCHANGE") {
            self.venue.exchange = v.parse()?;
        }
        if let Some(v) = lookup("EXCHANGE_TIMEOUT_MS") {
            self.venue.timeout_ms = parse_num("EXCHANGE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("EXCHANGE_RECV_WINDOW_MS") {
            self.venue.recv_window_ms = parse_num("EXCHANGE_RECV_WINDOW_MS", &v)?;
        }
        if let Some(v) = lookup("EXCHANGE_BASE_URL") {
            self.venue.base_url = Some(v.trim().to_string()).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("LIVE_BRIDGE_STATE_DIR") {
            self.state_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = lookup("LIVE_BRIDGE_RECONCILE_INTERVAL_SECS") {
            self.reconcile_interval_secs = parse_num("LIVE_BRIDGE_RECONCILE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("LIVE_BRIDGE_RETENTION_DAYS") {
            self.retention_days = parse_num("LIVE_BRIDGE_RETENTION_DAYS", &v)?;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{key}: expected a boolean, got '{other}'"))),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: invalid number '{}'", value.trim())))
}

/// Comma-separated symbol list; blanks are dropped.
pub fn parse_symbols(value: &str) -> BTreeSet<Symbol> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Symbol::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_never_enable_live() {
        let settings = Settings::default();
        assert!(!settings.bridge.live_enabled);
        assert_eq!(settings.bridge.mode, BridgeMode::PaperOnly);
        assert!(!settings.kill_switch.global);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(lookup(&[
                ("LIVE_BRIDGE_ENABLED", "true"),
                ("LIVE_BRIDGE_MODE", "canary"),
                ("LIVE_BRIDGE_ALLOWED_SYMBOLS", "btcusdt, ETHUSDT,,"),
                ("LIVE_BRIDGE_MAX_ORDERS_PER_DAY", "25"),
                ("LIVE_BRIDGE_MAX_NOTIONAL_PER_DAY", "10000.50"),
                ("KILL_SWITCH_SYMBOLS", "SOLUSDT"),
                ("LIVE_BRIDGE_EXCHANGE", "okx"),
            ]))
            .unwrap();

        assert!(settings.bridge.live_enabled);
        assert_eq!(settings.bridge.mode, BridgeMode::Canary);
        assert_eq!(settings.bridge.allowed_symbols.len(), 2);
        assert!(settings.bridge.allowed_symbols.contains(&Symbol::new("BTCUSDT")));
        assert_eq!(settings.bridge.max_orders_per_day, 25);
        assert_eq!(settings.bridge.max_notional_per_day, Decimal::new(1000050, 2));
        assert!(settings.kill_switch.symbols.contains(&Symbol::new("SOLUSDT")));
        assert_eq!(settings.venue.exchange, ExchangeId::Okx);
    }

    #[test]
    fn test_bad_mode_fails_closed() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(lookup(&[("LIVE_BRIDGE_MODE", "turbo")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(settings.bridge.mode, BridgeMode::PaperOnly);
    }

    #[test]
    fn test_bad_bool_is_rejected() {
        let mut settings = Settings::default();
        assert!(settings
            .apply_overrides(lookup(&[("LIVE_BRIDGE_ENABLED", "sure")]))
            .is_err());
        assert!(!settings.bridge.live_enabled);
    }

    #[test]
    fn test_toml_file() {
        let toml = r#"
            state_dir = "/tmp/orders"

            [bridge]
            live_enabled = true
            mode = "LIVE"
            max_orders_per_day = 10
            max_notional_per_day = "2500"

            [venue]
            exchange = "bybit"
            timeout_ms = 3000
        "#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert!(settings.bridge.live_enabled);
        assert_eq!(settings.bridge.mode, BridgeMode::Live);
        assert_eq!(settings.venue.exchange, ExchangeId::Bybit);
        assert_eq!(settings.venue.recv_window_ms, 5_000);
        assert_eq!(settings.retention_days, 30);
    }
}
