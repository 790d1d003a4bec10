//! Core Types - Strong typing for safety

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Canonical symbol (e.g., "BTCUSDT").
///
/// Venues spell instruments differently; adapters translate to and from this
/// form at the protocol boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}

impl From<Symbol> for String {
    fn from(s: Symbol) -> Self {
        s.0
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Trading mode of an execution or of the bridge itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeMode {
    Paper,
    Live,
}

/// Outcome reported by the paper engine for one simulated order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaperExecutionStatus {
    Filled,
    PartiallyFilled,
    Rejected,
    Cancelled,
    Failed,
}

/// A simulated fill produced by the paper-trading engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperExecutionResult {
    pub execution_id: String,
    pub intent_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub requested_quantity: Decimal,
    pub filled_quantity: Decimal,
    pub fill_price: Decimal,
    #[serde(default)]
    pub slippage_bps: Decimal,
    #[serde(default)]
    pub latency_ms: u64,
    pub status: PaperExecutionStatus,
    pub mode: TradeMode,
    pub executed_at: DateTime<Utc>,
}

/// Authorized live order produced by the gate.
///
/// Fields are private so an intent cannot be altered after gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveExecutionIntent {
    bridge_id: String,
    source_execution_id: String,
    symbol: Symbol,
    side: Side,
    quantity: Decimal,
    price: Decimal,
    mode: TradeMode,
    gated_at: DateTime<Utc>,
}

impl LiveExecutionIntent {
    pub(crate) fn new(
        bridge_id: String,
        source_execution_id: String,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        gated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            bridge_id,
            source_execution_id,
            symbol,
            side,
            quantity,
            price,
            mode: TradeMode::Live,
            gated_at,
        }
    }

    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }

    pub fn source_execution_id(&self) -> &str {
        &self.source_execution_id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn mode(&self) -> TradeMode {
        self.mode
    }

    pub fn gated_at(&self) -> DateTime<Utc> {
        self.gated_at
    }

    /// Saturates at `Decimal::MAX`.
    pub fn notional(&self) -> Decimal {
        self.quantity.saturating_mul(self.price)
    }
}

/// Daily counters consulted by the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeLimitsState {
    pub current_order_count: u32,
    pub current_notional_usd: Decimal,
}

/// Paper-side position handed to the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperPosition {
    pub symbol: Symbol,
    /// Signed quantity, negative for short
    pub quantity: Decimal,
    pub avg_entry_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_is_uppercased() {
        assert_eq!(Symbol::new(" btcusdt ").as_str(), "BTCUSDT");
    }

    #[test]
    fn test_paper_execution_deserializes() {
        let json = r#"{
            "execution_id": "exec-1",
            "intent_id": "intent-1",
            "symbol": "btcusdt",
            "side": "BUY",
            "requested_quantity": 0.1,
            "filled_quantity": "0.1",
            "fill_price": 50000,
            "status": "FILLED",
            "mode": "PAPER",
            "executed_at": "2026-01-05T10:00:00Z"
        }"#;
        let exec: PaperExecutionResult = serde_json::from_str(json).unwrap();
        assert_eq!(exec.symbol, Symbol::new("BTCUSDT"));
        assert_eq!(exec.status, PaperExecutionStatus::Filled);
        assert_eq!(exec.filled_quantity, Decimal::new(1, 1));
        assert_eq!(exec.latency_ms, 0);
    }
}
