//! Normalized exchange types - every venue produces and consumes these

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{Side, Symbol};
use crate::exchanges::{ExchangeError, ExchangeId};

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force for limit orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

/// Venue-agnostic order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrderParams {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub client_order_id: Option<String>,
    pub reduce_only: bool,
}

impl SubmitOrderParams {
    pub fn market(symbol: Symbol, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: None,
            client_order_id: None,
            reduce_only: false,
        }
    }

    pub fn limit(symbol: Symbol, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }
}

/// Addresses an order either by the venue's id or by our client id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderIdentifier {
    Exchange(String),
    Client(String),
}

/// Normalized venue order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl ExchangeOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }
}

/// Order as reported by a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub exchange_order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub status: ExchangeOrderStatus,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub price: Option<Decimal>,
    pub avg_fill_price: Option<Decimal>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

/// Open position on a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    pub side: PositionSide,
    /// Absolute size
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub leverage: Option<Decimal>,
}

impl ExchangePosition {
    pub fn signed_quantity(&self) -> Decimal {
        match self.side {
            PositionSide::Long => self.quantity,
            PositionSide::Short => -self.quantity,
        }
    }
}

/// Account balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
}

/// Trading rules for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: Symbol,
    pub venue_symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_quantity: Decimal,
    pub min_notional: Option<Decimal>,
    pub tradable: bool,
}

/// Venue-wide metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub exchange: ExchangeId,
    pub server_time: Option<DateTime<Utc>>,
    pub symbols: Vec<SymbolInfo>,
}

// ─────────────────────────────────────────────────────────────
// Wire helpers shared by the venue bindings
// ─────────────────────────────────────────────────────────────

/// Venues send numbers as strings; an unparseable required field is a
/// protocol error.
pub(crate) fn parse_decimal(exchange: ExchangeId, field: &str, raw: &str) -> Result<Decimal, ExchangeError> {
    raw.trim().parse::<Decimal>().map_err(|_| {
        ExchangeError::invalid_response(exchange, format!("field '{field}' is not a number: '{raw}'"))
    })
}

/// Optional numeric field; empty strings and zero mean "not set".
pub(crate) fn parse_decimal_opt(raw: &str) -> Option<Decimal> {
    raw.trim()
        .parse::<Decimal>()
        .ok()
        .filter(|d| !d.is_zero())
}

pub(crate) fn millis_to_datetime(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_builder_defaults_to_gtc() {
        let params = SubmitOrderParams::limit(Symbol::new("BTCUSDT"), Side::Buy, Decimal::ONE, Decimal::from(100));
        assert_eq!(params.order_type, OrderType::Limit);
        assert_eq!(params.time_in_force, Some(TimeInForce::Gtc));
        assert_eq!(params.price, Some(Decimal::from(100)));
    }

    #[test]
    fn test_wire_helpers() {
        assert_eq!(parse_decimal_opt(""), None);
        assert_eq!(parse_decimal_opt("0.00"), None);
        assert_eq!(parse_decimal_opt("1.5"), Some(Decimal::new(15, 1)));
        assert!(parse_decimal(ExchangeId::Binance, "qty", "abc").is_err());
        assert_eq!(
            millis_to_datetime("1700000000000").map(|d| d.timestamp()),
            Some(1_700_000_000)
        );
    }
}
