//! Binance USDⓈ-M futures binding (fapi)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{Side, Symbol, VenueSettings};
use crate::exchanges::error::code_for_status;
use crate::exchanges::signer::BinanceSigner;
use crate::exchanges::transport::{RawResponse, RestTransport, build_query};
use crate::exchanges::types::{parse_decimal, parse_decimal_opt};
use crate::exchanges::{
    AccountBalance, ExchangeAdapter, ExchangeCredentials, ExchangeError, ExchangeErrorCode,
    ExchangeId, ExchangeInfo, ExchangeOrder, ExchangeOrderStatus, ExchangePosition, ExchangeResult,
    OrderIdentifier, OrderType, PositionSide, SubmitOrderParams, SymbolInfo, TimeInForce,
};

const LIVE_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";

const EX: ExchangeId = ExchangeId::Binance;

/// Binance error code → shared taxonomy
pub fn map_error_code(code: i64, message: &str) -> Option<ExchangeErrorCode> {
    use ExchangeErrorCode::*;
    Some(match code {
        -1002 | -2014 | -2015 => AuthFailed,
        -1022 => SignatureInvalid,
        -1003 | -1015 => RateLimitExceeded,
        -1021 => TimestampOutsideRecvWindow,
        -1001 | -1016 => ExchangeUnavailable,
        -1007 => Timeout,
        -2010 if message.to_ascii_lowercase().contains("insufficient") => InsufficientBalance,
        -2010 | -4131 => OrderRejected,
        -2019 => InsufficientMargin,
        -2011 | -2013 => OrderNotFound,
        -1013 | -1111 | -4003 | -4005 => InvalidQuantity,
        -4014 | -4016 | -4024 => InvalidPrice,
        -1121 => InvalidSymbol,
        -2027 | -2028 => PositionLimitExceeded,
        _ => return None,
    })
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrder {
    order_id: i64,
    #[serde(default)]
    client_order_id: Option<String>,
    symbol: String,
    status: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    orig_qty: String,
    executed_qty: String,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    avg_price: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    update_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePosition {
    symbol: String,
    position_amt: String,
    entry_price: String,
    #[serde(default)]
    mark_price: Option<String>,
    #[serde(default)]
    un_realized_profit: Option<String>,
    #[serde(default)]
    leverage: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBalance {
    asset: String,
    balance: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExchangeInfo {
    #[serde(default)]
    server_time: Option<i64>,
    symbols: Vec<WireSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSymbol {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    filters: Vec<WireFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum WireFilter {
    #[serde(rename = "PRICE_FILTER")]
    Price {
        #[serde(rename = "tickSize")]
        tick_size: String,
    },
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "stepSize")]
        step_size: String,
        #[serde(rename = "minQty")]
        min_qty: String,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTime {
    server_time: i64,
}

pub struct BinanceAdapter {
    transport: RestTransport,
}

impl BinanceAdapter {
    pub fn new(credentials: &ExchangeCredentials, venue: &VenueSettings) -> ExchangeResult<Self> {
        let default_url = if credentials.testnet { TESTNET_URL } else { LIVE_URL };
        let base_url = venue.base_url.clone().unwrap_or_else(|| default_url.to_string());
        let signer = BinanceSigner::new(
            credentials.api_key.clone(),
            credentials.secret_key.clone(),
            venue.recv_window_ms,
        );
        let transport = RestTransport::new(
            EX,
            base_url,
            Duration::from_millis(venue.timeout_ms),
            Box::new(signer),
        )?;

        info!(
            "🔗 Binance futures adapter ({}) key={}",
            transport.base_url(),
            credentials.masked_key()
        );
        Ok(Self { transport })
    }

    /// Successful responses pass through; anything else becomes a mapped error.
    fn check(&self, raw: RawResponse) -> ExchangeResult<RawResponse> {
        if raw.is_success() {
            return Ok(raw);
        }
        Err(match serde_json::from_str::<ApiError>(&raw.body) {
            Ok(api) => ExchangeError::from_venue(
                EX,
                raw.status,
                Some(api.code.to_string()),
                Some(api.msg.clone()),
                map_error_code(api.code, &api.msg),
            ),
            Err(_) => ExchangeError::from_venue(
                EX,
                raw.status,
                None,
                Some(raw.body.chars().take(256).collect()),
                code_for_status(raw.status),
            ),
        })
    }

    fn order_from_wire(&self, wire: WireOrder) -> ExchangeResult<ExchangeOrder> {
        let status = match wire.status.as_str() {
            "NEW" => ExchangeOrderStatus::New,
            "PARTIALLY_FILLED" => ExchangeOrderStatus::PartiallyFilled,
            "FILLED" => ExchangeOrderStatus::Filled,
            "CANCELED" => ExchangeOrderStatus::Cancelled,
            "REJECTED" => ExchangeOrderStatus::Rejected,
            "EXPIRED" | "EXPIRED_IN_MATCH" => ExchangeOrderStatus::Expired,
            other => {
                return Err(ExchangeError::invalid_response(
                    EX,
                    format!("unknown order status '{other}'"),
                ));
            }
        };
        let side = match wire.side.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => {
                return Err(ExchangeError::invalid_response(EX, format!("unknown side '{other}'")));
            }
        };
        let order_type = if wire.order_type == "MARKET" {
            OrderType::Market
        } else {
            OrderType::Limit
        };

        Ok(ExchangeOrder {
            exchange_order_id: wire.order_id.to_string(),
            client_order_id: wire.client_order_id.filter(|c| !c.is_empty()),
            symbol: self.from_venue_symbol(&wire.symbol),
            side,
            order_type,
            status,
            quantity: parse_decimal(EX, "origQty", &wire.orig_qty)?,
            filled_quantity: parse_decimal(EX, "executedQty", &wire.executed_qty)?,
            price: wire.price.as_deref().and_then(parse_decimal_opt),
            avg_fill_price: wire.avg_price.as_deref().and_then(parse_decimal_opt),
            created_at: wire.time.and_then(DateTime::from_timestamp_millis),
            updated_at: wire.update_time.and_then(DateTime::from_timestamp_millis),
        })
    }

    fn id_param(id: &OrderIdentifier) -> (&'static str, String) {
        match id {
            OrderIdentifier::Exchange(id) => ("orderId", id.clone()),
            OrderIdentifier::Client(id) => ("origClientOrderId", id.clone()),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange(&self) -> ExchangeId {
        EX
    }

    fn to_venue_symbol(&self, symbol: &Symbol) -> String {
        symbol.as_str().to_string()
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Symbol {
        Symbol::new(venue_symbol)
    }

    async fn submit_order(&self, params: &SubmitOrderParams) -> ExchangeResult<ExchangeOrder> {
        let mut query = vec![
            ("symbol", self.to_venue_symbol(&params.symbol)),
            ("side", params.side.to_string()),
            (
                "type",
                match params.order_type {
                    OrderType::Market => "MARKET",
                    OrderType::Limit => "LIMIT",
                }
                .to_string(),
            ),
            ("quantity", params.quantity.normalize().to_string()),
        ];
        if let Some(price) = params.price.filter(|_| params.order_type == OrderType::Limit) {
            query.push(("price", price.normalize().to_string()));
            let tif = match params.time_in_force.unwrap_or(TimeInForce::Gtc) {
                TimeInForce::Gtc => "GTC",
                TimeInForce::Ioc => "IOC",
                TimeInForce::Fok => "FOK",
            };
            query.push(("timeInForce", tif.to_string()));
        }
        if let Some(client_id) = &params.client_order_id {
            query.push(("newClientOrderId", client_id.clone()));
        }
        if params.reduce_only {
            query.push(("reduceOnly", "true".to_string()));
        }
        query.push(("newOrderRespType", "RESULT".to_string()));

        let raw = self
            .transport
            .signed(Method::POST, "/fapi/v1/order", &build_query(&query), "")
            .await?;
        let order = self.order_from_wire(self.check(raw)?.json(EX)?)?;
        debug!(order_id = %order.exchange_order_id, status = ?order.status, "binance order accepted");
        Ok(order)
    }

    async fn cancel_order(&self, symbol: &Symbol, id: &OrderIdentifier) -> ExchangeResult<bool> {
        let query = build_query(&[("symbol", self.to_venue_symbol(symbol)), Self::id_param(id)]);
        let raw = self.transport.signed(Method::DELETE, "/fapi/v1/order", &query, "").await?;
        match self.check(raw) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(?id, "binance cancel: order already terminal or unknown");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_order(
        &self,
        symbol: &Symbol,
        id: &OrderIdentifier,
    ) -> ExchangeResult<Option<ExchangeOrder>> {
        let query = build_query(&[("symbol", self.to_venue_symbol(symbol)), Self::id_param(id)]);
        let raw = self.transport.signed(Method::GET, "/fapi/v1/order", &query, "").await?;
        match self.check(raw) {
            Ok(raw) => Ok(Some(self.order_from_wire(raw.json(EX)?)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_open_orders(&self, symbol: Option<&Symbol>) -> ExchangeResult<Vec<ExchangeOrder>> {
        let query = match symbol {
            Some(s) => build_query(&[("symbol", self.to_venue_symbol(s))]),
            None => String::new(),
        };
        let raw = self.transport.signed(Method::GET, "/fapi/v1/openOrders", &query, "").await?;
        let wire: Vec<WireOrder> = self.check(raw)?.json(EX)?;
        wire.into_iter().map(|w| self.order_from_wire(w)).collect()
    }

    async fn get_all_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        let raw = self.transport.signed(Method::GET, "/fapi/v2/positionRisk", "", "").await?;
        let wire: Vec<WirePosition> = self.check(raw)?.json(EX)?;

        let mut positions = Vec::new();
        for p in wire {
            let amount = parse_decimal(EX, "positionAmt", &p.position_amt)?;
            if amount.is_zero() {
                continue;
            }
            positions.push(ExchangePosition {
                symbol: self.from_venue_symbol(&p.symbol),
                side: if amount.is_sign_negative() { PositionSide::Short } else { PositionSide::Long },
                quantity: amount.abs(),
                entry_price: parse_decimal(EX, "entryPrice", &p.entry_price)?,
                mark_price: p.mark_price.as_deref().and_then(parse_decimal_opt),
                unrealized_pnl: p
                    .un_realized_profit
                    .as_deref()
                    .and_then(parse_decimal_opt)
                    .unwrap_or_default(),
                leverage: p.leverage.as_deref().and_then(parse_decimal_opt),
            });
        }
        Ok(positions)
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<AccountBalance>> {
        let raw = self.transport.signed(Method::GET, "/fapi/v2/balance", "", "").await?;
        let wire: Vec<WireBalance> = self.check(raw)?.json(EX)?;
        wire.into_iter()
            .map(|b| {
                let total = parse_decimal(EX, "balance", &b.balance)?;
                let free = parse_decimal(EX, "availableBalance", &b.available_balance)?;
                Ok(AccountBalance {
                    asset: b.asset,
                    free,
                    locked: (total - free).max(Decimal::ZERO),
                    total,
                })
            })
            .collect()
    }

    async fn get_exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        let raw = self.transport.public_get("/fapi/v1/exchangeInfo", "").await?;
        let wire: WireExchangeInfo = self.check(raw)?.json(EX)?;

        let mut symbols = Vec::with_capacity(wire.symbols.len());
        for s in wire.symbols {
            let mut info = SymbolInfo {
                symbol: self.from_venue_symbol(&s.symbol),
                venue_symbol: s.symbol.clone(),
                base_asset: s.base_asset,
                quote_asset: s.quote_asset,
                tick_size: Decimal::ZERO,
                step_size: Decimal::ZERO,
                min_quantity: Decimal::ZERO,
                min_notional: None,
                tradable: s.status == "TRADING",
            };
            for filter in s.filters {
                match filter {
                    WireFilter::Price { tick_size } => {
                        info.tick_size = parse_decimal(EX, "tickSize", &tick_size)?;
                    }
                    WireFilter::LotSize { step_size, min_qty } => {
                        info.step_size = parse_decimal(EX, "stepSize", &step_size)?;
                        info.min_quantity = parse_decimal(EX, "minQty", &min_qty)?;
                    }
                    WireFilter::MinNotional { notional } => {
                        info.min_notional = parse_decimal_opt(&notional);
                    }
                    WireFilter::Other => {}
                }
            }
            symbols.push(info);
        }

        Ok(ExchangeInfo {
            exchange: EX,
            server_time: wire.server_time.and_then(DateTime::from_timestamp_millis),
            symbols,
        })
    }

    async fn ping(&self) -> ExchangeResult<()> {
        let raw = self.transport.public_get("/fapi/v1/ping", "").await?;
        self.check(raw).map(|_| ())
    }

    async fn get_server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        let raw = self.transport.public_get("/fapi/v1/time", "").await?;
        let wire: WireTime = self.check(raw)?.json(EX)?;
        DateTime::from_timestamp_millis(wire.server_time)
            .ok_or_else(|| ExchangeError::invalid_response(EX, "serverTime out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer, timeout_ms: u64) -> BinanceAdapter {
        let credentials = ExchangeCredentials {
            exchange: ExchangeId::Binance,
            api_key: "binanceApiKey0123456789".into(),
            secret_key: "binanceSecret0123456789".into(),
            testnet: true,
            subaccount: None,
            passphrase: None,
        };
        let venue = VenueSettings {
            exchange: ExchangeId::Binance,
            timeout_ms,
            recv_window_ms: 5000,
            base_url: Some(server.uri()),
        };
        BinanceAdapter::new(&credentials, &venue).unwrap()
    }

    #[test]
    fn test_error_table() {
        assert_eq!(map_error_code(-2019, "Margin is insufficient."), Some(ExchangeErrorCode::InsufficientMargin));
        assert_eq!(map_error_code(-2010, "Account has insufficient balance"), Some(ExchangeErrorCode::InsufficientBalance));
        assert_eq!(map_error_code(-2010, "Order would immediately trigger"), Some(ExchangeErrorCode::OrderRejected));
        assert_eq!(map_error_code(-1021, ""), Some(ExchangeErrorCode::TimestampOutsideRecvWindow));
        assert_eq!(map_error_code(-2015, ""), Some(ExchangeErrorCode::AuthFailed));
        assert_eq!(map_error_code(-9999, ""), None);
    }

    #[tokio::test]
    async fn test_submit_order_normalizes_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("newClientOrderId", "lbabc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orderId": 4242,
                "clientOrderId": "lbabc",
                "symbol": "BTCUSDT",
                "status": "NEW",
                "side": "BUY",
                "type": "LIMIT",
                "origQty": "0.100",
                "executedQty": "0",
                "price": "50000",
                "avgPrice": "0.00",
                "updateTime": 1700000000000i64
            })))
            .mount(&server)
            .await;

        let params = SubmitOrderParams::limit(Symbol::new("BTCUSDT"), Side::Buy, dec!(0.1), dec!(50000))
            .with_client_order_id("lbabc");
        let order = adapter(&server, 1000).submit_order(&params).await.unwrap();

        assert_eq!(order.exchange_order_id, "4242");
        assert_eq!(order.status, ExchangeOrderStatus::New);
        assert_eq!(order.quantity, dec!(0.1));
        assert_eq!(order.avg_fill_price, None);
        assert_eq!(order.price, Some(dec!(50000)));
    }

    #[tokio::test]
    async fn test_cancel_of_terminal_order_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/fapi/v1/order"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"code": -2011, "msg": "Unknown order sent."})),
            )
            .mount(&server)
            .await;

        let cancelled = adapter(&server, 1000)
            .cancel_order(&Symbol::new("BTCUSDT"), &OrderIdentifier::Exchange("1".into()))
            .await
            .unwrap();
        assert!(!cancelled);
    }

    #[tokio::test]
    async fn test_get_unknown_order_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/order"))
            .and(query_param("origClientOrderId", "lbmissing"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"code": -2013, "msg": "Order does not exist."})),
            )
            .mount(&server)
            .await;

        let order = adapter(&server, 1000)
            .get_order(&Symbol::new("BTCUSDT"), &OrderIdentifier::Client("lbmissing".into()))
            .await
            .unwrap();
        assert!(order.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/balance"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = adapter(&server, 1000).get_balances().await.unwrap_err();
        assert_eq!(err.code, ExchangeErrorCode::ExchangeUnavailable);
        assert!(err.retryable);
        assert_eq!(err.http_status, Some(503));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"code": -2019, "msg": "Margin is insufficient."})),
            )
            .mount(&server)
            .await;

        let params = SubmitOrderParams::market(Symbol::new("BTCUSDT"), Side::Sell, dec!(1));
        let err = adapter(&server, 1000).submit_order(&params).await.unwrap_err();
        assert_eq!(err.code, ExchangeErrorCode::InsufficientMargin);
        assert!(!err.retryable);
        assert_eq!(err.original_code.as_deref(), Some("-2019"));
    }

    #[tokio::test]
    async fn test_slow_venue_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/time"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"serverTime": 1700000000000i64}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = adapter(&server, 50).get_server_time().await.unwrap_err();
        assert_eq!(err.code, ExchangeErrorCode::Timeout);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_positions_skip_flat_and_sign_shorts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTCUSDT", "positionAmt": "-0.250", "entryPrice": "50000", "markPrice": "50100", "unRealizedProfit": "-25", "leverage": "10"},
                {"symbol": "ETHUSDT", "positionAmt": "0.000", "entryPrice": "0", "markPrice": "3000", "unRealizedProfit": "0", "leverage": "10"}
            ])))
            .mount(&server)
            .await;

        let positions = adapter(&server, 1000).get_all_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, PositionSide::Short);
        assert_eq!(positions[0].signed_quantity(), dec!(-0.25));
        assert_eq!(positions[0].unrealized_pnl, dec!(-25));
    }
}
