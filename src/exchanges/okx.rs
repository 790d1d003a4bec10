//! OKX v5 binding (USDT-margined perpetual swaps)
//!
//! Instruments are spelled `BTC-USDT-SWAP`; canonical symbols are `BTCUSDT`.
//! Quantities are passed through as `sz` unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{Side, Symbol, VenueSettings};
use crate::exchanges::error::code_for_status;
use crate::exchanges::signer::OkxSigner;
use crate::exchanges::transport::{RawResponse, RestTransport, build_query};
use crate::exchanges::types::{millis_to_datetime, parse_decimal, parse_decimal_opt};
use crate::exchanges::{
    AccountBalance, ExchangeAdapter, ExchangeCredentials, ExchangeError, ExchangeErrorCode,
    ExchangeId, ExchangeInfo, ExchangeOrder, ExchangeOrderStatus, ExchangePosition, ExchangeResult,
    OrderIdentifier, OrderType, PositionSide, SubmitOrderParams, SymbolInfo, TimeInForce,
};

const BASE_URL: &str = "https://www.okx.com";
const INST_TYPE: &str = "SWAP";
const SWAP_SUFFIX: &str = "-SWAP";
/// Checked in order; USDT must precede USD
const QUOTES: &[&str] = &["USDT", "USDC", "USD"];

const EX: ExchangeId = ExchangeId::Okx;

/// OKX error code → shared taxonomy
pub fn map_error_code(code: &str) -> Option<ExchangeErrorCode> {
    use ExchangeErrorCode::*;
    Some(match code {
        "50111" | "50114" | "50105" | "50110" => AuthFailed,
        "50113" => SignatureInvalid,
        "50102" => TimestampOutsideRecvWindow,
        "50011" | "50061" => RateLimitExceeded,
        "50001" | "50004" | "50013" => ExchangeUnavailable,
        "51008" => InsufficientBalance,
        "51004" => PositionLimitExceeded,
        "51603" | "51400" | "51401" | "51402" => OrderNotFound,
        "51001" => InvalidSymbol,
        "51120" | "51121" => InvalidQuantity,
        "51006" => InvalidPrice,
        "51000" => OrderRejected,
        _ => return None,
    })
}

/// `BTCUSDT` → `BTC-USDT-SWAP`
pub fn canonical_to_inst_id(symbol: &Symbol) -> String {
    let s = symbol.as_str();
    for quote in QUOTES {
        if let Some(base) = s.strip_suffix(quote).filter(|b| !b.is_empty()) {
            return format!("{base}-{quote}{SWAP_SUFFIX}");
        }
    }
    format!("{s}{SWAP_SUFFIX}")
}

/// `BTC-USDT-SWAP` → `BTCUSDT`
pub fn inst_id_to_canonical(inst_id: &str) -> Symbol {
    let trimmed = inst_id.strip_suffix(SWAP_SUFFIX).unwrap_or(inst_id);
    Symbol::new(trimmed.replace('-', ""))
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Value>,
}

/// Per-item status carried by trade endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemStatus {
    #[serde(default)]
    s_code: String,
    #[serde(default)]
    s_msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrderAck {
    ord_id: String,
    #[serde(default)]
    cl_ord_id: String,
    #[serde(default)]
    ts: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrder {
    ord_id: String,
    #[serde(default)]
    cl_ord_id: String,
    inst_id: String,
    side: String,
    ord_type: String,
    #[serde(default)]
    px: String,
    sz: String,
    #[serde(default)]
    acc_fill_sz: String,
    #[serde(default)]
    avg_px: String,
    state: String,
    #[serde(default)]
    c_time: String,
    #[serde(default)]
    u_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePosition {
    inst_id: String,
    pos: String,
    #[serde(default)]
    pos_side: String,
    #[serde(default)]
    avg_px: String,
    #[serde(default)]
    mark_px: String,
    #[serde(default)]
    upl: String,
    #[serde(default)]
    lever: String,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    #[serde(default)]
    details: Vec<WireDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDetail {
    ccy: String,
    #[serde(default)]
    eq: String,
    #[serde(default)]
    avail_bal: String,
    #[serde(default)]
    frozen_bal: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInstrument {
    inst_id: String,
    tick_sz: String,
    lot_sz: String,
    min_sz: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct WireTime {
    ts: String,
}

pub struct OkxAdapter {
    transport: RestTransport,
}

impl OkxAdapter {
    pub fn new(credentials: &ExchangeCredentials, venue: &VenueSettings) -> ExchangeResult<Self> {
        let passphrase = credentials.passphrase.clone().ok_or_else(|| {
            ExchangeError::new(EX, ExchangeErrorCode::AuthFailed, "okx passphrase missing")
        })?;
        let base_url = venue.base_url.clone().unwrap_or_else(|| BASE_URL.to_string());
        let signer = OkxSigner::new(
            credentials.api_key.clone(),
            credentials.secret_key.clone(),
            passphrase,
        );
        let mut transport = RestTransport::new(
            EX,
            base_url,
            Duration::from_millis(venue.timeout_ms),
            Box::new(signer),
        )?;
        if credentials.testnet {
            transport = transport.with_static_header("x-simulated-trading", "1");
        }

        info!(
            "🔗 OKX swap adapter ({}, demo={}) key={}",
            transport.base_url(),
            credentials.testnet,
            credentials.masked_key()
        );
        Ok(Self { transport })
    }

    /// Unwrap `{code, msg, data}`; the per-item `sCode` wins over the
    /// top-level code when present.
    fn decode<T: DeserializeOwned>(&self, raw: RawResponse) -> ExchangeResult<Vec<T>> {
        let envelope = match serde_json::from_str::<Envelope>(&raw.body) {
            Ok(envelope) => envelope,
            Err(_) if !raw.is_success() => {
                return Err(ExchangeError::from_venue(
                    EX,
                    raw.status,
                    None,
                    Some(raw.body.chars().take(256).collect()),
                    code_for_status(raw.status),
                ));
            }
            Err(e) => {
                return Err(ExchangeError::invalid_response(EX, format!("bad envelope: {e}")));
            }
        };

        let item = envelope
            .data
            .first()
            .and_then(|v| serde_json::from_value::<ItemStatus>(v.clone()).ok())
            .unwrap_or_default();
        let item_failed = !item.s_code.is_empty() && item.s_code != "0";

        if envelope.code != "0" || item_failed || !raw.is_success() {
            let (code, message) = if item_failed {
                (item.s_code, item.s_msg)
            } else {
                (envelope.code, envelope.msg)
            };
            let mapped = map_error_code(&code).or_else(|| code_for_status(raw.status));
            return Err(ExchangeError::from_venue(EX, raw.status, Some(code), Some(message), mapped));
        }

        envelope
            .data
            .into_iter()
            .map(|v| {
                serde_json::from_value(v)
                    .map_err(|e| ExchangeError::invalid_response(EX, format!("bad data item: {e}")))
            })
            .collect()
    }

    fn order_from_wire(&self, wire: WireOrder) -> ExchangeResult<ExchangeOrder> {
        let status = match wire.state.as_str() {
            "live" => ExchangeOrderStatus::New,
            "partially_filled" => ExchangeOrderStatus::PartiallyFilled,
            "filled" => ExchangeOrderStatus::Filled,
            "canceled" | "mmp_canceled" => ExchangeOrderStatus::Cancelled,
            other => {
                return Err(ExchangeError::invalid_response(
                    EX,
                    format!("unknown order state '{other}'"),
                ));
            }
        };
        let side = match wire.side.as_str() {
            "buy" => Side::Buy,
            "sell" => Side::Sell,
            other => {
                return Err(ExchangeError::invalid_response(EX, format!("unknown side '{other}'")));
            }
        };

        Ok(ExchangeOrder {
            exchange_order_id: wire.ord_id,
            client_order_id: Some(wire.cl_ord_id).filter(|c| !c.is_empty()),
            symbol: self.from_venue_symbol(&wire.inst_id),
            side,
            order_type: if wire.ord_type == "market" { OrderType::Market } else { OrderType::Limit },
            status,
            quantity: parse_decimal(EX, "sz", &wire.sz)?,
            filled_quantity: parse_decimal_opt(&wire.acc_fill_sz).unwrap_or_default(),
            price: parse_decimal_opt(&wire.px),
            avg_fill_price: parse_decimal_opt(&wire.avg_px),
            created_at: millis_to_datetime(&wire.c_time),
            updated_at: millis_to_datetime(&wire.u_time),
        })
    }

    fn id_field(id: &OrderIdentifier) -> (&'static str, String) {
        match id {
            OrderIdentifier::Exchange(id) => ("ordId", id.clone()),
            OrderIdentifier::Client(id) => ("clOrdId", id.clone()),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn exchange(&self) -> ExchangeId {
        EX
    }

    fn to_venue_symbol(&self, symbol: &Symbol) -> String {
        canonical_to_inst_id(symbol)
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Symbol {
        inst_id_to_canonical(venue_symbol)
    }

    async fn submit_order(&self, params: &SubmitOrderParams) -> ExchangeResult<ExchangeOrder> {
        let ord_type = match (params.order_type, params.time_in_force) {
            (OrderType::Market, _) => "market",
            (OrderType::Limit, Some(TimeInForce::Ioc)) => "ioc",
            (OrderType::Limit, Some(TimeInForce::Fok)) => "fok",
            (OrderType::Limit, _) => "limit",
        };

        let mut body = Map::new();
        body.insert("instId".into(), json!(self.to_venue_symbol(&params.symbol)));
        body.insert("tdMode".into(), json!("cross"));
        body.insert(
            "side".into(),
            json!(match params.side {
                Side::Buy => "buy",
                Side::Sell => "sell",
            }),
        );
        body.insert("ordType".into(), json!(ord_type));
        body.insert("sz".into(), json!(params.quantity.normalize().to_string()));
        if let Some(price) = params.price.filter(|_| params.order_type == OrderType::Limit) {
            body.insert("px".into(), json!(price.normalize().to_string()));
        }
        if let Some(client_id) = &params.client_order_id {
            body.insert("clOrdId".into(), json!(client_id));
        }
        if params.reduce_only {
            body.insert("reduceOnly".into(), json!(true));
        }

        let body = Value::Object(body).to_string();
        let raw = self.transport.signed(Method::POST, "/api/v5/trade/order", "", &body).await?;
        let ack = self
            .decode::<WireOrderAck>(raw)?
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::invalid_response(EX, "empty order acknowledgement"))?;
        debug!(order_id = %ack.ord_id, "okx order accepted");

        let acked_at = millis_to_datetime(&ack.ts);
        Ok(ExchangeOrder {
            exchange_order_id: ack.ord_id,
            client_order_id: Some(ack.cl_ord_id)
                .filter(|c| !c.is_empty())
                .or_else(|| params.client_order_id.clone()),
            symbol: params.symbol.clone(),
            side: params.side,
            order_type: params.order_type,
            status: ExchangeOrderStatus::New,
            quantity: params.quantity,
            filled_quantity: Decimal::ZERO,
            price: params.price,
            avg_fill_price: None,
            created_at: acked_at,
            updated_at: acked_at,
        })
    }

    async fn cancel_order(&self, symbol: &Symbol, id: &OrderIdentifier) -> ExchangeResult<bool> {
        let (field, value) = Self::id_field(id);
        let mut body = Map::new();
        body.insert("instId".into(), json!(self.to_venue_symbol(symbol)));
        body.insert(field.into(), json!(value));
        let body = Value::Object(body).to_string();

        let raw = self
            .transport
            .signed(Method::POST, "/api/v5/trade/cancel-order", "", &body)
            .await?;
        match self.decode::<Value>(raw) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(?id, "okx cancel: order already terminal or unknown");
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
        let query = build_query(&[("instId", self.to_venue_symbol(symbol)), Self::id_field(id)]);
        let raw = self.transport.signed(Method::GET, "/api/v5/trade/order", &query, "").await?;
        match self.decode::<WireOrder>(raw) {
            Ok(orders) => orders.into_iter().next().map(|w| self.order_from_wire(w)).transpose(),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_open_orders(&self, symbol: Option<&Symbol>) -> ExchangeResult<Vec<ExchangeOrder>> {
        let mut params = vec![("instType", INST_TYPE.to_string())];
        if let Some(s) = symbol {
            params.push(("instId", self.to_venue_symbol(s)));
        }
        let raw = self
            .transport
            .signed(Method::GET, "/api/v5/trade/orders-pending", &build_query(&params), "")
            .await?;
        self.decode::<WireOrder>(raw)?
            .into_iter()
            .map(|w| self.order_from_wire(w))
            .collect()
    }

    async fn get_all_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        let query = build_query(&[("instType", INST_TYPE.to_string())]);
        let raw = self
            .transport
            .signed(Method::GET, "/api/v5/account/positions", &query, "")
            .await?;

        let mut positions = Vec::new();
        for p in self.decode::<WirePosition>(raw)? {
            let pos = parse_decimal(EX, "pos", &p.pos)?;
            if pos.is_zero() {
                continue;
            }
            let short = p.pos_side == "short" || (p.pos_side != "long" && pos.is_sign_negative());
            positions.push(ExchangePosition {
                symbol: self.from_venue_symbol(&p.inst_id),
                side: if short { PositionSide::Short } else { PositionSide::Long },
                quantity: pos.abs(),
                entry_price: parse_decimal_opt(&p.avg_px).unwrap_or_default(),
                mark_price: parse_decimal_opt(&p.mark_px),
                unrealized_pnl: parse_decimal_opt(&p.upl).unwrap_or_default(),
                leverage: parse_decimal_opt(&p.lever),
            });
        }
        Ok(positions)
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<AccountBalance>> {
        let raw = self
            .transport
            .signed(Method::GET, "/api/v5/account/balance", "", "")
            .await?;

        let mut balances = Vec::new();
        for account in self.decode::<WireAccount>(raw)? {
            for d in account.details {
                let free = parse_decimal_opt(&d.avail_bal).unwrap_or_default();
                let locked = parse_decimal_opt(&d.frozen_bal).unwrap_or_default();
                let total = parse_decimal_opt(&d.eq).unwrap_or(free + locked);
                balances.push(AccountBalance {
                    asset: d.ccy,
                    free,
                    locked,
                    total,
                });
            }
        }
        Ok(balances)
    }

    async fn get_exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        let query = build_query(&[("instType", INST_TYPE.to_string())]);
        let raw = self.transport.public_get("/api/v5/public/instruments", &query).await?;

        let symbols = self
            .decode::<WireInstrument>(raw)?
            .into_iter()
            .map(|i| {
                let mut parts = i.inst_id.split('-');
                let base = parts.next().unwrap_or_default().to_string();
                let quote = parts.next().unwrap_or_default().to_string();
                Ok(SymbolInfo {
                    symbol: self.from_venue_symbol(&i.inst_id),
                    tick_size: parse_decimal(EX, "tickSz", &i.tick_sz)?,
                    step_size: parse_decimal(EX, "lotSz", &i.lot_sz)?,
                    min_quantity: parse_decimal(EX, "minSz", &i.min_sz)?,
                    min_notional: None,
                    base_asset: base,
                    quote_asset: quote,
                    tradable: i.state == "live",
                    venue_symbol: i.inst_id,
                })
            })
            .collect::<ExchangeResult<Vec<_>>>()?;

        Ok(ExchangeInfo {
            exchange: EX,
            server_time: None,
            symbols,
        })
    }

    async fn ping(&self) -> ExchangeResult<()> {
        self.get_server_time().await.map(|_| ())
    }

    async fn get_server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        let raw = self.transport.public_get("/api/v5/public/time", "").await?;
        self.decode::<WireTime>(raw)?
            .first()
            .and_then(|t| millis_to_datetime(&t.ts))
            .ok_or_else(|| ExchangeError::invalid_response(EX, "missing server time"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> OkxAdapter {
        let credentials = ExchangeCredentials {
            exchange: ExchangeId::Okx,
            api_key: "okxApiKey012345678".into(),
            secret_key: "okxSecretKey0123456789AB".into(),
            testnet: true,
            subaccount: None,
            passphrase: Some("hunter2!".into()),
        };
        let venue = VenueSettings {
            exchange: ExchangeId::Okx,
            timeout_ms: 1000,
            recv_window_ms: 5000,
            base_url: Some(server.uri()),
        };
        OkxAdapter::new(&credentials, &venue).unwrap()
    }

    #[test]
    fn test_symbol_round_trip() {
        for canonical in ["BTCUSDT", "ETHUSDC", "SOLUSD", "1000PEPEUSDT"] {
            let symbol = Symbol::new(canonical);
            let inst = canonical_to_inst_id(&symbol);
            assert!(inst.ends_with("-SWAP"), "{inst}");
            assert_eq!(inst_id_to_canonical(&inst), symbol);
        }
        assert_eq!(canonical_to_inst_id(&Symbol::new("BTCUSDT")), "BTC-USDT-SWAP");
        assert_eq!(canonical_to_inst_id(&Symbol::new("BTCUSD")), "BTC-USD-SWAP");
        assert_eq!(inst_id_to_canonical("ETH-USDT-SWAP"), Symbol::new("ETHUSDT"));
    }

    #[test]
    fn test_error_table() {
        assert_eq!(map_error_code("51008"), Some(ExchangeErrorCode::InsufficientBalance));
        assert_eq!(map_error_code("50113"), Some(ExchangeErrorCode::SignatureInvalid));
        assert_eq!(map_error_code("51603"), Some(ExchangeErrorCode::OrderNotFound));
        assert_eq!(map_error_code("50011"), Some(ExchangeErrorCode::RateLimitExceeded));
        assert_eq!(map_error_code("99999"), None);
    }

    #[tokio::test]
    async fn test_submit_sends_demo_and_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v5/trade/order"))
            .and(header("x-simulated-trading", "1"))
            .and(header_exists("OK-ACCESS-SIGN"))
            .and(header("OK-ACCESS-PASSPHRASE", "hunter2!"))
            .and(body_partial_json(json!({"instId": "BTC-USDT-SWAP", "side": "buy", "ordType": "limit", "px": "50000"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "msg": "",
                "data": [{"ordId": "o-1", "clOrdId": "lbcafe", "sCode": "0", "sMsg": "", "ts": "1700000000000"}]
            })))
            .mount(&server)
            .await;

        let params = SubmitOrderParams::limit(Symbol::new("BTCUSDT"), Side::Buy, dec!(0.1), dec!(50000))
            .with_client_order_id("lbcafe");
        let order = adapter(&server).submit_order(&params).await.unwrap();
        assert_eq!(order.exchange_order_id, "o-1");
        assert_eq!(order.symbol, Symbol::new("BTCUSDT"));
        assert_eq!(order.status, ExchangeOrderStatus::New);
    }

    #[tokio::test]
    async fn test_item_code_wins_over_top_level() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v5/trade/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "1",
                "msg": "All operations failed",
                "data": [{"ordId": "", "clOrdId": "", "sCode": "51008", "sMsg": "Insufficient balance"}]
            })))
            .mount(&server)
            .await;

        let params = SubmitOrderParams::market(Symbol::new("BTCUSDT"), Side::Buy, dec!(1));
        let err = adapter(&server).submit_order(&params).await.unwrap_err();
        assert_eq!(err.code, ExchangeErrorCode::InsufficientBalance);
        assert_eq!(err.original_code.as_deref(), Some("51008"));
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_cancel_completed_order_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v5/trade/cancel-order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "1",
                "msg": "",
                "data": [{"ordId": "o-1", "clOrdId": "", "sCode": "51402", "sMsg": "Order has been completed"}]
            })))
            .mount(&server)
            .await;

        let cancelled = adapter(&server)
            .cancel_order(&Symbol::new("BTCUSDT"), &OrderIdentifier::Exchange("o-1".into()))
            .await
            .unwrap();
        assert!(!cancelled);
    }

    #[tokio::test]
    async fn test_get_unknown_order_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v5/trade/order"))
            .and(query_param("instId", "BTC-USDT-SWAP"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "51603",
                "msg": "Order does not exist",
                "data": []
            })))
            .mount(&server)
            .await;

        let order = adapter(&server)
            .get_order(&Symbol::new("BTCUSDT"), &OrderIdentifier::Client("lbnope".into()))
            .await
            .unwrap();
        assert!(order.is_none());
    }

    #[tokio::test]
    async fn test_positions_respect_net_mode_sign() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v5/account/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "msg": "",
                "data": [
                    {"instId": "BTC-USDT-SWAP", "pos": "-3", "posSide": "net", "avgPx": "50000", "markPx": "49900", "upl": "3", "lever": "5"},
                    {"instId": "ETH-USDT-SWAP", "pos": "0", "posSide": "net", "avgPx": "", "markPx": "3000", "upl": "0", "lever": "5"}
                ]
            })))
            .mount(&server)
            .await;

        let positions = adapter(&server).get_all_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, Symbol::new("BTCUSDT"));
        assert_eq!(positions[0].signed_quantity(), dec!(-3));
    }

    #[tokio::test]
    async fn test_gateway_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v5/public/time"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let err = adapter(&server).get_server_time().await.unwrap_err();
        assert_eq!(err.code, ExchangeErrorCode::ExchangeUnavailable);
        assert!(err.retryable);
    }
}
