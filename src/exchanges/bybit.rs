//! Bybit v5 binding (linear USDT perpetuals)
//!
//! Bybit answers HTTP 200 for most business errors; the verdict lives in
//! `retCode` of the response envelope.

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
use crate::exchanges::signer::BybitSigner;
use crate::exchanges::transport::{RawResponse, RestTransport, build_query};
use crate::exchanges::types::{millis_to_datetime, parse_decimal, parse_decimal_opt};
use crate::exchanges::{
    AccountBalance, ExchangeAdapter, ExchangeCredentials, ExchangeError, ExchangeErrorCode,
    ExchangeId, ExchangeInfo, ExchangeOrder, ExchangeOrderStatus, ExchangePosition, ExchangeResult,
    OrderIdentifier, OrderType, PositionSide, SubmitOrderParams, SymbolInfo, TimeInForce,
};

const LIVE_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const CATEGORY: &str = "linear";
const SETTLE_COIN: &str = "USDT";

const EX: ExchangeId = ExchangeId::Bybit;

/// Bybit retCode → shared taxonomy
pub fn map_error_code(code: i64) -> Option<ExchangeErrorCode> {
    use ExchangeErrorCode::*;
    Some(match code {
        10003 | 10005 | 10007 | 33004 => AuthFailed,
        10004 => SignatureInvalid,
        10006 | 10018 => RateLimitExceeded,
        10002 => TimestampOutsideRecvWindow,
        10000 | 10016 => ExchangeUnavailable,
        110001 | 170213 => OrderNotFound,
        110004 | 110007 | 110012 | 170131 => InsufficientBalance,
        110044 | 110045 => InsufficientMargin,
        110090 => PositionLimitExceeded,
        110003 => InvalidPrice,
        110094 | 170136 => InvalidQuantity,
        10001 | 110017 => OrderRejected,
        _ => return None,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrderAck {
    order_id: String,
    #[serde(default)]
    order_link_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrder {
    order_id: String,
    #[serde(default)]
    order_link_id: String,
    symbol: String,
    side: String,
    order_type: String,
    #[serde(default)]
    price: String,
    qty: String,
    #[serde(default)]
    cum_exec_qty: String,
    #[serde(default)]
    avg_price: String,
    order_status: String,
    #[serde(default)]
    created_time: String,
    #[serde(default)]
    updated_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePosition {
    symbol: String,
    #[serde(default)]
    side: String,
    size: String,
    #[serde(default)]
    avg_price: String,
    #[serde(default)]
    mark_price: String,
    #[serde(default)]
    unrealised_pnl: String,
    #[serde(default)]
    leverage: String,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    #[serde(default)]
    coin: Vec<WireCoin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCoin {
    coin: String,
    wallet_balance: String,
    #[serde(default)]
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInstrument {
    symbol: String,
    status: String,
    base_coin: String,
    quote_coin: String,
    price_filter: WirePriceFilter,
    lot_size_filter: WireLotSizeFilter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePriceFilter {
    tick_size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLotSizeFilter {
    qty_step: String,
    min_order_qty: String,
    #[serde(default)]
    min_notional_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTime {
    time_nano: String,
}

/// Decoded `result` plus the envelope's server timestamp
struct Reply<T> {
    result: T,
    time: Option<DateTime<Utc>>,
}

pub struct BybitAdapter {
    transport: RestTransport,
}

impl BybitAdapter {
    pub fn new(credentials: &ExchangeCredentials, venue: &VenueSettings) -> ExchangeResult<Self> {
        let default_url = if credentials.testnet { TESTNET_URL } else { LIVE_URL };
        let base_url = venue.base_url.clone().unwrap_or_else(|| default_url.to_string());
        let signer = BybitSigner::new(
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
            "🔗 Bybit linear adapter ({}) key={}",
            transport.base_url(),
            credentials.masked_key()
        );
        Ok(Self { transport })
    }

    /// Unwrap the envelope: non-2xx or non-zero retCode become mapped errors.
    fn decode<T: DeserializeOwned>(&self, raw: RawResponse) -> ExchangeResult<Reply<T>> {
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

        if envelope.ret_code != 0 || !raw.is_success() {
            return Err(ExchangeError::from_venue(
                EX,
                raw.status,
                Some(envelope.ret_code.to_string()),
                Some(envelope.ret_msg),
                map_error_code(envelope.ret_code).or_else(|| code_for_status(raw.status)),
            ));
        }

        let result = serde_json::from_value(envelope.result)
            .map_err(|e| ExchangeError::invalid_response(EX, format!("bad result payload: {e}")))?;
        Ok(Reply {
            result,
            time: envelope.time.and_then(DateTime::from_timestamp_millis),
        })
    }

    fn order_from_wire(&self, wire: WireOrder) -> ExchangeResult<ExchangeOrder> {
        let status = match wire.order_status.as_str() {
            "Created" | "New" | "Untriggered" | "Triggered" => ExchangeOrderStatus::New,
            "PartiallyFilled" => ExchangeOrderStatus::PartiallyFilled,
            "Filled" => ExchangeOrderStatus::Filled,
            "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => ExchangeOrderStatus::Cancelled,
            "Rejected" => ExchangeOrderStatus::Rejected,
            other => {
                return Err(ExchangeError::invalid_response(
                    EX,
                    format!("unknown order status '{other}'"),
                ));
            }
        };

        Ok(ExchangeOrder {
            exchange_order_id: wire.order_id,
            client_order_id: Some(wire.order_link_id).filter(|c| !c.is_empty()),
            symbol: self.from_venue_symbol(&wire.symbol),
            side: parse_side(&wire.side)?,
            order_type: if wire.order_type == "Market" { OrderType::Market } else { OrderType::Limit },
            status,
            quantity: parse_decimal(EX, "qty", &wire.qty)?,
            filled_quantity: parse_decimal_opt(&wire.cum_exec_qty).unwrap_or_default(),
            price: parse_decimal_opt(&wire.price),
            avg_fill_price: parse_decimal_opt(&wire.avg_price),
            created_at: millis_to_datetime(&wire.created_time),
            updated_at: millis_to_datetime(&wire.updated_time),
        })
    }

    fn id_field(id: &OrderIdentifier) -> (&'static str, String) {
        match id {
            OrderIdentifier::Exchange(id) => ("orderId", id.clone()),
            OrderIdentifier::Client(id) => ("orderLinkId", id.clone()),
        }
    }

    async fn query_orders(&self, path: &str, query: &str) -> ExchangeResult<Vec<ExchangeOrder>> {
        let raw = self.transport.signed(Method::GET, path, query, "").await?;
        let reply: Reply<List<WireOrder>> = self.decode(raw)?;
        reply
            .result
            .list
            .into_iter()
            .map(|w| self.order_from_wire(w))
            .collect()
    }
}

fn parse_side(raw: &str) -> ExchangeResult<Side> {
    match raw {
        "Buy" => Ok(Side::Buy),
        "Sell" => Ok(Side::Sell),
        other => Err(ExchangeError::invalid_response(EX, format!("unknown side '{other}'"))),
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
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
        let mut body = Map::new();
        body.insert("category".into(), json!(CATEGORY));
        body.insert("symbol".into(), json!(self.to_venue_symbol(&params.symbol)));
        body.insert(
            "side".into(),
            json!(match params.side {
                Side::Buy => "Buy",
                Side::Sell => "Sell",
            }),
        );
        body.insert(
            "orderType".into(),
            json!(match params.order_type {
                OrderType::Market => "Market",
                OrderType::Limit => "Limit",
            }),
        );
        body.insert("qty".into(), json!(params.quantity.normalize().to_string()));
        if let Some(price) = params.price.filter(|_| params.order_type == OrderType::Limit) {
            body.insert("price".into(), json!(price.normalize().to_string()));
            let tif = match params.time_in_force.unwrap_or(TimeInForce::Gtc) {
                TimeInForce::Gtc => "GTC",
                TimeInForce::Ioc => "IOC",
                TimeInForce::Fok => "FOK",
            };
            body.insert("timeInForce".into(), json!(tif));
        }
        if let Some(client_id) = &params.client_order_id {
            body.insert("orderLinkId".into(), json!(client_id));
        }
        if params.reduce_only {
            body.insert("reduceOnly".into(), json!(true));
        }

        let body = Value::Object(body).to_string();
        let raw = self.transport.signed(Method::POST, "/v5/order/create", "", &body).await?;
        let reply: Reply<WireOrderAck> = self.decode(raw)?;
        debug!(order_id = %reply.result.order_id, "bybit order accepted");

        // The create endpoint only acknowledges; state comes from get_order.
        Ok(ExchangeOrder {
            exchange_order_id: reply.result.order_id,
            client_order_id: Some(reply.result.order_link_id)
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
            created_at: reply.time,
            updated_at: reply.time,
        })
    }

    async fn cancel_order(&self, symbol: &Symbol, id: &OrderIdentifier) -> ExchangeResult<bool> {
        let (field, value) = Self::id_field(id);
        let mut body = Map::new();
        body.insert("category".into(), json!(CATEGORY));
        body.insert("symbol".into(), json!(self.to_venue_symbol(symbol)));
        body.insert(field.into(), json!(value));
        let body = Value::Object(body).to_string();

        let raw = self.transport.signed(Method::POST, "/v5/order/cancel", "", &body).await?;
        match self.decode::<Value>(raw) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(?id, "bybit cancel: order already terminal or unknown");
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
        let query = build_query(&[
            ("category", CATEGORY.to_string()),
            ("symbol", self.to_venue_symbol(symbol)),
            Self::id_field(id),
        ]);

        // Realtime covers open and recently closed orders; older ones live in history.
        for path in ["/v5/order/realtime", "/v5/order/history"] {
            match self.query_orders(path, &query).await {
                Ok(orders) => {
                    if let Some(order) = orders.into_iter().next() {
                        return Ok(Some(order));
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn get_open_orders(&self, symbol: Option<&Symbol>) -> ExchangeResult<Vec<ExchangeOrder>> {
        let mut params = vec![("category", CATEGORY.to_string())];
        match symbol {
            Some(s) => params.push(("symbol", self.to_venue_symbol(s))),
            None => params.push(("settleCoin", SETTLE_COIN.to_string())),
        }
        let orders = self.query_orders("/v5/order/realtime", &build_query(&params)).await?;
        Ok(orders.into_iter().filter(|o| !o.status.is_terminal()).collect())
    }

    async fn get_all_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        let query = build_query(&[
            ("category", CATEGORY.to_string()),
            ("settleCoin", SETTLE_COIN.to_string()),
        ]);
        let raw = self.transport.signed(Method::GET, "/v5/position/list", &query, "").await?;
        let reply: Reply<List<WirePosition>> = self.decode(raw)?;

        let mut positions = Vec::new();
        for p in reply.result.list {
            let size = parse_decimal(EX, "size", &p.size)?;
            if size.is_zero() {
                continue;
            }
            positions.push(ExchangePosition {
                symbol: self.from_venue_symbol(&p.symbol),
                side: if p.side == "Sell" { PositionSide::Short } else { PositionSide::Long },
                quantity: size.abs(),
                entry_price: parse_decimal_opt(&p.avg_price).unwrap_or_default(),
                mark_price: parse_decimal_opt(&p.mark_price),
                unrealized_pnl: parse_decimal_opt(&p.unrealised_pnl).unwrap_or_default(),
                leverage: parse_decimal_opt(&p.leverage),
            });
        }
        Ok(positions)
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<AccountBalance>> {
        let query = build_query(&[("accountType", "UNIFIED".to_string())]);
        let raw = self
            .transport
            .signed(Method::GET, "/v5/account/wallet-balance", &query, "")
            .await?;
        let reply: Reply<List<WireAccount>> = self.decode(raw)?;

        let mut balances = Vec::new();
        for account in reply.result.list {
            for c in account.coin {
                let total = parse_decimal(EX, "walletBalance", &c.wallet_balance)?;
                let locked = parse_decimal_opt(&c.locked).unwrap_or_default();
                balances.push(AccountBalance {
                    asset: c.coin,
                    free: (total - locked).max(Decimal::ZERO),
                    locked,
                    total,
                });
            }
        }
        Ok(balances)
    }

    async fn get_exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        let query = build_query(&[("category", CATEGORY.to_string())]);
        let raw = self
            .transport
            .public_get("/v5/market/instruments-info", &query)
            .await?;
        let reply: Reply<List<WireInstrument>> = self.decode(raw)?;

        let symbols = reply
            .result
            .list
            .into_iter()
            .map(|i| {
                Ok(SymbolInfo {
                    symbol: self.from_venue_symbol(&i.symbol),
                    tick_size: parse_decimal(EX, "tickSize", &i.price_filter.tick_size)?,
                    step_size: parse_decimal(EX, "qtyStep", &i.lot_size_filter.qty_step)?,
                    min_quantity: parse_decimal(EX, "minOrderQty", &i.lot_size_filter.min_order_qty)?,
                    min_notional: i.lot_size_filter.min_notional_value.as_deref().and_then(parse_decimal_opt),
                    venue_symbol: i.symbol,
                    base_asset: i.base_coin,
                    quote_asset: i.quote_coin,
                    tradable: i.status == "Trading",
                })
            })
            .collect::<ExchangeResult<Vec<_>>>()?;

        Ok(ExchangeInfo {
            exchange: EX,
            server_time: reply.time,
            symbols,
        })
    }

    async fn ping(&self) -> ExchangeResult<()> {
        self.get_server_time().await.map(|_| ())
    }

    async fn get_server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        let raw = self.transport.public_get("/v5/market/time", "").await?;
        let reply: Reply<WireTime> = self.decode(raw)?;
        let nanos: i64 = reply
            .result
            .time_nano
            .parse()
            .map_err(|_| ExchangeError::invalid_response(EX, "timeNano is not an integer"))?;
        Ok(DateTime::from_timestamp_nanos(nanos))
    }
}
