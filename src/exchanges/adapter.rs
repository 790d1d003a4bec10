//! Exchange adapter contract
//!
//! One normalized operation set over every supported venue. Bindings hold
//! only their own signer and base URL; nothing is shared between them.
//!
//! Contract:
//! - `cancel_order` returns `Ok(false)` when the venue says the order is
//!   already filled, cancelled or unknown
//! - `get_order` returns `Ok(None)` when the venue does not know the order
//! - every call is bounded by the configured timeout (`TIMEOUT`, retryable);
//!   a timed-out submission has an unknown venue-side outcome
//! - adapters never retry

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::Symbol;
use crate::exchanges::{
    AccountBalance, ExchangeId, ExchangeInfo, ExchangeOrder, ExchangePosition, ExchangeResult,
    OrderIdentifier, SubmitOrderParams, SymbolInfo,
};

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// Canonical `BTCUSDT` to the venue's instrument name.
    fn to_venue_symbol(&self, symbol: &Symbol) -> String;

    /// Inverse of [`to_venue_symbol`](Self::to_venue_symbol).
    fn from_venue_symbol(&self, venue_symbol: &str) -> Symbol;

    async fn submit_order(&self, params: &SubmitOrderParams) -> ExchangeResult<ExchangeOrder>;

    async fn cancel_order(&self, symbol: &Symbol, id: &OrderIdentifier) -> ExchangeResult<bool>;

    async fn get_order(
        &self,
        symbol: &Symbol,
        id: &OrderIdentifier,
    ) -> ExchangeResult<Option<ExchangeOrder>>;

    async fn get_open_orders(&self, symbol: Option<&Symbol>) -> ExchangeResult<Vec<ExchangeOrder>>;

    /// Non-flat positions only.
    async fn get_all_positions(&self) -> ExchangeResult<Vec<ExchangePosition>>;

    async fn get_position(&self, symbol: &Symbol) -> ExchangeResult<Option<ExchangePosition>> {
        Ok(self
            .get_all_positions()
            .await?
            .into_iter()
            .find(|p| &p.symbol == symbol))
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<AccountBalance>>;

    async fn get_balance(&self, asset: &str) -> ExchangeResult<Option<AccountBalance>> {
        Ok(self
            .get_balances()
            .await?
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset)))
    }

    async fn get_exchange_info(&self) -> ExchangeResult<ExchangeInfo>;

    async fn get_symbol_info(&self, symbol: &Symbol) -> ExchangeResult<Option<SymbolInfo>> {
        Ok(self
            .get_exchange_info()
            .await?
            .symbols
            .into_iter()
            .find(|s| &s.symbol == symbol))
    }

    async fn ping(&self) -> ExchangeResult<()>;

    async fn get_server_time(&self) -> ExchangeResult<DateTime<Utc>>;

    /// Server clock minus the local midpoint of the round trip, in ms.
    /// Positive means the venue is ahead of us.
    async fn get_time_drift(&self) -> ExchangeResult<i64> {
        let sent = Utc::now();
        let server = self.get_server_time().await?;
        let received = Utc::now();
        let midpoint = sent + (received - sent) / 2;
        Ok((server - midpoint).num_milliseconds())
    }
}
