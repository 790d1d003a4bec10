//! Shared fixtures: a scripted venue and recording sinks

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use aleph_bridge::core::{
    BridgeConfig, BridgeMode, PaperExecutionResult, PaperExecutionStatus, PaperPosition, Side,
    Symbol, TradeMode,
};
use aleph_bridge::exchanges::{
    AccountBalance, ExchangeAdapter, ExchangeError, ExchangeErrorCode, ExchangeId, ExchangeInfo,
    ExchangeOrder, ExchangeOrderStatus, ExchangePosition, ExchangeResult, OrderIdentifier,
    OrderType, SubmitOrderParams,
};
use aleph_bridge::execution::{
    AlertSeverity, AlertSink, AuditSink, ExecutionBridge, NetQuantityReconciler,
    OrderLifecycleManager, OrderStateStore, PaperPositionsProvider,
};
use aleph_bridge::risk::KillSwitchManager;

/// Venue double. Each call pops the next scripted reply; an empty script
/// falls back to a benign default.
#[derive(Default)]
pub struct FakeAdapter {
    pub submit_replies: Mutex<VecDeque<ExchangeResult<ExchangeOrder>>>,
    pub get_replies: Mutex<VecDeque<ExchangeResult<Option<ExchangeOrder>>>>,
    pub cancel_replies: Mutex<VecDeque<ExchangeResult<bool>>>,
    pub positions: Mutex<Vec<ExchangePosition>>,
    pub submitted: Mutex<Vec<SubmitOrderParams>>,
    pub lookups: Mutex<Vec<OrderIdentifier>>,
    pub drift_ms: i64,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_submit(&self, reply: ExchangeResult<ExchangeOrder>) {
        self.submit_replies.lock().push_back(reply);
    }

    pub fn push_get(&self, reply: ExchangeResult<Option<ExchangeOrder>>) {
        self.get_replies.lock().push_back(reply);
    }

    pub fn push_cancel(&self, reply: ExchangeResult<bool>) {
        self.cancel_replies.lock().push_back(reply);
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().len()
    }
}

#[async_trait]
impl ExchangeAdapter for FakeAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    fn to_venue_symbol(&self, symbol: &Symbol) -> String {
        symbol.as_str().to_string()
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Symbol {
        Symbol::new(venue_symbol)
    }

    async fn submit_order(&self, params: &SubmitOrderParams) -> ExchangeResult<ExchangeOrder> {
        self.submitted.lock().push(params.clone());
        let scripted = self.submit_replies.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(venue_order(
                "1001",
                params.client_order_id.as_deref(),
                ExchangeOrderStatus::New,
                params.quantity,
                Decimal::ZERO,
                None,
            ))
        })
    }

    async fn cancel_order(&self, _symbol: &Symbol, id: &OrderIdentifier) -> ExchangeResult<bool> {
        self.lookups.lock().push(id.clone());
        let scripted = self.cancel_replies.lock().pop_front();
        scripted.unwrap_or(Ok(true))
    }

    async fn get_order(
        &self,
        _symbol: &Symbol,
        id: &OrderIdentifier,
    ) -> ExchangeResult<Option<ExchangeOrder>> {
        self.lookups.lock().push(id.clone());
        let scripted = self.get_replies.lock().pop_front();
        scripted.unwrap_or(Ok(None))
    }

    async fn get_open_orders(&self, _symbol: Option<&Symbol>) -> ExchangeResult<Vec<ExchangeOrder>> {
        Ok(Vec::new())
    }

    async fn get_all_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        Ok(self.positions.lock().clone())
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<AccountBalance>> {
        Ok(Vec::new())
    }

    async fn get_exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        Ok(ExchangeInfo {
            exchange: ExchangeId::Binance,
            server_time: None,
            symbols: Vec::new(),
        })
    }

    async fn ping(&self) -> ExchangeResult<()> {
        Ok(())
    }

    async fn get_server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        Ok(Utc::now() + chrono::Duration::milliseconds(self.drift_ms))
    }
}

pub fn venue_order(
    id: &str,
    client_id: Option<&str>,
    status: ExchangeOrderStatus,
    quantity: Decimal,
    filled: Decimal,
    avg: Option<Decimal>,
) -> ExchangeOrder {
    ExchangeOrder {
        exchange_order_id: id.to_string(),
        client_order_id: client_id.map(str::to_string),
        symbol: Symbol::new("BTCUSDT"),
        side: Side::Buy,
        order_type: OrderType::Market,
        status,
        quantity,
        filled_quantity: filled,
        price: None,
        avg_fill_price: avg,
        created_at: Some(Utc::now()),
        updated_at: Some(Utc::now()),
    }
}

pub fn venue_error(code: ExchangeErrorCode, message: &str) -> ExchangeError {
    ExchangeError::new(ExchangeId::Binance, code, message)
}

pub fn execution(id: &str, symbol: &str, quantity: Decimal, price: Decimal) -> PaperExecutionResult {
    PaperExecutionResult {
        execution_id: id.to_string(),
        intent_id: format!("intent-{id}"),
        symbol: Symbol::new(symbol),
        side: Side::Buy,
        requested_quantity: quantity,
        filled_quantity: quantity,
        fill_price: price,
        slippage_bps: Decimal::ZERO,
        latency_ms: 12,
        status: PaperExecutionStatus::Filled,
        mode: TradeMode::Paper,
        executed_at: Utc::now(),
    }
}

pub fn canary_config(symbols: &[&str], max_orders: u32, max_notional: Decimal) -> BridgeConfig {
    BridgeConfig {
        live_enabled: true,
        allowed_symbols: symbols.iter().copied().map(Symbol::new).collect::<BTreeSet<_>>(),
        max_orders_per_day: max_orders,
        max_notional_per_day: max_notional,
        mode: BridgeMode::Canary,
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub audits: Mutex<Vec<(String, String)>>,
    pub alerts: Mutex<Vec<(String, AlertSeverity, String)>>,
}

impl AuditSink for RecordingSink {
    fn emit_audit(
        &self,
        _actor: &str,
        action: &str,
        _target_type: &str,
        target_id: &str,
        _metadata: &Value,
    ) -> anyhow::Result<()> {
        self.audits.lock().push((action.to_string(), target_id.to_string()));
        Ok(())
    }
}

impl AlertSink for RecordingSink {
    fn send_alert(
        &self,
        alert_type: &str,
        severity: AlertSeverity,
        message: &str,
        _metadata: &Value,
    ) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .push((alert_type.to_string(), severity, message.to_string()));
        Ok(())
    }
}

pub struct StaticPaper(pub Vec<PaperPosition>);

#[async_trait]
impl PaperPositionsProvider for StaticPaper {
    async fn paper_positions(&self) -> anyhow::Result<Vec<PaperPosition>> {
        Ok(self.0.clone())
    }
}

/// Everything a bridge test needs to poke at.
pub struct Harness {
    pub bridge: Arc<ExecutionBridge>,
    pub adapter: Arc<FakeAdapter>,
    pub kill_switch: Arc<KillSwitchManager>,
    pub sink: Arc<RecordingSink>,
}

pub fn harness_with(dir: &Path, config: BridgeConfig, adapter: Arc<FakeAdapter>) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let kill_switch = Arc::new(KillSwitchManager::new());
    let lifecycle = Arc::new(OrderLifecycleManager::new(
        OrderStateStore::new(dir),
        sink.clone(),
        sink.clone(),
    ));
    let bridge = ExecutionBridge::new(
        adapter.clone(),
        lifecycle,
        kill_switch.clone(),
        Arc::new(NetQuantityReconciler::default()),
        config,
    );
    Harness {
        bridge: Arc::new(bridge),
        adapter,
        kill_switch,
        sink,
    }
}

pub async fn harness(dir: &Path, config: BridgeConfig) -> Harness {
    let h = harness_with(dir, config, FakeAdapter::new());
    h.bridge.init().await.unwrap();
    h
}
