//! Execution bridge - paper execution → live order
//!
//! Sequence per execution, in this order and no other:
//! 1. gate (business authorization, against today's counters)
//! 2. kill switch (emergency override)
//! 3. lifecycle entry, GATE_PASSED, SUBMITTING
//! 4. venue submission
//!
//! Counters are reserved under one lock together with steps 1-2, so two
//! concurrent executions can never both squeeze under a cap.

use chrono::{Local, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::lifecycle::{OrderLifecycleManager, TransitionDetails};
use super::reconcile::{PaperPositionsProvider, PositionReconciler, ReconciliationReport};
use super::state_machine::{Fill, OrderLifecycleEntry, OrderState};
use crate::core::{
    BridgeConfig, BridgeLimitsState, BridgeMode, Error, LiveExecutionIntent, PaperExecutionResult,
    Result,
};
use crate::exchanges::{
    ExchangeAdapter, ExchangeError, ExchangeId, ExchangeOrder, ExchangeOrderStatus, OrderIdentifier,
    SubmitOrderParams,
};
use crate::risk::{
    DenyReason, GateDecision, GateEvaluator, KillSwitchManager, KillSwitchStatus, KillSwitchVerdict,
};

const CLIENT_ID_PREFIX: &str = "lb";
const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_RECV_WINDOW_MS: u64 = 5_000;

/// What happened to one paper execution
#[derive(Debug, Clone)]
pub enum BridgeOutcome {
    /// Gate said no
    Denied(DenyReason),
    /// Gate said yes, kill switch said no
    Killed {
        bridge_id: String,
        verdict: KillSwitchVerdict,
    },
    /// Accepted by the venue (may already be filled)
    Submitted(OrderLifecycleEntry),
    Rejected(OrderLifecycleEntry),
    Failed(OrderLifecycleEntry),
    /// Venue-side outcome unknown and unverifiable; entry stays SUBMITTING
    Unknown(OrderLifecycleEntry),
}

impl BridgeOutcome {
    fn from_entry(entry: OrderLifecycleEntry) -> Self {
        match entry.state() {
            OrderState::Rejected => BridgeOutcome::Rejected(entry),
            OrderState::Failed => BridgeOutcome::Failed(entry),
            OrderState::Submitting => BridgeOutcome::Unknown(entry),
            _ => BridgeOutcome::Submitted(entry),
        }
    }

    pub fn entry(&self) -> Option<&OrderLifecycleEntry> {
        match self {
            BridgeOutcome::Submitted(e)
            | BridgeOutcome::Rejected(e)
            | BridgeOutcome::Failed(e)
            | BridgeOutcome::Unknown(e) => Some(e),
            BridgeOutcome::Denied(_) | BridgeOutcome::Killed { .. } => None,
        }
    }

    pub fn bridge_id(&self) -> Option<&str> {
        match self {
            BridgeOutcome::Killed { bridge_id, .. } => Some(bridge_id),
            other => other.entry().map(|e| e.bridge_id()),
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, BridgeOutcome::Submitted(_))
    }
}

/// Snapshot for operators
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub exchange: ExchangeId,
    pub mode: BridgeMode,
    pub live_enabled: bool,
    pub limits: BridgeLimitsState,
    pub max_orders_per_day: u32,
    pub max_notional_per_day: Decimal,
    pub state_counts: BTreeMap<OrderState, usize>,
    pub active_orders: usize,
    pub kill_switch: KillSwitchStatus,
    pub reconciling: bool,
    pub last_reconciliation: Option<ReconciliationReport>,
}

#[derive(Debug, Clone, Copy)]
struct DailyLimits {
    day: NaiveDate,
    state: BridgeLimitsState,
}

impl DailyLimits {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            state: BridgeLimitsState::default(),
        }
    }

    fn roll(&mut self, today: NaiveDate) {
        if self.day != today {
            info!(
                previous = %self.day,
                orders = self.state.current_order_count,
                notional = %self.state.current_notional_usd,
                "📅 daily limits reset"
            );
            *self = Self::new(today);
        }
    }
}

struct ReconcileTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ExecutionBridge {
    adapter: Arc<dyn ExchangeAdapter>,
    lifecycle: Arc<OrderLifecycleManager>,
    kill_switch: Arc<KillSwitchManager>,
    reconciler: Arc<dyn PositionReconciler>,
    gate: GateEvaluator,
    config: BridgeConfig,
    recv_window_ms: u64,
    reconcile_interval: Duration,
    limits: Mutex<DailyLimits>,
    last_report: Arc<RwLock<Option<ReconciliationReport>>>,
    reconcile_task: Mutex<Option<ReconcileTask>>,
}

impl ExecutionBridge {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        lifecycle: Arc<OrderLifecycleManager>,
        kill_switch: Arc<KillSwitchManager>,
        reconciler: Arc<dyn PositionReconciler>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            adapter,
            lifecycle,
            kill_switch,
            reconciler,
            gate: GateEvaluator::new(),
            config,
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            limits: Mutex::new(DailyLimits::new(Local::now().date_naive())),
            last_report: Arc::new(RwLock::new(None)),
            reconcile_task: Mutex::new(None),
        }
    }

    pub fn with_recv_window_ms(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Load persisted orders, rebuild today's counters and check the venue.
    pub async fn init(&self) -> Result<()> {
        let loaded = self.lifecycle.init().await?;

        let today = self.lifecycle.get_today_orders();
        let mut limits = DailyLimits::new(Local::now().date_naive());
        for entry in &today {
            limits.state.current_order_count += 1;
            limits.state.current_notional_usd = limits
                .state
                .current_notional_usd
                .saturating_add(entry.intent_notional());
        }
        *self.limits.lock() = limits;

        self.adapter.ping().await?;
        match self.adapter.get_time_drift().await {
            Ok(drift_ms) if drift_ms.unsigned_abs() > self.recv_window_ms / 2 => {
                warn!(
                    drift_ms,
                    recv_window_ms = self.recv_window_ms,
                    "⏰ clock drift exceeds half the receive window"
                );
            }
            Ok(drift_ms) => debug!(drift_ms, "clock drift ok"),
            Err(e) => warn!(error = %e, "could not measure clock drift"),
        }

        info!(
            exchange = %self.adapter.exchange(),
            mode = %self.config.mode,
            live_enabled = self.config.live_enabled,
            loaded,
            orders_today = limits.state.current_order_count,
            notional_today = %limits.state.current_notional_usd,
            "🌉 execution bridge ready"
        );
        Ok(())
    }

    pub fn get_config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<OrderLifecycleManager> {
        &self.lifecycle
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitchManager> {
        &self.kill_switch
    }

    /// Today's counters.
    pub fn limits(&self) -> BridgeLimitsState {
        let mut limits = self.limits.lock();
        limits.roll(Local::now().date_naive());
        limits.state
    }

    pub fn get_stats(&self) -> BridgeStats {
        BridgeStats {
            exchange: self.adapter.exchange(),
            mode: self.config.mode,
            live_enabled: self.config.live_enabled,
            limits: self.limits(),
            max_orders_per_day: self.config.max_orders_per_day,
            max_notional_per_day: self.config.max_notional_per_day,
            state_counts: self.lifecycle.get_state_counts(),
            active_orders: self.lifecycle.get_active_orders().len(),
            kill_switch: self.kill_switch.status().as_ref().clone(),
            reconciling: self.reconcile_task.lock().is_some(),
            last_reconciliation: self.last_reconciliation(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution pipeline
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one paper execution through gate, kill switch and submission.
    ///
    /// Denials and venue failures are outcomes. `Err` means the bridge
    /// itself could not record what happened.
    pub async fn process_execution(&self, execution: &PaperExecutionResult) -> Result<BridgeOutcome> {
        let intent = match self.authorize(execution) {
            Ok(intent) => intent,
            Err(outcome) => return Ok(outcome),
        };
        let id = intent.bridge_id().to_string();
        let client_order_id = format!("{CLIENT_ID_PREFIX}{id}");

        self.lifecycle.create_from_intent(&intent).await?;
        self.lifecycle
            .transition(&id, OrderState::GatePassed, TransitionDetails::new())
            .await?;
        self.lifecycle
            .transition(
                &id,
                OrderState::Submitting,
                TransitionDetails::new().client_order_id(&client_order_id),
            )
            .await?;

        let params = SubmitOrderParams::market(intent.symbol().clone(), intent.side(), intent.quantity())
            .with_client_order_id(&client_order_id);

        let entry = match self.adapter.submit_order(&params).await {
            Ok(order) => {
                info!(
                    bridge_id = %id,
                    exchange_order_id = %order.exchange_order_id,
                    status = ?order.status,
                    "🚀 order submitted"
                );
                self.apply_venue_order(&id, &order).await?
            }
            Err(e) if e.outcome_unknown() => {
                self.verify_submission(&intent, &client_order_id, e).await?
            }
            Err(e) => self.record_submit_error(&id, &e).await?,
        };
        Ok(BridgeOutcome::from_entry(entry))
    }

    /// Gate and kill switch, reserving today's budget on success.
    fn authorize(&self, execution: &PaperExecutionResult) -> std::result::Result<LiveExecutionIntent, BridgeOutcome> {
        let now = Utc::now();
        let mut limits = self.limits.lock();
        limits.roll(Local::now().date_naive());

        let intent = match self.gate.evaluate(execution, &self.config, &limits.state, now) {
            GateDecision::Promote(intent) => intent,
            GateDecision::Deny(reason) => {
                info!(
                    execution_id = %execution.execution_id,
                    symbol = %execution.symbol,
                    code = reason.code(),
                    "gate denied: {reason}"
                );
                return Err(BridgeOutcome::Denied(reason));
            }
        };

        let verdict = self.kill_switch.evaluate(&intent);
        if verdict.killed {
            warn!(
                execution_id = %execution.execution_id,
                bridge_id = intent.bridge_id(),
                symbol = %intent.symbol(),
                code = verdict.reason_code.unwrap_or_default(),
                "🛑 blocked by kill switch"
            );
            return Err(BridgeOutcome::Killed {
                bridge_id: intent.bridge_id().to_string(),
                verdict,
            });
        }

        limits.state.current_order_count += 1;
        limits.state.current_notional_usd = limits
            .state
            .current_notional_usd
            .saturating_add(intent.notional());
        Ok(intent)
    }

    /// Look the order up by client id after a submission whose venue-side
    /// outcome is unknown.
    async fn verify_submission(
        &self,
        intent: &LiveExecutionIntent,
        client_order_id: &str,
        cause: ExchangeError,
    ) -> Result<OrderLifecycleEntry> {
        let id = intent.bridge_id();
        warn!(bridge_id = id, code = cause.code.as_str(), error = %cause, "⏱️ submission outcome unknown, verifying");

        let lookup = OrderIdentifier::Client(client_order_id.to_string());
        match self.adapter.get_order(intent.symbol(), &lookup).await {
            Ok(Some(order)) => {
                info!(bridge_id = id, exchange_order_id = %order.exchange_order_id, "order found on venue after submit error");
                self.apply_venue_order(id, &order).await
            }
            Ok(None) => {
                self.lifecycle
                    .transition(
                        id,
                        OrderState::Failed,
                        TransitionDetails::new()
                            .error(format!("{cause}; order not found on venue"))
                            .meta("error_code", cause.code.as_str()),
                    )
                    .await
            }
            Err(verify) => {
                error!(bridge_id = id, error = %verify, "submission outcome unknown");
                self.lifecycle
                    .annotate(
                        id,
                        TransitionDetails::new()
                            .meta("submission_unknown", true)
                            .meta("error_code", cause.code.as_str())
                            .meta("verify_error", verify.to_string()),
                    )
                    .await
            }
        }
    }

    async fn record_submit_error(&self, id: &str, e: &ExchangeError) -> Result<OrderLifecycleEntry> {
        let state = if e.code.is_order_rejection() {
            OrderState::Rejected
        } else {
            OrderState::Failed
        };
        warn!(bridge_id = id, %state, error = %e, retryable = e.retryable, "submission failed");

        let mut details = TransitionDetails::new()
            .error(e.to_string())
            .meta("error_code", e.code.as_str())
            .meta("retryable", e.retryable);
        if let Some(code) = &e.original_code {
            details = details.meta("exchange_code", code.as_str());
        }
        self.lifecycle.transition(id, state, details).await
    }

    /// Fold a venue view of the order into the lifecycle entry.
    async fn apply_venue_order(&self, id: &str, order: &ExchangeOrder) -> Result<OrderLifecycleEntry> {
        let mut entry = self
            .lifecycle
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if entry.state() == OrderState::Submitting {
            let details = TransitionDetails::new().exchange_order_id(&order.exchange_order_id);
            if order.status == ExchangeOrderStatus::Rejected {
                return self
                    .lifecycle
                    .transition(id, OrderState::Rejected, details.error("rejected by exchange"))
                    .await;
            }
            entry = self.lifecycle.transition(id, OrderState::Submitted, details).await?;
        }

        if order.filled_quantity > entry.filled_qty()
            && matches!(entry.state(), OrderState::Submitted | OrderState::PartiallyFilled)
        {
            let delta = order.filled_quantity - entry.filled_qty();
            let fill = Fill::new(delta, incremental_price(&entry, order)).with_id(format!(
                "{}-{}",
                order.exchange_order_id,
                order.filled_quantity.normalize()
            ));
            entry = self.lifecycle.add_fill(id, fill).await?;
        }

        let target = match order.status {
            ExchangeOrderStatus::Cancelled => Some((OrderState::Cancelled, None)),
            ExchangeOrderStatus::Rejected => Some((OrderState::Rejected, Some("rejected by exchange"))),
            ExchangeOrderStatus::Expired => Some((OrderState::Expired, Some("expired on exchange"))),
            _ => None,
        };
        if let Some((state, error)) = target {
            let current = entry.state();
            if current.can_transition_to(state) {
                let mut details = TransitionDetails::new();
                if let Some(error) = error {
                    details = details.error(error);
                }
                entry = self.lifecycle.transition(id, state, details).await?;
            } else if !current.is_terminal() {
                // A partly filled order can only close as CANCELLED
                let status = venue_status_name(order.status);
                warn!(
                    bridge_id = id,
                    %current,
                    venue_status = status,
                    "venue closed order, recording as CANCELLED"
                );
                let details = TransitionDetails::new()
                    .error(format!("{status} on exchange after partial fill"))
                    .meta("venue_status", status);
                entry = self.lifecycle.transition(id, OrderState::Cancelled, details).await?;
            }
        }
        Ok(entry)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Order maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Pull the venue's view of one order and apply it.
    pub async fn sync_order(&self, bridge_id: &str) -> Result<OrderLifecycleEntry> {
        let entry = self.load(bridge_id).await?;
        if entry.is_terminal() {
            return Ok(entry);
        }
        let Some(lookup) = order_identifier(&entry) else {
            debug!(bridge_id, state = %entry.state(), "order never reached the venue");
            return Ok(entry);
        };

        match self.adapter.get_order(entry.symbol(), &lookup).await? {
            Some(order) => self.apply_venue_order(bridge_id, &order).await,
            None if entry.state() == OrderState::Submitting => {
                self.lifecycle
                    .transition(
                        bridge_id,
                        OrderState::Failed,
                        TransitionDetails::new().error("order not found on venue"),
                    )
                    .await
            }
            None => {
                warn!(bridge_id, state = %entry.state(), "venue has no record of order");
                Ok(entry)
            }
        }
    }

    /// After a refused cancel the order must be closed on the venue. If the
    /// venue no longer knows it either, close it locally.
    async fn settle_after_refused_cancel(&self, bridge_id: &str) -> Result<OrderLifecycleEntry> {
        let entry = self.load(bridge_id).await?;
        let Some(lookup) = order_identifier(&entry) else {
            return Ok(entry);
        };
        match self.adapter.get_order(entry.symbol(), &lookup).await? {
            Some(order) => self.apply_venue_order(bridge_id, &order).await,
            None => {
                warn!(bridge_id, state = %entry.state(), "cancel refused and order unknown to venue");
                self.lifecycle
                    .transition(
                        bridge_id,
                        OrderState::Cancelled,
                        TransitionDetails::new()
                            .error("cancel refused and order not found on venue")
                            .meta("venue_missing", true),
                    )
                    .await
            }
        }
    }

    /// Cancel an order locally or on the venue.
    ///
    /// Terminal entries are returned as-is.
    pub async fn cancel_order(&self, bridge_id: &str) -> Result<OrderLifecycleEntry> {
        let entry = self.load(bridge_id).await?;
        match entry.state() {
            s if s.is_terminal() => Ok(entry),
            OrderState::IntentCreated | OrderState::GatePassed => {
                self.lifecycle
                    .transition(bridge_id, OrderState::Cancelled, TransitionDetails::new())
                    .await
            }
            OrderState::Submitting => Err(Error::InvalidState(format!(
                "order {bridge_id} has a submission in flight"
            ))),
            _ => {
                let Some(lookup) = order_identifier(&entry) else {
                    return Err(Error::InvalidState(format!("order {bridge_id} has no venue id")));
                };
                if self.adapter.cancel_order(entry.symbol(), &lookup).await? {
                    info!(bridge_id, "❌ order cancelled");
                    self.lifecycle
                        .transition(bridge_id, OrderState::Cancelled, TransitionDetails::new())
                        .await
                } else {
                    // Venue already finished with it
                    self.settle_after_refused_cancel(bridge_id).await
                }
            }
        }
    }

    async fn load(&self, bridge_id: &str) -> Result<OrderLifecycleEntry> {
        self.lifecycle
            .get(bridge_id)
            .await?
            .ok_or_else(|| Error::NotFound(bridge_id.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    /// Start periodic reconciliation. Returns false if already running.
    pub fn start_reconciliation(&self, provider: Arc<dyn PaperPositionsProvider>) -> bool {
        let mut task = self.reconcile_task.lock();
        if task.is_some() {
            return false;
        }

        let (stop, mut stop_rx) = watch::channel(false);
        let adapter = self.adapter.clone();
        let reconciler = self.reconciler.clone();
        let last = self.last_report.clone();
        let period = self.reconcile_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = reconcile_once(&*adapter, &*reconciler, &*provider, &last).await {
                            warn!(error = %e, "reconciliation failed");
                        }
                    }
                }
            }
            debug!("reconciliation loop exited");
        });

        info!(interval_secs = period.as_secs(), "🔄 reconciliation started");
        *task = Some(ReconcileTask { stop, handle });
        true
    }

    /// Stop periodic reconciliation and wait for the loop to exit.
    pub async fn stop_reconciliation(&self) -> bool {
        let Some(task) = self.reconcile_task.lock().take() else {
            return false;
        };
        let _ = task.stop.send(true);
        if let Err(e) = task.handle.await {
            warn!(error = %e, "reconciliation task ended abnormally");
        }
        info!("reconciliation stopped");
        true
    }

    /// One reconciliation pass outside the schedule.
    pub async fn reconcile_now(&self, provider: &dyn PaperPositionsProvider) -> anyhow::Result<ReconciliationReport> {
        reconcile_once(&*self.adapter, &*self.reconciler, provider, &self.last_report).await
    }

    pub fn last_reconciliation(&self) -> Option<ReconciliationReport> {
        self.last_report.read().clone()
    }
}

impl Drop for ExecutionBridge {
    fn drop(&mut self) {
        if let Some(task) = self.reconcile_task.get_mut().take() {
            let _ = task.stop.send(true);
            task.handle.abort();
        }
    }
}

async fn reconcile_once(
    adapter: &dyn ExchangeAdapter,
    reconciler: &dyn PositionReconciler,
    provider: &dyn PaperPositionsProvider,
    last: &RwLock<Option<ReconciliationReport>>,
) -> anyhow::Result<ReconciliationReport> {
    let exchange = adapter.get_all_positions().await?;
    let paper = provider.paper_positions().await?;
    let report = reconciler.reconcile(&exchange, &paper).await?;

    if report.is_clean() {
        debug!(symbols = report.symbols_checked, "positions reconciled");
    } else {
        for drift in &report.drifts {
            warn!(
                symbol = %drift.symbol,
                exchange_qty = %drift.exchange_qty,
                paper_qty = %drift.paper_qty,
                "⚠️ position drift"
            );
        }
        for issue in &report.issues {
            warn!(issue = %issue, "reconciliation issue");
        }
    }

    *last.write() = Some(report.clone());
    Ok(report)
}

fn venue_status_name(status: ExchangeOrderStatus) -> &'static str {
    match status {
        ExchangeOrderStatus::New => "NEW",
        ExchangeOrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
        ExchangeOrderStatus::Filled => "FILLED",
        ExchangeOrderStatus::Cancelled => "CANCELLED",
        ExchangeOrderStatus::Rejected => "REJECTED",
        ExchangeOrderStatus::Expired => "EXPIRED",
    }
}

fn order_identifier(entry: &OrderLifecycleEntry) -> Option<OrderIdentifier> {
    entry
        .exchange_order_id()
        .map(|id| OrderIdentifier::Exchange(id.to_string()))
        .or_else(|| {
            entry
                .client_order_id()
                .map(|id| OrderIdentifier::Client(id.to_string()))
        })
}

/// Price of the fills the venue reports beyond what is already recorded.
fn incremental_price(entry: &OrderLifecycleEntry, order: &ExchangeOrder) -> Decimal {
    let venue_avg = order
        .avg_fill_price
        .or(order.price)
        .filter(|p| *p > Decimal::ZERO)
        .unwrap_or_else(|| entry.intent_price());
    let delta = order.filled_quantity.saturating_sub(entry.filled_qty());
    if delta <= Decimal::ZERO {
        return venue_avg;
    }
    let price = entry
        .filled_qty()
        .checked_mul(entry.avg_fill_price().unwrap_or_default())
        .and_then(|known| {
            order
                .filled_quantity
                .checked_mul(venue_avg)
                .and_then(|total| total.checked_sub(known))
        })
        .and_then(|rest| rest.checked_div(delta));
    match price {
        Some(price) if price > Decimal::ZERO => price,
        _ => venue_avg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Side, Symbol};
    use crate::exchanges::OrderType;
    use rust_decimal_macros::dec;

    fn venue_order(filled: Decimal, avg: Option<Decimal>) -> ExchangeOrder {
        ExchangeOrder {
            exchange_order_id: "42".into(),
            client_order_id: None,
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            order_type: OrderType::Market,
            status: ExchangeOrderStatus::PartiallyFilled,
            quantity: dec!(1),
            filled_quantity: filled,
            price: None,
            avg_fill_price: avg,
            created_at: None,
            updated_at: None,
        }
    }

    fn entry() -> OrderLifecycleEntry {
        let intent = LiveExecutionIntent::new(
            "abc".into(),
            "exec".into(),
            Symbol::new("BTCUSDT"),
            Side::Buy,
            dec!(1),
            dec!(100),
            Utc::now(),
        );
        let mut e = OrderLifecycleEntry::from_intent(&intent, Utc::now());
        e.state = OrderState::Submitted;
        e
    }

    #[test]
    fn test_incremental_price_backs_out_known_fills() {
        let mut e = entry();
        e.apply_fill(Fill::new(dec!(0.4), dec!(100)), Utc::now()).unwrap();
        let price = incremental_price(&e, &venue_order(dec!(1.0), Some(dec!(106))));
        assert_eq!(price, dec!(110));
    }

    #[test]
    fn test_incremental_price_falls_back_to_intent_price() {
        let e = entry();
        assert_eq!(incremental_price(&e, &venue_order(dec!(0.5), None)), dec!(100));
    }

    #[test]
    fn test_incremental_price_survives_extreme_venue_prices() {
        let mut e = entry();
        e.apply_fill(Fill::new(dec!(0.4), dec!(100)), Utc::now()).unwrap();
        let price = incremental_price(&e, &venue_order(dec!(3), Some(Decimal::MAX)));
        assert_eq!(price, Decimal::MAX);
    }

    #[test]
    fn test_daily_limits_roll_over() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mut limits = DailyLimits::new(day);
        limits.state.current_order_count = 5;
        limits.roll(day);
        assert_eq!(limits.state.current_order_count, 5);
        limits.roll(day.succ_opt().unwrap());
        assert_eq!(limits.state, BridgeLimitsState::default());
    }

    #[test]
    fn test_order_identifier_prefers_exchange_id() {
        let mut e = entry();
        assert!(order_identifier(&e).is_none());
        e.client_order_id = Some("lbabc".into());
        assert_eq!(order_identifier(&e), Some(OrderIdentifier::Client("lbabc".into())));
        e.exchange_order_id = Some("42".into());
        assert_eq!(order_identifier(&e), Some(OrderIdentifier::Exchange("42".into())));
    }
}
