//! Order lifecycle manager
//!
//! Thin coordinator over the state machine and the store. Every mutation
//! runs under a per-order async lock: load, validate, apply, persist. Only
//! after the record is durable are the audit trail, alerting and the event
//! channel told about it.

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tracing::{debug, info, warn};

use super::sinks::{AlertSeverity, AlertSink, AuditSink, isolate};
use super::state_machine::{Fill, OrderLifecycleEntry, OrderState};
use super::store::OrderStateStore;
use crate::core::{Error, LiveExecutionIntent, Result, Symbol};

const EVENT_CAPACITY: usize = 256;
const SYSTEM_ACTOR: &str = "system";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Optional data carried by a transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionDetails {
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl TransitionDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exchange_order_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }

    pub fn client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Broadcast after a lifecycle change is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderEvent {
    pub bridge_id: String,
    /// None on creation
    pub from: Option<OrderState>,
    pub to: OrderState,
    pub at: DateTime<Utc>,
}

pub struct OrderLifecycleManager {
    store: OrderStateStore,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    events: broadcast::Sender<OrderEvent>,
    audit: Arc<dyn AuditSink>,
    alerts: Arc<dyn AlertSink>,
}

impl OrderLifecycleManager {
    pub fn new(store: OrderStateStore, audit: Arc<dyn AuditSink>, alerts: Arc<dyn AlertSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            events,
            audit,
            alerts,
        }
    }

    /// Load persisted entries.
    pub async fn init(&self) -> Result<usize> {
        self.store.init().await
    }

    pub fn store(&self) -> &OrderStateStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    /// Persist a new entry in INTENT_CREATED for a gated intent.
    pub async fn create_from_intent(&self, intent: &LiveExecutionIntent) -> Result<OrderLifecycleEntry> {
        let id = intent.bridge_id();
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        if self.store.get(id).await?.is_some() {
            return Err(Error::InvalidState(format!("order {id} already exists")));
        }

        let entry = OrderLifecycleEntry::from_intent(intent, Utc::now());
        self.store.save(&entry).await?;

        info!(
            bridge_id = id,
            source = intent.source_execution_id(),
            symbol = %intent.symbol(),
            side = %intent.side(),
            qty = %intent.quantity(),
            "📋 lifecycle entry created"
        );
        self.record(
            "order.created",
            &entry,
            json!({
                "source_execution_id": entry.source_execution_id(),
                "symbol": entry.symbol(),
                "side": entry.side(),
                "quantity": entry.requested_qty(),
                "price": entry.intent_price(),
            }),
        );
        self.publish(&entry, None);
        Ok(entry)
    }

    /// Move an entry to `new_state`, attaching `details`.
    pub async fn transition(
        &self,
        bridge_id: &str,
        new_state: OrderState,
        details: TransitionDetails,
    ) -> Result<OrderLifecycleEntry> {
        let lock = self.lock_for(bridge_id);
        let _guard = lock.lock().await;

        let mut entry = self.load(bridge_id).await?;
        let from = entry.state();
        entry.apply_transition(new_state, Utc::now())?;

        if let Some(id) = details.exchange_order_id {
            entry.exchange_order_id = Some(id);
        }
        if let Some(id) = details.client_order_id {
            entry.client_order_id = Some(id);
        }
        if let Some(error) = details.error {
            entry.error = Some(error);
        }
        if new_state.is_failure() && entry.error.is_none() {
            entry.error = Some(default_error(new_state).to_string());
        }
        if let Some(patch) = details.metadata {
            entry.merge_metadata(patch);
        }

        self.store.save(&entry).await?;

        debug!(bridge_id, %from, to = %new_state, "order state changed");
        self.record(
            "order.state_changed",
            &entry,
            json!({
                "from": from,
                "to": new_state,
                "exchange_order_id": entry.exchange_order_id(),
                "error": entry.error(),
            }),
        );
        if matches!(new_state, OrderState::Rejected | OrderState::Failed) {
            self.alert_failure(&entry);
        }
        self.publish(&entry, Some(from));
        Ok(entry)
    }

    /// Record a fill. State follows from the cumulative filled quantity.
    pub async fn add_fill(&self, bridge_id: &str, fill: Fill) -> Result<OrderLifecycleEntry> {
        let lock = self.lock_for(bridge_id);
        let _guard = lock.lock().await;

        let mut entry = self.load(bridge_id).await?;
        let from = entry.state();
        let fill_meta = json!({
            "fill_id": &fill.fill_id,
            "quantity": fill.quantity,
            "price": fill.price,
            "fee": fill.fee,
        });
        entry.apply_fill(fill, Utc::now())?;

        self.store.save(&entry).await?;

        info!(
            bridge_id,
            filled = %entry.filled_qty(),
            requested = %entry.requested_qty(),
            state = %entry.state(),
            "💰 fill recorded"
        );
        self.record("order.fill", &entry, fill_meta);
        self.publish(&entry, Some(from));
        Ok(entry)
    }

    /// Attach ids, error or metadata without changing state.
    pub async fn annotate(&self, bridge_id: &str, details: TransitionDetails) -> Result<OrderLifecycleEntry> {
        let lock = self.lock_for(bridge_id);
        let _guard = lock.lock().await;

        let mut entry = self.load(bridge_id).await?;
        if let Some(id) = details.exchange_order_id {
            entry.exchange_order_id = Some(id);
        }
        if let Some(id) = details.client_order_id {
            entry.client_order_id = Some(id);
        }
        if let Some(error) = details.error {
            entry.error = Some(error);
        }
        if let Some(patch) = details.metadata {
            entry.merge_metadata(patch);
        }
        entry.updated_at = Utc::now();
        self.store.save(&entry).await?;

        self.record("order.annotated", &entry, json!({ "metadata": entry.metadata() }));
        Ok(entry)
    }

    pub async fn get(&self, bridge_id: &str) -> Result<Option<OrderLifecycleEntry>> {
        self.store.get(bridge_id).await
    }

    pub fn get_all(&self) -> Vec<OrderLifecycleEntry> {
        self.store.get_all()
    }

    pub fn get_by_state(&self, state: OrderState) -> Vec<OrderLifecycleEntry> {
        self.store.get_by_state(state)
    }

    pub fn get_by_symbol(&self, symbol: &Symbol) -> Vec<OrderLifecycleEntry> {
        self.store.get_by_symbol(symbol)
    }

    /// Non-terminal entries.
    pub fn get_active_orders(&self) -> Vec<OrderLifecycleEntry> {
        self.store
            .get_all()
            .into_iter()
            .filter(|e| !e.is_terminal())
            .collect()
    }

    /// Entries created since local midnight.
    pub fn get_today_orders(&self) -> Vec<OrderLifecycleEntry> {
        self.store.get_by_time_range(local_midnight(Local::now()), Utc::now())
    }

    pub fn get_state_counts(&self) -> BTreeMap<OrderState, usize> {
        self.store.get_state_counts()
    }

    /// Drop terminal entries not updated in `days`.
    pub async fn cleanup(&self, days: Option<u32>) -> Result<usize> {
        let removed = self
            .store
            .cleanup_old_entries(days.unwrap_or(DEFAULT_RETENTION_DAYS))
            .await?;
        let store = &self.store;
        self.locks
            .lock()
            .retain(|id, lock| Arc::strong_count(lock) > 1 || store.contains(id));
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────

    fn lock_for(&self, bridge_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(bridge_id.to_string())
            .or_default()
            .clone()
    }

    async fn load(&self, bridge_id: &str) -> Result<OrderLifecycleEntry> {
        self.store
            .get(bridge_id)
            .await?
            .ok_or_else(|| Error::NotFound(bridge_id.to_string()))
    }

    fn record(&self, action: &str, entry: &OrderLifecycleEntry, metadata: Value) {
        let audit = &self.audit;
        isolate("audit", || {
            audit.emit_audit(SYSTEM_ACTOR, action, "live_order", entry.bridge_id(), &metadata)
        });
    }

    fn alert_failure(&self, entry: &OrderLifecycleEntry) {
        let (alert_type, severity) = match entry.state() {
            OrderState::Rejected => ("live_order_rejected", AlertSeverity::Warning),
            _ => ("live_order_failed", AlertSeverity::Critical),
        };
        let message = format!(
            "{} {} {} {}: {}",
            entry.state(),
            entry.side(),
            entry.requested_qty(),
            entry.symbol(),
            entry.error().unwrap_or("unknown error")
        );
        warn!(bridge_id = entry.bridge_id(), state = %entry.state(), "{message}");

        let alerts = &self.alerts;
        let metadata = json!({
            "bridge_id": entry.bridge_id(),
            "symbol": entry.symbol(),
            "state": entry.state(),
            "error": entry.error(),
        });
        isolate("alert", || alerts.send_alert(alert_type, severity, &message, &metadata));
    }

    fn publish(&self, entry: &OrderLifecycleEntry, from: Option<OrderState>) {
        // No subscribers is fine
        let _ = self.events.send(OrderEvent {
            bridge_id: entry.bridge_id().to_string(),
            from,
            to: entry.state(),
            at: entry.updated_at(),
        });
    }
}

fn default_error(state: OrderState) -> &'static str {
    match state {
        OrderState::Rejected => "rejected by exchange",
        OrderState::Expired => "order expired",
        _ => "order failed",
    }
}

/// Start of the local calendar day containing `now`, in UTC.
pub(crate) fn local_midnight(now: DateTime<Local>) -> DateTime<Utc> {
    let naive = now.date_naive().and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&naive).earliest() {
        Some(midnight) => midnight.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}
