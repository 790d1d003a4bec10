//! Kill switch - runtime emergency authority over every promotion
//!
//! Mutations are serialized through one writer lock and publish a fresh
//! immutable snapshot; readers only clone the current `Arc`. State lives in
//! memory only and is rebuilt from configured defaults at startup.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::{KillSwitchDefaults, LiveExecutionIntent, Symbol};
use crate::execution::sinks::{AuditSink, isolate};

/// Invoked synchronously when a global kill is activated
pub type RunStopCallback = Arc<dyn Fn(&KillSwitchStatus) -> anyhow::Result<()> + Send + Sync>;

/// Notified after every state change
pub type KillSwitchListener = Arc<dyn Fn(&KillSwitchEvent) + Send + Sync>;

pub const GLOBAL_KILL: &str = "GLOBAL_KILL";
pub const SYMBOL_KILL: &str = "SYMBOL_KILL";

/// Committed kill-switch state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchStatus {
    pub global_kill: bool,
    pub symbol_kill: BTreeSet<Symbol>,
    pub reason: Option<String>,
    pub activated_by: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl KillSwitchStatus {
    pub fn is_active(&self) -> bool {
        self.global_kill || !self.symbol_kill.is_empty()
    }

    fn clear_activation(&mut self) {
        self.reason = None;
        self.activated_by = None;
        self.activated_at = None;
    }
}

/// Result of checking an intent against the kill switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillSwitchVerdict {
    pub killed: bool,
    pub reason_code: Option<&'static str>,
    pub reason: Option<String>,
}

impl KillSwitchVerdict {
    fn clear() -> Self {
        Self {
            killed: false,
            reason_code: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillSwitchAction {
    ActivateGlobal,
    ActivateSymbols(Vec<Symbol>),
    DeactivateGlobal,
    DeactivateSymbols(Vec<Symbol>),
    DeactivateAll,
    EmergencyStop,
}

impl KillSwitchAction {
    /// Audit action name
    pub fn audit_name(&self) -> &'static str {
        match self {
            KillSwitchAction::ActivateGlobal => "kill_switch.activate_global",
            KillSwitchAction::ActivateSymbols(_) => "kill_switch.activate_symbols",
            KillSwitchAction::DeactivateGlobal => "kill_switch.deactivate_global",
            KillSwitchAction::DeactivateSymbols(_) => "kill_switch.deactivate_symbols",
            KillSwitchAction::DeactivateAll => "kill_switch.deactivate_all",
            KillSwitchAction::EmergencyStop => "kill_switch.emergency_stop",
        }
    }
}

/// Delivered to listeners after a committed change
#[derive(Debug, Clone)]
pub struct KillSwitchEvent {
    pub action: KillSwitchAction,
    pub actor: String,
    pub status: Arc<KillSwitchStatus>,
}

pub struct KillSwitchManager {
    /// Serializes mutators
    writer: Mutex<()>,
    snapshot: RwLock<Arc<KillSwitchStatus>>,
    run_stops: Mutex<Vec<(String, RunStopCallback)>>,
    listeners: Mutex<Vec<KillSwitchListener>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Default for KillSwitchManager {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitchManager {
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(KillSwitchStatus::default())),
            run_stops: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            audit: None,
        }
    }

    /// Initial state from configuration. No callbacks exist yet, so nothing
    /// is run.
    pub fn from_defaults(defaults: &KillSwitchDefaults) -> Self {
        let manager = Self::new();
        if defaults.global || !defaults.symbols.is_empty() {
            let reason = defaults
                .reason
                .clone()
                .unwrap_or_else(|| "configured at startup".to_string());
            let status = KillSwitchStatus {
                global_kill: defaults.global,
                symbol_kill: defaults.symbols.clone(),
                reason: Some(reason),
                activated_by: Some("config".to_string()),
                activated_at: Some(Utc::now()),
            };
            warn!(
                global = status.global_kill,
                symbols = ?status.symbol_kill,
                "🛑 Kill switch active from configuration"
            );
            *manager.snapshot.write() = Arc::new(status);
        }
        manager
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Current committed state
    pub fn status(&self) -> Arc<KillSwitchStatus> {
        self.snapshot.read().clone()
    }

    pub fn is_global_kill(&self) -> bool {
        self.snapshot.read().global_kill
    }

    pub fn register_run_stop(&self, name: impl Into<String>, callback: RunStopCallback) {
        self.run_stops.lock().push((name.into(), callback));
    }

    pub fn add_listener(&self, listener: KillSwitchListener) {
        self.listeners.lock().push(listener);
    }

    /// Global is checked before per-symbol.
    pub fn evaluate(&self, intent: &LiveExecutionIntent) -> KillSwitchVerdict {
        self.evaluate_symbol(intent.symbol())
    }

    pub fn evaluate_symbol(&self, symbol: &Symbol) -> KillSwitchVerdict {
        let status = self.status();
        if status.global_kill {
            return KillSwitchVerdict {
                killed: true,
                reason_code: Some(GLOBAL_KILL),
                reason: status.reason.clone(),
            };
        }
        if status.symbol_kill.contains(symbol) {
            return KillSwitchVerdict {
                killed: true,
                reason_code: Some(SYMBOL_KILL),
                reason: status.reason.clone(),
            };
        }
        KillSwitchVerdict::clear()
    }

    // ─────────────────────────────────────────────────────────────
    // Mutators
    // ─────────────────────────────────────────────────────────────

    /// Returns false when the global kill was already active.
    pub fn activate_global(&self, reason: &str, actor: &str) -> bool {
        let changed = self.mutate(KillSwitchAction::ActivateGlobal, actor, |s| {
            if s.global_kill {
                return false;
            }
            s.global_kill = true;
            stamp(s, reason, actor);
            true
        });
        if let Some(status) = &changed {
            warn!(actor, reason, "🛑 Global kill switch ACTIVATED");
            self.run_stop_callbacks(status);
        }
        changed.is_some()
    }

    /// Adds symbols to the kill set. Returns false if all were already killed.
    pub fn activate_symbols(&self, symbols: &[Symbol], reason: &str, actor: &str) -> bool {
        let action = KillSwitchAction::ActivateSymbols(symbols.to_vec());
        let changed = self.mutate(action, actor, |s| {
            let before = s.symbol_kill.len();
            s.symbol_kill.extend(symbols.iter().cloned());
            if s.symbol_kill.len() == before {
                return false;
            }
            // Global verdicts keep reporting the global reason
            if !s.global_kill {
                stamp(s, reason, actor);
            }
            true
        });
        if changed.is_some() {
            warn!(actor, reason, symbols = ?symbols, "🛑 Symbol kill switch ACTIVATED");
        }
        changed.is_some()
    }

    pub fn deactivate_global(&self, actor: &str) -> bool {
        let changed = self.mutate(KillSwitchAction::DeactivateGlobal, actor, |s| {
            if !s.global_kill {
                return false;
            }
            s.global_kill = false;
            if !s.is_active() {
                s.clear_activation();
            }
            true
        });
        if changed.is_some() {
            info!(actor, "✅ Global kill switch deactivated");
        }
        changed.is_some()
    }

    pub fn deactivate_symbols(&self, symbols: &[Symbol], actor: &str) -> bool {
        let action = KillSwitchAction::DeactivateSymbols(symbols.to_vec());
        let changed = self.mutate(action, actor, |s| {
            let before = s.symbol_kill.len();
            for symbol in symbols {
                s.symbol_kill.remove(symbol);
            }
            if s.symbol_kill.len() == before {
                return false;
            }
            if !s.is_active() {
                s.clear_activation();
            }
            true
        });
        if changed.is_some() {
            info!(actor, symbols = ?symbols, "✅ Symbol kill switch deactivated");
        }
        changed.is_some()
    }

    pub fn deactivate_all(&self, actor: &str) -> bool {
        let changed = self.mutate(KillSwitchAction::DeactivateAll, actor, |s| {
            if !s.is_active() {
                return false;
            }
            s.global_kill = false;
            s.symbol_kill.clear();
            s.clear_activation();
            true
        });
        if changed.is_some() {
            info!(actor, "✅ All kill switches deactivated");
        }
        changed.is_some()
    }

    /// Global kill that always re-runs every run-stop callback.
    pub fn emergency_stop(&self, reason: &str, actor: &str) {
        let status = self
            .mutate(KillSwitchAction::EmergencyStop, actor, |s| {
                s.global_kill = true;
                stamp(s, reason, actor);
                true
            })
            .unwrap_or_else(|| self.status());
        error!(actor, reason, "🚨 EMERGENCY STOP");
        self.run_stop_callbacks(&status);
    }

    /// Apply `change` under the writer lock. When it reports a change, the
    /// new snapshot is published, audited and broadcast to listeners.
    fn mutate<F>(&self, action: KillSwitchAction, actor: &str, change: F) -> Option<Arc<KillSwitchStatus>>
    where
        F: FnOnce(&mut KillSwitchStatus) -> bool,
    {
        let status = {
            let _guard = self.writer.lock();
            let mut next = (*self.status()).clone();
            if !change(&mut next) {
                return None;
            }
            let next = Arc::new(next);
            *self.snapshot.write() = next.clone();
            next
        };

        if let Some(audit) = &self.audit {
            let metadata = json!({
                "global_kill": status.global_kill,
                "symbol_kill": status.symbol_kill,
                "reason": status.reason,
            });
            isolate("kill switch audit", || {
                audit.emit_audit(actor, action.audit_name(), "kill_switch", "global", &metadata)
            });
        }

        let event = KillSwitchEvent {
            action,
            actor: actor.to_string(),
            status: status.clone(),
        };
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            isolate("kill switch listener", || {
                listener(&event);
                Ok(())
            });
        }

        Some(status)
    }

    fn run_stop_callbacks(&self, status: &KillSwitchStatus) {
        let callbacks = self.run_stops.lock().clone();
        for (name, callback) in callbacks {
            if isolate(&name, || callback(status)) {
                info!(callback = %name, "run-stop callback completed");
            } else {
                error!(callback = %name, "run-stop callback failed; continuing");
            }
        }
    }
}

fn stamp(status: &mut KillSwitchStatus, reason: &str, actor: &str) {
    status.reason = Some(reason.to_string());
    status.activated_by = Some(actor.to_string());
    status.activated_at = Some(Utc::now());
}
