use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt};

use aleph_bridge::core::{PaperExecutionResult, PaperExecutionStatus, PaperPosition, Settings, Side, Symbol};
use aleph_bridge::exchanges::{ExchangeCredentials, build_adapter};
use aleph_bridge::execution::{
    AlertSink, AuditSink, BridgeOutcome, ExecutionBridge, NetQuantityReconciler,
    OrderLifecycleManager, OrderStateStore, PaperPositionsProvider, TracingAlertSink,
    TracingAuditSink,
};
use aleph_bridge::risk::{KillSwitchManager, KillSwitchStatus};

/// Net paper positions built from the executions read on stdin
#[derive(Default)]
struct PaperBook {
    positions: Mutex<BTreeMap<Symbol, Decimal>>,
}

impl PaperBook {
    fn record(&self, execution: &PaperExecutionResult) {
        if execution.status != PaperExecutionStatus::Filled {
            return;
        }
        let signed = match execution.side {
            Side::Buy => execution.filled_quantity,
            Side::Sell => -execution.filled_quantity,
        };
        *self.positions.lock().entry(execution.symbol.clone()).or_default() += signed;
    }
}

#[async_trait]
impl PaperPositionsProvider for PaperBook {
    async fn paper_positions(&self) -> anyhow::Result<Vec<PaperPosition>> {
        Ok(self
            .positions
            .lock()
            .iter()
            .filter(|(_, qty)| !qty.is_zero())
            .map(|(symbol, qty)| PaperPosition {
                symbol: symbol.clone(),
                quantity: *qty,
                avg_entry_price: None,
            })
            .collect())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // 1. Logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,aleph_bridge=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("🦀 aleph-bridge starting (paper → live execution bridge)...");

    // 2. Configuration
    let config_path = std::env::var("LIVE_BRIDGE_CONFIG").ok().map(PathBuf::from);
    let settings = Settings::from_env(config_path.as_deref())?;
    let credentials = ExchangeCredentials::from_env(settings.venue.exchange)?;
    tracing::info!(
        exchange = %settings.venue.exchange,
        key = %credentials.masked_key(),
        testnet = credentials.testnet,
        mode = %settings.bridge.mode,
        live_enabled = settings.bridge.live_enabled,
        "⚙️ configuration loaded"
    );

    // 3. Collaborators
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let alerts: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);
    let adapter = build_adapter(&settings.venue, &credentials)?;

    let kill_switch = Arc::new(KillSwitchManager::from_defaults(&settings.kill_switch).with_audit(audit.clone()));
    let intake_open = Arc::new(AtomicBool::new(true));
    {
        let intake_open = intake_open.clone();
        kill_switch.register_run_stop(
            "stdin-intake",
            Arc::new(move |_: &KillSwitchStatus| -> anyhow::Result<()> {
                intake_open.store(false, Ordering::SeqCst);
                Ok(())
            }),
        );
    }

    let lifecycle = Arc::new(OrderLifecycleManager::new(
        OrderStateStore::new(&settings.state_dir),
        audit,
        alerts,
    ));
    let bridge = ExecutionBridge::new(
        adapter,
        lifecycle.clone(),
        kill_switch.clone(),
        Arc::new(NetQuantityReconciler::default()),
        settings.bridge.clone(),
    )
    .with_recv_window_ms(settings.venue.recv_window_ms)
    .with_reconcile_interval(Duration::from_secs(settings.reconcile_interval_secs.max(1)));

    // 4. Startup
    bridge.init().await?;
    lifecycle.cleanup(Some(settings.retention_days)).await?;

    let book = Arc::new(PaperBook::default());
    bridge.start_reconciliation(book.clone());

    // 5. Intake: one PaperExecutionResult JSON object per line
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("⏳ Waiting for paper executions on stdin...");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupt received");
                break;
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let execution: PaperExecutionResult = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed execution");
                continue;
            }
        };
        book.record(&execution);

        if !intake_open.load(Ordering::SeqCst) || kill_switch.is_global_kill() {
            tracing::warn!(execution_id = %execution.execution_id, "🛑 intake halted, execution not bridged");
            continue;
        }

        let summary = match bridge.process_execution(&execution).await {
            Ok(outcome) => outcome_json(&execution, &outcome),
            Err(e) => {
                tracing::error!(execution_id = %execution.execution_id, error = %e, "bridge error");
                json!({ "execution_id": execution.execution_id, "outcome": "ERROR", "error": e.to_string() })
            }
        };
        println!("{summary}");
    }

    // 6. Shutdown
    bridge.stop_reconciliation().await;
    let stats = bridge.get_stats();
    tracing::info!(stats = %serde_json::to_string(&stats)?, "👋 aleph-bridge stopped");
    Ok(())
}

fn outcome_json(execution: &PaperExecutionResult, outcome: &BridgeOutcome) -> serde_json::Value {
    let label = match outcome {
        BridgeOutcome::Denied(_) => "DENIED",
        BridgeOutcome::Killed { .. } => "KILLED",
        BridgeOutcome::Submitted(_) => "SUBMITTED",
        BridgeOutcome::Rejected(_) => "REJECTED",
        BridgeOutcome::Failed(_) => "FAILED",
        BridgeOutcome::Unknown(_) => "UNKNOWN",
    };
    let reason = match outcome {
        BridgeOutcome::Denied(reason) => Some(reason.to_string()),
        BridgeOutcome::Killed { verdict, .. } => verdict.reason.clone(),
        other => other.entry().and_then(|e| e.error().map(str::to_string)),
    };
    json!({
        "execution_id": execution.execution_id,
        "outcome": label,
        "bridge_id": outcome.bridge_id(),
        "state": outcome.entry().map(|e| e.state()),
        "reason": reason,
    })
}
