//! Audit and alert sinks
//!
//! Both are best-effort side channels. Callers invoke them after the state
//! they describe is already committed, and a failing or panicking sink is
//! logged and otherwise ignored.

use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{error, info, warn};

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Append-only audit trail
pub trait AuditSink: Send + Sync {
    fn emit_audit(
        &self,
        actor: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        metadata: &Value,
    ) -> anyhow::Result<()>;
}

/// Operator alerting
pub trait AlertSink: Send + Sync {
    fn send_alert(
        &self,
        alert_type: &str,
        severity: AlertSeverity,
        message: &str,
        metadata: &Value,
    ) -> anyhow::Result<()>;
}

/// Writes audit records to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit_audit(
        &self,
        actor: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        metadata: &Value,
    ) -> anyhow::Result<()> {
        info!(target: "audit", actor, action, target_type, target_id, %metadata, "📝 audit");
        Ok(())
    }
}

/// Writes alerts to the `alert` tracing target at a matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn send_alert(
        &self,
        alert_type: &str,
        severity: AlertSeverity,
        message: &str,
        metadata: &Value,
    ) -> anyhow::Result<()> {
        match severity {
            AlertSeverity::Critical => {
                error!(target: "alert", alert_type, %severity, %metadata, "🚨 {message}")
            }
            AlertSeverity::Warning => {
                warn!(target: "alert", alert_type, %severity, %metadata, "⚠️ {message}")
            }
            AlertSeverity::Info => info!(target: "alert", alert_type, %severity, %metadata, "{message}"),
        }
        Ok(())
    }
}

/// Run a side effect, swallowing both `Err` and panics.
///
/// Returns whether it completed cleanly.
pub(crate) fn isolate<F>(what: &str, f: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(what, error = %e, "side effect failed");
            false
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(what, panic = %msg, "side effect panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolate_catches_errors_and_panics() {
        assert!(isolate("ok", || Ok(())));
        assert!(!isolate("err", || Err(anyhow::anyhow!("boom"))));
        assert!(!isolate("panic", || panic!("kaboom")));
    }

    #[test]
    fn test_tracing_sinks_never_fail() {
        let meta = serde_json::json!({"k": 1});
        assert!(TracingAuditSink.emit_audit("system", "order.created", "order", "abc", &meta).is_ok());
        assert!(
            TracingAlertSink
                .send_alert("order_failed", AlertSeverity::Critical, "failed", &meta)
                .is_ok()
        );
    }
}
