//! Execution layer - Order lifecycle, persistence and the live bridge

pub mod bridge;
pub mod lifecycle;
pub mod reconcile;
pub mod sinks;
pub mod state_machine;
pub mod store;

pub use bridge::{BridgeOutcome, BridgeStats, ExecutionBridge};
pub use lifecycle::{DEFAULT_RETENTION_DAYS, OrderEvent, OrderLifecycleManager, TransitionDetails};
pub use reconcile::{
    NetQuantityReconciler, PaperPositionsProvider, PositionDrift, PositionReconciler,
    ReconciliationReport,
};
pub use sinks::{AlertSeverity, AlertSink, AuditSink, TracingAlertSink, TracingAuditSink};
pub use state_machine::{Fill, OrderLifecycleEntry, OrderState, validate_transition};
pub use store::OrderStateStore;
