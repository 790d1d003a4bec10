//! Promotion gate - deterministic paper → live authorization
//!
//! Checks run in a fixed order and every one is an unconditional veto:
//! 1. live trading enabled
//! 2. paper execution FILLED
//! 3. mode is not PAPER_ONLY
//! 4. CANARY mode: symbol on the allowlist
//! 5. daily order count and notional caps (inclusive)

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::{
    BridgeConfig, BridgeLimitsState, BridgeMode, LiveExecutionIntent, PaperExecutionResult,
    PaperExecutionStatus, Symbol,
};

const BRIDGE_ID_LEN: usize = 16;

/// Why an execution was not promoted. Every reason is final for that
/// execution; none of them is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("live trading is disabled")]
    LiveDisabled,

    #[error("paper execution is {0:?}, only FILLED executions are promoted")]
    NotFilled(PaperExecutionStatus),

    #[error("bridge is in PAPER_ONLY mode")]
    PaperOnlyMode,

    #[error("symbol {0} is not on the canary allowlist")]
    SymbolNotAllowed(Symbol),

    #[error("daily order cap reached: {projected} > {max}")]
    OrderCapExceeded { projected: u64, max: u32 },

    #[error("daily notional cap exceeded: {projected} > {max}")]
    NotionalCapExceeded { projected: Decimal, max: Decimal },

    #[error("notional of {quantity} @ {price} is not representable")]
    NotionalOverflow { quantity: Decimal, price: Decimal },
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::LiveDisabled => "LIVE_DISABLED",
            DenyReason::NotFilled(_) => "NOT_FILLED",
            DenyReason::PaperOnlyMode => "PAPER_ONLY",
            DenyReason::SymbolNotAllowed(_) => "SYMBOL_NOT_ALLOWED",
            DenyReason::OrderCapExceeded { .. } => "ORDER_CAP",
            DenyReason::NotionalCapExceeded { .. } => "NOTIONAL_CAP",
            DenyReason::NotionalOverflow { .. } => "NOTIONAL_OVERFLOW",
        }
    }
}

/// Gate verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Promote(LiveExecutionIntent),
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_promoted(&self) -> bool {
        matches!(self, GateDecision::Promote(_))
    }

    pub fn intent(&self) -> Option<&LiveExecutionIntent> {
        match self {
            GateDecision::Promote(intent) => Some(intent),
            GateDecision::Deny(_) => None,
        }
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            GateDecision::Promote(_) => None,
            GateDecision::Deny(reason) => Some(reason),
        }
    }
}

/// Stateless; safe to call from any number of tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct GateEvaluator;

impl GateEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        execution: &PaperExecutionResult,
        config: &BridgeConfig,
        limits: &BridgeLimitsState,
        now: DateTime<Utc>,
    ) -> GateDecision {
        match check(execution, config, limits) {
            Err(reason) => GateDecision::Deny(reason),
            Ok(()) => GateDecision::Promote(LiveExecutionIntent::new(
                bridge_id(&execution.execution_id, now),
                execution.execution_id.clone(),
                execution.symbol.clone(),
                execution.side,
                execution.filled_quantity,
                execution.fill_price,
                now,
            )),
        }
    }
}

fn check(
    execution: &PaperExecutionResult,
    config: &BridgeConfig,
    limits: &BridgeLimitsState,
) -> Result<(), DenyReason> {
    // 1. Master switch
    if !config.live_enabled {
        return Err(DenyReason::LiveDisabled);
    }

    // 2. Only complete paper fills
    if execution.status != PaperExecutionStatus::Filled {
        return Err(DenyReason::NotFilled(execution.status));
    }

    // 3. Mode
    if config.mode == BridgeMode::PaperOnly {
        return Err(DenyReason::PaperOnlyMode);
    }

    // 4. Canary allowlist, empty list admits nothing
    if config.mode == BridgeMode::Canary && !config.allowed_symbols.contains(&execution.symbol) {
        return Err(DenyReason::SymbolNotAllowed(execution.symbol.clone()));
    }

    // 5. Daily caps, equality allowed
    let projected_count = u64::from(limits.current_order_count) + 1;
    if projected_count > u64::from(config.max_orders_per_day) {
        return Err(DenyReason::OrderCapExceeded {
            projected: projected_count,
            max: config.max_orders_per_day,
        });
    }

    let projected_notional = execution
        .filled_quantity
        .checked_mul(execution.fill_price)
        .and_then(|notional| limits.current_notional_usd.checked_add(notional))
        .ok_or(DenyReason::NotionalOverflow {
            quantity: execution.filled_quantity,
            price: execution.fill_price,
        })?;
    if projected_notional > config.max_notional_per_day {
        return Err(DenyReason::NotionalCapExceeded {
            projected: projected_notional,
            max: config.max_notional_per_day,
        });
    }

    Ok(())
}

/// `sha256("{execution_id}:{now}")`, first 16 hex chars, with `now` in
/// RFC 3339 UTC at nanosecond precision.
pub fn bridge_id(execution_id: &str, now: DateTime<Utc>) -> String {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Nanos, true);
    let digest = Sha256::digest(format!("{execution_id}:{stamp}").as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(BRIDGE_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Side, TradeMode};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
    }

    fn execution(status: PaperExecutionStatus) -> PaperExecutionResult {
        PaperExecutionResult {
            execution_id: "exec-1".into(),
            intent_id: "intent-1".into(),
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            requested_quantity: dec!(0.1),
            filled_quantity: dec!(0.1),
            fill_price: dec!(50000),
            slippage_bps: dec!(1.5),
            latency_ms: 12,
            status,
            mode: TradeMode::Paper,
            executed_at: now(),
        }
    }

    fn canary_config() -> BridgeConfig {
        BridgeConfig {
            live_enabled: true,
            allowed_symbols: BTreeSet::from([Symbol::new("BTCUSDT")]),
            max_orders_per_day: 100,
            max_notional_per_day: dec!(100000),
            mode: BridgeMode::Canary,
        }
    }

    const ALL_STATUSES: [PaperExecutionStatus; 5] = [
        PaperExecutionStatus::Filled,
        PaperExecutionStatus::PartiallyFilled,
        PaperExecutionStatus::Rejected,
        PaperExecutionStatus::Cancelled,
        PaperExecutionStatus::Failed,
    ];

    const ALL_MODES: [BridgeMode; 3] = [BridgeMode::PaperOnly, BridgeMode::Canary, BridgeMode::Live];

    #[test]
    fn test_live_disabled_always_denies() {
        let gate = GateEvaluator::new();
        for mode in ALL_MODES {
            for status in ALL_STATUSES {
                let config = BridgeConfig {
                    live_enabled: false,
                    mode,
                    max_orders_per_day: u32::MAX,
                    max_notional_per_day: Decimal::MAX,
                    ..canary_config()
                };
                let decision = gate.evaluate(&execution(status), &config, &BridgeLimitsState::default(), now());
                assert_eq!(decision, GateDecision::Deny(DenyReason::LiveDisabled));
            }
        }
    }

    #[test]
    fn test_only_filled_executions_pass() {
        let gate = GateEvaluator::new();
        for status in ALL_STATUSES {
            let decision = gate.evaluate(&execution(status), &canary_config(), &BridgeLimitsState::default(), now());
            assert_eq!(decision.is_promoted(), status == PaperExecutionStatus::Filled, "{status:?}");
            if status != PaperExecutionStatus::Filled {
                assert_eq!(decision.deny_reason(), Some(&DenyReason::NotFilled(status)));
            }
        }
    }

    #[test]
    fn test_paper_only_mode_denies() {
        let config = BridgeConfig {
            mode: BridgeMode::PaperOnly,
            ..canary_config()
        };
        let decision = GateEvaluator::new().evaluate(
            &execution(PaperExecutionStatus::Filled),
            &config,
            &BridgeLimitsState::default(),
            now(),
        );
        assert_eq!(decision, GateDecision::Deny(DenyReason::PaperOnlyMode));
    }

    #[test]
    fn test_canary_allowlist() {
        let gate = GateEvaluator::new();
        let limits = BridgeLimitsState::default();

        let mut listed = execution(PaperExecutionStatus::Filled);
        listed.symbol = Symbol::new("BTCUSDT");
        assert!(gate.evaluate(&listed, &canary_config(), &limits, now()).is_promoted());

        let mut unlisted = execution(PaperExecutionStatus::Filled);
        unlisted.symbol = Symbol::new("ETHUSDT");
        assert_eq!(
            gate.evaluate(&unlisted, &canary_config(), &limits, now()),
            GateDecision::Deny(DenyReason::SymbolNotAllowed(Symbol::new("ETHUSDT")))
        );

        let empty = BridgeConfig {
            allowed_symbols: BTreeSet::new(),
            ..canary_config()
        };
        assert!(!gate.evaluate(&listed, &empty, &limits, now()).is_promoted());

        // LIVE mode ignores the allowlist
        let live = BridgeConfig {
            mode: BridgeMode::Live,
            allowed_symbols: BTreeSet::new(),
            ..canary_config()
        };
        assert!(gate.evaluate(&unlisted, &live, &limits, now()).is_promoted());
    }

    #[test]
    fn test_limit_boundaries_are_inclusive() {
        let gate = GateEvaluator::new();
        let exec = execution(PaperExecutionStatus::Filled); // notional 5000

        let at_count = BridgeLimitsState {
            current_order_count: 99,
            current_notional_usd: Decimal::ZERO,
        };
        assert!(gate.evaluate(&exec, &canary_config(), &at_count, now()).is_promoted());

        let over_count = BridgeLimitsState {
            current_order_count: 100,
            current_notional_usd: Decimal::ZERO,
        };
        assert_eq!(
            gate.evaluate(&exec, &canary_config(), &over_count, now()),
            GateDecision::Deny(DenyReason::OrderCapExceeded { projected: 101, max: 100 })
        );

        let at_notional = BridgeLimitsState {
            current_order_count: 0,
            current_notional_usd: dec!(95000),
        };
        assert!(gate.evaluate(&exec, &canary_config(), &at_notional, now()).is_promoted());

        let over_notional = BridgeLimitsState {
            current_order_count: 0,
            current_notional_usd: dec!(95000.01),
        };
        assert!(matches!(
            gate.evaluate(&exec, &canary_config(), &over_notional, now()),
            GateDecision::Deny(DenyReason::NotionalCapExceeded { .. })
        ));
    }

    #[test]
    fn test_zero_caps_deny_everything() {
        let config = BridgeConfig {
            max_orders_per_day: 0,
            ..canary_config()
        };
        let decision = GateEvaluator::new().evaluate(
            &execution(PaperExecutionStatus::Filled),
            &config,
            &BridgeLimitsState::default(),
            now(),
        );
        assert_eq!(decision.deny_reason().map(DenyReason::code), Some("ORDER_CAP"));
    }

    #[test]
    fn test_unrepresentable_notional_is_denied() {
        let gate = GateEvaluator::new();
        let config = BridgeConfig {
            max_notional_per_day: Decimal::MAX,
            ..canary_config()
        };

        let mut huge = execution(PaperExecutionStatus::Filled);
        huge.filled_quantity = Decimal::MAX;
        huge.fill_price = dec!(2);
        assert_eq!(
            gate.evaluate(&huge, &config, &BridgeLimitsState::default(), now()),
            GateDecision::Deny(DenyReason::NotionalOverflow {
                quantity: Decimal::MAX,
                price: dec!(2),
            })
        );

        // Representable on its own, overflows once added to today's total
        let nearly_full = BridgeLimitsState {
            current_order_count: 0,
            current_notional_usd: Decimal::MAX,
        };
        let decision = gate.evaluate(&execution(PaperExecutionStatus::Filled), &config, &nearly_full, now());
        assert_eq!(decision.deny_reason().map(DenyReason::code), Some("NOTIONAL_OVERFLOW"));
    }

    #[test]
    fn test_bridge_id_is_deterministic() {
        let gate = GateEvaluator::new();
        let exec = execution(PaperExecutionStatus::Filled);
        let limits = BridgeLimitsState::default();

        let a = gate.evaluate(&exec, &canary_config(), &limits, now());
        let b = gate.evaluate(&exec, &canary_config(), &limits, now());
        assert_eq!(a, b);

        let later = gate.evaluate(&exec, &canary_config(), &limits, now() + chrono::Duration::milliseconds(1));
        assert_ne!(
            a.intent().map(|i| i.bridge_id().to_string()),
            later.intent().map(|i| i.bridge_id().to_string())
        );

        // Re-evaluation inside the same millisecond still yields a fresh id
        let same_milli = gate.evaluate(&exec, &canary_config(), &limits, now() + chrono::Duration::microseconds(1));
        assert_ne!(
            a.intent().map(|i| i.bridge_id().to_string()),
            same_milli.intent().map(|i| i.bridge_id().to_string())
        );
    }

    #[test]
    fn test_bridge_id_reference_value() {
        let id = bridge_id("exec-1", now());
        assert_eq!(id, "f6890c12bfe1bb60");
        assert_eq!(id.len(), 16);
    }

    #[test]
    fn test_promoted_intent_fields() {
        let decision = GateEvaluator::new().evaluate(
            &execution(PaperExecutionStatus::Filled),
            &canary_config(),
            &BridgeLimitsState::default(),
            now(),
        );
        let intent = decision.intent().unwrap();
        assert_eq!(intent.symbol(), &Symbol::new("BTCUSDT"));
        assert_eq!(intent.side(), Side::Buy);
        assert_eq!(intent.quantity(), dec!(0.1));
        assert_eq!(intent.price(), dec!(50000));
        assert_eq!(intent.mode(), TradeMode::Live);
        assert_eq!(intent.gated_at(), now());
        assert_eq!(intent.source_execution_id(), "exec-1");
    }
}
