//! Order lifecycle state machine
//!
//! ```text
//! INTENT_CREATED → GATE_PASSED | CANCELLED
//! GATE_PASSED    → SUBMITTING | CANCELLED
//! SUBMITTING     → SUBMITTED | FAILED | REJECTED
//! SUBMITTED      → PARTIALLY_FILLED | FILLED | CANCELLED | REJECTED | EXPIRED
//! PARTIALLY_FILLED → PARTIALLY_FILLED | FILLED | CANCELLED
//! ```
//!
//! FILLED, CANCELLED, REJECTED, FAILED and EXPIRED are terminal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::{Error, LiveExecutionIntent, Result, Side, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    IntentCreated,
    GatePassed,
    Submitting,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Failed,
    Expired,
}

impl OrderState {
    pub const ALL: [OrderState; 10] = [
        OrderState::IntentCreated,
        OrderState::GatePassed,
        OrderState::Submitting,
        OrderState::Submitted,
        OrderState::PartiallyFilled,
        OrderState::Filled,
        OrderState::Cancelled,
        OrderState::Rejected,
        OrderState::Failed,
        OrderState::Expired,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled
                | OrderState::Cancelled
                | OrderState::Rejected
                | OrderState::Failed
                | OrderState::Expired
        )
    }

    /// Terminal states that must carry an `error` explanation.
    pub fn is_failure(self) -> bool {
        matches!(self, OrderState::Rejected | OrderState::Failed | OrderState::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderState::IntentCreated => "INTENT_CREATED",
            OrderState::GatePassed => "GATE_PASSED",
            OrderState::Submitting => "SUBMITTING",
            OrderState::Submitted => "SUBMITTED",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::Filled => "FILLED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Rejected => "REJECTED",
            OrderState::Failed => "FAILED",
            OrderState::Expired => "EXPIRED",
        }
    }

    /// Legal successors.
    pub fn valid_next_states(self) -> &'static [OrderState] {
        use OrderState::*;
        match self {
            IntentCreated => &[GatePassed, Cancelled],
            GatePassed => &[Submitting, Cancelled],
            Submitting => &[Submitted, Failed, Rejected],
            Submitted => &[PartiallyFilled, Filled, Cancelled, Rejected, Expired],
            PartiallyFilled => &[PartiallyFilled, Filled, Cancelled],
            Filled | Cancelled | Rejected | Failed | Expired => &[],
        }
    }

    pub fn can_transition_to(self, to: OrderState) -> bool {
        self.valid_next_states().contains(&to)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn validate_transition(from: OrderState, to: OrderState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

/// One venue execution against a lifecycle entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub fee_asset: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Fill with a fresh id and no fee.
    pub fn new(quantity: Decimal, price: Decimal) -> Self {
        Self {
            fill_id: Uuid::new_v4().to_string(),
            quantity,
            price,
            fee: Decimal::ZERO,
            fee_asset: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, fill_id: impl Into<String>) -> Self {
        self.fill_id = fill_id.into();
        self
    }

    pub fn with_fee(mut self, fee: Decimal, asset: impl Into<String>) -> Self {
        self.fee = fee;
        self.fee_asset = Some(asset.into());
        self
    }

    pub fn notional(&self) -> Decimal {
        self.quantity.saturating_mul(self.price)
    }
}

/// Durable record of one promoted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLifecycleEntry {
    pub(crate) bridge_id: String,
    pub(crate) source_execution_id: String,
    pub(crate) state: OrderState,
    pub(crate) exchange_order_id: Option<String>,
    pub(crate) client_order_id: Option<String>,
    pub(crate) symbol: Symbol,
    pub(crate) side: Side,
    pub(crate) requested_qty: Decimal,
    /// Gated (paper) price, kept for daily notional accounting
    pub(crate) intent_price: Decimal,
    pub(crate) filled_qty: Decimal,
    pub(crate) avg_fill_price: Option<Decimal>,
    pub(crate) fills: Vec<Fill>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) error: Option<String>,
    pub(crate) metadata: Option<Map<String, Value>>,
}

impl OrderLifecycleEntry {
    pub fn from_intent(intent: &LiveExecutionIntent, now: DateTime<Utc>) -> Self {
        Self {
            bridge_id: intent.bridge_id().to_string(),
            source_execution_id: intent.source_execution_id().to_string(),
            state: OrderState::IntentCreated,
            exchange_order_id: None,
            client_order_id: None,
            symbol: intent.symbol().clone(),
            side: intent.side(),
            requested_qty: intent.quantity(),
            intent_price: intent.price(),
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            fills: Vec::new(),
            created_at: now,
            updated_at: now,
            error: None,
            metadata: None,
        }
    }

    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }

    pub fn source_execution_id(&self) -> &str {
        &self.source_execution_id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn exchange_order_id(&self) -> Option<&str> {
        self.exchange_order_id.as_deref()
    }

    pub fn client_order_id(&self) -> Option<&str> {
        self.client_order_id.as_deref()
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn requested_qty(&self) -> Decimal {
        self.requested_qty
    }

    pub fn intent_price(&self) -> Decimal {
        self.intent_price
    }

    /// Notional counted against the daily cap
    pub fn intent_notional(&self) -> Decimal {
        self.requested_qty.saturating_mul(self.intent_price)
    }

    pub fn filled_qty(&self) -> Decimal {
        self.filled_qty
    }

    pub fn avg_fill_price(&self) -> Option<Decimal> {
        self.avg_fill_price
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Validated state change. On error the entry is untouched.
    pub(crate) fn apply_transition(&mut self, to: OrderState, now: DateTime<Utc>) -> Result<()> {
        validate_transition(self.state, to)?;
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    /// Append a fill and recompute aggregates from the full fill list.
    /// On error the entry is untouched.
    pub(crate) fn apply_fill(&mut self, fill: Fill, now: DateTime<Utc>) -> Result<()> {
        if fill.quantity <= Decimal::ZERO {
            return Err(Error::InvalidFill(format!(
                "quantity must be positive, got {}",
                fill.quantity
            )));
        }
        if fill.price <= Decimal::ZERO {
            return Err(Error::InvalidFill(format!("price must be positive, got {}", fill.price)));
        }
        if fill.fee.is_sign_negative() {
            return Err(Error::InvalidFill(format!("fee must not be negative, got {}", fill.fee)));
        }
        if self.fills.iter().any(|f| f.fill_id == fill.fill_id) {
            return Err(Error::InvalidFill(format!("duplicate fill id {}", fill.fill_id)));
        }

        let filled = self
            .filled_qty
            .checked_add(fill.quantity)
            .ok_or_else(|| Error::InvalidFill(format!("filled quantity overflows at {}", fill.quantity)))?;
        let next = if filled >= self.requested_qty {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        validate_transition(self.state, next)?;

        let notional = self
            .fills
            .iter()
            .chain(std::iter::once(&fill))
            .try_fold(Decimal::ZERO, |n, f| {
                f.quantity.checked_mul(f.price).and_then(|x| n.checked_add(x))
            })
            .ok_or_else(|| {
                Error::InvalidFill(format!("fill notional overflows at {} @ {}", fill.quantity, fill.price))
            })?;

        let avg = notional
            .checked_div(filled)
            .ok_or_else(|| Error::InvalidFill(format!("average price overflows at {filled}")))?;

        self.fills.push(fill);
        self.filled_qty = filled;
        self.avg_fill_price = Some(avg);
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn merge_metadata(&mut self, patch: Map<String, Value>) {
        if patch.is_empty() {
            return;
        }
        let metadata = self.metadata.get_or_insert_with(Map::new);
        for (k, v) in patch {
            metadata.insert(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LiveExecutionIntent;
    use rust_decimal_macros::dec;

    fn entry(requested: Decimal) -> OrderLifecycleEntry {
        let intent = LiveExecutionIntent::new(
            "0123456789abcdef".into(),
            "exec-1".into(),
            Symbol::new("BTCUSDT"),
            Side::Buy,
            requested,
            dec!(100),
            Utc::now(),
        );
        OrderLifecycleEntry::from_intent(&intent, Utc::now())
    }

    fn entry_in(state: OrderState) -> OrderLifecycleEntry {
        let mut e = entry(dec!(1));
        e.state = state;
        e
    }

    #[test]
    fn test_happy_path_is_legal() {
        let mut e = entry(dec!(1));
        for next in [OrderState::GatePassed, OrderState::Submitting, OrderState::Submitted] {
            e.apply_transition(next, Utc::now()).unwrap();
        }
        assert_eq!(e.state(), OrderState::Submitted);
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let mut e = entry(dec!(1));
        let err = e.apply_transition(OrderState::Submitted, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: OrderState::IntentCreated,
                to: OrderState::Submitted
            }
        ));
        assert!(err.to_string().contains("INTENT_CREATED -> SUBMITTED"));
        assert_eq!(e.state(), OrderState::IntentCreated);
    }

    #[test]
    fn test_transition_closure_leaves_entry_untouched() {
        for from in OrderState::ALL {
            for to in OrderState::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let mut e = entry_in(from);
                let before = serde_json::to_vec(&e).unwrap();
                assert!(e.apply_transition(to, Utc::now()).is_err(), "{from} -> {to}");
                assert_eq!(serde_json::to_vec(&e).unwrap(), before, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        for state in OrderState::ALL {
            assert_eq!(state.is_terminal(), state.valid_next_states().is_empty(), "{state}");
        }
    }

    #[test]
    fn test_fill_aggregation() {
        let mut e = entry_in(OrderState::Submitted);
        e.apply_fill(Fill::new(dec!(0.4), dec!(100)), Utc::now()).unwrap();
        assert_eq!(e.state(), OrderState::PartiallyFilled);
        assert_eq!(e.avg_fill_price(), Some(dec!(100)));

        e.apply_fill(Fill::new(dec!(0.6), dec!(110)), Utc::now()).unwrap();
        assert_eq!(e.state(), OrderState::Filled);
        assert_eq!(e.filled_qty(), dec!(1.0));
        assert_eq!(e.avg_fill_price(), Some(dec!(106)));
        assert_eq!(e.fills().len(), 2);
    }

    #[test]
    fn test_fills_only_from_submitted_or_partial() {
        for state in OrderState::ALL {
            let mut e = entry_in(state);
            let ok = e.apply_fill(Fill::new(dec!(0.1), dec!(100)), Utc::now()).is_ok();
            assert_eq!(
                ok,
                matches!(state, OrderState::Submitted | OrderState::PartiallyFilled),
                "{state}"
            );
        }
    }

    #[test]
    fn test_invalid_fills_rejected() {
        let mut e = entry_in(OrderState::Submitted);
        assert!(e.apply_fill(Fill::new(Decimal::ZERO, dec!(100)), Utc::now()).is_err());
        assert!(e.apply_fill(Fill::new(dec!(0.1), dec!(-1)), Utc::now()).is_err());

        e.apply_fill(Fill::new(dec!(0.1), dec!(100)).with_id("f-1"), Utc::now()).unwrap();
        let dup = e.apply_fill(Fill::new(dec!(0.1), dec!(100)).with_id("f-1"), Utc::now());
        assert!(matches!(dup, Err(Error::InvalidFill(_))));
        assert_eq!(e.filled_qty(), dec!(0.1));
    }

    #[test]
    fn test_overflowing_fill_leaves_entry_untouched() {
        let mut e = entry_in(OrderState::Submitted);
        let before = serde_json::to_vec(&e).unwrap();
        let err = e.apply_fill(Fill::new(dec!(0.5), Decimal::MAX), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidFill(_)));
        assert_eq!(serde_json::to_vec(&e).unwrap(), before);
        assert_eq!(e.intent_notional(), dec!(100));
    }

    #[test]
    fn test_metadata_is_shallow_merged() {
        let mut e = entry(dec!(1));
        let mut first = Map::new();
        first.insert("a".into(), Value::from(1));
        first.insert("b".into(), Value::from(2));
        e.merge_metadata(first);

        let mut second = Map::new();
        second.insert("b".into(), Value::from(3));
        e.merge_metadata(second);

        let meta = e.metadata().unwrap();
        assert_eq!(meta["a"], Value::from(1));
        assert_eq!(meta["b"], Value::from(3));
    }

    #[test]
    fn test_state_serializes_screaming() {
        assert_eq!(serde_json::to_string(&OrderState::PartiallyFilled).unwrap(), "\"PARTIALLY_FILLED\"");
        assert_eq!(OrderState::GatePassed.to_string(), "GATE_PASSED");
    }
}
