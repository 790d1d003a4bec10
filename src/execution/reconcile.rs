//! Position reconciliation contract
//!
//! The bridge only schedules reconciliation. Paper positions come from a
//! provider and the comparison is delegated to a reconciler; both are
//! supplied by the host process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{PaperPosition, Symbol};
use crate::exchanges::ExchangePosition;

/// Source of the positions the paper engine believes it holds.
#[async_trait]
pub trait PaperPositionsProvider: Send + Sync {
    async fn paper_positions(&self) -> anyhow::Result<Vec<PaperPosition>>;
}

/// Compares venue positions with paper positions.
#[async_trait]
pub trait PositionReconciler: Send + Sync {
    async fn reconcile(
        &self,
        exchange: &[ExchangePosition],
        paper: &[PaperPosition],
    ) -> anyhow::Result<ReconciliationReport>;
}

/// Per-symbol disagreement between venue and paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDrift {
    pub symbol: Symbol,
    pub exchange_qty: Decimal,
    pub paper_qty: Decimal,
}

impl PositionDrift {
    pub fn difference(&self) -> Decimal {
        self.exchange_qty - self.paper_qty
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub checked_at: DateTime<Utc>,
    pub symbols_checked: usize,
    pub drifts: Vec<PositionDrift>,
    pub issues: Vec<String>,
}

impl ReconciliationReport {
    pub fn new(checked_at: DateTime<Utc>) -> Self {
        Self {
            checked_at,
            symbols_checked: 0,
            drifts: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn record_issue(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }

    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty() && self.issues.is_empty()
    }
}

/// Signed net quantity comparison per symbol.
///
/// Symbols only one side knows about count as zero on the other side.
#[derive(Debug, Clone, Default)]
pub struct NetQuantityReconciler {
    tolerance: Decimal,
}

impl NetQuantityReconciler {
    pub fn new(tolerance: Decimal) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }
}

#[async_trait]
impl PositionReconciler for NetQuantityReconciler {
    async fn reconcile(
        &self,
        exchange: &[ExchangePosition],
        paper: &[PaperPosition],
    ) -> anyhow::Result<ReconciliationReport> {
        let mut book: BTreeMap<&Symbol, (Decimal, Decimal)> = BTreeMap::new();
        for p in exchange {
            book.entry(&p.symbol).or_default().0 += p.signed_quantity();
        }
        for p in paper {
            book.entry(&p.symbol).or_default().1 += p.quantity;
        }

        let mut report = ReconciliationReport::new(Utc::now());
        report.symbols_checked = book.len();
        for (symbol, (exchange_qty, paper_qty)) in book {
            if (exchange_qty - paper_qty).abs() > self.tolerance {
                report.drifts.push(PositionDrift {
                    symbol: symbol.clone(),
                    exchange_qty,
                    paper_qty,
                });
            }
        }
        Ok(report)
    }
}
