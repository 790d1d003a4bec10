//! Error handling - Hierarchical errors for the bridge core

use thiserror::Error;

use crate::exchanges::ExchangeError;
use crate::execution::OrderState;

pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error hierarchy
///
/// Authorization denials (gate, kill switch) are never errors; they are
/// returned as values. Everything here is either a venue failure, a local
/// I/O problem, or a logic defect in the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Venue protocol/transport errors
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// State machine violation
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    /// Fill rejected by the aggregation rules
    #[error("Invalid fill: {0}")]
    InvalidFill(String),

    /// Lifecycle entry not found
    #[error("Order not found: {0}")]
    NotFound(String),

    /// Filesystem errors from the order store
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// True for errors that indicate a bug in the caller rather than an
    /// external condition.
    pub fn is_logic_defect(&self) -> bool {
        matches!(self, Error::InvalidTransition { .. } | Error::InvalidFill(_))
    }
}
