//! Exchange error taxonomy
//!
//! Every venue maps its own error codes into [`ExchangeErrorCode`]. Errors are
//! plain values tagged with `retryable`; adapters never retry on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::exchanges::ExchangeId;

/// Shared error taxonomy across venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeErrorCode {
    AuthFailed,
    SignatureInvalid,
    RateLimitExceeded,
    InsufficientBalance,
    InsufficientMargin,
    OrderNotFound,
    OrderRejected,
    PositionLimitExceeded,
    InvalidQuantity,
    InvalidPrice,
    InvalidSymbol,
    TimestampOutsideRecvWindow,
    Timeout,
    NetworkError,
    ExchangeUnavailable,
    InvalidResponse,
    Unknown,
}

impl ExchangeErrorCode {
    /// Whether a caller may safely retry with the same inputs.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded
                | Self::TimestampOutsideRecvWindow
                | Self::Timeout
                | Self::NetworkError
                | Self::ExchangeUnavailable
        )
    }

    /// Refusals of the order itself, as opposed to transport or auth trouble.
    pub fn is_order_rejection(self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance
                | Self::InsufficientMargin
                | Self::OrderRejected
                | Self::PositionLimitExceeded
                | Self::InvalidQuantity
                | Self::InvalidPrice
                | Self::InvalidSymbol
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthFailed => "AUTH_FAILED",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::InsufficientMargin => "INSUFFICIENT_MARGIN",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::OrderRejected => "ORDER_REJECTED",
            Self::PositionLimitExceeded => "POSITION_LIMIT_EXCEEDED",
            Self::InvalidQuantity => "INVALID_QUANTITY",
            Self::InvalidPrice => "INVALID_PRICE",
            Self::InvalidSymbol => "INVALID_SYMBOL",
            Self::TimestampOutsideRecvWindow => "TIMESTAMP_OUTSIDE_RECV_WINDOW",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ExchangeUnavailable => "EXCHANGE_UNAVAILABLE",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ExchangeErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured venue error
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{exchange} {code}: {message}")]
pub struct ExchangeError {
    pub code: ExchangeErrorCode,
    pub message: String,
    pub exchange: ExchangeId,
    pub original_code: Option<String>,
    pub original_message: Option<String>,
    pub http_status: Option<u16>,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
    pub metadata: Option<Map<String, Value>>,
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// HTTP statuses that are retryable whatever the body says.
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Best guess from the HTTP status alone, for bodies without a venue code.
pub fn code_for_status(status: u16) -> Option<ExchangeErrorCode> {
    match status {
        401 | 403 => Some(ExchangeErrorCode::AuthFailed),
        418 | 429 => Some(ExchangeErrorCode::RateLimitExceeded),
        500..=599 => Some(ExchangeErrorCode::ExchangeUnavailable),
        _ => None,
    }
}

impl ExchangeError {
    pub fn new(exchange: ExchangeId, code: ExchangeErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            exchange,
            original_code: None,
            original_message: None,
            http_status: None,
            timestamp: Utc::now(),
            retryable: code.is_retryable(),
            metadata: None,
        }
    }

    pub fn timeout(exchange: ExchangeId, after: std::time::Duration) -> Self {
        Self::new(
            exchange,
            ExchangeErrorCode::Timeout,
            format!("no response within {}ms; venue-side outcome unknown", after.as_millis()),
        )
    }

    pub fn network(exchange: ExchangeId, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::new(exchange, ExchangeErrorCode::Timeout, err.to_string());
        }
        Self::new(exchange, ExchangeErrorCode::NetworkError, err.to_string())
    }

    pub fn invalid_response(exchange: ExchangeId, message: impl Into<String>) -> Self {
        Self::new(exchange, ExchangeErrorCode::InvalidResponse, message)
    }

    /// Build an error from a venue response.
    ///
    /// `mapped` is the venue table's translation of `original_code`; when the
    /// table has no entry the code falls back to `Unknown`. Transient HTTP
    /// statuses force `retryable` regardless of the body.
    pub fn from_venue(
        exchange: ExchangeId,
        http_status: u16,
        original_code: Option<String>,
        original_message: Option<String>,
        mapped: Option<ExchangeErrorCode>,
    ) -> Self {
        let code = mapped.unwrap_or(ExchangeErrorCode::Unknown);
        let message = match (&original_code, &original_message) {
            (Some(c), Some(m)) => format!("{m} (venue code {c}, http {http_status})"),
            (None, Some(m)) => format!("{m} (http {http_status})"),
            (Some(c), None) => format!("venue code {c} (http {http_status})"),
            (None, None) => format!("http {http_status}"),
        };
        Self {
            code,
            message,
            exchange,
            original_code,
            original_message,
            http_status: Some(http_status),
            timestamp: Utc::now(),
            retryable: code.is_retryable() || is_transient_status(http_status),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ExchangeErrorCode::OrderNotFound
    }

    /// True when the venue may have accepted the request despite the error:
    /// a timeout, or a server-side failure that did not name a refusal.
    pub fn outcome_unknown(&self) -> bool {
        if self.code.is_order_rejection() {
            return false;
        }
        matches!(self.code, ExchangeErrorCode::Timeout | ExchangeErrorCode::ExchangeUnavailable)
            || self.http_status.is_some_and(|status| status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_code_is_unknown_and_final() {
        let err = ExchangeError::from_venue(
            ExchangeId::Binance,
            400,
            Some("-9999".into()),
            Some("odd".into()),
            None,
        );
        assert_eq!(err.code, ExchangeErrorCode::Unknown);
        assert!(!err.retryable);
        assert_eq!(err.original_code.as_deref(), Some("-9999"));
    }

    #[test]
    fn test_transient_status_always_retryable() {
        for status in [429, 500, 502, 503, 504] {
            let err = ExchangeError::from_venue(
                ExchangeId::Okx,
                status,
                Some("51008".into()),
                None,
                Some(ExchangeErrorCode::InsufficientBalance),
            );
            assert!(err.retryable, "status {status}");
        }
    }

    #[test]
    fn test_outcome_unknown_on_timeouts_and_server_errors() {
        assert!(ExchangeError::timeout(ExchangeId::Binance, std::time::Duration::from_secs(5)).outcome_unknown());

        let unavailable = ExchangeError::from_venue(
            ExchangeId::Binance,
            503,
            None,
            Some("Unknown error, please check your request or try again later.".into()),
            code_for_status(503),
        );
        assert!(unavailable.outcome_unknown());

        let unmapped_5xx = ExchangeError::from_venue(ExchangeId::Bybit, 502, Some("10016".into()), None, None);
        assert!(unmapped_5xx.outcome_unknown());

        // Explicit refusals are final even behind a 5xx
        let refused = ExchangeError::from_venue(
            ExchangeId::Okx,
            503,
            Some("51008".into()),
            None,
            Some(ExchangeErrorCode::InsufficientBalance),
        );
        assert!(!refused.outcome_unknown());

        assert!(!ExchangeError::new(ExchangeId::Binance, ExchangeErrorCode::NetworkError, "reset").outcome_unknown());
        let bad_request = ExchangeError::from_venue(ExchangeId::Binance, 400, Some("-1102".into()), None, None);
        assert!(!bad_request.outcome_unknown());
    }

    #[test]
    fn test_status_fallback() {
        assert_eq!(code_for_status(401), Some(ExchangeErrorCode::AuthFailed));
        assert_eq!(code_for_status(503), Some(ExchangeErrorCode::ExchangeUnavailable));
        assert_eq!(code_for_status(400), None);
    }

    #[test]
    fn test_code_retryability() {
        assert!(ExchangeErrorCode::Timeout.is_retryable());
        assert!(ExchangeErrorCode::NetworkError.is_retryable());
        assert!(!ExchangeErrorCode::InsufficientBalance.is_retryable());
        assert!(!ExchangeErrorCode::AuthFailed.is_retryable());
        assert!(ExchangeErrorCode::InvalidQuantity.is_order_rejection());
        assert!(!ExchangeErrorCode::Timeout.is_order_rejection());
    }
}
