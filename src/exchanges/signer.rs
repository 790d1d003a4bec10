//! Request signing - one HMAC-SHA256 scheme per venue
//!
//! | Venue   | Payload                                   | Encoding | Where            |
//! |---------|-------------------------------------------|----------|------------------|
//! | Binance | query string incl. recvWindow + timestamp | hex      | `signature=` arg |
//! | Bybit   | timestamp + key + recv window + payload   | hex      | `X-BAPI-SIGN`    |
//! | OKX     | iso timestamp + METHOD + path + body      | base64   | `OK-ACCESS-SIGN` |

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;

use crate::exchanges::{ExchangeError, ExchangeErrorCode, ExchangeId, ExchangeResult};

type HmacSha256 = Hmac<Sha256>;

/// Which authentication scheme a signer implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// HMAC over the query string, receive window as a query parameter
    QueryString,
    /// HMAC over the JSON body (or query), receive window as a header
    JsonBody,
    /// base64 HMAC over timestamp+method+path+body, passphrase header
    Prehash,
}

/// Everything a signer may need to see about an outgoing request
#[derive(Debug, Clone)]
pub struct RequestToSign<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    /// Already url-encoded, without the leading `?`
    pub query: &'a str,
    pub body: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// Final query string and auth headers
#[derive(Debug, Clone, Default)]
pub struct SignedRequest {
    pub query: String,
    pub headers: HeaderMap,
}

/// Signer trait - each venue authenticates requests differently
pub trait Signer: Send + Sync {
    fn sign(&self, request: &RequestToSign<'_>) -> ExchangeResult<SignedRequest>;

    /// Public key id
    fn key_id(&self) -> &str;

    fn scheme(&self) -> SignatureScheme;
}

fn hmac_sha256(exchange: ExchangeId, secret: &str, payload: &[u8]) -> ExchangeResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        ExchangeError::new(exchange, ExchangeErrorCode::SignatureInvalid, e.to_string())
    })?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn insert_header(
    headers: &mut HeaderMap,
    exchange: ExchangeId,
    name: &'static str,
    value: &str,
) -> ExchangeResult<()> {
    let value = HeaderValue::from_str(value).map_err(|_| {
        ExchangeError::new(
            exchange,
            ExchangeErrorCode::AuthFailed,
            format!("value for header {name} is not valid ASCII"),
        )
    })?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

// ─────────────────────────────────────────────────────────────
// Binance
// ─────────────────────────────────────────────────────────────

/// Binance: `recvWindow` and `timestamp` are appended to the query, which is
/// then signed and extended with `signature`.
pub struct BinanceSigner {
    api_key: String,
    secret: String,
    recv_window_ms: u64,
}

impl BinanceSigner {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, recv_window_ms: u64) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            recv_window_ms,
        }
    }
}

impl Signer for BinanceSigner {
    fn sign(&self, request: &RequestToSign<'_>) -> ExchangeResult<SignedRequest> {
        let auth = format!(
            "recvWindow={}&timestamp={}",
            self.recv_window_ms,
            request.timestamp.timestamp_millis()
        );
        let query = if request.query.is_empty() {
            auth
        } else {
            format!("{}&{}", request.query, auth)
        };

        let payload = format!("{query}{}", request.body);
        let signature = hex::encode(hmac_sha256(ExchangeId::Binance, &self.secret, payload.as_bytes())?);

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, ExchangeId::Binance, "x-mbx-apikey", &self.api_key)?;

        Ok(SignedRequest {
            query: format!("{query}&signature={signature}"),
            headers,
        })
    }

    fn key_id(&self) -> &str {
        &self.api_key
    }

    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::QueryString
    }
}

// ─────────────────────────────────────────────────────────────
// Bybit
// ─────────────────────────────────────────────────────────────

/// Bybit v5: signature over `timestamp + api_key + recv_window + payload`,
/// where payload is the JSON body for POST and the query for GET.
pub struct BybitSigner {
    api_key: String,
    secret: String,
    recv_window_ms: u64,
}

impl BybitSigner {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, recv_window_ms: u64) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            recv_window_ms,
        }
    }
}

impl Signer for BybitSigner {
    fn sign(&self, request: &RequestToSign<'_>) -> ExchangeResult<SignedRequest> {
        let timestamp = request.timestamp.timestamp_millis().to_string();
        let recv_window = self.recv_window_ms.to_string();
        let payload = if *request.method == Method::GET {
            request.query
        } else {
            request.body
        };

        let prehash = format!("{timestamp}{}{recv_window}{payload}", self.api_key);
        let signature = hex::encode(hmac_sha256(ExchangeId::Bybit, &self.secret, prehash.as_bytes())?);

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, ExchangeId::Bybit, "x-bapi-api-key", &self.api_key)?;
        insert_header(&mut headers, ExchangeId::Bybit, "x-bapi-timestamp", &timestamp)?;
        insert_header(&mut headers, ExchangeId::Bybit, "x-bapi-recv-window", &recv_window)?;
        insert_header(&mut headers, ExchangeId::Bybit, "x-bapi-sign", &signature)?;
        insert_header(&mut headers, ExchangeId::Bybit, "x-bapi-sign-type", "2")?;

        Ok(SignedRequest {
            query: request.query.to_string(),
            headers,
        })
    }

    fn key_id(&self) -> &str {
        &self.api_key
    }

    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::JsonBody
    }
}

// ─────────────────────────────────────────────────────────────
// OKX
// ─────────────────────────────────────────────────────────────

/// OKX v5: base64 signature over `iso_timestamp + METHOD + path?query + body`
/// plus a mandatory passphrase header.
pub struct OkxSigner {
    api_key: String,
    secret: String,
    passphrase: String,
}

impl OkxSigner {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
        }
    }
}

impl Signer for OkxSigner {
    fn sign(&self, request: &RequestToSign<'_>) -> ExchangeResult<SignedRequest> {
        let timestamp = request.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        let request_path = if request.query.is_empty() {
            request.path.to_string()
        } else {
            format!("{}?{}", request.path, request.query)
        };

        let prehash = format!(
            "{timestamp}{}{request_path}{}",
            request.method.as_str(),
            request.body
        );
        let signature = BASE64.encode(hmac_sha256(ExchangeId::Okx, &self.secret, prehash.as_bytes())?);

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, ExchangeId::Okx, "ok-access-key", &self.api_key)?;
        insert_header(&mut headers, ExchangeId::Okx, "ok-access-sign", &signature)?;
        insert_header(&mut headers, ExchangeId::Okx, "ok-access-timestamp", &timestamp)?;
        insert_header(&mut headers, ExchangeId::Okx, "ok-access-passphrase", &self.passphrase)?;

        Ok(SignedRequest {
            query: request.query.to_string(),
            headers,
        })
    }

    fn key_id(&self) -> &str {
        &self.api_key
    }

    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Prehash
    }
}
