//! REST transport - signing, per-call timeout, raw response capture
//!
//! The transport never interprets venue payloads and never retries. Each
//! binding owns one instance with its own signer and base URL.

use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::exchanges::signer::{RequestToSign, Signer};
use crate::exchanges::{ExchangeError, ExchangeId, ExchangeResult};

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self, exchange: ExchangeId) -> ExchangeResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            ExchangeError::invalid_response(
                exchange,
                format!("undecodable body (http {}): {e}", self.status),
            )
            .with_metadata("body", truncate(&self.body, 512))
        })
    }
}

pub struct RestTransport {
    exchange: ExchangeId,
    base_url: String,
    client: Client,
    timeout: Duration,
    signer: Box<dyn Signer>,
    /// Sent with every request (e.g. OKX demo trading flag)
    static_headers: HeaderMap,
}

impl RestTransport {
    pub fn new(
        exchange: ExchangeId,
        base_url: impl Into<String>,
        timeout: Duration,
        signer: Box<dyn Signer>,
    ) -> ExchangeResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ExchangeError::network(exchange, &e))?;

        Ok(Self {
            exchange,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout,
            signer,
            static_headers: HeaderMap::new(),
        })
    }

    pub fn with_static_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.static_headers.insert(name, HeaderValue::from_static(value));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Unauthenticated GET
    pub async fn public_get(&self, path: &str, query: &str) -> ExchangeResult<RawResponse> {
        self.execute(Method::GET, path, query, "", false).await
    }

    /// Authenticated request; `body` is sent as JSON when non-empty.
    pub async fn signed(
        &self,
        method: Method,
        path: &str,
        query: &str,
        body: &str,
    ) -> ExchangeResult<RawResponse> {
        self.execute(method, path, query, body, true).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &str,
        body: &str,
        signed: bool,
    ) -> ExchangeResult<RawResponse> {
        let (query, mut headers) = if signed {
            let signed = self.signer.sign(&RequestToSign {
                method: &method,
                path,
                query,
                body,
                timestamp: Utc::now(),
            })?;
            (signed.query, signed.headers)
        } else {
            (query.to_string(), HeaderMap::new())
        };
        headers.extend(self.static_headers.clone());

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self.client.request(method.clone(), &url).headers(headers);
        if !body.is_empty() {
            request = request
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body.to_string());
        }

        debug!(exchange = %self.exchange, %method, path, signed, "→ request");

        let call = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>(RawResponse { status, body: text })
        };

        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                warn!(exchange = %self.exchange, %method, path, "⏱️ request timed out");
                Err(ExchangeError::timeout(self.exchange, self.timeout))
            }
            Ok(Err(e)) => {
                warn!(exchange = %self.exchange, %method, path, error = %e, "request failed");
                Err(ExchangeError::network(self.exchange, &e))
            }
            Ok(Ok(raw)) => {
                debug!(exchange = %self.exchange, path, status = raw.status, "← response");
                Ok(raw)
            }
        }
    }
}

/// `k=v&k=v` with url-encoded values, in the given order.
pub fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
