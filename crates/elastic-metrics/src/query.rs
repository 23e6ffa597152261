//! Prometheus instant-query client.
//!
//! Issues `GET /api/v1/query?query=...` over a plain HTTP/1 connection and
//! reduces the answer to a single scalar. Every query is bounded by the
//! client's timeout so a stalled server surfaces as an error instead of
//! blocking the caller.

use std::time::Duration;

use http_body_util::BodyExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Upper bound for a single query unless configured otherwise.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors returned by [`PrometheusClient`].
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unsupported prometheus address: {0}")]
    InvalidAddress(String),

    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("http error: {0}")]
    Http(String),

    #[error("prometheus returned status {0}")]
    Status(u16),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("query failed: {0}")]
    Failed(String),
}

/// Minimal client for the Prometheus HTTP query API.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    /// `host:port` of the Prometheus server.
    address: String,
    timeout: Duration,
}

impl PrometheusClient {
    /// Create a client for a `host:port` address.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// Create a client from a URL such as `http://prometheus:9090`.
    ///
    /// Only plain `http` is supported.
    pub fn from_url(url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let rest = url
            .trim()
            .strip_prefix("http://")
            .ok_or_else(|| QueryError::InvalidAddress(url.to_string()))?;
        let address = rest.trim_end_matches('/');
        if address.is_empty() || address.contains('/') {
            return Err(QueryError::InvalidAddress(url.to_string()));
        }
        Ok(Self::new(address, timeout))
    }

    /// The `host:port` this client talks to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The per-query time bound.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run an instant query and return its scalar value.
    ///
    /// For vector results the value of the last sample is returned; an
    /// empty vector reads as `0.0`.
    pub async fn query_scalar(&self, promql: &str) -> Result<f64, QueryError> {
        let path = format!(
            "/api/v1/query?query={}",
            utf8_percent_encode(promql, NON_ALPHANUMERIC)
        );

        let body = tokio::time::timeout(self.timeout, self.get(&path))
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))??;

        let value = parse_query_response(&body)?;
        debug!(address = %self.address, %promql, value, "prometheus query answered");
        Ok(value)
    }

    async fn get(&self, path: &str) -> Result<bytes::Bytes, QueryError> {
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| QueryError::Connect {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| QueryError::Http(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", self.address.as_str())
            .header("accept", "application/json")
            .header("user-agent", "elastic-metrics/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| QueryError::Http(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| QueryError::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| QueryError::Http(e.to_string()))?
            .to_bytes();

        // Prometheus reports query errors as 4xx with a JSON error body.
        if !status.is_success() {
            if let Ok(QueryResponse {
                error: Some(error), ..
            }) = serde_json::from_slice::<QueryResponse>(&body)
            {
                return Err(QueryError::Failed(error));
            }
            return Err(QueryError::Status(status.as_u16()));
        }
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    value: (f64, String),
}

/// Reduce a Prometheus query API response body to one scalar.
pub fn parse_query_response(body: &[u8]) -> Result<f64, QueryError> {
    let resp: QueryResponse =
        serde_json::from_slice(body).map_err(|e| QueryError::Decode(e.to_string()))?;

    if resp.status != "success" {
        return Err(QueryError::Failed(
            resp.error.unwrap_or_else(|| resp.status.clone()),
        ));
    }
    let data = resp
        .data
        .ok_or_else(|| QueryError::Decode("missing data".to_string()))?;

    let raw = match data.result_type.as_str() {
        "vector" => {
            let samples: Vec<VectorSample> = serde_json::from_value(data.result)
                .map_err(|e| QueryError::Decode(e.to_string()))?;
            match samples.last() {
                Some(sample) => sample.value.1.clone(),
                None => return Ok(0.0),
            }
        }
        "scalar" => {
            let (_, value): (f64, String) = serde_json::from_value(data.result)
                .map_err(|e| QueryError::Decode(e.to_string()))?;
            value
        }
        other => {
            return Err(QueryError::Decode(format!("unsupported result type {other}")));
        }
    };

    raw.parse::<f64>()
        .map_err(|e| QueryError::Decode(format!("sample value {raw:?}: {e}")))
}
