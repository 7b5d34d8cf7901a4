//! HTTP fetch layer shared by the resolvers, the storage fan-out and the
//! pass-through forwarder.
//!
//! A single-record fetch never returns `Err`: every outcome (including a
//! timeout or a refused connection) is folded into a [`FetchResult`] so
//! the gather phase can treat all of them uniformly.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use vigil_common::error::{GatewayError, GatewayResult};
use vigil_common::records::StorageRecord;
use vigil_common::types::BackendEndpoint;

/// Header the indexing tier uses to choose a streamed (`@`-delimited) body.
pub const STREAM_HEADER: &str = "stream";
/// Header the indexing tier sets on a streamed answer; anything but `ok`
/// means the stream is unusable.
pub const STATUS_HEADER: &str = "status";

/// Outcome of one backend GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult<T = StorageRecord> {
    /// 200 with a decodable body.
    Success(T),
    /// 204: the backend has nothing for this key.
    NotFound,
    /// Any other status. The body is kept for diagnostics only.
    BackendError { status: u16, body: String },
    /// 200 whose body did not decode.
    Malformed(String),
    /// Connect failure or reset.
    TransportError(String),
    /// The per-call deadline elapsed.
    TimedOut { timeout_ms: u64 },
}

impl<T> FetchResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }

    /// Metric/log label.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            FetchResult::Success(_) => "success",
            FetchResult::NotFound => "not_found",
            FetchResult::BackendError { .. } => "backend_error",
            FetchResult::Malformed(_) => "malformed",
            FetchResult::TransportError(_) => "transport_error",
            FetchResult::TimedOut { .. } => "timed_out",
        }
    }

    /// Collapse a storage outcome into the error the gather phase surfaces
    /// for `key`.
    pub fn into_result(self, key: &str) -> GatewayResult<T> {
        match self {
            FetchResult::Success(value) => Ok(value),
            FetchResult::NotFound => Err(GatewayError::StoragePhaseFailure {
                key: key.to_string(),
                reason: "not found".into(),
            }),
            FetchResult::BackendError { status, .. } => Err(GatewayError::StoragePhaseFailure {
                key: key.to_string(),
                reason: format!("backend status {}", status),
            }),
            FetchResult::Malformed(e) => Err(GatewayError::Deserialization(format!(
                "record for key '{}': {}",
                key, e
            ))),
            FetchResult::TransportError(e) => Err(GatewayError::StoragePhaseFailure {
                key: key.to_string(),
                reason: format!("transport: {}", e),
            }),
            FetchResult::TimedOut { timeout_ms } => Err(GatewayError::StoragePhaseTimeout {
                timeout_ms,
                pending: 1,
            }),
        }
    }
}

/// Position and category of a decode failure. serde's own message can
/// quote the offending value, so it is not kept.
pub fn decode_error(e: &serde_json::Error) -> String {
    format!("{:?} error at line {} column {}", e.classify(), e.line(), e.column())
}

/// A reqwest failure without the backend URL it was sent to.
fn transport_reason(e: reqwest::Error) -> String {
    e.without_url().to_string()
}

/// Map a status code and a fully read body to a [`FetchResult`].
pub fn classify<T: DeserializeOwned>(status: u16, body: &[u8]) -> FetchResult<T> {
    match status {
        200 => match serde_json::from_slice::<T>(body) {
            Ok(value) => FetchResult::Success(value),
            Err(e) => FetchResult::Malformed(decode_error(&e)),
        },
        204 => FetchResult::NotFound,
        _ => FetchResult::BackendError {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

/// Fetches one storage record. Implemented by [`FetchClient`]; tests plug
/// in fakes.
#[async_trait]
pub trait StorageFetcher: Send + Sync + 'static {
    async fn fetch_record(
        &self,
        endpoint: &BackendEndpoint,
        key: &str,
        timeout: Duration,
    ) -> FetchResult;
}

/// Thin wrapper around a pooled `reqwest::Client`. Cheap to clone.
#[derive(Clone)]
pub struct FetchClient {
    http: reqwest::Client,
}

impl FetchClient {
    pub fn new() -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// GET `path` on `endpoint` and decode a 200 body as `T`.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint: &BackendEndpoint,
        path: &str,
        timeout: Duration,
    ) -> FetchResult<T> {
        self.fetch_url(endpoint.url(path), timeout).await
    }

    async fn fetch_url<T: DeserializeOwned>(&self, url: String, timeout: Duration) -> FetchResult<T> {
        let request = async {
            let response = self.http.get(&url).send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok((status, body))) => classify(status, &body),
            Ok(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "backend request failed");
                FetchResult::TransportError(transport_reason(e))
            }
            Err(_) => FetchResult::TimedOut {
                timeout_ms: timeout.as_millis() as u64,
            },
        }
    }

    /// GET `path` on `endpoint` and return status plus body text, whatever
    /// the status.
    pub async fn get_text(
        &self,
        endpoint: &BackendEndpoint,
        path: &BackendPath,
        timeout: Duration,
    ) -> GatewayResult<(u16, String)> {
        let url = path.url(endpoint)?;
        let started = Instant::now();
        let request = async {
            let response = self.http.get(&url).send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(out)) => {
                tracing::debug!(url = %url, status = out.0, elapsed_ms = started.elapsed().as_millis() as u64, "GET");
                Ok(out)
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "backend request failed");
                Err(GatewayError::Transport(transport_reason(e)))
            }
            Err(_) => Err(GatewayError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Open a streamed index lookup. Only the status line and headers have
    /// been received when this returns; the body is read by the caller.
    pub async fn open_stream(
        &self,
        endpoint: &BackendEndpoint,
        path: &str,
    ) -> GatewayResult<reqwest::Response> {
        let url = endpoint.url(path);
        tracing::debug!(url = %url, "opening index stream");
        self.http
            .get(&url)
            .header(STREAM_HEADER, "true")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %url, error = %e, "index stream request failed");
                GatewayError::Transport(transport_reason(e))
            })
    }
}

/// Backend path made of raw segments plus an optional query string.
///
/// Each segment is percent-encoded on its own, so a `/`, `?` or `#` inside
/// a client-supplied value stays part of that segment. A trailing empty
/// segment yields a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPath {
    segments: Vec<String>,
    query: Option<String>,
}

impl BackendPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            query: None,
        }
    }

    /// Attach an already-encoded query string (without the `?`).
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn url(&self, endpoint: &BackendEndpoint) -> GatewayResult<String> {
        let mut url = reqwest::Url::parse(&endpoint.base_url())
            .map_err(|e| GatewayError::Config(format!("bad endpoint {}: {}", endpoint, e)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Config(format!("endpoint {} cannot be a base", endpoint)))?
            .pop_if_empty()
            .extend(&self.segments);
        if let Some(query) = &self.query {
            url.set_query(Some(query));
        }
        Ok(url.into())
    }
}

impl std::fmt::Display for BackendPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

/// URL of the storage lookup for `key`, with the key as a single segment.
pub fn storage_key_url(endpoint: &BackendEndpoint, key: &str) -> GatewayResult<String> {
    BackendPath::new(["key", key]).url(endpoint)
}

#[async_trait]
impl StorageFetcher for FetchClient {
    async fn fetch_record(
        &self,
        endpoint: &BackendEndpoint,
        key: &str,
        timeout: Duration,
    ) -> FetchResult {
        let url = match storage_key_url(endpoint, key) {
            Ok(url) => url,
            Err(e) => return FetchResult::TransportError(e.to_string()),
        };
        let result = self.fetch_url(url, timeout).await;
        tracing::debug!(
            endpoint = %endpoint.authority(),
            key = %key,
            outcome = result.outcome_label(),
            "storage fetch"
        );
        result
    }
}
