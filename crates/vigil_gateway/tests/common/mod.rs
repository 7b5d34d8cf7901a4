#![allow(dead_code, unused_imports)]

//! In-process stub backends for the gateway integration tests.

pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use vigil_common::config::PhaseBudgets;
pub use vigil_common::error::GatewayError;
pub use vigil_common::query::ClientQuery;
pub use vigil_common::records::StorageRecord;
pub use vigil_common::types::{BackendEndpoint, ServiceClass};
pub use vigil_gateway::{
    BackendPath, BackendRegistry, FetchClient, FetchResult, QueryOrchestrator, ResolveMode,
    SimpleForwarder, StorageFetcher,
};

/// A running stub; shut down on drop.
pub struct StubServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub fn endpoint(&self, service: ServiceClass) -> BackendEndpoint {
        BackendEndpoint::new(service, self.addr.ip().to_string(), self.addr.port())
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn serve(router: Router) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    StubServer { addr, handle }
}

// ---------------------------------------------------------------------------
// Indexing stub
// ---------------------------------------------------------------------------

/// Scripted indexing backend.
///
/// With `stream: true` it answers `parts` one read at a time, sleeping
/// `part_delay` before each. Otherwise it answers the `sync_body` JSON.
pub struct IndexStub {
    pub parts: Vec<Vec<u8>>,
    pub part_delay: Duration,
    pub initial_delay: Duration,
    pub status: u16,
    pub status_header: Option<String>,
    pub sync_body: String,
    pub requests: Mutex<Vec<String>>,
    pub finished_at: Mutex<Option<Instant>>,
}

impl Default for IndexStub {
    fn default() -> Self {
        Self {
            parts: Vec::new(),
            part_delay: Duration::ZERO,
            initial_delay: Duration::ZERO,
            status: 200,
            status_header: Some("ok".into()),
            sync_body: r#"{"status":"ok","timestamp":"0","count":"0","keys":[]}"#.into(),
            requests: Mutex::new(Vec::new()),
            finished_at: Mutex::new(None),
        }
    }
}

impl IndexStub {
    /// Streamed body of `keys`, cut at the given byte offsets.
    pub fn streaming(keys: &[&str], cuts: &[usize]) -> Self {
        let body = keys
            .iter()
            .map(|k| format!(r#"{{"key":"{}"}}"#, k))
            .collect::<Vec<_>>()
            .join("@")
            .into_bytes();
        let mut parts = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            parts.push(body[start..cut].to_vec());
            start = cut;
        }
        parts.push(body[start..].to_vec());
        Self {
            parts,
            ..Self::default()
        }
    }

    pub fn sync(keys: &[&str], count: &str) -> Self {
        let keys = keys
            .iter()
            .map(|k| format!(r#"{{"key":"{}"}}"#, k))
            .collect::<Vec<_>>()
            .join(",");
        Self {
            sync_body: format!(
                r#"{{"status":"ok","timestamp":"1700000000","count":"{}","keys":[{}]}}"#,
                count, keys
            ),
            ..Self::default()
        }
    }
}

async fn index_handler(
    State(stub): State<Arc<IndexStub>>,
    Path(from): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut seen = format!("from={}", from);
    for name in ["to", "count"] {
        if let Some(v) = params.get(name) {
            seen.push_str(&format!(",{}={}", name, v));
        }
    }
    stub.requests.lock().push(seen);

    tokio::time::sleep(stub.initial_delay).await;
    let streamed = headers
        .get("stream")
        .map(|v| v.as_bytes() == b"true")
        .unwrap_or(false);

    let mut response = if streamed {
        let total = stub.parts.len();
        let delay = stub.part_delay;
        let parts = stub.parts.clone();
        let tracker = stub.clone();
        let body = futures::stream::iter(parts.into_iter().enumerate()).then(move |(i, part)| {
            let tracker = tracker.clone();
            async move {
                tokio::time::sleep(delay).await;
                if i + 1 == total {
                    *tracker.finished_at.lock() = Some(Instant::now());
                }
                Ok::<_, std::io::Error>(Bytes::from(part))
            }
        });
        Response::new(Body::from_stream(body))
    } else {
        Response::new(Body::from(stub.sync_body.clone()))
    };
    *response.status_mut() = StatusCode::from_u16(stub.status).unwrap();
    if let Some(h) = &stub.status_header {
        response
            .headers_mut()
            .insert("status", HeaderValue::from_str(h).unwrap());
    }
    response
}

pub async fn spawn_index(stub: IndexStub) -> (StubServer, Arc<IndexStub>) {
    let stub = Arc::new(stub);
    let router = Router::new()
        .route("/getIndexData/:from", get(index_handler))
        .with_state(stub.clone());
    (serve(router).await, stub)
}

// ---------------------------------------------------------------------------
// Storage stub
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum KeyBehaviour {
    Value(String),
    Delayed(Duration, String),
    NoContent,
    Status(u16),
    Garbage,
}

/// Scripted storage backend. Unlisted keys answer `v-<key>`.
#[derive(Default)]
pub struct StorageStub {
    pub behaviour: HashMap<String, KeyBehaviour>,
    pub hits: Mutex<Vec<(String, Instant)>>,
    pub completed: AtomicUsize,
}

impl StorageStub {
    pub fn with(mut self, key: &str, behaviour: KeyBehaviour) -> Self {
        self.behaviour.insert(key.to_string(), behaviour);
        self
    }

    pub fn hit_keys(&self) -> Vec<String> {
        self.hits.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn first_hit(&self) -> Option<Instant> {
        self.hits.lock().iter().map(|(_, t)| *t).min()
    }
}

fn record_json(key: &str, value: &str) -> String {
    format!(r#"{{"key":"{}","ts":"1","value":"{}"}}"#, key, value)
}

async fn storage_handler(State(stub): State<Arc<StorageStub>>, Path(key): Path<String>) -> Response {
    stub.hits.lock().push((key.clone(), Instant::now()));
    let behaviour = stub
        .behaviour
        .get(&key)
        .cloned()
        .unwrap_or_else(|| KeyBehaviour::Value(format!("v-{}", key)));
    let response = match behaviour {
        KeyBehaviour::Value(v) => (StatusCode::OK, record_json(&key, &v)).into_response(),
        KeyBehaviour::Delayed(d, v) => {
            tokio::time::sleep(d).await;
            (StatusCode::OK, record_json(&key, &v)).into_response()
        }
        KeyBehaviour::NoContent => StatusCode::NO_CONTENT.into_response(),
        KeyBehaviour::Status(code) => {
            (StatusCode::from_u16(code).unwrap(), "storage failure").into_response()
        }
        KeyBehaviour::Garbage => (StatusCode::OK, "{not json").into_response(),
    };
    stub.completed.fetch_add(1, Ordering::SeqCst);
    response
}

pub async fn spawn_storage(stub: StorageStub) -> (StubServer, Arc<StorageStub>) {
    let stub = Arc::new(stub);
    let router = Router::new()
        .route("/key/:key", get(storage_handler))
        .with_state(stub.clone());
    (serve(router).await, stub)
}

// ---------------------------------------------------------------------------
// Simple tier stub
// ---------------------------------------------------------------------------

/// Answers `GET /*path` with `body`, after `delay`, using `status`.
pub async fn spawn_plain(status: u16, body: &'static str, delay: Duration) -> StubServer {
    let router = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        (StatusCode::from_u16(status).unwrap(), body)
    });
    serve(router).await
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn budgets(index_ms: u64, storage_ms: u64) -> PhaseBudgets {
    PhaseBudgets::new(Duration::from_millis(index_ms), Duration::from_millis(storage_ms))
}

pub fn orchestrator(index: &[&StubServer], storage: &[&StubServer]) -> QueryOrchestrator {
    let registry = BackendRegistry::new();
    for s in index {
        registry.register(ServiceClass::Indexing, s.endpoint(ServiceClass::Indexing));
    }
    for s in storage {
        registry.register(ServiceClass::Storage, s.endpoint(ServiceClass::Storage));
    }
    QueryOrchestrator::new(registry, FetchClient::new().unwrap())
}

/// In-process storage fetcher that sleeps `delay` before answering
/// `v-<key>`. `finished` only moves if the fetch task was not aborted.
pub struct SlowFetcher {
    pub delay: Duration,
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
}

impl SlowFetcher {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl StorageFetcher for SlowFetcher {
    async fn fetch_record(&self, _endpoint: &BackendEndpoint, key: &str, _timeout: Duration) -> FetchResult {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        FetchResult::Success(StorageRecord::new(key, "1", format!("v-{}", key)))
    }
}

/// Orchestrator over real index stubs whose storage reads go to `fetcher`.
pub fn orchestrator_with_fetcher(
    index: &[&StubServer],
    fetcher: Arc<dyn StorageFetcher>,
) -> QueryOrchestrator {
    let registry = BackendRegistry::new();
    for s in index {
        registry.register(ServiceClass::Indexing, s.endpoint(ServiceClass::Indexing));
    }
    registry.register(
        ServiceClass::Storage,
        BackendEndpoint::new(ServiceClass::Storage, "127.0.0.1", 1),
    );
    QueryOrchestrator::with_fetcher(registry, FetchClient::new().unwrap(), fetcher)
}

pub fn keys_of(records: &[StorageRecord]) -> Vec<&str> {
    records.iter().map(|r| r.key.as_str()).collect()
}
