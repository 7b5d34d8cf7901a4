//! Index-phase resolvers: turn one index lookup into a list of dispatched
//! storage fetches.
//!
//! Two strategies exist:
//!
//! - [`StreamChunkResolver`] reads an `@`-delimited streamed body and
//!   dispatches a storage fetch as soon as each key is decoded, so
//!   storage work overlaps index reading.
//! - [`SyncKeyResolver`] decodes a full JSON key list and fetches the keys
//!   one after the other.
//!
//! Both return a [`Resolution`] whose pending fetches are in dispatch
//! order. The gather phase keeps that order in its output.

pub mod chunks;
pub mod streaming;
pub mod sync;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use vigil_common::error::{GatewayError, GatewayResult};
use vigil_common::records::{IndexChunk, IndexSummary};
use vigil_common::types::ServiceClass;

use crate::fetch::{FetchResult, StorageFetcher};
use crate::registry::BackendRegistry;

pub use chunks::{parse_chunk, ChunkSplitter, IndexChunkStream, CHUNK_DELIMITER};
pub use streaming::StreamChunkResolver;
pub use sync::SyncKeyResolver;

// ---------------------------------------------------------------------------
// ResolveMode
// ---------------------------------------------------------------------------

/// Which resolver a query runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    Streaming,
    #[default]
    Sync,
}

impl ResolveMode {
    /// Interpret the client's `stream` flag. Missing means sync; anything
    /// other than `true`/`false` is logged and treated as sync.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(|f| f.trim().to_ascii_lowercase()) {
            None => ResolveMode::Sync,
            Some(f) if f == "true" => ResolveMode::Streaming,
            Some(f) if f == "false" => ResolveMode::Sync,
            Some(other) => {
                tracing::warn!(flag = %other, "unrecognized stream flag, using sync mode");
                ResolveMode::Sync
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveMode::Streaming => "streaming",
            ResolveMode::Sync => "sync",
        }
    }
}

impl From<bool> for ResolveMode {
    fn from(streaming: bool) -> Self {
        if streaming {
            ResolveMode::Streaming
        } else {
            ResolveMode::Sync
        }
    }
}

// ---------------------------------------------------------------------------
// PendingFetch
// ---------------------------------------------------------------------------

enum PendingState {
    InFlight(JoinHandle<FetchResult>),
    Ready(FetchResult),
    Taken,
}

/// Handle to a dispatched storage fetch.
///
/// Dropping a handle whose fetch is still running aborts the fetch task,
/// so abandoning a request (deadline, fail-fast, client gone) stops every
/// outstanding storage call it started.
pub struct PendingFetch {
    seq: usize,
    key: String,
    state: PendingState,
}

impl PendingFetch {
    /// Run `fetch` on the runtime and track it.
    pub fn spawn<F>(seq: usize, key: impl Into<String>, fetch: F) -> Self
    where
        F: Future<Output = FetchResult> + Send + 'static,
    {
        Self {
            seq,
            key: key.into(),
            state: PendingState::InFlight(tokio::spawn(fetch)),
        }
    }

    /// A fetch that has already completed.
    pub fn ready(seq: usize, key: impl Into<String>, result: FetchResult) -> Self {
        Self {
            seq,
            key: key.into(),
            state: PendingState::Ready(result),
        }
    }

    /// Dispatch position, starting at 0.
    pub fn seq(&self) -> usize {
        self.seq
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            PendingState::InFlight(handle) => handle.is_finished(),
            PendingState::Ready(_) | PendingState::Taken => true,
        }
    }

    /// Wait for the outcome. Dropping this future before it resolves
    /// aborts the fetch.
    pub async fn wait(mut self) -> FetchResult {
        if let PendingState::InFlight(handle) = &mut self.state {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => FetchResult::TransportError(format!("fetch task failed: {}", e)),
            };
            self.state = PendingState::Ready(outcome);
        }
        match std::mem::replace(&mut self.state, PendingState::Taken) {
            PendingState::Ready(result) => result,
            _ => FetchResult::TransportError("fetch outcome already consumed".into()),
        }
    }
}

impl Drop for PendingFetch {
    fn drop(&mut self) {
        if let PendingState::InFlight(handle) = &self.state {
            if !handle.is_finished() {
                handle.abort();
                vigil_observability::record_fetch_cancelled();
                tracing::debug!(seq = self.seq, key = %self.key, "storage fetch cancelled");
            }
        }
    }
}

impl std::fmt::Debug for PendingFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFetch")
            .field("seq", &self.seq)
            .field("key", &self.key)
            .field("finished", &self.is_finished())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// What a resolver hands the gather phase.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Fetches in dispatch order.
    pub pending: Vec<PendingFetch>,
    /// Metadata of a synchronous index answer; `None` for streams.
    pub summary: Option<IndexSummary>,
}

// ---------------------------------------------------------------------------
// StorageDispatcher
// ---------------------------------------------------------------------------

/// Picks a storage endpoint per key (round robin) and starts the fetch.
#[derive(Clone)]
pub struct StorageDispatcher {
    registry: Arc<BackendRegistry>,
    fetcher: Arc<dyn StorageFetcher>,
}

impl StorageDispatcher {
    pub fn new(registry: Arc<BackendRegistry>, fetcher: Arc<dyn StorageFetcher>) -> Self {
        Self { registry, fetcher }
    }

    /// Start a background fetch for `chunk`. `timeout` bounds the single
    /// call. Fails with `PoolEmpty(storage)` if no storage endpoint exists.
    pub fn dispatch(
        &self,
        seq: usize,
        chunk: IndexChunk,
        timeout: Duration,
    ) -> GatewayResult<PendingFetch> {
        let endpoint = self.registry.select(ServiceClass::Storage)?;
        tracing::debug!(seq, key = %chunk.key, endpoint = %endpoint.authority(), "dispatching storage fetch");
        let fetcher = self.fetcher.clone();
        let key = chunk.key.clone();
        Ok(PendingFetch::spawn(seq, chunk.key, async move {
            fetcher.fetch_record(&endpoint, &key, timeout).await
        }))
    }

    /// Fetch `chunk` on the calling task. The whole call, including the
    /// endpoint choice, is bounded by `timeout`.
    pub async fn fetch_inline(&self, chunk: &IndexChunk, timeout: Duration) -> GatewayResult<FetchResult> {
        let endpoint = self.registry.select(ServiceClass::Storage)?;
        match tokio::time::timeout(timeout, self.fetcher.fetch_record(&endpoint, &chunk.key, timeout)).await {
            Ok(result) => Ok(result),
            Err(_) => Err(GatewayError::StoragePhaseTimeout {
                timeout_ms: timeout.as_millis() as u64,
                pending: 1,
            }),
        }
    }
}
