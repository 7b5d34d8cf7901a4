//! Synchronous resolver: one JSON index answer, then one storage fetch per
//! key, strictly one after the other.

use std::time::Duration;

use vigil_common::config::PhaseBudgets;
use vigil_common::error::{GatewayError, GatewayResult};
use vigil_common::records::IndexSyncResponse;
use vigil_common::types::BackendEndpoint;

use super::{PendingFetch, Resolution, StorageDispatcher};
use crate::fetch::{FetchClient, FetchResult};

pub struct SyncKeyResolver {
    client: FetchClient,
    dispatcher: StorageDispatcher,
}

impl SyncKeyResolver {
    pub fn new(client: FetchClient, dispatcher: StorageDispatcher) -> Self {
        Self { client, dispatcher }
    }

    /// Fetch the key list for `path` from `index`, bounded by `timeout`.
    /// A 204 is read as an empty list.
    pub async fn lookup(
        &self,
        index: &BackendEndpoint,
        path: &str,
        timeout: Duration,
    ) -> GatewayResult<IndexSyncResponse> {
        match self.client.fetch::<IndexSyncResponse>(index, path, timeout).await {
            FetchResult::Success(response) => Ok(response),
            FetchResult::NotFound => Ok(IndexSyncResponse::default()),
            FetchResult::BackendError { status, body } => {
                tracing::warn!(index = %index.authority(), status, "index lookup failed");
                Err(GatewayError::Backend { status, body })
            }
            FetchResult::Malformed(e) => Err(GatewayError::Deserialization(format!("index answer: {}", e))),
            FetchResult::TransportError(e) => Err(GatewayError::Transport(e)),
            FetchResult::TimedOut { timeout_ms } => Err(GatewayError::IndexPhaseTimeout { timeout_ms }),
        }
    }

    /// Fetch every key of an index answer, one after the other. Each call
    /// is bounded by the storage budget and the first failure ends the
    /// resolution. The returned fetches are all complete.
    pub async fn resolve_response(
        &self,
        response: IndexSyncResponse,
        budgets: PhaseBudgets,
    ) -> GatewayResult<Resolution> {
        let summary = response.summary();
        let total = response.keys.len();
        tracing::debug!(keys = total, count = %summary.count, "sync index answer");

        let mut pending = Vec::with_capacity(total);
        for (seq, chunk) in response.keys.into_iter().enumerate() {
            let record = self
                .dispatcher
                .fetch_inline(&chunk, budgets.storage_timeout)
                .await
                .and_then(|result| {
                    vigil_observability::record_fetch_outcome(result.outcome_label());
                    result.into_result(&chunk.key)
                })
                .map_err(|e| match e {
                    GatewayError::StoragePhaseTimeout { timeout_ms, .. } => {
                        vigil_observability::record_phase_timeout("storage");
                        GatewayError::StoragePhaseTimeout {
                            timeout_ms,
                            pending: total - seq,
                        }
                    }
                    other => other,
                })?;
            pending.push(PendingFetch::ready(seq, chunk.key, FetchResult::Success(record)));
        }

        Ok(Resolution {
            pending,
            summary: Some(summary),
        })
    }
}
