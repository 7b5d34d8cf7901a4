//! Two-phase scatter/gather with all-or-nothing semantics.
//!
//! Phase 1 (index) runs the resolver under the index budget. Phase 2
//! (storage) waits for every dispatched fetch under the storage budget,
//! measured from the moment phase 1 finished. Fetches started during
//! phase 1 keep running while phase 1 is still reading.
//!
//! The sync path runs its index lookup and its sequential storage reads
//! together under phase 1. Each read is also bounded by the storage
//! budget, and all of them reach phase 2 already complete.
//!
//! The first failed fetch ends phase 2 immediately. Leaving phase 2 for
//! any reason drops the remaining `PendingFetch` handles, which aborts
//! their tasks.

use std::future::Future;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use vigil_common::config::PhaseBudgets;
use vigil_common::error::{GatewayError, GatewayResult};
use vigil_common::records::{IndexSummary, StorageRecord};

use crate::resolver::{PendingFetch, Resolution};

/// Records of a successful query, in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedResponse {
    pub records: Vec<StorageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<IndexSummary>,
}

/// Per-query timings.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatherMetrics {
    pub index_phase: Duration,
    pub storage_phase: Duration,
    pub fetches: usize,
}

pub struct ScatterGatherAggregator {
    budgets: PhaseBudgets,
}

impl ScatterGatherAggregator {
    pub fn new(budgets: PhaseBudgets) -> Self {
        Self { budgets }
    }

    pub fn budgets(&self) -> PhaseBudgets {
        self.budgets
    }

    /// Run both phases. `resolve` is the index phase; it is dropped (and
    /// with it every fetch it dispatched) if the index budget elapses.
    pub async fn run<F>(&self, resolve: F) -> GatewayResult<(AggregatedResponse, GatherMetrics)>
    where
        F: Future<Output = GatewayResult<Resolution>>,
    {
        let index_start = Instant::now();
        let resolution = self.index_phase(resolve).await?;
        let index_phase = index_start.elapsed();
        let (response, mut metrics) = self.gather(resolution).await?;
        metrics.index_phase = index_phase;
        Ok((response, metrics))
    }

    /// Bound any index-phase work by the index budget.
    pub async fn index_phase<F, T>(&self, work: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        match tokio::time::timeout(self.budgets.index_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.budgets.index_timeout.as_millis() as u64;
                vigil_observability::record_phase_timeout("index");
                tracing::warn!(timeout_ms, "index phase timed out");
                Err(GatewayError::IndexPhaseTimeout { timeout_ms })
            }
        }
    }

    /// Storage phase over an already produced resolution.
    pub async fn gather(&self, resolution: Resolution) -> GatewayResult<(AggregatedResponse, GatherMetrics)> {
        let Resolution { pending, summary } = resolution;
        let fetches = pending.len();
        let storage_start = Instant::now();
        let records = self.storage_phase(pending).await?;
        let metrics = GatherMetrics {
            index_phase: Duration::ZERO,
            storage_phase: storage_start.elapsed(),
            fetches,
        };
        tracing::debug!(
            fetches,
            storage_ms = metrics.storage_phase.as_millis() as u64,
            "gather complete"
        );
        Ok((AggregatedResponse { records, summary }, metrics))
    }

    /// Wait for every fetch. Output position `i` holds the record of
    /// `pending[i]`, regardless of completion order.
    pub async fn storage_phase(&self, pending: Vec<PendingFetch>) -> GatewayResult<Vec<StorageRecord>> {
        let total = pending.len();
        let mut slots: Vec<Option<StorageRecord>> = (0..total).map(|_| None).collect();
        let mut completed = 0usize;

        let mut in_flight: FuturesUnordered<_> = pending
            .into_iter()
            .enumerate()
            .map(|(slot, fetch)| async move {
                let key = fetch.key().to_string();
                (slot, key, fetch.wait().await)
            })
            .collect();

        let gather = async {
            while let Some((slot, key, result)) = in_flight.next().await {
                vigil_observability::record_fetch_outcome(result.outcome_label());
                let record = result.into_result(&key).map_err(|e| {
                    tracing::warn!(key = %key, error = %e, "storage fetch failed, abandoning query");
                    e
                })?;
                slots[slot] = Some(record);
                completed += 1;
            }
            Ok::<(), GatewayError>(())
        };
        let outcome = tokio::time::timeout(self.budgets.storage_timeout, gather).await;
        // Remaining fetches are aborted here on every early exit.
        drop(in_flight);

        match outcome {
            Ok(Ok(())) => Ok(slots.into_iter().flatten().collect()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let timeout_ms = self.budgets.storage_timeout.as_millis() as u64;
                let outstanding = total - completed;
                vigil_observability::record_phase_timeout("storage");
                tracing::warn!(timeout_ms, outstanding, "storage phase timed out");
                Err(GatewayError::StoragePhaseTimeout {
                    timeout_ms,
                    pending: outstanding,
                })
            }
        }
    }
}
