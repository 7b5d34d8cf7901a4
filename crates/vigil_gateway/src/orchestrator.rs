//! Per-request entry point for client data queries.

use std::sync::Arc;
use std::time::Instant;

use vigil_common::config::PhaseBudgets;
use vigil_common::error::GatewayResult;
use vigil_common::query::ClientQuery;
use vigil_common::types::ServiceClass;

use crate::fetch::{FetchClient, StorageFetcher};
use crate::registry::BackendRegistry;
use crate::resolver::{ResolveMode, StorageDispatcher, StreamChunkResolver, SyncKeyResolver};
use crate::scatter_gather::{AggregatedResponse, ScatterGatherAggregator};

/// Validates a query, picks an indexing endpoint, runs the chosen resolver
/// through the scatter/gather aggregator. Shared across requests.
pub struct QueryOrchestrator {
    registry: Arc<BackendRegistry>,
    streaming: StreamChunkResolver,
    sync: SyncKeyResolver,
}

impl QueryOrchestrator {
    pub fn new(registry: Arc<BackendRegistry>, client: FetchClient) -> Self {
        let fetcher: Arc<dyn StorageFetcher> = Arc::new(client.clone());
        Self::with_fetcher(registry, client, fetcher)
    }

    /// Like [`new`](Self::new) with a custom storage fetcher.
    pub fn with_fetcher(
        registry: Arc<BackendRegistry>,
        client: FetchClient,
        fetcher: Arc<dyn StorageFetcher>,
    ) -> Self {
        let dispatcher = StorageDispatcher::new(registry.clone(), fetcher);
        Self {
            streaming: StreamChunkResolver::new(client.clone(), dispatcher.clone()),
            sync: SyncKeyResolver::new(client, dispatcher),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub async fn handle(
        &self,
        query: &ClientQuery,
        mode: ResolveMode,
        budgets: PhaseBudgets,
    ) -> GatewayResult<AggregatedResponse> {
        let started = Instant::now();
        let result = self.run(query, mode, budgets).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        vigil_observability::record_query_metrics(
            started.elapsed().as_micros() as u64,
            mode.as_str(),
            outcome,
        );
        match &result {
            Ok(resp) => tracing::info!(
                query = %query,
                mode = mode.as_str(),
                records = resp.records.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "query served"
            ),
            Err(e) => tracing::warn!(
                query = %query,
                mode = mode.as_str(),
                kind = e.kind().as_str(),
                error = %e,
                "query failed"
            ),
        }
        result
    }

    async fn run(
        &self,
        query: &ClientQuery,
        mode: ResolveMode,
        budgets: PhaseBudgets,
    ) -> GatewayResult<AggregatedResponse> {
        query.validate()?;
        let index = self.registry.select(ServiceClass::Indexing)?;
        let path = query.index_path();
        tracing::debug!(index = %index.authority(), path = %path, mode = mode.as_str(), "resolving");

        let aggregator = ScatterGatherAggregator::new(budgets);
        let (response, metrics) = match mode {
            ResolveMode::Streaming => {
                // A streamed fetch may start at the beginning of the index
                // phase; its own deadline must outlast both phases.
                let fetch_timeout = budgets.index_timeout + budgets.storage_timeout;
                aggregator
                    .run(self.streaming.resolve(&index, &path, fetch_timeout))
                    .await?
            }
            ResolveMode::Sync => {
                // Lookup and the sequential storage reads share the index
                // budget; the records reach phase 2 already fetched.
                let resolve = async {
                    let answer = self.sync.lookup(&index, &path, budgets.index_timeout).await?;
                    self.sync.resolve_response(answer, budgets).await
                };
                aggregator.run(resolve).await?
            }
        };
        vigil_observability::record_fanout(metrics.fetches);
        Ok(response)
    }
}
