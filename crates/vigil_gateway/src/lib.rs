//! Fan-out/fan-in engine of the gateway: backend pools, index resolvers,
//! storage fan-out with two phase deadlines, and pass-through forwarding.
//!
//! A data query is index lookup first, then one storage fetch per key the
//! index reported. The answer is all-or-nothing: every record, in
//! index order, or a single error.

pub mod fetch;
pub mod forwarder;
pub mod metrics_table;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod scatter_gather;

pub use fetch::{BackendPath, FetchClient, FetchResult, StorageFetcher};
pub use forwarder::SimpleForwarder;
pub use metrics_table::{MetricsInfo, MetricsInfoTable, MetricsTableSnapshot};
pub use orchestrator::QueryOrchestrator;
pub use registry::{BackendPool, BackendRegistry, RegisterOutcome};
pub use resolver::{
    ChunkSplitter, IndexChunkStream, PendingFetch, Resolution, ResolveMode, StorageDispatcher,
    StreamChunkResolver, SyncKeyResolver,
};
pub use scatter_gather::{AggregatedResponse, GatherMetrics, ScatterGatherAggregator};
