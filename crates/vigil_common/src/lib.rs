//! Shared vocabulary of the vigil gateway: backend addressing, client query
//! shapes, wire records, the error taxonomy and the configuration schema.

pub mod config;
pub mod error;
pub mod query;
pub mod records;
pub mod types;

pub use config::{GatewayConfig, PhaseBudgets};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use query::ClientQuery;
pub use records::{IndexChunk, IndexSummary, IndexSyncResponse, StorageRecord};
pub use types::{BackendEndpoint, ServiceClass};
