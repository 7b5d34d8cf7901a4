//! Backend registry: one round-robin pool per service class.
//!
//! Every pool keeps its members and its rotation cursor behind a single
//! mutex, so a `next()` reads the pool size and advances the cursor in one
//! critical section and a concurrent `register()` can never produce an
//! out-of-range or skipped index.
//!
//! Rotation: the first `next()` returns member 0, each later call returns
//! `(previous + 1) % size`. The cursor is shared by every caller of the pool.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use vigil_common::error::{GatewayError, GatewayResult};
use vigil_common::types::{BackendEndpoint, ServiceClass};

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    AlreadyPresent,
}

impl RegisterOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterOutcome::Added => "added",
            RegisterOutcome::AlreadyPresent => "already_present",
        }
    }
}

struct PoolInner {
    members: Vec<BackendEndpoint>,
    /// Index handed out by the previous `next()`; `None` until the first call.
    cursor: Option<usize>,
}

/// Ordered members of one service class plus the rotation cursor.
pub struct BackendPool {
    service: ServiceClass,
    inner: Mutex<PoolInner>,
}

impl BackendPool {
    fn new(service: ServiceClass) -> Self {
        Self {
            service,
            inner: Mutex::new(PoolInner {
                members: Vec::new(),
                cursor: None,
            }),
        }
    }

    pub fn service(&self) -> ServiceClass {
        self.service
    }

    /// Append `endpoint` unless an equal `(host, port)` is already a member.
    pub fn register(&self, endpoint: BackendEndpoint) -> RegisterOutcome {
        let mut inner = self.inner.lock();
        if inner.members.contains(&endpoint) {
            tracing::warn!(
                service = %self.service,
                endpoint = %endpoint.authority(),
                "endpoint already registered, ignoring"
            );
            return RegisterOutcome::AlreadyPresent;
        }
        tracing::info!(
            service = %self.service,
            endpoint = %endpoint.authority(),
            position = inner.members.len(),
            "endpoint registered"
        );
        inner.members.push(endpoint);
        vigil_observability::record_pool_size(self.service.as_str(), inner.members.len());
        RegisterOutcome::Added
    }

    /// Next member in rotation, or `None` when the pool is empty.
    pub fn next(&self) -> Option<BackendEndpoint> {
        let mut inner = self.inner.lock();
        let size = inner.members.len();
        if size == 0 {
            return None;
        }
        let idx = match inner.cursor {
            None => 0,
            Some(prev) => (prev + 1) % size,
        };
        inner.cursor = Some(idx);
        Some(inner.members[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members in registration order.
    pub fn members(&self) -> Vec<BackendEndpoint> {
        self.inner.lock().members.clone()
    }
}

/// All backend pools of the gateway, keyed by service class.
///
/// Built once at startup and shared by `Arc` with every component that
/// selects backends.
pub struct BackendRegistry {
    pools: HashMap<ServiceClass, BackendPool>,
}

impl BackendRegistry {
    pub fn new() -> Arc<Self> {
        let pools = ServiceClass::ALL
            .iter()
            .map(|&service| (service, BackendPool::new(service)))
            .collect();
        Arc::new(Self { pools })
    }

    pub fn pool(&self, service: ServiceClass) -> &BackendPool {
        // Every class gets a pool in `new()`.
        &self.pools[&service]
    }

    /// Register `endpoint` into the pool of `service`. The endpoint is
    /// re-tagged with `service` if it was built for another class.
    pub fn register(&self, service: ServiceClass, endpoint: BackendEndpoint) -> RegisterOutcome {
        let endpoint = if endpoint.service == service {
            endpoint
        } else {
            BackendEndpoint { service, ..endpoint }
        };
        self.pool(service).register(endpoint)
    }

    /// Register by pool name (`"indexing"`, `"storage"`, ...).
    pub fn register_named(
        &self,
        pool: &str,
        endpoint: BackendEndpoint,
    ) -> GatewayResult<RegisterOutcome> {
        let service: ServiceClass = pool.parse()?;
        Ok(self.register(service, endpoint))
    }

    /// Next endpoint of `service`, or `None` if nothing is registered.
    pub fn next(&self, service: ServiceClass) -> Option<BackendEndpoint> {
        self.pool(service).next()
    }

    /// Like [`next`](Self::next) but maps an empty pool to `PoolEmpty`.
    pub fn select(&self, service: ServiceClass) -> GatewayResult<BackendEndpoint> {
        self.next(service).ok_or(GatewayError::PoolEmpty { service })
    }

    /// Member count per class.
    pub fn sizes(&self) -> Vec<(ServiceClass, usize)> {
        ServiceClass::ALL
            .iter()
            .map(|&s| (s, self.pool(s).len()))
            .collect()
    }
}
