//! Single-request pass-through to the simple tiers (online, offline,
//! data-consuming, and direct indexing/storage calls).

use std::sync::Arc;
use std::time::{Duration, Instant};

use vigil_common::error::{GatewayError, GatewayResult};
use vigil_common::types::ServiceClass;

use crate::fetch::{BackendPath, FetchClient};
use crate::registry::BackendRegistry;

pub struct SimpleForwarder {
    registry: Arc<BackendRegistry>,
    client: FetchClient,
}

impl SimpleForwarder {
    pub fn new(registry: Arc<BackendRegistry>, client: FetchClient) -> Self {
        Self { registry, client }
    }

    /// GET `path` on the next endpoint of `service` and return the body of
    /// a 2xx answer verbatim.
    pub async fn forward(
        &self,
        service: ServiceClass,
        path: &BackendPath,
        timeout: Duration,
    ) -> GatewayResult<String> {
        let endpoint = self.registry.select(service)?;
        let started = Instant::now();
        let result = match self.client.get_text(&endpoint, path, timeout).await {
            Ok((status, body)) if (200..300).contains(&status) => Ok(body),
            Ok((status, body)) => Err(GatewayError::Backend { status, body }),
            Err(e) => Err(e),
        };
        let elapsed_us = started.elapsed().as_micros() as u64;
        vigil_observability::record_forward(service.as_str(), result.is_ok(), elapsed_us);
        if let Err(e) = &result {
            tracing::warn!(
                service = %service,
                endpoint = %endpoint.authority(),
                path = %path,
                error = %e,
                "forward failed"
            );
        }
        result
    }

    /// [`forward`](Self::forward) addressed by pool name.
    pub async fn forward_named(
        &self,
        pool: &str,
        path: &BackendPath,
        timeout: Duration,
    ) -> GatewayResult<String> {
        let service: ServiceClass = pool.parse()?;
        self.forward(service, path, timeout).await
    }
}
