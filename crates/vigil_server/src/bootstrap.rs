//! Registry bootstrap: probe and register the statically configured
//! backends, and the same probe-then-register step for runtime
//! `/add*` calls.

use std::time::Duration;

use tokio::net::TcpStream;

use vigil_common::config::GatewayConfig;
use vigil_common::error::{GatewayError, GatewayResult};
use vigil_common::types::BackendEndpoint;
use vigil_gateway::{BackendRegistry, RegisterOutcome};

/// TCP connect to `endpoint`, bounded by `timeout`.
pub async fn probe(endpoint: &BackendEndpoint, timeout: Duration) -> GatewayResult<()> {
    let unavailable = |reason: String| GatewayError::Unavailable {
        service: endpoint.service,
        reason,
    };
    match tokio::time::timeout(timeout, TcpStream::connect(endpoint.authority())).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(unavailable(format!("{} unreachable: {}", endpoint.authority(), e))),
        Err(_) => Err(unavailable(format!(
            "{} did not accept a connection within {}ms",
            endpoint.authority(),
            timeout.as_millis()
        ))),
    }
}

/// Probe (when `probe_timeout` is set) then register.
pub async fn register_backend(
    registry: &BackendRegistry,
    endpoint: BackendEndpoint,
    probe_timeout: Option<Duration>,
) -> GatewayResult<RegisterOutcome> {
    if let Some(timeout) = probe_timeout {
        probe(&endpoint, timeout).await?;
    }
    Ok(registry.register(endpoint.service, endpoint))
}

/// Outcome of the startup pass over `[backends]`.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub registered: usize,
    pub duplicates: usize,
    pub skipped: Vec<(BackendEndpoint, GatewayError)>,
}

/// Register every configured backend. Unreachable endpoints are logged
/// and skipped; a malformed address is a configuration error.
pub async fn bootstrap(config: &GatewayConfig, registry: &BackendRegistry) -> GatewayResult<BootstrapReport> {
    let probe_timeout = config
        .server
        .probe_backends
        .then(|| Duration::from_millis(config.server.probe_timeout_ms));
    let mut report = BootstrapReport::default();
    for endpoint in config.backends.endpoints()? {
        match register_backend(registry, endpoint.clone(), probe_timeout).await {
            Ok(RegisterOutcome::Added) => report.registered += 1,
            Ok(RegisterOutcome::AlreadyPresent) => report.duplicates += 1,
            Err(e) => {
                tracing::error!(endpoint = %endpoint, error = %e, "backend not registered");
                report.skipped.push((endpoint, e));
            }
        }
    }
    tracing::info!(
        registered = report.registered,
        duplicates = report.duplicates,
        skipped = report.skipped.len(),
        "backend bootstrap complete"
    );
    Ok(report)
}
