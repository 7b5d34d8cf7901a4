use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::types::{BackendEndpoint, ServiceClass};

/// Top-level gateway configuration (`vigil.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Client-facing HTTP listen address.
    pub listen_addr: String,
    /// Prometheus exporter listen address.
    pub metrics_addr: String,
    /// TCP-probe every backend before registering it.
    #[serde(default = "default_probe_backends")]
    pub probe_backends: bool,
    /// Connect timeout for the registration probe, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_probe_backends() -> bool {
    true
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            metrics_addr: "0.0.0.0:9095".into(),
            probe_backends: default_probe_backends(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

/// Statically known backends, each as `host:port`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub storages: Vec<String>,
    #[serde(default)]
    pub online: Vec<String>,
    #[serde(default)]
    pub offline: Vec<String>,
    #[serde(default)]
    pub data_consuming: Vec<String>,
}

impl BackendsConfig {
    pub fn addrs(&self, service: ServiceClass) -> &[String] {
        match service {
            ServiceClass::Indexing => &self.indexes,
            ServiceClass::Storage => &self.storages,
            ServiceClass::Online => &self.online,
            ServiceClass::Offline => &self.offline,
            ServiceClass::DataConsuming => &self.data_consuming,
        }
    }

    /// Parse every configured address, in class order then file order.
    pub fn endpoints(&self) -> GatewayResult<Vec<BackendEndpoint>> {
        let mut out = Vec::new();
        for service in ServiceClass::ALL {
            for addr in self.addrs(service) {
                out.push(BackendEndpoint::parse(service, addr)?);
            }
        }
        Ok(out)
    }
}

/// Deadlines, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Index phase: waiting for the resolver to finish.
    pub indexing_timeout_ms: u64,
    /// Storage phase: waiting for all dispatched fetches.
    pub storage_timeout_ms: u64,
    /// Single pass-through forward.
    pub default_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            indexing_timeout_ms: 5_000,
            storage_timeout_ms: 5_000,
            default_timeout_ms: 3_000,
        }
    }
}

impl TimeoutConfig {
    pub fn budgets(&self) -> PhaseBudgets {
        PhaseBudgets {
            index_timeout: Duration::from_millis(self.indexing_timeout_ms),
            storage_timeout: Duration::from_millis(self.storage_timeout_ms),
        }
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// The two per-request deadlines of a scatter/gather query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseBudgets {
    pub index_timeout: Duration,
    pub storage_timeout: Duration,
}

impl PhaseBudgets {
    pub fn new(index_timeout: Duration, storage_timeout: Duration) -> Self {
        Self {
            index_timeout,
            storage_timeout,
        }
    }
}

impl Default for PhaseBudgets {
    fn default() -> Self {
        TimeoutConfig::default().budgets()
    }
}

/// Metrics-info table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Metric types accepted by `/startMonitoring` (compared lowercase).
    pub supported_types: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            supported_types: vec![
                "cpu".into(),
                "memory".into(),
                "disk".into(),
                "network".into(),
            ],
        }
    }
}

impl MetricsConfig {
    pub fn is_supported(&self, metric_type: &str) -> bool {
        let wanted = metric_type.to_lowercase();
        self.supported_types.iter().any(|t| t.to_lowercase() == wanted)
    }
}

impl GatewayConfig {
    pub fn from_toml_str(s: &str) -> GatewayResult<Self> {
        let config: GatewayConfig =
            toml::from_str(s).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> GatewayResult<String> {
        toml::to_string_pretty(self).map_err(|e| GatewayError::Config(e.to_string()))
    }

    pub fn validate(&self) -> GatewayResult<()> {
        let t = &self.timeouts;
        if t.indexing_timeout_ms == 0 || t.storage_timeout_ms == 0 || t.default_timeout_ms == 0 {
            return Err(GatewayError::Config("timeouts must be greater than zero".into()));
        }
        if self.server.probe_backends && self.server.probe_timeout_ms == 0 {
            return Err(GatewayError::Config(
                "probe_timeout_ms must be greater than zero when probing is enabled".into(),
            ));
        }
        if self.metrics.supported_types.is_empty() {
            return Err(GatewayError::Config("metrics.supported_types is empty".into()));
        }
        self.backends.endpoints()?;
        Ok(())
    }
}
