//! Metrics-info table: which `(host, port, metric type)` triples are being
//! monitored, each with a random id.

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;

use vigil_common::config::MetricsConfig;
use vigil_common::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct MetricKey {
    host: String,
    port: u16,
    metric_type: String,
}

impl MetricKey {
    fn new(host: &str, port: u16, metric_type: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            metric_type: metric_type.to_lowercase(),
        }
    }
}

/// One row as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsInfo {
    pub metric_id: u64,
    pub host: String,
    pub port: u16,
    pub metric_type: String,
}

/// JSON body of `/getMetricsTable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsTableSnapshot {
    pub metrics: Vec<MetricsInfo>,
}

pub struct MetricsInfoTable {
    entries: DashMap<MetricKey, u64>,
    supported: MetricsConfig,
}

impl MetricsInfoTable {
    pub fn new(supported: MetricsConfig) -> Self {
        Self {
            entries: DashMap::new(),
            supported,
        }
    }

    fn check_type(&self, metric_type: &str) -> GatewayResult<()> {
        if self.supported.is_supported(metric_type) {
            Ok(())
        } else {
            Err(GatewayError::Validation(format!(
                "unsupported metric type '{}', supported types are: {}",
                metric_type,
                self.supported.supported_types.join(",")
            )))
        }
    }

    /// Start monitoring a triple and return its id. Re-adding a monitored
    /// triple assigns it a fresh id.
    pub fn add(&self, host: &str, port: u16, metric_type: &str) -> GatewayResult<u64> {
        if host.trim().is_empty() {
            return Err(GatewayError::Validation("'host' must not be empty".into()));
        }
        self.check_type(metric_type)?;
        let id = rand::thread_rng().gen_range(0..=i64::MAX as u64);
        self.entries.insert(MetricKey::new(host, port, metric_type), id);
        vigil_observability::record_metrics_table_size(self.entries.len());
        tracing::debug!(host = %host, port, metric_type = %metric_type, metric_id = id, "metrics info added");
        Ok(id)
    }

    /// Stop monitoring; returns the id the triple had, `None` if it was
    /// not monitored.
    pub fn remove(&self, host: &str, port: u16, metric_type: &str) -> GatewayResult<Option<u64>> {
        self.check_type(metric_type)?;
        let previous = self
            .entries
            .remove(&MetricKey::new(host, port, metric_type))
            .map(|(_, id)| id);
        vigil_observability::record_metrics_table_size(self.entries.len());
        Ok(previous)
    }

    pub fn get(&self, host: &str, port: u16, metric_type: &str) -> Option<u64> {
        self.entries
            .get(&MetricKey::new(host, port, metric_type))
            .map(|id| *id)
    }

    /// All rows ordered by host, port, then type.
    pub fn snapshot(&self) -> MetricsTableSnapshot {
        let mut rows: Vec<(MetricKey, u64)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        rows.sort();
        MetricsTableSnapshot {
            metrics: rows
                .into_iter()
                .map(|(key, metric_id)| MetricsInfo {
                    metric_id,
                    host: key.host,
                    port: key.port,
                    metric_type: key.metric_type,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
