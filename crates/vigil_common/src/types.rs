//! Backend addressing: service classes and endpoints.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// A named category of interchangeable backend instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceClass {
    /// Index-lookup tier: resolves a time window to a list of keys.
    Indexing,
    /// Record-storage tier: serves one record per key.
    Storage,
    /// Online analytics (pass-through).
    Online,
    /// Offline analytics (pass-through).
    Offline,
    /// Data-consuming agents (pass-through).
    DataConsuming,
}

impl ServiceClass {
    pub const ALL: [ServiceClass; 5] = [
        ServiceClass::Indexing,
        ServiceClass::Storage,
        ServiceClass::Online,
        ServiceClass::Offline,
        ServiceClass::DataConsuming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceClass::Indexing => "indexing",
            ServiceClass::Storage => "storage",
            ServiceClass::Online => "online",
            ServiceClass::Offline => "offline",
            ServiceClass::DataConsuming => "data_consuming",
        }
    }
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceClass {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "indexing" => Ok(ServiceClass::Indexing),
            "storage" => Ok(ServiceClass::Storage),
            "online" => Ok(ServiceClass::Online),
            "offline" => Ok(ServiceClass::Offline),
            "data_consuming" | "dataconsuming" | "data-consuming" => {
                Ok(ServiceClass::DataConsuming)
            }
            other => Err(GatewayError::Validation(format!(
                "unknown service class '{}'",
                other
            ))),
        }
    }
}

/// One addressable backend instance.
///
/// Immutable once built. Equality and hashing use `(host, port)` only, so the
/// same address is one member no matter which class it was tagged with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEndpoint {
    pub service: ServiceClass,
    pub host: String,
    pub port: u16,
}

impl BackendEndpoint {
    pub fn new(service: ServiceClass, host: impl Into<String>, port: u16) -> Self {
        Self {
            service,
            host: host.into(),
            port,
        }
    }

    /// Parse a `host:port` string as found in the configuration file.
    pub fn parse(service: ServiceClass, addr: &str) -> Result<Self, GatewayError> {
        let addr = addr.trim();
        let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
            GatewayError::Config(format!("endpoint '{}' is not in host:port form", addr))
        })?;
        if host.is_empty() {
            return Err(GatewayError::Config(format!("endpoint '{}' has an empty host", addr)));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| GatewayError::Config(format!("endpoint '{}' has an invalid port", addr)))?;
        Ok(Self::new(service, host, port))
    }

    /// `http://host:port/`; paths are appended without a leading slash.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path.trim_start_matches('/'))
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PartialEq for BackendEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for BackendEndpoint {}

impl Hash for BackendEndpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.service, self.host, self.port)
    }
}
