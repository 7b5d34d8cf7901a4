use thiserror::Error;

use crate::types::ServiceClass;

/// Convenience alias for `Result<T, GatewayError>`.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Coarse, client-visible classification of a [`GatewayError`].
///
/// - `ClientError`: malformed query or missing parameter (4xx equivalent)
/// - `Unavailable`: no backend to talk to for the required service class
/// - `Timeout`: a phase or forward deadline elapsed
/// - `Upstream`: a backend answered, but with an error or garbage
/// - `Internal`: gateway misconfiguration or a bug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ClientError,
    Unavailable,
    Timeout,
    Upstream,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ClientError => "client_error",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure a client request can end in. All of them are terminal for
/// the request that produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("No {service} endpoint registered")]
    PoolEmpty { service: ServiceClass },

    #[error("{service} unavailable: {reason}")]
    Unavailable { service: ServiceClass, reason: String },

    #[error("Index phase timed out after {timeout_ms}ms")]
    IndexPhaseTimeout { timeout_ms: u64 },

    #[error("Storage phase timed out after {timeout_ms}ms ({pending} fetches outstanding)")]
    StoragePhaseTimeout { timeout_ms: u64, pending: usize },

    #[error("Storage fetch for key '{key}' failed: {reason}")]
    StoragePhaseFailure { key: String, reason: String },

    /// Non-200, non-204 answer from a backend. `body` is kept for the logs.
    #[error("Backend returned status {status}")]
    Backend { status: u16, body: String },

    #[error("Malformed backend payload: {0}")]
    Deserialization(String),

    #[error("Invalid query: {0}")]
    Validation(String),

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Index stream produced no chunks")]
    NoChunks,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation(_) => ErrorKind::ClientError,
            GatewayError::PoolEmpty { .. } | GatewayError::Unavailable { .. } => {
                ErrorKind::Unavailable
            }
            GatewayError::IndexPhaseTimeout { .. }
            | GatewayError::StoragePhaseTimeout { .. }
            | GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::StoragePhaseFailure { .. }
            | GatewayError::Backend { .. }
            | GatewayError::Deserialization(_)
            | GatewayError::Transport(_)
            | GatewayError::NoChunks => ErrorKind::Upstream,
            GatewayError::Config(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status the route layer answers with.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::ClientError => 400,
            ErrorKind::Unavailable => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::Upstream => 502,
            ErrorKind::Internal => 500,
        }
    }

    /// Message safe to show to an end user. Variants that carry backend
    /// text, addresses or payload fragments answer with a fixed phrase; the
    /// full `Display` text goes to the logs only.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Unavailable { service, .. } => format!("{} backend unavailable", service),
            GatewayError::StoragePhaseFailure { .. } => "Storage fetch failed".into(),
            GatewayError::Deserialization(_) => "Malformed backend payload".into(),
            GatewayError::Transport(_) => "Backend unreachable".into(),
            GatewayError::Config(_) => "Gateway configuration error".into(),
            GatewayError::PoolEmpty { .. }
            | GatewayError::IndexPhaseTimeout { .. }
            | GatewayError::StoragePhaseTimeout { .. }
            | GatewayError::Backend { .. }
            | GatewayError::Validation(_)
            | GatewayError::Timeout { .. }
            | GatewayError::NoChunks => self.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}
