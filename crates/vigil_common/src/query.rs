//! Client query shapes and the index-lookup path they map to.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// A validated client query. Exactly two shapes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ClientQuery {
    /// Every key whose timestamp falls in `[from, to]`.
    TimeRange { from: u64, to: u64 },
    /// At most `count` keys starting at `from`.
    TimeAndCount { from: u64, count: u32 },
}

impl ClientQuery {
    /// Build a query from raw request parameters.
    ///
    /// `from` is mandatory and exactly one of `to`/`count` must be present.
    pub fn from_params(
        from: Option<&str>,
        to: Option<&str>,
        count: Option<&str>,
    ) -> GatewayResult<Self> {
        let from = from
            .ok_or_else(|| GatewayError::Validation("'from' is required".into()))
            .and_then(|raw| parse_u64("from", raw))?;

        let query = match (to, count) {
            (Some(to), None) => ClientQuery::TimeRange {
                from,
                to: parse_u64("to", to)?,
            },
            (None, Some(count)) => {
                let count: u32 = count.trim().parse().map_err(|_| {
                    GatewayError::Validation(format!("'count' must be a positive integer, got '{}'", count))
                })?;
                ClientQuery::TimeAndCount { from, count }
            }
            (Some(_), Some(_)) => {
                return Err(GatewayError::Validation(
                    "'to' and 'count' are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(GatewayError::Validation(
                    "one of 'to' or 'count' is required".into(),
                ))
            }
        };
        query.validate()?;
        Ok(query)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        match *self {
            ClientQuery::TimeRange { from, to } if to < from => Err(GatewayError::Validation(
                format!("'to' ({}) is before 'from' ({})", to, from),
            )),
            ClientQuery::TimeAndCount { count: 0, .. } => Err(GatewayError::Validation(
                "'count' must be greater than zero".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn from(&self) -> u64 {
        match *self {
            ClientQuery::TimeRange { from, .. } | ClientQuery::TimeAndCount { from, .. } => from,
        }
    }

    /// Path (relative to an indexing base URL) for this query.
    pub fn index_path(&self) -> String {
        match *self {
            ClientQuery::TimeRange { from, to } => format!("getIndexData/{}?to={}", from, to),
            ClientQuery::TimeAndCount { from, count } => {
                format!("getIndexData/{}?count={}", from, count)
            }
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            ClientQuery::TimeRange { .. } => "time_range",
            ClientQuery::TimeAndCount { .. } => "time_and_count",
        }
    }
}

impl std::fmt::Display for ClientQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientQuery::TimeRange { from, to } => write!(f, "from={},to={}", from, to),
            ClientQuery::TimeAndCount { from, count } => write!(f, "from={},count={}", from, count),
        }
    }
}

fn parse_u64(name: &str, raw: &str) -> GatewayResult<u64> {
    raw.trim().parse().map_err(|_| {
        GatewayError::Validation(format!("'{}' must be a non-negative integer, got '{}'", name, raw))
    })
}
