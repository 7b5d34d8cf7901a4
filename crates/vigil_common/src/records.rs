//! Wire records exchanged with the indexing and storage tiers.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// One key reported by the indexing tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChunk {
    pub key: String,
}

impl IndexChunk {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// A record served by the storage tier for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub key: String,
    #[serde(rename = "ts", deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
}

impl StorageRecord {
    pub fn new(key: impl Into<String>, timestamp: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timestamp: timestamp.into(),
            value: value.into(),
        }
    }
}

/// Full (non-streamed) answer of the indexing tier. A 204 from the
/// indexing tier is read as the default (empty) answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IndexSyncResponse {
    #[serde(default, deserialize_with = "string_or_number")]
    pub status: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub count: String,
    #[serde(default)]
    pub keys: Vec<IndexChunk>,
}

impl IndexSyncResponse {
    pub fn summary(&self) -> IndexSummary {
        IndexSummary {
            status: self.status.clone(),
            count: self.count.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// Descriptive metadata of a synchronous index answer. `count` is reported
/// as received and is not checked against the number of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub status: String,
    pub count: String,
    pub timestamp: String,
}

/// Backends are inconsistent about quoting scalars; accept both.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScalarVisitor;

    impl<'de> Visitor<'de> for ScalarVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_owned())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(ScalarVisitor)
}
