//! Streaming resolver: dispatch one storage fetch per key while the index
//! body is still being read.

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use vigil_common::error::{GatewayError, GatewayResult};
use vigil_common::types::BackendEndpoint;

use super::chunks::IndexChunkStream;
use super::{Resolution, StorageDispatcher};
use crate::fetch::{FetchClient, STATUS_HEADER};

pub struct StreamChunkResolver {
    client: FetchClient,
    dispatcher: StorageDispatcher,
}

impl StreamChunkResolver {
    pub fn new(client: FetchClient, dispatcher: StorageDispatcher) -> Self {
        Self { client, dispatcher }
    }

    /// Open a streamed lookup of `path` on `index` and dispatch its keys.
    ///
    /// The status line and the `status` header are checked before any of
    /// the body is read. `fetch_timeout` bounds each storage call.
    pub async fn resolve(
        &self,
        index: &BackendEndpoint,
        path: &str,
        fetch_timeout: Duration,
    ) -> GatewayResult<Resolution> {
        let response = self.client.open_stream(index, path).await?;

        let status = response.status().as_u16();
        if status != 200 {
            tracing::warn!(index = %index.authority(), status, "index stream refused");
            return Err(GatewayError::Backend {
                status,
                body: String::new(),
            });
        }
        if let Some(value) = response.headers().get(STATUS_HEADER) {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            if value != "ok" {
                tracing::warn!(index = %index.authority(), status_header = %value, "index stream not ok");
                return Err(GatewayError::Backend {
                    status,
                    body: format!("status header '{}'", value),
                });
            }
        }

        let body = response.bytes_stream().map(|read| read.map_err(reqwest::Error::without_url));
        self.resolve_body(Box::pin(body), fetch_timeout).await
    }

    /// Consume an already-opened body. Each decoded key is dispatched
    /// before the next one is read.
    pub async fn resolve_body<S, E>(&self, body: S, fetch_timeout: Duration) -> GatewayResult<Resolution>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut chunks = IndexChunkStream::new(body);
        let mut pending = Vec::new();
        // On any error below, `pending` is dropped and the fetches started
        // so far are aborted.
        while let Some(chunk) = chunks.next_chunk().await? {
            let fetch = self.dispatcher.dispatch(pending.len(), chunk, fetch_timeout)?;
            pending.push(fetch);
        }
        if pending.is_empty() {
            return Err(GatewayError::NoChunks);
        }
        tracing::debug!(dispatched = pending.len(), "index stream drained");
        Ok(Resolution {
            pending,
            summary: None,
        })
    }
}
