//! `@`-delimited chunk framing of streamed index bodies.
//!
//! Network reads split the body at arbitrary byte offsets: a delimiter
//! can land anywhere, including the first or last byte of a read, and one
//! record can span many reads. [`ChunkSplitter`] buffers bytes until a
//! delimiter completes a segment, so a record is decoded exactly once no
//! matter how the body was split.

use std::collections::VecDeque;
use std::fmt::Display;

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};

use vigil_common::error::{GatewayError, GatewayResult};
use vigil_common::records::IndexChunk;

use crate::fetch::decode_error;

pub const CHUNK_DELIMITER: u8 = b'@';

/// Incremental splitter over a byte stream.
#[derive(Debug, Default)]
pub struct ChunkSplitter {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no delimiter.
    scanned: usize,
}

impl ChunkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read; returns every segment it completed, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(offset) = self.buf[self.scanned..]
            .iter()
            .position(|&b| b == CHUNK_DELIMITER)
        {
            let end = self.scanned + offset;
            let segment = self.buf.split_to(end).freeze();
            self.buf.advance(1);
            self.scanned = 0;
            out.push(segment);
        }
        self.scanned = self.buf.len();
        out
    }

    /// End of input: the trailing bytes after the last delimiter, if any.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }

    /// Bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

const MAX_LOGGED_SEGMENT: usize = 256;

/// Decode one segment. Whitespace-only segments (e.g. a trailing newline
/// after the last delimiter) yield `None`.
pub fn parse_chunk(segment: &[u8]) -> GatewayResult<Option<IndexChunk>> {
    if segment.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    serde_json::from_slice::<IndexChunk>(segment)
        .map(Some)
        .map_err(|e| {
            tracing::warn!(
                segment = %String::from_utf8_lossy(&segment[..segment.len().min(MAX_LOGGED_SEGMENT)]),
                len = segment.len(),
                error = %e,
                "undecodable index chunk"
            );
            GatewayError::Deserialization(format!("index chunk: {}", decode_error(&e)))
        })
}

/// Lazy, single-pass sequence of decoded chunks over a streamed body.
pub struct IndexChunkStream<S> {
    body: S,
    splitter: ChunkSplitter,
    ready: VecDeque<Bytes>,
    exhausted: bool,
    produced: usize,
}

impl<S, E> IndexChunkStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(body: S) -> Self {
        Self {
            body,
            splitter: ChunkSplitter::new(),
            ready: VecDeque::new(),
            exhausted: false,
            produced: 0,
        }
    }

    /// Next decoded chunk, `Ok(None)` at end of body. A transport failure
    /// mid-body or an undecodable segment is returned as `Err`.
    pub async fn next_chunk(&mut self) -> GatewayResult<Option<IndexChunk>> {
        loop {
            while let Some(segment) = self.ready.pop_front() {
                if let Some(chunk) = parse_chunk(&segment)? {
                    self.produced += 1;
                    return Ok(Some(chunk));
                }
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.body.next().await {
                Some(Ok(bytes)) => self.ready.extend(self.splitter.push(&bytes)),
                Some(Err(e)) => {
                    return Err(GatewayError::Transport(format!(
                        "index stream interrupted after {} chunks: {}",
                        self.produced, e
                    )))
                }
                None => {
                    self.exhausted = true;
                    self.ready.extend(self.splitter.finish());
                }
            }
        }
    }

    /// Chunks returned so far.
    pub fn produced(&self) -> usize {
        self.produced
    }
}
