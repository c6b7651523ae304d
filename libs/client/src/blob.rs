//! Blob transfer.
//!
//! Uploads are two-phase: the record API hands out a [`BlobPutTicket`]
//! naming a staging URL and limits, then the bytes go to that URL in
//! `Content-Range` chunks, with a marker header on the final chunk telling
//! the service the blob is complete.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::TransportError;

/// Marker header on the chunk that finishes an upload.
pub const BLOB_COMPLETE_HEADER: &str = "x-vault-blob-complete";

/// Chunk size used when the ticket does not name one.
const DEFAULT_CHUNK_BYTES: usize = 1 << 20;

/// Staging destination for one blob upload, minted by the record API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlobPutTicket {
    #[serde(rename = "blob-ref-url")]
    pub blob_ref_url: String,
    #[serde(rename = "blob-chunk-size", default)]
    pub chunk_size: u64,
    #[serde(rename = "max-blob-size", default)]
    pub max_blob_size: u64,
}

/// Moves blob bytes to and from staging URLs. Split from [`crate::transport::Transport`]
/// because blobs speak plain HTTP against per-upload URLs, not the RPC
/// endpoint.
#[async_trait]
pub trait BlobStreamer: Send + Sync {
    async fn upload(
        &self,
        ticket: &BlobPutTicket,
        payload: Bytes,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    async fn download(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError>;
}

pub type SharedBlobStreamer = Arc<dyn BlobStreamer>;

pub struct HttpBlobStreamer {
    client: reqwest::Client,
}

impl HttpBlobStreamer {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpBlobStreamer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStreamer for HttpBlobStreamer {
    async fn upload(
        &self,
        ticket: &BlobPutTicket,
        payload: Bytes,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let url = parse_staging_url(&ticket.blob_ref_url)?;
        let chunk_size = match ticket.chunk_size {
            0 => DEFAULT_CHUNK_BYTES,
            size => size as usize,
        };

        for chunk in chunk_plan(payload.len(), chunk_size) {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let mut request = self
                .client
                .put(url.clone())
                .header(CONTENT_TYPE, content_type)
                .body(payload.slice(chunk.start..chunk.end));
            if chunk.end > chunk.start {
                request = request.header(
                    CONTENT_RANGE,
                    content_range(chunk.start, chunk.end, payload.len()),
                );
            }
            if chunk.last {
                request = request.header(BLOB_COMPLETE_HEADER, "1");
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                result = request.send() => result.map_err(TransportError::Send)?,
            };
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Http {
                    status: status.as_u16(),
                    body,
                });
            }
            debug!(
                from = chunk.start,
                to = chunk.end,
                last = chunk.last,
                "uploaded blob chunk"
            );
        }
        Ok(())
    }

    async fn download(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = self.client.get(url.clone()).send() => result.map_err(TransportError::Send)?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }
        response.bytes().await.map_err(TransportError::Send)
    }
}

fn parse_staging_url(raw: &str) -> Result<Url, TransportError> {
    Url::parse(raw).map_err(|err| TransportError::Http {
        status: 0,
        body: format!("ticket staging url is invalid: {err}"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub start: usize,
    pub end: usize,
    pub last: bool,
}

/// Splits `total` bytes into `chunk_size` spans. An empty payload still
/// produces one empty final chunk so the completion marker is always sent.
pub(crate) fn chunk_plan(total: usize, chunk_size: usize) -> Vec<Chunk> {
    if total == 0 {
        return vec![Chunk {
            start: 0,
            end: 0,
            last: true,
        }];
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk_size).min(total);
        chunks.push(Chunk {
            start,
            end,
            last: end == total,
        });
        start = end;
    }
    chunks
}

/// `Content-Range` value for one chunk. The end offset is inclusive.
pub(crate) fn content_range(start: usize, end: usize, total: usize) -> String {
    format!("bytes {}-{}/{}", start, end - 1, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_plan_covers_exact_multiples() {
        let chunks = chunk_plan(20, 10);
        assert_eq!(
            chunks,
            vec![
                Chunk { start: 0, end: 10, last: false },
                Chunk { start: 10, end: 20, last: true },
            ]
        );
    }

    #[test]
    fn chunk_plan_keeps_the_remainder() {
        let chunks = chunk_plan(25, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], Chunk { start: 20, end: 25, last: true });
    }

    #[test]
    fn small_payload_is_one_final_chunk() {
        assert_eq!(
            chunk_plan(3, 10),
            vec![Chunk { start: 0, end: 3, last: true }]
        );
    }

    #[test]
    fn empty_payload_still_sends_the_completion_marker() {
        assert_eq!(
            chunk_plan(0, 10),
            vec![Chunk { start: 0, end: 0, last: true }]
        );
    }

    #[test]
    fn content_range_is_inclusive() {
        assert_eq!(content_range(0, 10, 25), "bytes 0-9/25");
        assert_eq!(content_range(20, 25, 25), "bytes 20-24/25");
    }
}
