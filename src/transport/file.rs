//! Replays a captured response body from disk

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{guard_stream, ByteStream, Transport, VoiceRequest};
use crate::error::StreamError;

/// Default read size, small enough to split frames mid-line
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Transport that ignores the request and streams a file in fixed chunks
pub struct FileTransport {
    path: PathBuf,
    chunk_size: usize,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn send(
        &self,
        request: VoiceRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, StreamError> {
        let contents = tokio::fs::read(&self.path).await.map_err(|e| {
            StreamError::network(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        tracing::debug!(
            "Replaying {} ({} bytes) for session {}",
            self.path.display(),
            contents.len(),
            request.session_id()
        );

        let body = Bytes::from(contents);
        let chunks: Vec<Result<Bytes, StreamError>> = (0..body.len())
            .step_by(self.chunk_size)
            .map(|start| Ok(body.slice(start..(start + self.chunk_size).min(body.len()))))
            .collect();

        Ok(guard_stream(
            stream::iter(chunks),
            cancel,
            Duration::from_secs(60),
        ))
    }
}
