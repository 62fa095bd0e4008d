//! Logical audio streams handed to the scheduler

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::transport::ByteStream;

/// One ordered stream of raw interleaved f32 little-endian samples
///
/// Synthesis adapters return either a complete buffer or a chunked stream;
/// both become an `AudioSource`. Without an explicit sample rate the
/// scheduler's configured rate applies.
pub struct AudioSource {
    stream: ByteStream,
    sample_rate: Option<u32>,
}

impl AudioSource {
    /// A single complete buffer
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            stream: stream::once(async move { Ok(bytes) }).boxed(),
            sample_rate: None,
        }
    }

    /// A chunked byte stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            sample_rate: None,
        }
    }

    /// Chunks pushed through a channel; the source ends when every sender
    /// has been dropped
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        });
        Self::from_stream(stream)
    }

    /// A channel-backed source plus its sending half
    pub fn channel() -> (mpsc::UnboundedSender<Bytes>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::from_receiver(rx))
    }

    /// Declare the rate the samples were produced at
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub(crate) fn into_stream(self) -> ByteStream {
        self.stream
    }
}

impl From<Bytes> for AudioSource {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<ByteStream> for AudioSource {
    fn from(stream: ByteStream) -> Self {
        Self {
            stream,
            sample_rate: None,
        }
    }
}
