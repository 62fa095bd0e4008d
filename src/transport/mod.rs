//! Request transports returning the chunked response body
//!
//! A transport issues one cancellable request and hands back the raw body as
//! a stream of byte chunks. Timeouts and cancellation are detected here and
//! reported as stream items, so the processor never runs its own deadline.

pub mod file;
pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::StreamError;

pub use file::FileTransport;
pub use http::HttpTransport;

/// Response body chunks as delivered by a transport
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

/// What the user submitted
#[derive(Debug, Clone)]
pub enum VoiceRequest {
    /// Typed or transcribed text
    Text { text: String, session_id: Uuid },
    /// A recorded utterance to be transcribed server-side
    Audio {
        bytes: Bytes,
        mime: String,
        session_id: Uuid,
    },
}

impl VoiceRequest {
    pub fn text(text: impl Into<String>) -> Self {
        VoiceRequest::Text {
            text: text.into(),
            session_id: Uuid::new_v4(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            VoiceRequest::Text { session_id, .. } | VoiceRequest::Audio { session_id, .. } => {
                *session_id
            }
        }
    }
}

/// Issues a request and returns its response body
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the request. Cancelling `cancel` ends the returned stream with
    /// an `Aborted` error.
    async fn send(
        &self,
        request: VoiceRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, StreamError>;
}

/// Wrap a body stream with cancellation and a per-chunk read deadline
///
/// The first error (including a timeout or cancellation) is the last item.
pub fn guard_stream<S>(inner: S, cancel: CancellationToken, read_timeout: Duration) -> ByteStream
where
    S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
{
    stream::unfold(
        (inner.boxed(), cancel, false),
        move |(mut inner, cancel, failed)| async move {
            if failed {
                return None;
            }

            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Err(StreamError::aborted())),
                next = tokio::time::timeout(read_timeout, inner.next()) => match next {
                    Ok(item) => item,
                    Err(_) => Some(Err(StreamError::timeout(format!(
                        "no data received for {} ms",
                        read_timeout.as_millis()
                    )))),
                },
            };

            let failed = matches!(item, Some(Err(_)));
            item.map(|item| (item, (inner, cancel, failed)))
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn test_silent_body_times_out() {
        let body = stream::once(async { Ok(Bytes::from_static(b"event: text\n")) })
            .chain(stream::pending());
        let mut guarded = guard_stream(body, CancellationToken::new(), Duration::from_secs(5));

        assert!(guarded.next().await.unwrap().is_ok());
        let err = guarded.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(guarded.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_ends_stream_as_aborted() {
        let cancel = CancellationToken::new();
        let mut guarded = guard_stream(
            stream::pending::<Result<Bytes, StreamError>>(),
            cancel.clone(),
            Duration::from_secs(60),
        );
        cancel.cancel();

        let err = guarded.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Aborted);
        assert!(guarded.next().await.is_none());
    }

    #[tokio::test]
    async fn test_finished_body_ends_normally() {
        let body = stream::iter(vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))]);
        let chunks: Vec<_> = guard_stream(body, CancellationToken::new(), Duration::from_secs(1))
            .collect()
            .await;
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_text_request_gets_fresh_session() {
        let a = VoiceRequest::text("hi");
        let b = VoiceRequest::text("hi");
        assert_ne!(a.session_id(), b.session_id());
    }
}
