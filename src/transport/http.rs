//! HTTP transport over reqwest

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{guard_stream, ByteStream, Transport, VoiceRequest};
use crate::config::TransportConfig;
use crate::error::{Error, Result, StreamError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextBody<'a> {
    text: &'a str,
    session_id: String,
}

/// Posts requests to the chat endpoint and streams the response body
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    read_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            read_timeout: config.read_timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn map_reqwest_error(err: reqwest::Error) -> StreamError {
    if err.is_timeout() {
        StreamError::timeout(err.to_string())
    } else {
        StreamError::network(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: VoiceRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ByteStream, StreamError> {
        let builder = self
            .client
            .post(&self.endpoint)
            .header(header::ACCEPT, "text/event-stream");

        let builder = match &request {
            VoiceRequest::Text { text, session_id } => builder.json(&TextBody {
                text,
                session_id: session_id.to_string(),
            }),
            VoiceRequest::Audio {
                bytes,
                mime,
                session_id,
            } => builder
                .header(header::CONTENT_TYPE, mime.as_str())
                .header("X-Session-Id", session_id.to_string())
                .body(bytes.clone()),
        };

        tracing::debug!("POST {} (session {})", self.endpoint, request.session_id());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::aborted()),
            result = builder.send() => result.map_err(map_reqwest_error)?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Chat endpoint returned {}: {}", status, body.trim());
            return Err(StreamError::network(format!("server returned {}", status)));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error));
        Ok(guard_stream(body, cancel, self.read_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response; returns the endpoint and the
    /// raw request that was received
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{}/api/chat/stream", addr), task)
    }

    fn transport(endpoint: String) -> HttpTransport {
        HttpTransport::new(&TransportConfig {
            endpoint,
            ..TransportConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_streams_body_and_posts_json() {
        let body = "event: text\ndata: {\"content\":\"Hi\"}\n\n";
        let (endpoint, server) = serve_once("200 OK", body).await;

        let request = VoiceRequest::text("hello");
        let session_id = request.session_id();
        let stream = transport(endpoint)
            .send(request, CancellationToken::new())
            .await
            .unwrap();

        let received: Vec<u8> = stream
            .map(|chunk| chunk.unwrap().to_vec())
            .concat()
            .await;
        assert_eq!(received, body.as_bytes());

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/chat/stream"));
        assert!(raw.contains("\"text\":\"hello\""));
        assert!(raw.contains(&format!("\"sessionId\":\"{}\"", session_id)));
    }

    #[tokio::test]
    async fn test_error_status_is_network_error() {
        let (endpoint, _server) = serve_once("503 Service Unavailable", "busy").await;

        let err = transport(endpoint)
            .send(VoiceRequest::text("hello"), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn test_cancelled_before_send_is_aborted() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Nothing listens on this port, but cancellation wins first
        let err = transport("http://127.0.0.1:9/".to_string())
            .send(VoiceRequest::text("hello"), cancel)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Aborted);
    }
}
