//! Error types for the voice-chat streaming pipeline

use std::fmt;
use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of everything that can go wrong during a response session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller cancelled the request
    Aborted,
    /// Transport failure (connect, reset, bad status)
    Network,
    /// No data arrived within the transport's read window
    Timeout,
    /// A single malformed frame; recovered locally
    Protocol,
    /// The server sent an `error` event
    Upstream,
    /// Audio output could not be initialized
    Render,
}

impl ErrorKind {
    /// Whether an error of this kind ends the session
    pub fn is_terminal(self) -> bool {
        !matches!(self, ErrorKind::Protocol | ErrorKind::Render)
    }

    /// Notification shown to the user, if any
    pub fn user_message(self) -> Option<&'static str> {
        match self {
            ErrorKind::Aborted | ErrorKind::Protocol => None,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Upstream => {
                Some("Something went wrong while getting a reply. Please try again.")
            }
            ErrorKind::Render => Some("Audio output is unavailable; replies will be shown as text."),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Aborted => "aborted",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Render => "render",
        };
        f.write_str(name)
    }
}

/// Session-level error delivered through the error sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StreamError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StreamError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, "request cancelled")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Render, message)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

impl From<ProtocolError> for StreamError {
    fn from(err: ProtocolError) -> Self {
        Self::new(ErrorKind::Protocol, err.to_string())
    }
}

impl From<AudioError> for StreamError {
    fn from(err: AudioError) -> Self {
        Self::new(ErrorKind::Render, err.to_string())
    }
}

/// Wire protocol errors; each one invalidates a single frame only
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Invalid JSON in '{event_type}' frame: {source}")]
    InvalidJson {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid base64 audio chunk: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Frame '{0}' has no data line")]
    MissingData(String),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Renderer queue is full")]
    RendererBusy,

    #[error("Renderer has shut down")]
    RendererClosed,

    #[error("Output context is closed")]
    ContextClosed,
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
