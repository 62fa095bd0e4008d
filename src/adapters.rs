//! Collaborator capabilities consumed by the client
//!
//! Vendor speech engines and the voice-activity detector live outside this
//! crate. They are reached through these traits only.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::playback::AudioSource;
use crate::transport::ByteStream;

/// Output of a synthesis call: raw f32 LE samples, whole or chunked
pub enum Synthesized {
    Buffer(Bytes),
    Stream(ByteStream),
}

impl From<Synthesized> for AudioSource {
    fn from(output: Synthesized) -> Self {
        match output {
            Synthesized::Buffer(bytes) => AudioSource::from_bytes(bytes),
            Synthesized::Stream(stream) => AudioSource::from(stream),
        }
    }
}

/// Text-to-speech capability
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Synthesized, StreamError>;

    /// Sample rate of the produced audio
    fn sample_rate(&self) -> u32;
}

/// Speech-to-text capability
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one encoded utterance
    async fn transcribe(&self, audio: Bytes, mime: &str) -> Result<String, StreamError>;
}

/// What the speech-activity detector reports
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// The user started talking; ongoing playback should stop
    SpeechStarted,
    /// A finished utterance, encoded as `mime`
    Utterance { audio: Bytes, mime: String },
}

/// Source of capture events, e.g. a microphone with VAD
pub trait SpeechCapture: Send {
    /// Start capturing. Events arrive until the receiver is dropped.
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<CaptureEvent>, StreamError>;

    fn stop(&mut self);
}
