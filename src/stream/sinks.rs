//! Session output callbacks
//!
//! Sinks never run under the processor's state lock, so a sink may read the
//! processor that invoked it. Sinks of one session never run concurrently.

use bytes::Bytes;

use crate::error::StreamError;

/// Receives the full displayed text after every revealed character
pub type TextSink = Box<dyn FnMut(&str) + Send>;
/// Receives in-order audio chunks as (index, bytes)
pub type AudioSink = Box<dyn FnMut(u64, Bytes) + Send>;
/// Receives transcript or status strings
pub type NoticeSink = Box<dyn FnMut(&str) + Send>;
/// Receives (full text, reported latency in ms)
pub type CompleteSink = Box<dyn FnOnce(String, u64) + Send>;
pub type ErrorSink = Box<dyn FnOnce(StreamError) + Send>;
/// Fires once the response audio has been flushed
pub type AudioEndSink = Box<dyn FnOnce() + Send>;

/// The set of callbacks a session reports to. Every sink is optional.
#[derive(Default)]
pub struct Sinks {
    pub(crate) text: Option<TextSink>,
    pub(crate) audio: Option<AudioSink>,
    pub(crate) audio_end: Option<AudioEndSink>,
    pub(crate) transcript: Option<NoticeSink>,
    pub(crate) status: Option<NoticeSink>,
    pub(crate) complete: Option<CompleteSink>,
    pub(crate) error: Option<ErrorSink>,
}

impl Sinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_text<F>(mut self, f: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.text = Some(Box::new(f));
        self
    }

    pub fn on_audio<F>(mut self, f: F) -> Self
    where
        F: FnMut(u64, Bytes) + Send + 'static,
    {
        self.audio = Some(Box::new(f));
        self
    }

    pub fn on_audio_end<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.audio_end = Some(Box::new(f));
        self
    }

    pub fn on_transcript<F>(mut self, f: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.transcript = Some(Box::new(f));
        self
    }

    pub fn on_status<F>(mut self, f: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.status = Some(Box::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(String, u64) + Send + 'static,
    {
        self.complete = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(StreamError) + Send + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks")
            .field("text", &self.text.is_some())
            .field("audio", &self.audio.is_some())
            .field("audio_end", &self.audio_end.is_some())
            .field("transcript", &self.transcript.is_some())
            .field("status", &self.status.is_some())
            .field("complete", &self.complete.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}
