//! Voice client: owns the current session and the audio outputs
//!
//! Exactly one response session is current at a time. Submitting a new
//! request retires the previous one first, so two typing timers or two audio
//! queues never run side by side.

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::{CaptureEvent, SpeechCapture, Synthesizer, Transcriber};
use crate::audio::{Pcm16Decoder, RendererFactory};
use crate::config::{AppConfig, AudioRoute};
use crate::error::{ErrorKind, StreamError};
use crate::playback::{AudioSource, ContextFactory, OutputId, PlaybackScheduler, RingOutput};
use crate::stream::{ProcessorHandle, SessionStats, Sinks, StreamProcessor};
use crate::transport::{Transport, VoiceRequest};

/// What the client reports to its user interface
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Text revealed so far in the current reply
    Text(String),
    /// Transcript of the user's utterance
    Transcript(String),
    Status(String),
    Completed { text: String, latency_ms: u64 },
    /// A terminal session error other than cancellation
    Failed(StreamError),
    /// Non-fatal notification, e.g. audio output unavailable
    Notice(String),
}

struct ActiveSession {
    handle: ProcessorHandle,
    cancel: CancellationToken,
}

pub struct VoiceClient {
    config: AppConfig,
    transport: Arc<dyn Transport>,
    scheduler: Arc<PlaybackScheduler>,
    renderer: Option<Arc<RingOutput>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    current: Option<ActiveSession>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl VoiceClient {
    /// Build a client; events for the UI arrive on the returned receiver
    pub fn new(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        contexts: Arc<dyn ContextFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();

        let notices = events.clone();
        let scheduler = PlaybackScheduler::with_error_handler(
            config.playback.clone(),
            contexts,
            Arc::new(move |err: &StreamError| {
                let message = err.kind.user_message().unwrap_or("Audio output failed");
                let _ = notices.send(ClientEvent::Notice(message.to_string()));
            }),
        );

        let client = Self {
            config,
            transport,
            scheduler: Arc::new(scheduler),
            renderer: None,
            synthesizer: None,
            transcriber: None,
            current: None,
            events,
        };
        (client, rx)
    }

    /// Route PCM16 response audio into ring-buffer renderers opened by
    /// `factory`. One is opened on the first audio chunk of a reply and
    /// closed once that reply has played out or is interrupted.
    pub fn with_renderer(mut self, factory: Arc<dyn RendererFactory>) -> Self {
        self.renderer = Some(Arc::new(RingOutput::new(self.config.render.clone(), factory)));
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn renderer(&self) -> Option<&RingOutput> {
        self.renderer.as_deref()
    }

    /// Whether any response or spoken audio is still queued or playing
    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
            || self.scheduler.queued() > 0
            || self.renderer.as_ref().is_some_and(|r| r.is_open())
    }

    /// Start a new exchange for `text`; the most recent request wins
    pub async fn submit(&mut self, text: impl Into<String>) -> Uuid {
        self.start(VoiceRequest::text(text)).await
    }

    /// Send a recorded utterance for server-side transcription and reply
    pub async fn submit_audio(&mut self, audio: Bytes, mime: impl Into<String>) -> Uuid {
        self.start(VoiceRequest::Audio {
            bytes: audio,
            mime: mime.into(),
            session_id: Uuid::new_v4(),
        })
        .await
    }

    async fn start(&mut self, request: VoiceRequest) -> Uuid {
        // Retire the previous session before anything of the new one runs
        self.stop();
        self.interrupt().await;

        let session_id = request.session_id();
        let processor =
            StreamProcessor::with_session_id(self.config.stream.clone(), self.sinks(), session_id);
        let cancel = CancellationToken::new();

        let body = match self.transport.send(request, cancel.clone()).await {
            Ok(body) => body,
            // Let the processor surface the failure like any other
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        };

        self.current = Some(ActiveSession {
            handle: ProcessorHandle::spawn(processor, body),
            cancel,
        });
        session_id
    }

    /// Stop the current session and cancel its request. Playback that is
    /// already queued keeps going; see [`interrupt`](Self::interrupt).
    pub fn stop(&mut self) {
        if let Some(active) = self.current.take() {
            active.handle.stop();
            active.cancel.cancel();
        }
    }

    /// Barge-in: silence all playback without touching the text session
    pub async fn interrupt(&self) {
        self.scheduler.stop().await;
        if let Some(renderer) = &self.renderer {
            renderer.stop();
        }
    }

    /// Wait until the current response body has been consumed
    pub async fn wait(&mut self) -> Result<(), StreamError> {
        match self.current.as_mut() {
            Some(active) => active.handle.wait().await,
            None => Ok(()),
        }
    }

    pub fn current_session(&self) -> Option<&StreamProcessor> {
        self.current.as_ref().map(|active| active.handle.processor())
    }

    pub fn session_stats(&self) -> Option<SessionStats> {
        self.current_session().map(|p| p.stats())
    }

    /// Synthesize `text` and queue it for playback. Returns the ticket.
    pub async fn speak(&self, text: &str) -> Result<u64, StreamError> {
        let synthesizer = self
            .synthesizer
            .as_ref()
            .ok_or_else(|| StreamError::render("no synthesizer configured"))?;

        let output = synthesizer.synthesize(text).await?;
        let source = AudioSource::from(output).with_sample_rate(synthesizer.sample_rate());
        let ticket = self.scheduler.enqueue(source, || {
            tracing::debug!("Spoken segment finished");
        });
        Ok(ticket)
    }

    /// Transcribe an utterance locally, then submit its text
    pub async fn transcribe_and_submit(
        &mut self,
        audio: Bytes,
        mime: &str,
    ) -> Result<Uuid, StreamError> {
        let transcriber = self
            .transcriber
            .clone()
            .ok_or_else(|| StreamError::upstream("no transcriber configured"))?;

        let text = transcriber.transcribe(audio, mime).await?;
        let _ = self.events.send(ClientEvent::Transcript(text.clone()));
        Ok(self.submit(text).await)
    }

    /// React to capture events until the capture source goes away
    pub async fn run_capture(&mut self, capture: &mut dyn SpeechCapture) -> Result<(), StreamError> {
        let mut events = capture.start()?;

        while let Some(event) = events.recv().await {
            match event {
                CaptureEvent::SpeechStarted => {
                    tracing::debug!("Speech started, interrupting playback");
                    self.interrupt().await;
                }
                CaptureEvent::Utterance { audio, mime } => {
                    let result = if self.transcriber.is_some() {
                        self.transcribe_and_submit(audio, &mime).await.map(|_| ())
                    } else {
                        self.submit_audio(audio, mime).await;
                        Ok(())
                    };
                    if let Err(e) = result {
                        tracing::warn!("Utterance dropped: {}", e);
                        let _ = self.events.send(ClientEvent::Failed(e));
                    }
                }
            }
        }

        capture.stop();
        Ok(())
    }

    fn sinks(&self) -> Sinks {
        let text_events = self.events.clone();
        let transcript_events = self.events.clone();
        let status_events = self.events.clone();
        let complete_events = self.events.clone();
        let error_events = self.events.clone();
        let opened: Arc<Mutex<Option<OutputId>>> = Arc::new(Mutex::new(None));
        let renderer = self.renderer.clone();
        let failed_renderer = self.renderer.clone();
        let failed_opened = opened.clone();

        Sinks::new()
            .on_text(move |text| {
                let _ = text_events.send(ClientEvent::Text(text.to_string()));
            })
            .on_transcript(move |text| {
                let _ = transcript_events.send(ClientEvent::Transcript(text.to_string()));
            })
            .on_status(move |value| {
                let _ = status_events.send(ClientEvent::Status(value.to_string()));
            })
            .on_complete(move |text, latency_ms| {
                let _ = complete_events.send(ClientEvent::Completed { text, latency_ms });
            })
            .on_error(move |err| {
                close_when_drained(failed_renderer.as_ref(), &failed_opened);
                if err.kind != ErrorKind::Aborted {
                    let _ = error_events.send(ClientEvent::Failed(err));
                }
            })
            .on_audio(self.audio_sink(opened.clone()))
            .on_audio_end(move || {
                tracing::debug!("Response audio closed");
                close_when_drained(renderer.as_ref(), &opened);
            })
    }

    /// In-order audio chunks go to the renderer as PCM16 or to the
    /// scheduler as one f32 stream per session
    fn audio_sink(
        &self,
        opened: Arc<Mutex<Option<OutputId>>>,
    ) -> impl FnMut(u64, Bytes) + Send + 'static {
        let route = self.config.stream.audio_route;
        let renderer = self.renderer.clone();
        let scheduler = self.scheduler.clone();
        let events = self.events.clone();
        let mut decoder = Pcm16Decoder::new();
        let mut samples: Vec<i16> = Vec::new();
        let mut stream: Option<mpsc::UnboundedSender<Bytes>> = None;
        let mut warned = false;

        move |index, bytes| match route {
            AudioRoute::Renderer => {
                let Some(renderer) = renderer.as_ref() else {
                    if !warned {
                        tracing::warn!("No renderer attached; response audio is dropped");
                        warned = true;
                    }
                    return;
                };
                let handle = match renderer.acquire() {
                    Ok((id, handle)) => {
                        *opened.lock() = Some(id);
                        handle
                    }
                    Err(e) => {
                        if !warned {
                            tracing::error!("Renderer failed to start: {}", e);
                            let _ = events.send(ClientEvent::Notice(
                                "Audio output is unavailable; replies will be shown as text."
                                    .to_string(),
                            ));
                            warned = true;
                        }
                        return;
                    }
                };
                samples.clear();
                decoder.decode(&bytes, &mut samples);
                if let Err(e) = handle.push_samples(&samples) {
                    tracing::warn!("Audio chunk {} not rendered: {}", index, e);
                }
            }
            AudioRoute::Scheduler => {
                let tx = stream.get_or_insert_with(|| {
                    let (tx, source) = AudioSource::channel();
                    scheduler.enqueue(source, || tracing::debug!("Response audio played"));
                    tx
                });
                let _ = tx.send(bytes);
            }
        }
    }
}

/// Close the renderer this reply opened once it has played out
fn close_when_drained(renderer: Option<&Arc<RingOutput>>, opened: &Mutex<Option<OutputId>>) {
    let (Some(renderer), Some(id)) = (renderer, opened.lock().take()) else {
        return;
    };
    let renderer = renderer.clone();
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move { renderer.close_when_drained(id).await });
        }
        Err(_) => renderer.stop(),
    }
}

impl Drop for VoiceClient {
    fn drop(&mut self) {
        self.stop();
    }
}
