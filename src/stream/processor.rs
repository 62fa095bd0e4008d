//! Response stream processor
//!
//! Consumes one response body: splits it into frames, decodes events and
//! routes them to the session's sinks. Text is revealed through the typing
//! scheduler; audio goes through the chunk reorderer so the audio sink only
//! ever sees ascending indices.
//!
//! Session state and the caller's callbacks sit behind two separate locks.
//! No sink runs while the state lock is held, so a sink may read the
//! processor (e.g. [`StreamProcessor::displayed_text`]). Sinks do run under
//! the callbacks lock, which [`StreamProcessor::stop`] takes before clearing
//! them; once `stop` returns no callback fires.

use futures_util::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::session::{Session, SessionStats};
use super::sinks::{AudioSink, Sinks};
use super::typing::TypingScheduler;
use crate::audio::{AudioChunkReorderer, ReorderStats};
use crate::config::StreamConfig;
use crate::error::{ProtocolError, StreamError};
use crate::protocol::{Event, Frame, FrameDecoder};
use crate::transport::ByteStream;

/// Outcome of handling one frame
enum Flow {
    Continue,
    Done,
}

struct State {
    session: Session,
    typing: TypingScheduler,
    tasks: Vec<JoinHandle<()>>,
}

impl State {
    /// Mark the session inactive and halt its timers.
    /// Returns false if it already was.
    fn deactivate(&mut self) -> bool {
        if !self.session.is_active() {
            return false;
        }
        self.session.active = false;
        self.session.typing = false;
        self.typing.stop();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        true
    }
}

/// Everything that calls out to the session's owner
struct Callbacks {
    sinks: Sinks,
    reorderer: Option<AudioChunkReorderer<AudioSink>>,
}

impl Callbacks {
    fn close_audio(&mut self) -> Option<ReorderStats> {
        let mut reorderer = self.reorderer.take()?;
        let discarded = reorderer.reset();
        if discarded > 0 {
            tracing::debug!("Discarded {} undelivered audio chunks", discarded);
        }
        Some(reorderer.stats())
    }

    /// Drop every sink; dropping also closes channel-backed audio streams
    fn clear(&mut self) {
        self.close_audio();
        self.sinks = Sinks::default();
    }
}

struct Inner {
    config: StreamConfig,
    state: Mutex<State>,
    callbacks: ReentrantMutex<RefCell<Callbacks>>,
    /// `true` while the typing queue is empty
    idle: watch::Sender<bool>,
}

impl Inner {
    fn is_active(&self) -> bool {
        self.state.lock().session.is_active()
    }

    /// Run `f` against the callbacks while the session is active. A call
    /// made from inside a sink is skipped.
    fn with_callbacks<R>(&self, f: impl FnOnce(&mut Callbacks) -> R) -> Option<R> {
        let guard = self.callbacks.lock();
        let mut callbacks = guard.try_borrow_mut().ok()?;
        if !self.is_active() {
            callbacks.clear();
            return None;
        }
        let result = f(&mut callbacks);
        // A sink may have stopped the session
        if !self.is_active() {
            callbacks.clear();
        }
        Some(result)
    }

    /// Clear the callbacks once no sink is running on another thread
    fn clear_callbacks(&self) {
        let guard = self.callbacks.lock();
        // Borrowed means we are inside a sink; `with_callbacks` clears on return
        if let Ok(mut callbacks) = guard.try_borrow_mut() {
            callbacks.clear();
        };
    }
}

/// Processes the response of one session
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct StreamProcessor {
    inner: Arc<Inner>,
}

impl StreamProcessor {
    pub fn new(config: StreamConfig, sinks: Sinks) -> Self {
        Self::with_session_id(config, sinks, Uuid::new_v4())
    }

    pub fn with_session_id(config: StreamConfig, mut sinks: Sinks, session_id: Uuid) -> Self {
        let audio: AudioSink = sinks.audio.take().unwrap_or_else(|| Box::new(|_, _| {}));
        let (idle, _) = watch::channel(true);

        let state = State {
            session: Session::new(session_id),
            typing: TypingScheduler::new(),
            tasks: Vec::new(),
        };
        let callbacks = Callbacks {
            sinks,
            reorderer: Some(AudioChunkReorderer::new(audio)),
        };

        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                callbacks: ReentrantMutex::new(RefCell::new(callbacks)),
                idle,
            }),
        }
    }

    /// Consume the response body until completion, an error event, a
    /// transport failure or [`stop`](Self::stop).
    ///
    /// Returns `Ok(())` once a `complete` event has been handled. Text may
    /// still be typing at that point; the completion sink fires when it is
    /// done.
    pub async fn process(&self, mut body: ByteStream) -> Result<(), StreamError> {
        tracing::info!("Session {} started", self.session_id());
        let mut decoder = FrameDecoder::new();

        loop {
            if !self.is_active() {
                return Err(StreamError::aborted());
            }

            match body.next().await {
                Some(Ok(chunk)) => {
                    decoder.push(&chunk);
                    while let Some(frame) = decoder.next_frame() {
                        if let Flow::Done = self.handle_frame(frame)? {
                            return Ok(());
                        }
                    }
                }
                Some(Err(e)) => return Err(self.fail(e)),
                None => {
                    while let Some(frame) = decoder.finish() {
                        if let Flow::Done = self.handle_frame(frame)? {
                            return Ok(());
                        }
                    }
                    return Err(self.fail(StreamError::network("response ended before completion")));
                }
            }
        }
    }

    /// Halt typing, drop pending audio and make the session inert.
    /// Idempotent. Does not cancel the transport.
    ///
    /// Waits for a sink running on another thread to return. Called from
    /// inside a sink, the remaining callbacks are dropped when it returns.
    pub fn stop(&self) {
        let stopped = self.inner.state.lock().deactivate();
        if stopped {
            self.inner.idle.send_replace(true);
        }
        self.inner.clear_callbacks();
        if stopped {
            tracing::info!("Session {} stopped", self.session_id());
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn is_typing(&self) -> bool {
        self.inner.state.lock().session.typing
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.state.lock().session.id()
    }

    pub fn displayed_text(&self) -> String {
        self.inner.state.lock().session.displayed().to_string()
    }

    pub fn accumulated_text(&self) -> String {
        self.inner.state.lock().session.accumulated().to_string()
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.state.lock().session.stats()
    }

    /// Reorderer counters; `None` once the session's audio has closed, or
    /// when asked from inside a sink
    pub fn reorder_stats(&self) -> Option<ReorderStats> {
        let guard = self.inner.callbacks.lock();
        let callbacks = guard.try_borrow().ok()?;
        let stats = callbacks.reorderer.as_ref().map(|r| r.stats());
        stats
    }

    /// Wait until every received character has been revealed
    pub async fn typing_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    fn handle_frame(&self, frame: Result<Frame, ProtocolError>) -> Result<Flow, StreamError> {
        let event = frame.and_then(|frame| {
            let event = Event::from_frame(&frame)?;
            if event.is_none() {
                tracing::debug!("Ignoring frame of type '{}'", frame.event_type);
            }
            Ok(event)
        });

        match event {
            Ok(Some(event)) => self.dispatch(event),
            Ok(None) => Ok(Flow::Continue),
            Err(e) => {
                let mut state = self.inner.state.lock();
                if !state.session.is_active() {
                    return Err(StreamError::aborted());
                }
                state.session.record_protocol_error();
                tracing::warn!("Skipping malformed frame: {}", e);
                Ok(Flow::Continue)
            }
        }
    }

    fn dispatch(&self, event: Event) -> Result<Flow, StreamError> {
        let mut state = self.inner.state.lock();
        if !state.session.is_active() {
            return Err(StreamError::aborted());
        }

        tracing::debug!("Event '{}'", event.type_name());
        if event.is_content() {
            state.session.mark_first_packet();
        }

        match event {
            Event::TextDelta(delta) => {
                state.session.push_delta(&delta);
                self.ensure_typing(&mut state);
            }
            Event::AudioChunk { index, data } => {
                state.session.record_audio(data.len());
                drop(state);
                self.inner.with_callbacks(|callbacks| {
                    if let Some(reorderer) = callbacks.reorderer.as_mut() {
                        reorderer.insert(index, data);
                    }
                });
            }
            Event::Transcript(content) => {
                drop(state);
                self.inner.with_callbacks(|callbacks| {
                    if let Some(sink) = callbacks.sinks.transcript.as_mut() {
                        sink(&content);
                    }
                });
            }
            Event::Status(value) => {
                drop(state);
                self.inner.with_callbacks(|callbacks| {
                    if let Some(sink) = callbacks.sinks.status.as_mut() {
                        sink(&value);
                    }
                });
            }
            Event::Complete { full_text } => {
                state.session.mark_complete();
                state.session.push_remainder(&full_text);
                self.ensure_typing(&mut state);
                self.schedule_completion(&mut state, full_text);
                self.schedule_audio_end(&mut state);
                tracing::info!(
                    "Session {} complete after {} ms",
                    state.session.id(),
                    state.session.stats().total_ms.unwrap_or_default()
                );
                return Ok(Flow::Done);
            }
            Event::Error { message } => {
                drop(state);
                return Err(self.fail(StreamError::upstream(message)));
            }
        }

        Ok(Flow::Continue)
    }

    /// End the session with a terminal error, surfacing it exactly once
    fn fail(&self, err: StreamError) -> StreamError {
        let id = {
            let mut state = self.inner.state.lock();
            if !state.deactivate() {
                return StreamError::aborted();
            }
            state.session.id()
        };
        self.inner.idle.send_replace(true);
        tracing::error!("Session {} failed: {}", id, err);

        let guard = self.inner.callbacks.lock();
        let sink = match guard.try_borrow_mut() {
            Ok(mut callbacks) => {
                let sink = callbacks.sinks.error.take();
                callbacks.clear();
                sink
            }
            Err(_) => None,
        };
        if let Some(sink) = sink {
            sink(err.clone());
        }
        drop(guard);
        err
    }

    fn ensure_typing(&self, state: &mut State) {
        if state.session.typing || state.session.pending() == 0 {
            return;
        }
        state.session.typing = true;
        self.inner.idle.send_replace(false);

        let inner = self.inner.clone();
        state
            .typing
            .start(self.inner.config.typing_interval(), move || {
                let revealed = {
                    let mut state = inner.state.lock();
                    if !state.session.is_active() {
                        return false;
                    }
                    state
                        .session
                        .reveal_next()
                        .map(|_| state.session.displayed().to_string())
                };

                if let Some(displayed) = revealed {
                    inner.with_callbacks(|callbacks| {
                        if let Some(sink) = callbacks.sinks.text.as_mut() {
                            sink(&displayed);
                        }
                    });
                }

                let mut state = inner.state.lock();
                if !state.session.is_active() {
                    return false;
                }
                if state.session.pending() > 0 {
                    return true;
                }
                state.session.typing = false;
                inner.idle.send_replace(true);
                false
            });
    }

    fn schedule_completion(&self, state: &mut State, full_text: String) {
        let inner = self.inner.clone();
        let mut idle = self.inner.idle.subscribe();

        state.tasks.push(tokio::spawn(async move {
            if idle.wait_for(|idle| *idle).await.is_err() {
                return;
            }

            let latency = {
                let state = inner.state.lock();
                if !state.session.is_active() {
                    return;
                }
                state.session.stats().reported_latency_ms().unwrap_or(0)
            };
            inner.with_callbacks(|callbacks| {
                if let Some(sink) = callbacks.sinks.complete.take() {
                    sink(full_text, latency);
                }
            });
        }));
    }

    fn schedule_audio_end(&self, state: &mut State) {
        let inner = self.inner.clone();
        let delay = self.inner.config.audio_close_delay();

        state.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            inner.with_callbacks(|callbacks| {
                if let Some(stats) = callbacks.close_audio() {
                    tracing::debug!(
                        "Audio closed: {} chunks delivered, {} duplicates",
                        stats.delivered,
                        stats.duplicates
                    );
                }
                if let Some(sink) = callbacks.sinks.audio_end.take() {
                    sink();
                }
            });
        }));
    }
}

/// A processor running on its own task
///
/// Dropping the handle stops the session, so replacing the handle held by
/// the caller is enough to retire the previous session.
pub struct ProcessorHandle {
    processor: StreamProcessor,
    task: Option<JoinHandle<Result<(), StreamError>>>,
}

impl ProcessorHandle {
    pub fn spawn(processor: StreamProcessor, body: ByteStream) -> Self {
        let runner = processor.clone();
        let task = tokio::spawn(async move { runner.process(body).await });
        Self {
            processor,
            task: Some(task),
        }
    }

    pub fn processor(&self) -> &StreamProcessor {
        &self.processor
    }

    pub fn stop(&self) {
        self.processor.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait for the body to be consumed. The session stays alive so pending
    /// typing and completion still run; later calls return `Ok(())`.
    pub async fn wait(&mut self) -> Result<(), StreamError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(StreamError::aborted()),
            Err(e) => Err(StreamError::network(format!("processor task failed: {}", e))),
        }
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        self.processor.stop();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use bytes::Bytes;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use futures_util::stream;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::Duration;

    fn config() -> StreamConfig {
        StreamConfig {
            typing_interval_ms: 20,
            audio_close_delay_ms: 500,
            ..StreamConfig::default()
        }
    }

    fn body(frames: &[&str]) -> ByteStream {
        let chunks: Vec<Result<Bytes, StreamError>> = frames
            .iter()
            .map(|f| Ok(Bytes::from(f.to_string())))
            .collect();
        stream::iter(chunks).boxed()
    }

    fn audio_frame(index: u64, payload: &[u8]) -> String {
        format!(
            "event: audio\ndata: {{\"chunk\":\"{}\",\"index\":{}}}\n\n",
            BASE64.encode(payload),
            index
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_converges_and_completes() {
        let texts = Arc::new(Mutex::new(Vec::new()));
        let seen = texts.clone();
        let (done_tx, done_rx) = oneshot::channel();

        let processor = StreamProcessor::new(
            config(),
            Sinks::new()
                .on_text(move |text| seen.lock().push(text.to_string()))
                .on_complete(move |text, latency| {
                    let _ = done_tx.send((text, latency));
                }),
        );

        let result = processor
            .process(body(&[
                "event: text\ndata: {\"content\":\"Hel\"}\n\n",
                "event: text\ndata: {\"content\":\"lo\"}\n\n",
                "event: complete\ndata: {\"fullText\":\"Hello\"}\n\n",
            ]))
            .await;
        assert!(result.is_ok());

        let (text, _latency) = done_rx.await.unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(processor.displayed_text(), "Hello");
        assert_eq!(
            *texts.lock(),
            vec!["H", "He", "Hel", "Hell", "Hello"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_fills_missing_text() {
        let (done_tx, done_rx) = oneshot::channel();
        let processor = StreamProcessor::new(
            config(),
            Sinks::new().on_complete(move |text, _| {
                let _ = done_tx.send(text);
            }),
        );

        processor
            .process(body(&[
                "event: text\ndata: {\"content\":\"Good\"}\n\n",
                "event: complete\ndata: {\"fullText\":\"Good morning\"}\n\n",
            ]))
            .await
            .unwrap();
        assert_eq!(processor.accumulated_text(), "Good morning");

        assert_eq!(done_rx.await.unwrap(), "Good morning");
        assert_eq!(processor.displayed_text(), "Good morning");
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_reveals_one_character_per_tick() {
        let processor = StreamProcessor::new(config(), Sinks::new());
        let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, StreamError>>();
        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        let runner = processor.clone();
        let task = tokio::spawn(async move { runner.process(body).await });

        tx.send(Ok(Bytes::from_static(
            b"event: text\ndata: {\"content\":\"abcdef\"}\n\n",
        )))
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.displayed_text(), "ab");
        assert!(processor.is_typing());

        processor.typing_idle().await;
        assert_eq!(processor.displayed_text(), "abcdef");
        assert!(!processor.is_typing());

        drop(tx);
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_audio_is_delivered_in_index_order() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let seen = chunks.clone();
        let processor = StreamProcessor::new(
            config(),
            Sinks::new().on_audio(move |index, data| seen.lock().push((index, data))),
        );

        let frames = [
            audio_frame(2, b"cc"),
            audio_frame(0, b"aa"),
            audio_frame(1, b"bb"),
            "event: complete\ndata: {\"fullText\":\"\"}\n\n".to_string(),
        ];
        let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
        processor.process(body(&frames)).await.unwrap();

        assert_eq!(
            *chunks.lock(),
            vec![
                (0, Bytes::from_static(b"aa")),
                (1, Bytes::from_static(b"bb")),
                (2, Bytes::from_static(b"cc")),
            ]
        );
        let stats = processor.stats();
        assert_eq!(stats.audio_chunks, 3);
        assert_eq!(stats.audio_bytes, 6);
        assert!(stats.first_packet_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_skipped() {
        let (done_tx, done_rx) = oneshot::channel();
        let processor = StreamProcessor::new(
            config(),
            Sinks::new().on_complete(move |text, _| {
                let _ = done_tx.send(text);
            }),
        );

        processor
            .process(body(&[
                "event: text\ndata: {\"content\":\"A\"}\n\n",
                "event: text\ndata: {not json}\n\n",
                "event: audio\ndata: {\"chunk\":\"***\",\"index\":0}\n\n",
                "event: text\ndata: {\"content\":\"B\"}\n\n",
                "event: complete\ndata: {\"fullText\":\"AB\"}\n\n",
            ]))
            .await
            .unwrap();

        assert_eq!(done_rx.await.unwrap(), "AB");
        assert_eq!(processor.stats().protocol_errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_ends_session() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();
        let completed = Arc::new(Mutex::new(false));
        let done = completed.clone();

        let processor = StreamProcessor::new(
            config(),
            Sinks::new()
                .on_error(move |e| seen.lock().push(e))
                .on_complete(move |_, _| *done.lock() = true),
        );

        let err = processor
            .process(body(&[
                "event: text\ndata: {\"content\":\"partial\"}\n\n",
                "event: error\ndata: {\"message\":\"model overloaded\"}\n\n",
                "event: complete\ndata: {\"fullText\":\"never\"}\n\n",
            ]))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Upstream);
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(errors.lock()[0].message, "model overloaded");
        assert!(!processor.is_active());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!*completed.lock());
        assert_eq!(processor.displayed_text(), "");
    }

    #[tokio::test]
    async fn test_transport_error_surfaces_once() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();
        let processor =
            StreamProcessor::new(config(), Sinks::new().on_error(move |e| seen.lock().push(e.kind)));

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"event: status\ndata: {\"value\":\"thinking\"}\n\n")),
            Err(StreamError::timeout("no data received for 30000 ms")),
        ])
        .boxed();

        let err = processor.process(body).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(*errors.lock(), vec![ErrorKind::Timeout]);

        processor.stop();
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_stream_silences_sinks() {
        let calls = Arc::new(Mutex::new(0usize));
        let text_calls = calls.clone();
        let audio_calls = calls.clone();
        let errors = Arc::new(Mutex::new(0usize));
        let error_calls = errors.clone();

        let processor = StreamProcessor::new(
            config(),
            Sinks::new()
                .on_text(move |_| *text_calls.lock() += 1)
                .on_audio(move |_, _| *audio_calls.lock() += 1)
                .on_error(move |_| *error_calls.lock() += 1),
        );

        let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, StreamError>>();
        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let runner = processor.clone();
        let task = tokio::spawn(async move { runner.process(body).await });

        tx.send(Ok(Bytes::from_static(
            b"event: text\ndata: {\"content\":\"long answer\"}\n\n",
        )))
        .unwrap();
        tokio::time::sleep(Duration::from_millis(45)).await;
        let before = *calls.lock();
        assert_eq!(before, 2);

        processor.stop();
        processor.stop();

        tx.send(Ok(Bytes::from(audio_frame(0, b"late")))).unwrap();
        tx.send(Ok(Bytes::from_static(
            b"event: text\ndata: {\"content\":\" more\"}\n\n",
        )))
        .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*calls.lock(), before);
        assert_eq!(*errors.lock(), 0);
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_end_fires_after_delay() {
        let ended = Arc::new(Mutex::new(false));
        let flag = ended.clone();
        let processor = StreamProcessor::new(
            config(),
            Sinks::new().on_audio_end(move || *flag.lock() = true),
        );

        processor
            .process(body(&[
                audio_frame(1, b"orphan").as_str(),
                "event: complete\ndata: {\"fullText\":\"\"}\n\n",
            ]))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!*ended.lock());
        assert!(processor.reorder_stats().is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(*ended.lock());
        assert!(processor.reorder_stats().is_none());
    }

    #[tokio::test]
    async fn test_end_of_stream_without_complete() {
        let processor = StreamProcessor::new(config(), Sinks::new());
        let err = processor
            .process(body(&["event: text\ndata: {\"content\":\"cut\"}\n\n"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_frame_without_blank_line() {
        let (done_tx, done_rx) = oneshot::channel();
        let processor = StreamProcessor::new(
            config(),
            Sinks::new().on_complete(move |text, _| {
                let _ = done_tx.send(text);
            }),
        );
        processor
            .process(body(&["event: complete\ndata: {\"fullText\":\"ok\"}"]))
            .await
            .unwrap();
        assert_eq!(done_rx.await.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_session() {
        let processor = StreamProcessor::new(config(), Sinks::new());
        let handle = ProcessorHandle::spawn(processor.clone(), stream::pending().boxed());
        tokio::task::yield_now().await;
        assert!(processor.is_active());

        drop(handle);
        assert!(!processor.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sinks_may_read_the_processor() {
        let slot: Arc<Mutex<Option<StreamProcessor>>> = Arc::new(Mutex::new(None));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel();

        let text_slot = slot.clone();
        let text_seen = seen.clone();
        let done_slot = slot.clone();
        let processor = StreamProcessor::new(
            config(),
            Sinks::new()
                .on_text(move |_| {
                    if let Some(processor) = text_slot.lock().as_ref() {
                        text_seen.lock().push(processor.displayed_text());
                    }
                })
                .on_complete(move |_, _| {
                    let stats = done_slot.lock().as_ref().map(|p| p.stats());
                    let _ = done_tx.send(stats);
                }),
        );
        *slot.lock() = Some(processor.clone());

        processor
            .process(body(&["event: complete\ndata: {\"fullText\":\"abc\"}\n\n"]))
            .await
            .unwrap();

        let stats = done_rx.await.unwrap().unwrap();
        assert_eq!(stats.text_chars, 3);
        assert_eq!(*seen.lock(), vec!["a", "ab", "abc"]);
        slot.lock().take();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_inside_a_sink() {
        let slot: Arc<Mutex<Option<StreamProcessor>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0usize));
        let completed = Arc::new(Mutex::new(false));

        let text_slot = slot.clone();
        let text_calls = calls.clone();
        let done = completed.clone();
        let processor = StreamProcessor::new(
            config(),
            Sinks::new()
                .on_text(move |_| {
                    *text_calls.lock() += 1;
                    let processor = text_slot.lock().take();
                    if let Some(processor) = processor {
                        processor.stop();
                    }
                })
                .on_complete(move |_, _| *done.lock() = true),
        );
        *slot.lock() = Some(processor.clone());

        processor
            .process(body(&["event: complete\ndata: {\"fullText\":\"stop here\"}\n\n"]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!processor.is_active());
        assert_eq!(*calls.lock(), 1);
        assert!(!*completed.lock());
        assert_eq!(processor.displayed_text(), "s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_typing_interval_still_completes() {
        let (done_tx, done_rx) = oneshot::channel();
        let processor = StreamProcessor::new(
            StreamConfig {
                typing_interval_ms: 0,
                ..config()
            },
            Sinks::new().on_complete(move |text, _| {
                let _ = done_tx.send(text);
            }),
        );

        processor
            .process(body(&[
                "event: text\ndata: {\"content\":\"Hi\"}\n\n",
                "event: complete\ndata: {\"fullText\":\"Hi!\"}\n\n",
            ]))
            .await
            .unwrap();

        let text = tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "Hi!");
        assert!(!processor.is_typing());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn displayed_text_converges_to_concatenation(
                deltas in proptest::collection::vec("[a-zA-Z0-9 éß]{0,8}", 1..8)
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .start_paused(true)
                    .build()
                    .unwrap();

                let expected: String = deltas.concat();
                let displayed = runtime.block_on(async move {
                    let processor = StreamProcessor::new(config(), Sinks::new());
                    let mut frames: Vec<Result<Bytes, StreamError>> = deltas
                        .iter()
                        .map(|d| {
                            let data = serde_json::json!({ "content": d });
                            Ok(Bytes::from(format!("event: text\ndata: {}\n\n", data)))
                        })
                        .collect();
                    let data = serde_json::json!({ "fullText": deltas.concat() });
                    frames.push(Ok(Bytes::from(format!("event: complete\ndata: {}\n\n", data))));

                    processor.process(stream::iter(frames).boxed()).await.unwrap();
                    processor.typing_idle().await;
                    processor.displayed_text()
                });

                prop_assert_eq!(displayed, expected);
            }
        }
    }
}
