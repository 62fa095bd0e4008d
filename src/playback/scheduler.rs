//! Strictly sequential playback of logical audio streams
//!
//! Streams are played one after another in submission order. Within a
//! stream, samples are cut into fixed-length buffers and each buffer is
//! placed on the output clock exactly where the previous one ends, so there
//! is neither a gap nor an overlap. Between two streams the scheduler waits
//! a short settling delay. At most [`MAX_SCHEDULED_BUFFERS`] buffers sit on
//! the output timeline at once; the rest of a stream waits in the scheduler.
//!
//! A source may declare its own sample rate. The output context is reopened
//! whenever the next stream needs a different rate.
//!
//! The scheduler is an actor: the public handle only sends commands, and a
//! single task owns the queue, the cursor and the output context.

use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use super::context::{ContextFactory, ContextHandle};
use super::source::AudioSource;
use crate::audio::F32Decoder;
use crate::config::PlaybackConfig;
use crate::constants::MAX_SCHEDULED_BUFFERS;
use crate::error::{AudioError, StreamError};

/// Invoked once a stream has been played out completely
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Invoked when the output context cannot be created or fed
pub type RenderErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;

struct QueueItem {
    id: u64,
    source: AudioSource,
    on_complete: CompletionCallback,
}

enum Command {
    Enqueue(QueueItem),
    Stop(oneshot::Sender<()>),
}

#[derive(Default)]
struct SchedulerStatus {
    playing: AtomicBool,
    queued: AtomicUsize,
    completed: AtomicU64,
}

/// Handle to the playback scheduler task
pub struct PlaybackScheduler {
    tx: mpsc::UnboundedSender<Command>,
    status: Arc<SchedulerStatus>,
    next_id: AtomicU64,
    task: JoinHandle<()>,
}

impl PlaybackScheduler {
    /// Spawn the scheduler on the current tokio runtime
    pub fn new(config: PlaybackConfig, factory: Arc<dyn ContextFactory>) -> Self {
        Self::spawn(config, factory, None)
    }

    /// Like [`new`](Self::new), reporting render failures to `on_error`
    pub fn with_error_handler(
        config: PlaybackConfig,
        factory: Arc<dyn ContextFactory>,
        on_error: RenderErrorCallback,
    ) -> Self {
        Self::spawn(config, factory, Some(on_error))
    }

    fn spawn(
        mut config: PlaybackConfig,
        factory: Arc<dyn ContextFactory>,
        on_error: Option<RenderErrorCallback>,
    ) -> Self {
        // A zero-sized buffer would never fill
        config.render_buffer_frames = config.render_buffer_frames.max(1);
        config.channels = config.channels.max(1);

        let (tx, commands) = mpsc::unbounded_channel();
        let status = Arc::new(SchedulerStatus::default());

        let worker = Worker {
            config,
            factory,
            on_error,
            commands,
            queue: VecDeque::new(),
            context: None,
            next_start: 0,
            last_finished: None,
            status: status.clone(),
        };

        Self {
            tx,
            status,
            next_id: AtomicU64::new(0),
            task: tokio::spawn(worker.run()),
        }
    }

    /// Queue a stream; `on_complete` fires after its last buffer has played.
    /// Returns the stream's ticket number.
    pub fn enqueue<F>(&self, source: AudioSource, on_complete: F) -> u64
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.status.queued.fetch_add(1, Ordering::SeqCst);
        let item = QueueItem {
            id,
            source,
            on_complete: Box::new(on_complete),
        };
        if self.tx.send(Command::Enqueue(item)).is_err() {
            tracing::warn!("Playback scheduler is gone; dropping stream {}", id);
        }
        id
    }

    /// Drop queued streams, halt the active one and release the output.
    /// Safe to call at any time, including when idle.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Whether a stream is currently being played
    pub fn is_playing(&self) -> bool {
        self.status.playing.load(Ordering::SeqCst)
    }

    /// Streams waiting behind the active one
    pub fn queued(&self) -> usize {
        self.status.queued.load(Ordering::SeqCst)
    }

    /// Streams played to the end so far
    pub fn completed(&self) -> u64 {
        self.status.completed.load(Ordering::SeqCst)
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Played {
    Finished,
    Stopped,
    Closed,
}

enum Step {
    Chunk(Option<Result<bytes::Bytes, StreamError>>),
    Ended(bool),
    Command(Option<Command>),
}

struct Worker {
    config: PlaybackConfig,
    factory: Arc<dyn ContextFactory>,
    on_error: Option<RenderErrorCallback>,
    commands: mpsc::UnboundedReceiver<Command>,
    queue: VecDeque<QueueItem>,
    context: Option<ContextHandle>,
    /// Frame at which the next buffer starts
    next_start: u64,
    last_finished: Option<Instant>,
    status: Arc<SchedulerStatus>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if self.queue.is_empty() {
                match self.commands.recv().await {
                    Some(command) => {
                        self.handle_command(command);
                        continue;
                    }
                    None => break,
                }
            }

            if let Some(wait) = self.settle_remaining() {
                let sleep = tokio::time::sleep(wait);
                tokio::pin!(sleep);
                while !self.queue.is_empty() {
                    tokio::select! {
                        _ = &mut sleep => break,
                        command = self.commands.recv() => match command {
                            Some(command) => {
                                self.handle_command(command);
                            }
                            None => {
                                self.halt();
                                return;
                            }
                        },
                    }
                }
                if self.queue.is_empty() {
                    continue;
                }
            }

            let Some(item) = self.queue.pop_front() else {
                continue;
            };
            self.status.queued.fetch_sub(1, Ordering::SeqCst);

            match self.play(item).await {
                Played::Finished | Played::Stopped => {}
                Played::Closed => break,
            }
        }
        self.halt();
    }

    /// Returns true when the command was a stop
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Enqueue(item) => {
                self.queue.push_back(item);
                false
            }
            Command::Stop(ack) => {
                self.halt();
                let _ = ack.send(());
                true
            }
        }
    }

    fn settle_remaining(&self) -> Option<Duration> {
        let finished = self.last_finished?;
        let ready_at = finished + self.config.settle_delay();
        let now = Instant::now();
        (ready_at > now).then(|| ready_at - now)
    }

    async fn play(&mut self, item: QueueItem) -> Played {
        let QueueItem {
            id,
            source,
            on_complete,
        } = item;
        let sample_rate = source.sample_rate().unwrap_or(self.config.sample_rate);

        if let Some(handle) = &self.context {
            if handle.context.sample_rate() != sample_rate {
                tracing::debug!("Stream {} plays at {} Hz; reopening output", id, sample_rate);
                self.release_context();
            }
        }

        if self.context.is_none() {
            match self.factory.create(sample_rate, self.config.channels) {
                Ok(context) => {
                    tracing::debug!("Output context created for stream {}", id);
                    self.context = Some(context);
                    self.next_start = 0;
                }
                Err(e) => {
                    self.report(e);
                    self.finish(id, on_complete);
                    return Played::Finished;
                }
            }
        }

        self.status.playing.store(true, Ordering::SeqCst);
        let channels = self
            .context
            .as_ref()
            .map_or(1, |handle| handle.context.channels().max(1) as usize);
        let block_len = self.config.render_buffer_frames * channels;

        let mut stream = source.into_stream();
        let mut decoder = F32Decoder::new();
        let mut pending: Vec<f32> = Vec::with_capacity(block_len * 2);
        let mut stream_done = false;
        let mut outstanding = 0usize;

        loop {
            while outstanding < MAX_SCHEDULED_BUFFERS {
                let len = if pending.len() >= block_len {
                    block_len
                } else if stream_done && !pending.is_empty() {
                    pending.len()
                } else {
                    break;
                };
                match self.schedule_block(&mut pending, len) {
                    Ok(()) => outstanding += 1,
                    Err(e) => return self.abandon(id, on_complete, e),
                }
            }

            if stream_done && pending.is_empty() && outstanding == 0 {
                break;
            }

            let want_more = !stream_done && pending.len() < block_len;
            let step = {
                let Some(context) = self.context.as_mut() else {
                    break;
                };
                tokio::select! {
                    chunk = stream.next(), if want_more => Step::Chunk(chunk),
                    ended = context.ended.recv(), if outstanding > 0 => Step::Ended(ended.is_some()),
                    command = self.commands.recv() => Step::Command(command),
                }
            };

            match step {
                Step::Chunk(Some(Ok(bytes))) => decoder.decode(&bytes, &mut pending),
                Step::Chunk(other) => {
                    if let Some(Err(e)) = other {
                        tracing::warn!("Audio stream {} failed: {}", id, e);
                    }
                    stream_done = true;
                    pending.truncate(pending.len() - pending.len() % channels);
                }
                Step::Ended(true) => outstanding = outstanding.saturating_sub(1),
                Step::Ended(false) => {
                    tracing::warn!("Output context stopped reporting; treating stream {} as done", id);
                    outstanding = 0;
                }
                Step::Command(Some(command)) => {
                    if self.handle_command(command) {
                        tracing::debug!("Stream {} stopped", id);
                        return Played::Stopped;
                    }
                }
                Step::Command(None) => return Played::Closed,
            }
        }

        self.finish(id, on_complete);
        Played::Finished
    }

    /// Move `len` samples from `pending` onto the output timeline
    fn schedule_block(&mut self, pending: &mut Vec<f32>, len: usize) -> Result<(), AudioError> {
        if len == 0 {
            return Err(AudioError::UnsupportedFormat("empty playback buffer".into()));
        }
        let handle = self.context.as_mut().ok_or(AudioError::ContextClosed)?;
        let channels = handle.context.channels().max(1) as u64;
        let sample_rate = handle.context.sample_rate() as u64;

        let mut block = handle.context.reclaim().unwrap_or_default();
        block.clear();
        block.extend(pending.drain(..len));
        let frames = block.len() as u64 / channels;

        // Late start: leave a short lead so the head of the buffer is not cut
        let now = handle.context.current_frame();
        if self.next_start < now {
            self.next_start = now + sample_rate / 100;
        }

        handle.context.schedule(block, self.next_start)?;
        self.next_start += frames;
        Ok(())
    }

    fn finish(&mut self, id: u64, on_complete: CompletionCallback) {
        on_complete();
        self.status.completed.fetch_add(1, Ordering::SeqCst);
        self.last_finished = Some(Instant::now());
        tracing::debug!("Stream {} finished", id);

        if self.queue.is_empty() {
            self.release_context();
            self.status.playing.store(false, Ordering::SeqCst);
        }
    }

    fn abandon(&mut self, id: u64, on_complete: CompletionCallback, err: AudioError) -> Played {
        self.report(err);
        if let Some(mut handle) = self.context.take() {
            let _ = handle.context.stop_all();
            let _ = handle.context.close();
        }
        self.next_start = 0;
        self.finish(id, on_complete);
        Played::Finished
    }

    fn report(&self, err: AudioError) {
        let err = StreamError::from(err);
        tracing::error!("Playback output failed: {}", err);
        if let Some(on_error) = &self.on_error {
            on_error(&err);
        }
    }

    fn release_context(&mut self) {
        if let Some(mut handle) = self.context.take() {
            if let Err(e) = handle.context.close() {
                tracing::debug!("Ignoring error while closing output context: {}", e);
            }
        }
        self.next_start = 0;
    }

    /// Clear the queue, silence the active stream and release the output
    fn halt(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.status.queued.store(0, Ordering::SeqCst);

        if let Some(mut handle) = self.context.take() {
            // Sources may already have finished, or the device may be gone
            if let Err(e) = handle.context.stop_all() {
                tracing::debug!("Ignoring error while stopping sources: {}", e);
            }
            if let Err(e) = handle.context.close() {
                tracing::debug!("Ignoring error while closing output context: {}", e);
            }
        }

        self.next_start = 0;
        self.last_finished = None;
        self.status.playing.store(false, Ordering::SeqCst);
        if dropped > 0 {
            tracing::debug!("Playback stopped, {} queued streams dropped", dropped);
        }
    }
}
