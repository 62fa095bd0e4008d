//! Output contexts for the playback scheduler
//!
//! An output context is a device clock that plays buffers at absolute frame
//! positions and reports each buffer's end. The scheduler creates one lazily
//! and is its only owner.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::constants::MAX_SCHEDULED_BUFFERS;
use crate::error::AudioError;

/// Identifier of one scheduled buffer
pub type SourceId = u64;

/// Buffers a [`Mixer`] can hold, and the depth of each of its channels
pub const MIXER_SLOTS: usize = MAX_SCHEDULED_BUFFERS * 2;

/// A clocked audio output
pub trait OutputContext: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Frames rendered by the device clock so far
    fn current_frame(&self) -> u64;

    /// Play interleaved `samples` starting exactly at `start_frame`
    fn schedule(&mut self, samples: Vec<f32>, start_frame: u64) -> Result<SourceId, AudioError>;

    /// Halt every scheduled buffer
    fn stop_all(&mut self) -> Result<(), AudioError>;

    /// Release the underlying device
    fn close(&mut self) -> Result<(), AudioError>;

    /// A played-out buffer available for reuse
    fn reclaim(&mut self) -> Option<Vec<f32>> {
        None
    }
}

/// A freshly created context plus its "ended" notifications
pub struct ContextHandle {
    pub context: Box<dyn OutputContext>,
    pub ended: mpsc::UnboundedReceiver<SourceId>,
}

/// Creates output contexts on demand
pub trait ContextFactory: Send + Sync {
    fn create(&self, sample_rate: u32, channels: u16) -> Result<ContextHandle, AudioError>;
}

/// Control → mixer message
#[derive(Debug)]
pub enum MixerMessage {
    Play {
        id: SourceId,
        start_frame: u64,
        samples: Vec<f32>,
    },
    StopAll,
}

struct ScheduledBuffer {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl ScheduledBuffer {
    fn end_frame(&self, channels: usize) -> u64 {
        self.start_frame + (self.samples.len() / channels) as u64
    }
}

/// Sample-accurate mixer run from a device callback
///
/// Buffers are placed on an absolute frame timeline; a buffer scheduled to
/// start where the previous one ends continues it with no gap or overlap.
///
/// `process` never allocates or frees: the active list holds at most
/// [`MIXER_SLOTS`] buffers, and finished buffers leave through the bounded
/// `spent` channel for the control side to reuse.
pub struct Mixer {
    rx: Receiver<MixerMessage>,
    active: Vec<ScheduledBuffer>,
    frame: u64,
    channels: usize,
    clock: Arc<AtomicU64>,
    ended_tx: Sender<SourceId>,
    spent_tx: Sender<Vec<f32>>,
}

impl Mixer {
    pub fn new(
        channels: u16,
        rx: Receiver<MixerMessage>,
        clock: Arc<AtomicU64>,
        ended_tx: Sender<SourceId>,
        spent_tx: Sender<Vec<f32>>,
    ) -> Self {
        Self {
            rx,
            active: Vec::with_capacity(MIXER_SLOTS),
            frame: 0,
            channels: channels.max(1) as usize,
            clock,
            ended_tx,
            spent_tx,
        }
    }

    /// Render one interleaved block
    pub fn process(&mut self, out: &mut [f32]) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                MixerMessage::Play {
                    id,
                    start_frame,
                    samples,
                } => {
                    if self.active.len() == self.active.capacity() {
                        // Full: refuse the buffer rather than grow
                        let _ = self.ended_tx.try_send(id);
                        let _ = self.spent_tx.try_send(samples);
                        continue;
                    }
                    self.active.push(ScheduledBuffer {
                        id,
                        start_frame,
                        samples,
                    });
                }
                MixerMessage::StopAll => {
                    for buffer in self.active.drain(..) {
                        let _ = self.spent_tx.try_send(buffer.samples);
                    }
                }
            }
        }

        out.fill(0.0);
        let channels = self.channels;
        let block_start = self.frame;
        let block_end = block_start + (out.len() / channels) as u64;

        for buffer in &self.active {
            let buffer_end = buffer.end_frame(channels);
            if buffer_end <= block_start || buffer.start_frame >= block_end {
                continue;
            }
            let from = buffer.start_frame.max(block_start);
            let to = buffer_end.min(block_end);
            for frame in from..to {
                let dst = (frame - block_start) as usize * channels;
                let src = (frame - buffer.start_frame) as usize * channels;
                for ch in 0..channels {
                    out[dst + ch] += buffer.samples[src + ch];
                }
            }
        }

        self.frame = block_end;
        self.clock.store(block_end, Ordering::Release);

        let mut i = 0;
        while i < self.active.len() {
            if self.active[i].end_frame(channels) <= block_end {
                let buffer = self.active.swap_remove(i);
                let _ = self.ended_tx.try_send(buffer.id);
                let _ = self.spent_tx.try_send(buffer.samples);
            } else {
                i += 1;
            }
        }
    }

    /// Frames rendered so far
    pub fn frame(&self) -> u64 {
        self.frame
    }
}

/// One `schedule` call as seen by an [`OfflineContext`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub context: usize,
    pub sample_rate: u32,
    pub id: SourceId,
    pub start_frame: u64,
    pub frames: u64,
    /// Context clock when the buffer was handed over
    pub scheduled_at_frame: u64,
}

impl ScheduleRecord {
    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.frames
    }
}

/// Output context driven by the tokio clock instead of hardware
///
/// Used when no audio device is available and in tests; with a paused
/// runtime clock playback is instantaneous and deterministic.
pub struct OfflineContext {
    index: usize,
    sample_rate: u32,
    channels: u16,
    origin: Instant,
    next_id: SourceId,
    timers: Vec<JoinHandle<()>>,
    ended_tx: mpsc::UnboundedSender<SourceId>,
    log: Arc<Mutex<Vec<ScheduleRecord>>>,
    closed: bool,
    factory: Arc<OfflineCounters>,
}

impl OutputContext for OfflineContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn current_frame(&self) -> u64 {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        (elapsed.as_secs_f64() * self.sample_rate as f64) as u64
    }

    fn schedule(&mut self, samples: Vec<f32>, start_frame: u64) -> Result<SourceId, AudioError> {
        if self.closed {
            return Err(AudioError::ContextClosed);
        }

        let id = self.next_id;
        self.next_id += 1;
        let frames = (samples.len() / self.channels.max(1) as usize) as u64;
        self.log.lock().push(ScheduleRecord {
            context: self.index,
            sample_rate: self.sample_rate,
            id,
            start_frame,
            frames,
            scheduled_at_frame: self.current_frame(),
        });

        let end = self.origin
            + Duration::from_secs_f64((start_frame + frames) as f64 / self.sample_rate as f64);
        let ended_tx = self.ended_tx.clone();
        self.timers.retain(|t| !t.is_finished());
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep_until(end).await;
            let _ = ended_tx.send(id);
        }));
        Ok(id)
    }

    fn stop_all(&mut self) -> Result<(), AudioError> {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if self.closed {
            return Err(AudioError::ContextClosed);
        }
        self.stop_all()?;
        self.closed = true;
        self.factory.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for OfflineContext {
    fn drop(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct OfflineCounters {
    created: AtomicUsize,
    closed: AtomicUsize,
}

/// Factory for [`OfflineContext`]s with a shared schedule log
#[derive(Clone, Default)]
pub struct OfflineContextFactory {
    log: Arc<Mutex<Vec<ScheduleRecord>>>,
    counters: Arc<OfflineCounters>,
}

impl OfflineContextFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every buffer scheduled on any context, in call order
    pub fn records(&self) -> Vec<ScheduleRecord> {
        self.log.lock().clone()
    }

    pub fn contexts_created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn contexts_closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

impl ContextFactory for OfflineContextFactory {
    fn create(&self, sample_rate: u32, channels: u16) -> Result<ContextHandle, AudioError> {
        if sample_rate == 0 || channels == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} Hz / {} ch",
                sample_rate, channels
            )));
        }

        let index = self.counters.created.fetch_add(1, Ordering::SeqCst);
        let (ended_tx, ended) = mpsc::unbounded_channel();
        let context = OfflineContext {
            index,
            sample_rate,
            channels,
            origin: Instant::now(),
            next_id: 0,
            timers: Vec::new(),
            ended_tx,
            log: self.log.clone(),
            closed: false,
            factory: self.counters.clone(),
        };
        Ok(ContextHandle {
            context: Box::new(context),
            ended,
        })
    }
}

#[cfg(feature = "device")]
pub use device::{DeviceContext, DeviceContextFactory};

#[cfg(feature = "device")]
mod device {
    use super::*;
    use crate::audio::DeviceOutput;
    use crossbeam_channel::TrySendError;

    /// Output context on a cpal device, mixing through a [`Mixer`]
    pub struct DeviceContext {
        output: Option<DeviceOutput>,
        tx: Sender<MixerMessage>,
        spent_rx: Receiver<Vec<f32>>,
        clock: Arc<AtomicU64>,
        next_id: SourceId,
        sample_rate: u32,
        channels: u16,
    }

    impl OutputContext for DeviceContext {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn channels(&self) -> u16 {
            self.channels
        }

        fn current_frame(&self) -> u64 {
            self.clock.load(Ordering::Acquire)
        }

        fn schedule(&mut self, samples: Vec<f32>, start_frame: u64) -> Result<SourceId, AudioError> {
            if self.output.is_none() {
                return Err(AudioError::ContextClosed);
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tx
                .try_send(MixerMessage::Play {
                    id,
                    start_frame,
                    samples,
                })
                .map_err(mixer_send_error)?;
            Ok(id)
        }

        fn stop_all(&mut self) -> Result<(), AudioError> {
            self.tx
                .try_send(MixerMessage::StopAll)
                .map_err(mixer_send_error)
        }

        fn close(&mut self) -> Result<(), AudioError> {
            let output = self.output.take().ok_or(AudioError::ContextClosed)?;
            // Joining the stream thread can take a device period
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(move || drop(output));
                }
                Err(_) => drop(output),
            }
            Ok(())
        }

        fn reclaim(&mut self) -> Option<Vec<f32>> {
            self.spent_rx.try_recv().ok()
        }
    }

    fn mixer_send_error(err: TrySendError<MixerMessage>) -> AudioError {
        match err {
            TrySendError::Full(_) => AudioError::StreamError("mixer queue is full".into()),
            TrySendError::Disconnected(_) => AudioError::ContextClosed,
        }
    }

    /// Opens a [`DeviceContext`] on the configured output device
    pub struct DeviceContextFactory {
        device_id: Option<String>,
    }

    impl DeviceContextFactory {
        pub fn new(device_id: Option<String>) -> Self {
            Self { device_id }
        }
    }

    impl ContextFactory for DeviceContextFactory {
        fn create(&self, sample_rate: u32, channels: u16) -> Result<ContextHandle, AudioError> {
            let (tx, rx) = crossbeam_channel::bounded(MIXER_SLOTS);
            let (spent_tx, spent_rx) = crossbeam_channel::bounded(MIXER_SLOTS);
            let (ended_tx, ended_rx) = crossbeam_channel::bounded::<SourceId>(MIXER_SLOTS);
            let (notify, ended) = mpsc::unbounded_channel();
            let clock = Arc::new(AtomicU64::new(0));

            // Relay "ended" ids into the async world off the audio thread.
            // Exits once the mixer, and with it the sender, is dropped.
            std::thread::Builder::new()
                .name("playback-ended".into())
                .spawn(move || {
                    while let Ok(id) = ended_rx.recv() {
                        if notify.send(id).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| AudioError::StreamError(e.to_string()))?;

            let mut mixer = Mixer::new(channels, rx, clock.clone(), ended_tx, spent_tx);
            let output = DeviceOutput::start(
                "playback",
                self.device_id.as_deref(),
                sample_rate,
                channels,
                None,
                move |data, _| mixer.process(data),
            )?;

            let context = DeviceContext {
                output: Some(output),
                tx,
                spent_rx,
                clock,
                next_id: 0,
                sample_rate,
                channels,
            };
            Ok(ContextHandle {
                context: Box::new(context),
                ended,
            })
        }
    }
}
