//! Real-time ring-buffer renderer
//!
//! The renderer half lives inside the audio callback. It owns its
//! [`RingBuffer`] outright and only ever hears from the control side through
//! a bounded channel of [`RenderMessage`]s. Sample blocks travel back on a
//! recycle channel so the callback never frees memory; the producer reuses
//! them for later writes.
//!
//! ```text
//!  control side                         audio callback
//!  ┌────────────────┐  Samples/EndOfInput  ┌────────────────────┐
//!  │ RendererHandle │ ───────────────────▶ │ RingBufferRenderer │ ──▶ out
//!  │                │ ◀─────────────────── │   (owns the ring)  │
//!  └────────────────┘    spent Vec<i16>    └────────────────────┘
//! ```
//!
//! A [`RendererFactory`] puts a renderer on an output; the returned
//! [`RenderOutput`] keeps it running until dropped.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::buffer::RingBuffer;
use crate::config::RenderConfig;
use crate::error::AudioError;

/// Producer → renderer message
#[derive(Debug)]
pub enum RenderMessage {
    /// A block of 16-bit samples to append
    Samples(Vec<i16>),
    /// Drop everything not yet played (barge-in)
    EndOfInput,
}

/// Counters published by the renderer; never the sample data itself
#[derive(Debug, Default)]
struct RenderCounters {
    /// Samples accepted by the channel; producer side
    samples_sent: AtomicU64,
    samples_written: AtomicU64,
    dropped: AtomicU64,
    underruns: AtomicU64,
    resets: AtomicU64,
    rejected: AtomicU64,
    buffered: AtomicUsize,
}

/// Renderer statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Samples accepted into the ring
    pub samples_written: u64,
    /// Samples overwritten by overflow
    pub dropped: u64,
    /// Blocks that ran dry part-way through
    pub underruns: u64,
    /// End-of-input resets handled
    pub resets: u64,
    /// Blocks refused because the channel was full
    pub rejected: u64,
    /// Samples waiting to be played
    pub buffered: usize,
}

/// Control-side handle feeding the renderer
#[derive(Clone)]
pub struct RendererHandle {
    tx: Sender<RenderMessage>,
    recycle_rx: Receiver<Vec<i16>>,
    counters: Arc<RenderCounters>,
}

impl RendererHandle {
    /// Queue a block of samples. Never blocks: a full channel is reported
    /// as [`AudioError::RendererBusy`] and the block is dropped.
    pub fn push_samples(&self, samples: &[i16]) -> Result<(), AudioError> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut block = self.recycle_rx.try_recv().unwrap_or_default();
        block.clear();
        block.extend_from_slice(samples);

        match self.tx.try_send(RenderMessage::Samples(block)) {
            Ok(()) => {
                self.counters
                    .samples_sent
                    .fetch_add(samples.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(AudioError::RendererBusy)
            }
            Err(TrySendError::Disconnected(_)) => Err(AudioError::RendererClosed),
        }
    }

    /// Silence buffered audio immediately
    pub fn end_of_input(&self) -> Result<(), AudioError> {
        match self.tx.try_send(RenderMessage::EndOfInput) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AudioError::RendererBusy),
            Err(TrySendError::Disconnected(_)) => Err(AudioError::RendererClosed),
        }
    }

    /// Whether everything pushed so far has been played or discarded
    pub fn is_drained(&self) -> bool {
        let c = &self.counters;
        c.samples_written.load(Ordering::Relaxed) >= c.samples_sent.load(Ordering::Relaxed)
            && c.buffered.load(Ordering::Relaxed) == 0
    }

    pub fn stats(&self) -> RenderStats {
        let c = &self.counters;
        RenderStats {
            samples_written: c.samples_written.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            underruns: c.underruns.load(Ordering::Relaxed),
            resets: c.resets.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            buffered: c.buffered.load(Ordering::Relaxed),
        }
    }
}

/// Real-time half: owns the ring and produces output blocks
pub struct RingBufferRenderer {
    ring: RingBuffer,
    rx: Receiver<RenderMessage>,
    recycle_tx: Sender<Vec<i16>>,
    counters: Arc<RenderCounters>,
}

impl RingBufferRenderer {
    /// Fill one interleaved output block. The mono ring is copied to every
    /// channel; missing samples are rendered as silence.
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        self.drain_messages();

        let had_audio = !self.ring.is_empty();
        let mut starved = false;
        for frame in out.chunks_mut(channels.max(1)) {
            let sample = match self.ring.pop() {
                Some(sample) => sample,
                None => {
                    starved = true;
                    0.0
                }
            };
            frame.fill(sample);
        }

        if had_audio && starved {
            self.counters.underruns.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.buffered.store(self.ring.len(), Ordering::Relaxed);
        self.counters.dropped.store(self.ring.dropped(), Ordering::Relaxed);
    }

    fn drain_messages(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                RenderMessage::Samples(block) => {
                    self.ring.write_pcm16(&block);
                    self.counters
                        .samples_written
                        .fetch_add(block.len() as u64, Ordering::Relaxed);
                    let _ = self.recycle_tx.try_send(block);
                }
                RenderMessage::EndOfInput => {
                    self.ring.reset_to_write();
                    self.counters.resets.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Samples waiting in the ring
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }
}

/// Create a connected handle/renderer pair
pub fn renderer(config: &RenderConfig) -> (RendererHandle, RingBufferRenderer) {
    let (tx, rx) = bounded(config.channel_capacity);
    // Room for every block in flight, so the callback never has to drop one
    let (recycle_tx, recycle_rx) = bounded(config.channel_capacity * 2);
    let counters = Arc::new(RenderCounters::default());

    let handle = RendererHandle {
        tx,
        recycle_rx,
        counters: counters.clone(),
    };
    let renderer = RingBufferRenderer {
        ring: RingBuffer::new(config.capacity_samples()),
        rx,
        recycle_tx,
        counters,
    };
    (handle, renderer)
}

/// A running output pulling blocks from a [`RingBufferRenderer`]
///
/// Dropping it stops the output and frees the renderer.
pub trait RenderOutput: Send {
    /// Next error reported by the output, if any
    fn check_errors(&self) -> Option<AudioError> {
        None
    }
}

/// Opens an output for a freshly created renderer
pub trait RendererFactory: Send + Sync {
    fn open(
        &self,
        config: &RenderConfig,
        renderer: RingBufferRenderer,
    ) -> Result<Box<dyn RenderOutput>, AudioError>;
}

/// Keeps the open renderer where the caller can pull blocks by hand.
/// Used without an audio device and in tests.
#[derive(Clone, Default)]
pub struct OfflineRendererFactory {
    current: Arc<Mutex<Option<RingBufferRenderer>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl OfflineRendererFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one block from the open renderer. Returns `false` if none is open.
    pub fn process(&self, out: &mut [f32], channels: usize) -> bool {
        match self.current.lock().as_mut() {
            Some(renderer) => {
                renderer.process(out, channels);
                true
            }
            None => false,
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl RendererFactory for OfflineRendererFactory {
    fn open(
        &self,
        _config: &RenderConfig,
        renderer: RingBufferRenderer,
    ) -> Result<Box<dyn RenderOutput>, AudioError> {
        *self.current.lock() = Some(renderer);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(OfflineOutput {
            current: self.current.clone(),
            closed: self.closed.clone(),
        }))
    }
}

struct OfflineOutput {
    current: Arc<Mutex<Option<RingBufferRenderer>>>,
    closed: Arc<AtomicUsize>,
}

impl RenderOutput for OfflineOutput {}

impl Drop for OfflineOutput {
    fn drop(&mut self) {
        self.current.lock().take();
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
