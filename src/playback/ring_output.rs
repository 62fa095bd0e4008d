//! Lifetime of the ring-buffer renderer
//!
//! The renderer and its output are opened on the first audio chunk that
//! needs them and torn down either on an explicit stop or once everything
//! written to them has played.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Duration;

use crate::audio::{renderer, RenderOutput, RenderStats, RendererFactory, RendererHandle};
use crate::config::RenderConfig;
use crate::error::AudioError;

/// Identifies one opening of the renderer
pub type OutputId = u64;

struct Opened {
    id: OutputId,
    handle: RendererHandle,
    output: Box<dyn RenderOutput>,
}

#[derive(Default)]
struct Slot {
    opened: Option<Opened>,
    next_id: OutputId,
}

/// Lazily opened renderer plus the output driving it
pub struct RingOutput {
    config: RenderConfig,
    factory: Arc<dyn RendererFactory>,
    slot: Mutex<Slot>,
}

impl RingOutput {
    pub fn new(config: RenderConfig, factory: Arc<dyn RendererFactory>) -> Self {
        Self {
            config,
            factory,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Handle to the running renderer, opening one if needed
    pub fn acquire(&self) -> Result<(OutputId, RendererHandle), AudioError> {
        let mut slot = self.slot.lock();
        if let Some(opened) = &slot.opened {
            return Ok((opened.id, opened.handle.clone()));
        }

        let (handle, ring) = renderer(&self.config);
        let output = self.factory.open(&self.config, ring)?;
        let id = slot.next_id;
        slot.next_id += 1;
        slot.opened = Some(Opened {
            id,
            handle: handle.clone(),
            output,
        });
        tracing::debug!("Renderer {} opened", id);
        Ok((id, handle))
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().opened.is_some()
    }

    /// Counters of the open renderer
    pub fn stats(&self) -> Option<RenderStats> {
        self.slot.lock().opened.as_ref().map(|o| o.handle.stats())
    }

    /// Silence buffered audio and close the output now
    pub fn stop(&self) {
        let opened = self.slot.lock().opened.take();
        if let Some(opened) = opened {
            if let Err(e) = opened.handle.end_of_input() {
                tracing::debug!("Renderer {} already gone: {}", opened.id, e);
            }
            close(opened);
        }
    }

    /// Close renderer `id` once it has played everything written to it.
    /// Returns early if it was stopped or replaced in the meantime.
    pub async fn close_when_drained(&self, id: OutputId) {
        let period = self.poll_period();
        loop {
            tokio::time::sleep(period).await;

            let drained = {
                let mut slot = self.slot.lock();
                let drained = match &slot.opened {
                    Some(opened) if opened.id == id => opened.handle.is_drained(),
                    _ => return,
                };
                if !drained {
                    continue;
                }
                slot.opened.take()
            };
            if let Some(opened) = drained {
                close(opened);
            }
            return;
        }
    }

    /// One render block, but never less than a millisecond
    fn poll_period(&self) -> Duration {
        let sample_rate = self.config.sample_rate.max(1) as u64;
        let micros = self.config.block_frames as u64 * 1_000_000 / sample_rate;
        Duration::from_micros(micros).max(Duration::from_millis(1))
    }
}

fn close(opened: Opened) {
    while let Some(e) = opened.output.check_errors() {
        tracing::warn!("Renderer {} output reported: {}", opened.id, e);
    }
    tracing::debug!(
        "Renderer {} closed after {} samples",
        opened.id,
        opened.handle.stats().samples_written
    );
    drop(opened);
}

impl Drop for RingOutput {
    fn drop(&mut self) {
        if let Some(opened) = self.slot.get_mut().opened.take() {
            close(opened);
        }
    }
}
