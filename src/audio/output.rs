//! Hardware output stream
//!
//! cpal streams are not `Send`, so each output owns a dedicated thread that
//! builds the stream, starts it and keeps it alive until stopped. The render
//! callback runs on the driver's real-time thread.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::device::get_output_device;
use super::renderer::{RenderOutput, RendererFactory, RingBufferRenderer};
use crate::config::RenderConfig;
use crate::error::AudioError;

/// A running output stream driving a render callback
pub struct DeviceOutput {
    name: String,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl DeviceOutput {
    /// Open `device_id` (or the default output) and start calling `render`
    /// with interleaved blocks of `channels` channels.
    pub fn start<F>(
        name: &str,
        device_id: Option<&str>,
        sample_rate: u32,
        channels: u16,
        block_frames: Option<u32>,
        mut render: F,
    ) -> Result<Self, AudioError>
    where
        F: FnMut(&mut [f32], usize) + Send + 'static,
    {
        let device = get_output_device(device_id)?;
        if !device.supports(sample_rate, channels) {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} does not support {} Hz / {} ch",
                device.name, sample_rate, channels
            )));
        }

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: match block_frames {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let channel_count = channels as usize;

        let handle = thread::Builder::new()
            .name(format!("output-{}", name))
            .spawn(move || {
                let cpal_device = device.into_inner();
                let callback_errors = error_tx.clone();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        render(data, channel_count);
                    },
                    move |err| {
                        let _ = callback_errors.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start output stream: {}", e);
                            let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                            return;
                        }

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream is dropped here, stopping output
                    }
                    Err(e) => {
                        tracing::error!("Failed to build output stream: {}", e);
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!("Output '{}' started at {} Hz, {} ch", name, sample_rate, channels);

        Ok(Self {
            name: name.to_string(),
            running,
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Run a ring-buffer renderer on a device
    pub fn with_renderer(
        device_id: Option<&str>,
        sample_rate: u32,
        block_frames: usize,
        mut renderer: RingBufferRenderer,
    ) -> Result<Self, AudioError> {
        Self::start(
            "renderer",
            device_id,
            sample_rate,
            1,
            u32::try_from(block_frames).ok(),
            move |data, channels| renderer.process(data, channels),
        )
    }

    /// Stop the stream and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Output '{}' stopped", self.name);
        }
    }
}

impl RenderOutput for DeviceOutput {
    fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

/// Opens each renderer on the configured cpal output device
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceRendererFactory;

impl RendererFactory for DeviceRendererFactory {
    fn open(
        &self,
        config: &RenderConfig,
        renderer: RingBufferRenderer,
    ) -> Result<Box<dyn RenderOutput>, AudioError> {
        let output = DeviceOutput::with_renderer(
            config.device_id.as_deref(),
            config.sample_rate,
            config.block_frames,
            renderer,
        )?;
        Ok(Box::new(output))
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
