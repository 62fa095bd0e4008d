//! Audio subsystem module

pub mod buffer;
pub mod pcm;
pub mod renderer;
pub mod reorder;

#[cfg(feature = "device")]
pub mod device;
#[cfg(feature = "device")]
pub mod output;

pub use buffer::RingBuffer;
pub use pcm::{F32Decoder, Pcm16Decoder};
pub use renderer::{
    renderer, OfflineRendererFactory, RenderMessage, RenderOutput, RenderStats, RendererFactory,
    RendererHandle, RingBufferRenderer,
};
pub use reorder::{AudioChunkReorderer, ReorderStats};

#[cfg(feature = "device")]
pub use device::{get_output_device, list_output_devices, AudioDevice, OutputDeviceInfo};
#[cfg(feature = "device")]
pub use output::{DeviceOutput, DeviceRendererFactory};
