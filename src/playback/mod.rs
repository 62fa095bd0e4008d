//! Sequential playback of logical audio streams

pub mod context;
pub mod ring_output;
pub mod scheduler;
pub mod source;

pub use context::{
    ContextFactory, ContextHandle, Mixer, MixerMessage, OfflineContext, OfflineContextFactory,
    OutputContext, ScheduleRecord, SourceId,
};
#[cfg(feature = "device")]
pub use context::{DeviceContext, DeviceContextFactory};
pub use ring_output::{OutputId, RingOutput};
pub use scheduler::{CompletionCallback, PlaybackScheduler, RenderErrorCallback};
pub use source::AudioSource;
