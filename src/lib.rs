//! # Voice Chat Stream
//!
//! Realtime response streaming and playback for a voice-chat client.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            CONTROL FLOW (tokio)                              │
//! │                                                                              │
//! │  Transport ──bytes──▶ ┌──────────────────────────────────────────────┐      │
//! │  (reqwest / file)     │        StreamProcessor (stream::processor)    │      │
//! │                       │  FrameDecoder ──▶ Event ──▶ dispatch          │      │
//! │                       └───────┬──────────────┬──────────────┬─────────┘      │
//! │                               │ text         │ audio(idx)   │ transcript/    │
//! │                               ▼              ▼              ▼ status         │
//! │                        ┌────────────┐ ┌──────────────┐   sinks               │
//! │                        │  Typing    │ │ AudioChunk   │                       │
//! │                        │  scheduler │ │ Reorderer    │                       │
//! │                        │  (20 ms)   │ └──────┬───────┘                       │
//! │                        └─────┬──────┘        │ strictly ascending            │
//! │                              ▼               ▼                               │
//! │                          text sink   ┌─────────────────────┐                 │
//! │                                      │ PlaybackScheduler   │ (f32 segments)  │
//! │                                      │ or RendererHandle   │ (pcm16 stream)  │
//! │                                      └─────────┬───────────┘                 │
//! └────────────────────────────────────────────────┼─────────────────────────────┘
//!                                                  │ one-way messages only
//! ┌────────────────────────────────────────────────┼─────────────────────────────┐
//! │                    REAL-TIME CONTEXT (audio thread)                           │
//! │                              ┌──────────────────────────┐                    │
//! │                              │ RingBufferRenderer        │                    │
//! │                              │  write: i16 → f32 ring    │                    │
//! │                              │  read:  one block / tick  │──▶ device output   │
//! │                              └──────────────────────────┘                    │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod playback;
pub mod protocol;
pub mod stream;
pub mod transport;

pub use error::{Error, ErrorKind, Result, StreamError};

/// Application-wide constants
pub mod constants {
    /// Default sample rate of response audio
    pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

    /// Default channel count (mono speech)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Interval between revealed characters
    pub const TYPING_INTERVAL_MS: u64 = 20;

    /// Delay between the completion event and closing the session's audio stream
    pub const AUDIO_CLOSE_DELAY_MS: u64 = 500;

    /// Pause between consecutive synthesized segments
    pub const SETTLE_DELAY_MS: u64 = 50;

    /// Frames per scheduled playback buffer
    pub const RENDER_BUFFER_FRAMES: usize = 2048;

    /// Buffers the playback scheduler keeps on the output timeline at once
    pub const MAX_SCHEDULED_BUFFERS: usize = 16;

    /// Frames per hardware render block
    pub const RENDER_BLOCK_FRAMES: usize = 128;

    /// Seconds of audio the renderer ring buffer can hold
    pub const RING_BUFFER_SECONDS: u32 = 180;

    /// Capacity of the control → renderer message channel
    pub const RENDER_CHANNEL_CAPACITY: usize = 256;

    /// Default connect timeout for the HTTP transport
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Default read timeout (max silence between body chunks)
    pub const READ_TIMEOUT_MS: u64 = 30_000;
}
