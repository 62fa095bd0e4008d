//! Application configuration
//!
//! Stored as TOML in the platform configuration directory. Every section
//! has defaults, so a missing or partial file is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Where in-order response audio is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioRoute {
    /// 16-bit PCM straight into the real-time ring-buffer renderer
    Renderer,
    /// 32-bit float segments through the sequential playback scheduler
    Scheduler,
}

/// Response stream processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Milliseconds between two revealed characters
    pub typing_interval_ms: u64,
    /// Milliseconds to wait after `complete` before closing the audio stream
    pub audio_close_delay_ms: u64,
    /// Destination of response audio
    pub audio_route: AudioRoute,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            typing_interval_ms: TYPING_INTERVAL_MS,
            audio_close_delay_ms: AUDIO_CLOSE_DELAY_MS,
            audio_route: AudioRoute::Renderer,
        }
    }
}

impl StreamConfig {
    pub fn typing_interval(&self) -> Duration {
        Duration::from_millis(self.typing_interval_ms)
    }

    pub fn audio_close_delay(&self) -> Duration {
        Duration::from_millis(self.audio_close_delay_ms)
    }
}

/// Sequential playback of float audio segments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per scheduled buffer
    pub render_buffer_frames: usize,
    /// Pause between two consecutive streams
    pub settle_delay_ms: u64,
    /// Output device id (`None` = default device)
    pub device_id: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            render_buffer_frames: RENDER_BUFFER_FRAMES,
            settle_delay_ms: SETTLE_DELAY_MS,
            device_id: None,
        }
    }
}

impl PlaybackConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Real-time ring-buffer renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub sample_rate: u32,
    /// Ring buffer length in seconds of audio
    pub capacity_seconds: u32,
    /// Frames requested per hardware callback
    pub block_frames: usize,
    /// Bound of the control → renderer channel, in messages
    pub channel_capacity: usize,
    /// Output device id (`None` = default device)
    pub device_id: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            capacity_seconds: RING_BUFFER_SECONDS,
            block_frames: RENDER_BLOCK_FRAMES,
            channel_capacity: RENDER_CHANNEL_CAPACITY,
            device_id: None,
        }
    }
}

impl RenderConfig {
    /// Ring buffer capacity in samples
    pub fn capacity_samples(&self) -> usize {
        self.sample_rate as usize * self.capacity_seconds as usize
    }
}

/// HTTP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Chat endpoint returning the event stream
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    /// Longest allowed silence between two body chunks
    pub read_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/api/chat/stream".to_string(),
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            read_timeout_ms: READ_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub playback: PlaybackConfig,
    pub render: RenderConfig,
    pub transport: TransportConfig,
}

impl AppConfig {
    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| Error::Config("no configuration directory available".to_string()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save to an explicit file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// `<config dir>/voicechat/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voicechat").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject values that would stall timers or produce empty buffers
    pub fn validate(&self) -> Result<()> {
        if self.stream.typing_interval_ms == 0 {
            return Err(Error::Config("stream.typing_interval_ms must be > 0".into()));
        }
        if self.playback.sample_rate == 0 || self.render.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be > 0".into()));
        }
        if self.playback.channels == 0 {
            return Err(Error::Config("playback.channels must be > 0".into()));
        }
        if self.playback.render_buffer_frames == 0 {
            return Err(Error::Config("playback.render_buffer_frames must be > 0".into()));
        }
        if self.render.capacity_samples() == 0 || self.render.block_frames == 0 {
            return Err(Error::Config("render buffer sizes must be > 0".into()));
        }
        if self.render.channel_capacity == 0 {
            return Err(Error::Config("render.channel_capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream.typing_interval_ms, 20);
        assert_eq!(config.playback.settle_delay_ms, 50);
        assert_eq!(config.render.capacity_samples(), 24_000 * 180);
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [stream]
            audio_route = "scheduler"

            [playback]
            sample_rate = 16000
            "#,
        )
        .unwrap();

        assert_eq!(config.stream.audio_route, AudioRoute::Scheduler);
        assert_eq!(config.stream.typing_interval_ms, 20);
        assert_eq!(config.playback.sample_rate, 16000);
        assert_eq!(config.playback.channels, 1);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = AppConfig::from_toml("[stream]\ntyping_interval_ms = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("voicechat-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.transport.endpoint = "http://example.invalid/stream".to_string();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.transport.endpoint, "http://example.invalid/stream");

        let _ = std::fs::remove_dir_all(dir);
    }
}
