//! Output device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Output device description
#[derive(Debug, Clone, Serialize)]
pub struct OutputDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Check that the device can run at `sample_rate` with `channels`
    pub fn supports(&self, sample_rate: u32, channels: u16) -> bool {
        let rate = cpal::SampleRate(sample_rate);
        self.inner
            .supported_output_configs()
            .map(|mut configs| {
                configs.any(|c| {
                    c.channels() == channels
                        && rate >= c.min_sample_rate()
                        && rate <= c.max_sample_rate()
                })
            })
            .unwrap_or(false)
    }
}

/// List all available output devices
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device);
                devices.push(OutputDeviceInfo {
                    id: format!("output:{}", name),
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }
    devices
}

fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [16000u32, 22050, 24000, 44100, 48000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }
            if !channels.contains(&config.channels()) {
                channels.push(config.channels());
            }
        }
    }

    sample_rates.sort();
    channels.sort();
    (sample_rates, channels)
}

/// Resolve a device id, or the default output when `id` is `None`
pub fn get_output_device(id: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let Some(id) = id else {
        return host
            .default_output_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()));
    };

    let name = id.strip_prefix("output:").unwrap_or(id);
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}
