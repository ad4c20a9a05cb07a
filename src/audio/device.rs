use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat, SupportedStreamConfig};
use log::{debug, warn};
use std::collections::HashMap;

use crate::error::AudioError;

const COMMON_SAMPLE_RATES: [u32; 6] = [44_100, 48_000, 88_200, 96_000, 176_400, 192_000];

/// Information about an output device's capabilities
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub name: String,
    pub supported_sample_rates: Vec<u32>,
    pub max_channels: u16,
    pub default_config: SupportedStreamConfig,
}

impl DeviceCapabilities {
    pub fn default_sample_rate(&self) -> u32 {
        self.default_config.sample_rate().0
    }

    pub fn default_channels(&self) -> u16 {
        self.default_config.channels()
    }

    pub fn default_sample_format(&self) -> SampleFormat {
        self.default_config.sample_format()
    }
}

/// Enumerates output devices and tracks the one decks will play through
pub struct DeviceManager {
    host: Host,
    devices: HashMap<String, Device>,
    current_device: Option<Device>,
    device_capabilities: HashMap<String, DeviceCapabilities>,
}

impl DeviceManager {
    pub fn new() -> Result<Self, AudioError> {
        let mut manager = DeviceManager {
            host: cpal::default_host(),
            devices: HashMap::new(),
            current_device: None,
            device_capabilities: HashMap::new(),
        };
        manager.refresh_devices()?;
        Ok(manager)
    }

    /// Re-scan output devices. Devices that fail to report a configuration are skipped.
    pub fn refresh_devices(&mut self) -> Result<(), AudioError> {
        self.devices.clear();
        self.device_capabilities.clear();

        let devices = self.host.output_devices()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to enumerate devices: {}", e)))?;

        for device in devices {
            let name = match device.name() {
                Ok(name) => name,
                Err(e) => {
                    warn!("Skipping output device without a name: {}", e);
                    continue;
                }
            };
            match Self::get_device_capabilities(&name, &device) {
                Ok(capabilities) => {
                    self.device_capabilities.insert(name.clone(), capabilities);
                    self.devices.insert(name, device);
                }
                Err(e) => warn!("Skipping output device '{}': {}", name, e),
            }
        }

        debug!("Found {} output devices", self.devices.len());
        Ok(())
    }

    /// Names of all usable output devices, sorted
    pub fn list_devices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_capabilities(&self, device_name: &str) -> Option<&DeviceCapabilities> {
        self.device_capabilities.get(device_name)
    }

    /// Select a device by name, or the host default for `None`
    pub fn select_device(&mut self, device_name: Option<&str>) -> Result<(), AudioError> {
        match device_name {
            Some(name) => {
                let device = self.devices.get(name).cloned().ok_or_else(|| AudioError::DeviceNotFound {
                    device: name.to_string(),
                })?;
                self.current_device = Some(device);
                Ok(())
            }
            None => self.select_default_device(),
        }
    }

    /// Select a device by name, falling back to the default device if it is missing
    pub fn select_device_with_fallback(&mut self, device_name: Option<&str>) -> Result<(), AudioError> {
        match self.select_device(device_name) {
            Err(AudioError::DeviceNotFound { device }) => {
                warn!("Output device '{}' not found, using the default device", device);
                self.select_default_device()
                    .map_err(|_| AudioError::DeviceNotFound { device })
            }
            other => other,
        }
    }

    pub fn select_default_device(&mut self) -> Result<(), AudioError> {
        let default_device = self.host.default_output_device()
            .ok_or_else(|| AudioError::InitializationFailed("No default output device available".to_string()))?;
        self.current_device = Some(default_device);
        Ok(())
    }

    pub fn current_device(&self) -> Option<&Device> {
        self.current_device.as_ref()
    }

    pub fn current_device_name(&self) -> Result<Option<String>, AudioError> {
        match &self.current_device {
            Some(device) => {
                let name = device.name()
                    .map_err(|e| AudioError::InitializationFailed(format!("Failed to get device name: {}", e)))?;
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }

    /// Default stream configuration of the selected device
    pub fn default_output_config(&self) -> Result<SupportedStreamConfig, AudioError> {
        let device = self.current_device.as_ref()
            .ok_or_else(|| AudioError::InitializationFailed("No device selected".to_string()))?;
        device.default_output_config()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to get default config: {}", e)))
    }

    fn get_device_capabilities(name: &str, device: &Device) -> Result<DeviceCapabilities, AudioError> {
        let default_config = device.default_output_config()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to get default config for {}: {}", name, e)))?;

        let supported_configs = device.supported_output_configs()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to get supported configs for {}: {}", name, e)))?;

        let mut sample_rates = Vec::new();
        let mut max_channels = 0;
        for range in supported_configs {
            let rates = rates_in_range(range.min_sample_rate().0, range.max_sample_rate().0);
            for rate in rates {
                if !sample_rates.contains(&rate) {
                    sample_rates.push(rate);
                }
            }
            max_channels = max_channels.max(range.channels());
        }

        let default_rate = default_config.sample_rate().0;
        if !sample_rates.contains(&default_rate) {
            sample_rates.push(default_rate);
        }
        sample_rates.sort_unstable();
        if max_channels == 0 {
            max_channels = default_config.channels();
        }

        Ok(DeviceCapabilities {
            name: name.to_string(),
            supported_sample_rates: sample_rates,
            max_channels,
            default_config,
        })
    }
}

/// Common sample rates inside `min..=max`
fn rates_in_range(min: u32, max: u32) -> Vec<u32> {
    COMMON_SAMPLE_RATES
        .iter()
        .copied()
        .filter(|rate| (min..=max).contains(rate))
        .collect()
}

/// Whether the output engine can render in this sample format
pub fn is_supported_format(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}
