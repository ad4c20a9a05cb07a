use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;
use crate::models::ReverbParameters;

/// Engine configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub deck_count: usize,
    pub output_channels: u16,
    pub block_size: usize,
    pub preferred_device: Option<String>,
    pub fade_tick_ms: u64,
    pub default_fade_speed: f64,
    pub default_gain: f64,
    pub default_reverb: ReverbParameters,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deck_count: 2,
            output_channels: 2,
            block_size: 512,
            preferred_device: None,
            fade_tick_ms: 10,
            default_fade_speed: 0.01,
            default_gain: 1.0,
            default_reverb: ReverbParameters::default(),
        }
    }
}

impl EngineConfig {
    /// Check values that would leave the engine unable to run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deck_count == 0 {
            return Err(ConfigError::Invalid("deck_count must be at least 1".to_string()));
        }
        if self.output_channels == 0 {
            return Err(ConfigError::Invalid("output_channels must be at least 1".to_string()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be at least 1".to_string()));
        }
        if self.fade_tick_ms == 0 {
            return Err(ConfigError::Invalid("fade_tick_ms must be at least 1".to_string()));
        }
        if !(self.default_fade_speed > 0.0 && self.default_fade_speed.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "default_fade_speed must be > 0, got {}",
                self.default_fade_speed
            )));
        }
        if !(0.0..=1.0).contains(&self.default_gain) {
            return Err(ConfigError::Invalid(format!(
                "default_gain must be within [0, 1], got {}",
                self.default_gain
            )));
        }
        Ok(())
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: EngineConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load from `~/.config/twin-deck/config.toml`, using defaults if the file is absent
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Load from an explicit file location
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        config.validate()?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Apply `updater`, then validate and save. An invalid result is not kept.
    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let mut updated = self.config.clone();
        updater(&mut updated);
        updated.validate()?;
        self.config = updated;
        self.save_config()
    }

    pub fn set_preferred_device(&mut self, device: Option<String>) -> Result<(), ConfigError> {
        self.update_config(|config| config.preferred_device = device)
    }

    pub fn set_default_fade_speed(&mut self, speed: f64) -> Result<(), ConfigError> {
        self.update_config(|config| config.default_fade_speed = speed)
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = EngineConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("twin-deck");
        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&config_content)?;
        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;
        Ok(())
    }
}
