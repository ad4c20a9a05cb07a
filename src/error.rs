use thiserror::Error;

/// Top-level error type for the deck engine
#[derive(Debug, Error)]
pub enum DeckError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Control loop error: {0}")]
    Control(String),

    #[error("CLI parse error: {0}")]
    Parse(#[from] crate::cli::ParseError),
}

impl DeckError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            DeckError::Load(err) => err.user_message(),
            DeckError::Validation(err) => err.user_message(),
            DeckError::Audio(err) => err.user_message(),
            DeckError::Config(err) => err.user_message(),
            DeckError::Control(msg) => format!("The control thread is not responding: {}", msg),
            DeckError::Parse(err) => format!("Command error: {}", err),
        }
    }

    /// Get suggested recovery actions for the error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            DeckError::Load(err) => err.recovery_suggestions(),
            DeckError::Validation(err) => err.recovery_suggestions(),
            DeckError::Audio(err) => err.recovery_suggestions(),
            DeckError::Config(err) => err.recovery_suggestions(),
            DeckError::Control(_) => vec!["Restart the application".to_string()],
            DeckError::Parse(_) => vec!["Type 'help' to see available commands".to_string()],
        }
    }

    /// Check if the engine keeps running normally after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            DeckError::Load(err) => err.is_recoverable(),
            DeckError::Validation(_) => true, // previous value is retained
            DeckError::Audio(err) => err.is_recoverable(),
            DeckError::Config(err) => err.is_recoverable(),
            DeckError::Control(_) => false,
            DeckError::Parse(_) => true,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DeckError::Load(LoadError::Superseded { .. }) => ErrorSeverity::Info,
            DeckError::Load(_) => ErrorSeverity::Warning,
            DeckError::Validation(_) => ErrorSeverity::Info,
            DeckError::Audio(AudioError::DeviceNotFound { .. }) => ErrorSeverity::Error,
            DeckError::Audio(_) => ErrorSeverity::Critical,
            DeckError::Config(_) => ErrorSeverity::Warning,
            DeckError::Control(_) => ErrorSeverity::Critical,
            DeckError::Parse(_) => ErrorSeverity::Info,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Failure to open or decode a track for a deck
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unreadable source '{locator}': {reason}")]
    UnreadableSource { locator: String, reason: String },

    #[error("Unsupported format for '{locator}': {format}")]
    UnsupportedFormat { locator: String, format: String },

    #[error("Load of '{locator}' was superseded by a newer load")]
    Superseded { locator: String },
}

impl LoadError {
    pub fn user_message(&self) -> String {
        match self {
            LoadError::UnreadableSource { locator, reason } => {
                format!("Cannot read '{}': {}", locator, reason)
            }
            LoadError::UnsupportedFormat { locator, format } => {
                format!("'{}' is not a playable audio file ({})", locator, format)
            }
            LoadError::Superseded { locator } => {
                format!("Loading '{}' was cancelled by a newer load on the same deck", locator)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            LoadError::UnreadableSource { .. } => vec![
                "Check that the file path is correct".to_string(),
                "Check file permissions".to_string(),
                "The previously loaded track is still available".to_string(),
            ],
            LoadError::UnsupportedFormat { .. } => vec![
                "Supported formats: FLAC, WAV, MP3, OGG/Vorbis, AAC/ALAC in MP4".to_string(),
                "Check if the file extension matches the actual format".to_string(),
            ],
            LoadError::Superseded { .. } => vec![],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        // The deck keeps its previous state in every case.
        true
    }
}

/// Out-of-range parameter rejected at a setter boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Speed ratio {ratio} is outside (0, 100]")]
    SpeedOutOfRange { ratio: f64 },

    #[error("Relative position {fraction} is outside [0, 1]")]
    RelativePositionOutOfRange { fraction: f64 },

    #[error("Fade speed {speed} must be greater than zero")]
    FadeSpeedNotPositive { speed: f64 },

    #[error("Fade range floor {floor} / ceiling {ceiling} is invalid")]
    FadeRangeInvalid { floor: f64, ceiling: f64 },

    #[error("No deck at index {index}")]
    UnknownDeck { index: usize },
}

impl ValidationError {
    pub fn user_message(&self) -> String {
        match self {
            ValidationError::SpeedOutOfRange { ratio } => {
                format!("Speed {} rejected; keeping the current speed", ratio)
            }
            ValidationError::RelativePositionOutOfRange { fraction } => {
                format!("Position {} rejected; keeping the current position", fraction)
            }
            ValidationError::FadeSpeedNotPositive { speed } => {
                format!("Fade speed {} rejected; keeping the current fade speed", speed)
            }
            ValidationError::FadeRangeInvalid { floor, ceiling } => {
                format!("Fade range {}..{} rejected", floor, ceiling)
            }
            ValidationError::UnknownDeck { index } => {
                format!("Deck {} does not exist", index + 1)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ValidationError::SpeedOutOfRange { .. } => {
                vec!["Use a speed ratio greater than 0 and at most 100 (1.0 is normal speed)".to_string()]
            }
            ValidationError::RelativePositionOutOfRange { .. } => {
                vec!["Use a fraction between 0.0 (start) and 1.0 (end)".to_string()]
            }
            ValidationError::FadeSpeedNotPositive { .. } => {
                vec!["Use a small positive step, e.g. 0.01 per tick".to_string()]
            }
            ValidationError::FadeRangeInvalid { .. } => {
                vec!["Use 0 <= floor < ceiling <= 1".to_string()]
            }
            ValidationError::UnknownDeck { .. } => {
                vec!["Decks are addressed as 'a', 'b' or by number starting at 1".to_string()]
            }
        }
    }
}

/// Fault raised inside the render path. Never crosses the render callback;
/// the deck substitutes silence for the affected block.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderFault {
    #[error("Source read failed: {0}")]
    SourceRead(String),

    #[error("Malformed block: expected {expected} samples, got {actual}")]
    MalformedBlock { expected: usize, actual: usize },
}

/// Errors reported by a decoded source
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Decode failed: {0}")]
    Decode(String),
}

/// Audio device errors
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Unsupported sample format: {format}")]
    UnsupportedSampleFormat { format: String },

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Audio initialization failed: {0}")]
    InitializationFailed(String),
}

impl AudioError {
    pub fn user_message(&self) -> String {
        match self {
            AudioError::DeviceNotFound { device } => {
                format!("Audio device '{}' is not available or has been disconnected", device)
            }
            AudioError::UnsupportedSampleFormat { format } => {
                format!("The output device uses sample format '{}' which is not supported", format)
            }
            AudioError::StreamError(msg) => {
                format!("Audio output interrupted: {}", msg)
            }
            AudioError::InitializationFailed(msg) => {
                format!("Failed to initialize audio system: {}", msg)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            AudioError::DeviceNotFound { .. } => vec![
                "Use 'twindeck devices' to see available audio devices".to_string(),
                "Check that your audio device is connected and powered on".to_string(),
            ],
            AudioError::UnsupportedSampleFormat { .. } => vec![
                "Select a different output device with --device".to_string(),
            ],
            AudioError::StreamError(_) => vec![
                "Check audio device connections".to_string(),
                "Restart the application".to_string(),
            ],
            AudioError::InitializationFailed(_) => vec![
                "Check that no other applications are using exclusive audio access".to_string(),
                "Try selecting a different audio device".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            AudioError::DeviceNotFound { .. } => true, // can fall back to the default device
            AudioError::UnsupportedSampleFormat { .. } => false,
            AudioError::StreamError(_) => true,
            AudioError::InitializationFailed(_) => false,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
            ConfigError::Invalid(msg) => {
                format!("Configuration value rejected: {}", msg)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ConfigError::ConfigDirNotFound => vec![
                "Check that you have write permissions to your home directory".to_string(),
                "Try creating the directory manually: ~/.config/twin-deck/".to_string(),
            ],
            ConfigError::IoError(_) => vec![
                "Check file permissions for the configuration directory".to_string(),
                "Ensure the disk is not full".to_string(),
            ],
            ConfigError::SerializationError(_) => vec![
                "Try resetting configuration to defaults".to_string(),
            ],
            ConfigError::DeserializationError(_) | ConfigError::Invalid(_) => vec![
                "Delete the configuration file to reset to defaults".to_string(),
                "Check the configuration file format manually".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        // Defaults are always usable.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err = LoadError::UnreadableSource {
            locator: "/music/missing.flac".to_string(),
            reason: "No such file".to_string(),
        };
        assert!(err.to_string().contains("/music/missing.flac"));
        assert!(err.is_recoverable());
        assert!(!err.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::SpeedOutOfRange { ratio: 150.0 };
        assert!(err.to_string().contains("150"));
        assert!(err.user_message().contains("keeping the current speed"));

        let err = ValidationError::UnknownDeck { index: 2 };
        assert!(err.user_message().contains("Deck 3"));
    }

    #[test]
    fn test_deck_error_conversions() {
        let err: DeckError = ValidationError::FadeSpeedNotPositive { speed: 0.0 }.into();
        assert!(matches!(err, DeckError::Validation(_)));
        assert!(err.is_recoverable());
        assert_eq!(err.severity(), ErrorSeverity::Info);

        let err: DeckError = LoadError::Superseded { locator: "a.wav".to_string() }.into();
        assert_eq!(err.severity(), ErrorSeverity::Info);

        let err: DeckError = AudioError::InitializationFailed("no host".to_string()).into();
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_severity_log_levels() {
        assert_eq!(ErrorSeverity::Info.log_level(), log::Level::Info);
        assert_eq!(ErrorSeverity::Warning.log_level(), log::Level::Warn);
        assert_eq!(ErrorSeverity::Critical.log_level(), log::Level::Error);
        assert_eq!(ErrorSeverity::Critical.as_str(), "CRITICAL");
    }

    #[test]
    fn test_render_fault_display() {
        let fault = RenderFault::MalformedBlock { expected: 1024, actual: 1000 };
        assert_eq!(fault.to_string(), "Malformed block: expected 1024 samples, got 1000");
    }
}
