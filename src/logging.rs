use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::collections::VecDeque;
use chrono::{DateTime, Utc};
use serde::Serialize;

const DEFAULT_MAX_EVENTS: usize = 500;

/// Deck event for the event history and the log
#[derive(Debug, Clone, Serialize)]
pub struct DeckEvent {
    pub timestamp: DateTime<Utc>,
    pub deck: String,
    pub event_type: DeckEventType,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeckEventType {
    TrackLoaded,
    LoadFailed,
    LoadSuperseded,
    PlaybackStarted,
    PlaybackStopped,
    Seek,
    ParameterRejected,
    FadeStarted,
    FadeStopped,
    RenderFault,
}

impl DeckEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeckEventType::TrackLoaded => "TRACK_LOADED",
            DeckEventType::LoadFailed => "LOAD_FAILED",
            DeckEventType::LoadSuperseded => "LOAD_SUPERSEDED",
            DeckEventType::PlaybackStarted => "PLAYBACK_STARTED",
            DeckEventType::PlaybackStopped => "PLAYBACK_STOPPED",
            DeckEventType::Seek => "SEEK",
            DeckEventType::ParameterRejected => "PARAMETER_REJECTED",
            DeckEventType::FadeStarted => "FADE_STARTED",
            DeckEventType::FadeStopped => "FADE_STOPPED",
            DeckEventType::RenderFault => "RENDER_FAULT",
        }
    }
}

/// Logger setup plus a bounded history of deck events
#[derive(Clone)]
pub struct DeckLogger {
    events: Arc<Mutex<VecDeque<DeckEvent>>>,
    max_events: usize,
}

impl Default for DeckLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl DeckLogger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events: max_events.max(1),
        }
    }

    /// Initialize the log backend. Level comes from `TWINDECK_LOG_LEVEL`
    /// (trace, debug, info, warn, error), default info.
    pub fn init() -> Result<(), log::SetLoggerError> {
        let log_level = std::env::var("TWINDECK_LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });
        builder.filter_level(parse_level(&log_level));
        builder.try_init()?;

        info!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<DeckEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event and forward it to the log
    pub fn log_event(&self, deck: &str, event_type: DeckEventType, details: impl Into<String>) {
        let event = DeckEvent {
            timestamp: Utc::now(),
            deck: deck.to_string(),
            event_type,
            details: details.into(),
        };

        match event_type {
            DeckEventType::LoadFailed | DeckEventType::ParameterRejected | DeckEventType::RenderFault => {
                warn!("[{}] deck {}: {}", event_type.as_str(), event.deck, event.details)
            }
            DeckEventType::Seek | DeckEventType::LoadSuperseded => {
                debug!("[{}] deck {}: {}", event_type.as_str(), event.deck, event.details)
            }
            _ => info!("[{}] deck {}: {}", event_type.as_str(), event.deck, event.details),
        }

        let mut events = self.events();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    /// Most recent `count` events, oldest first
    pub fn get_recent_events(&self, count: usize) -> Vec<DeckEvent> {
        let events = self.events();
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events().clear();
    }

    pub fn event_count(&self, event_type: DeckEventType) -> usize {
        self.events().iter().filter(|e| e.event_type == event_type).count()
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}
