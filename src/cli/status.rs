use crate::error::{DeckError, ErrorSeverity};
use crate::logging::DeckEvent;
use crate::models::{DeckState, DeckStatus};

/// Status display formatter for the CLI
pub struct StatusDisplay;

impl StatusDisplay {
    /// Full panel for one deck
    pub fn display_deck_status(name: &str, status: &DeckStatus) {
        println!("┌─ Deck {} ───────────────────────────────────────────────┐", name);
        match &status.track {
            Some(track) => {
                println!("│ Track: {}", Self::truncate(track, 50));
                println!("│ Status: {}", Self::format_deck_state(status.state));
                println!(
                    "│ Position: {} / {}",
                    status.position_formatted(),
                    status.length_formatted()
                );
                let progress = status.progress().clamp(0.0, 1.0) as f32;
                println!(
                    "│ Progress: [{}] {:.1}%",
                    Self::create_progress_bar(progress, 40),
                    progress * 100.0
                );
            }
            None => {
                println!("│ No track loaded");
            }
        }

        println!("│");
        println!(
            "│ Gain: {:.3}  Speed: {:.3}x  Fade: {}",
            status.gain,
            status.speed,
            status.fade.as_str()
        );

        let reverb = &status.reverb;
        println!(
            "│ Reverb: room {:.2} | damp {:.2} | wet {:.2} | dry {:.2} | width {:.2}{}",
            reverb.room_size,
            reverb.damping,
            reverb.wet_level,
            reverb.dry_level,
            reverb.width,
            if reverb.is_frozen() { " | frozen" } else { "" }
        );
        println!("└─────────────────────────────────────────────────────────┘");
    }

    /// One line for a deck, printed when a load finishes
    pub fn display_compact_status(name: &str, status: &DeckStatus) {
        println!("{}", Self::compact_line(name, status));
    }

    pub fn compact_line(name: &str, status: &DeckStatus) -> String {
        match &status.track {
            Some(track) => format!(
                "{} | {} | {} | {}/{} ({}%) | gain {:.2} | {:.2}x",
                name,
                status.state.as_str(),
                Self::truncate(track, 30),
                status.position_formatted(),
                status.length_formatted(),
                (status.progress().clamp(0.0, 1.0) * 100.0) as u8,
                status.gain,
                status.speed
            ),
            None => format!("{} | {} | No track loaded", name, status.state.as_str()),
        }
    }

    /// Recent deck events, oldest first
    pub fn display_events(events: &[DeckEvent]) {
        if events.is_empty() {
            println!("No events recorded");
            return;
        }
        for event in events {
            println!(
                "{} [{}] deck {}: {}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.event_type.as_str(),
                event.deck,
                event.details
            );
        }
    }

    /// Display error message with formatting and recovery suggestions
    pub fn display_error(error: &DeckError) {
        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!(
            "┌─ {} {} ─────────────────────────────────────────────────┐",
            severity_icon,
            severity.as_str()
        );

        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }

        let suggestions = error.recovery_suggestions();
        if !suggestions.is_empty() {
            eprintln!("│");
            eprintln!("│ Suggestions:");
            for suggestion in suggestions.iter().take(3) {
                for line in Self::wrap_text(&format!("• {}", suggestion), 53) {
                    eprintln!("│   {}", line);
                }
            }
        }

        if !error.is_recoverable() {
            eprintln!("│");
            eprintln!("│ The engine cannot continue after this error");
        }
        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    /// Display a simple error message for non-interactive contexts
    pub fn display_simple_error(error: &DeckError) {
        eprintln!("[{}] {}", error.severity().as_str(), error.user_message());

        let suggestions = error.recovery_suggestions();
        if let Some(first) = suggestions.first() {
            eprintln!("Suggestion: {}", first);
        }
    }

    /// Wrap text to fit within specified width
    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.chars().count() + word.chars().count() < width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(current_line);
                current_line = word.to_string();
            }
        }

        if !current_line.is_empty() {
            lines.push(current_line);
        }
        lines
    }

    /// Truncate string to fit display width
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len || max_len <= 3 {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{}...", kept)
        }
    }

    /// Create a progress bar string
    pub fn create_progress_bar(progress: f32, width: usize) -> String {
        let filled = ((progress.clamp(0.0, 1.0) * width as f32) as usize).min(width);
        format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
    }

    pub fn format_deck_state(state: DeckState) -> String {
        match state {
            DeckState::Playing => "▶ Playing".to_string(),
            DeckState::Stopped => "⏹ Stopped".to_string(),
            DeckState::Empty => "∅ Empty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LoadError, ValidationError};
    use crate::logging::DeckLogger;
    use crate::logging::DeckEventType;
    use crate::models::{FadeDirection, ReverbParameters};

    fn create_test_status() -> DeckStatus {
        DeckStatus {
            state: DeckState::Playing,
            track: Some("/music/warmup/opening track.flac".to_string()),
            position_seconds: 75.0,
            length_seconds: 300.0,
            gain: 0.8,
            speed: 1.02,
            fade: FadeDirection::In,
            reverb: ReverbParameters::default(),
        }
    }

    fn empty_status() -> DeckStatus {
        DeckStatus {
            state: DeckState::Empty,
            track: None,
            position_seconds: 0.0,
            length_seconds: 0.0,
            gain: 1.0,
            speed: 1.0,
            fade: FadeDirection::None,
            reverb: ReverbParameters::default(),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(StatusDisplay::truncate("short", 10), "short");
        assert_eq!(StatusDisplay::truncate("exactly10!", 10), "exactly10!");
        assert_eq!(StatusDisplay::truncate("this is too long", 10), "this is...");
        assert_eq!(StatusDisplay::truncate("abc", 2), "abc");
        // multi-byte characters are not split
        assert_eq!(StatusDisplay::truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn test_create_progress_bar() {
        assert_eq!(StatusDisplay::create_progress_bar(0.0, 10), "░░░░░░░░░░");
        assert_eq!(StatusDisplay::create_progress_bar(1.0, 10), "██████████");
        assert_eq!(StatusDisplay::create_progress_bar(0.5, 10), "█████░░░░░");
        assert_eq!(StatusDisplay::create_progress_bar(1.7, 4), "████");
    }

    #[test]
    fn test_format_deck_state() {
        assert_eq!(StatusDisplay::format_deck_state(DeckState::Playing), "▶ Playing");
        assert_eq!(StatusDisplay::format_deck_state(DeckState::Stopped), "⏹ Stopped");
        assert_eq!(StatusDisplay::format_deck_state(DeckState::Empty), "∅ Empty");
    }

    #[test]
    fn test_compact_line() {
        let line = StatusDisplay::compact_line("A", &create_test_status());
        assert!(line.starts_with("A | Playing"));
        assert!(line.contains("01:15/05:00 (25%)"));
        assert!(line.contains("gain 0.80"));

        let line = StatusDisplay::compact_line("B", &empty_status());
        assert_eq!(line, "B | Empty | No track loaded");
    }

    #[test]
    fn test_wrap_text() {
        let lines = StatusDisplay::wrap_text("one two three four five", 10);
        assert_eq!(lines, vec!["one two", "three four", "five"]);
        assert!(StatusDisplay::wrap_text("", 10).is_empty());
    }

    #[test]
    fn test_display_functions_dont_panic() {
        StatusDisplay::display_deck_status("A", &create_test_status());
        StatusDisplay::display_deck_status("B", &empty_status());
        StatusDisplay::display_compact_status("A", &create_test_status());

        let logger = DeckLogger::new();
        StatusDisplay::display_events(&logger.get_recent_events(5));
        logger.log_event("A", DeckEventType::TrackLoaded, "intro.flac");
        StatusDisplay::display_events(&logger.get_recent_events(5));

        let error = DeckError::from(ValidationError::SpeedOutOfRange { ratio: 0.0 });
        StatusDisplay::display_error(&error);
        StatusDisplay::display_simple_error(&error);
        StatusDisplay::display_error(&DeckError::Control("gone".to_string()));
        StatusDisplay::display_error(&DeckError::from(LoadError::Superseded { locator: "old.wav".to_string() }));
    }
}
