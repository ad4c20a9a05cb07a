use crate::audio::PcmSource;
use crate::control::DeckAction;
use crate::models::ReverbField;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

pub mod status;
pub use status::StatusDisplay;

/// Sample rate used for generated test tones
pub const TONE_SAMPLE_RATE: u32 = 44_100;

/// Two-deck DJ engine CLI
#[derive(Parser)]
#[command(name = "twindeck")]
#[command(about = "A two-deck DJ engine with varispeed, reverb, gain and fades")]
#[command(version = "0.1.0")]
pub struct CliApp {
    /// Configuration file to use instead of ~/.config/twin-deck/config.toml
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output device name (falls back to the system default)
    #[arg(long)]
    pub device: Option<String>,

    /// Track to load on deck A at startup
    #[arg(long, value_name = "FILE")]
    pub deck_a: Option<PathBuf>,

    /// Track to load on deck B at startup
    #[arg(long, value_name = "FILE")]
    pub deck_b: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level modes
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List audio output devices and exit
    Devices,
    /// Start the engine with the interactive prompt (default)
    Run,
}

/// Commands accepted at the interactive prompt
#[derive(Debug, Clone, PartialEq)]
pub enum DeckCommand {
    Load { deck: usize, path: PathBuf },
    Tone { deck: usize, frequency: f32, seconds: f64 },
    Play { deck: usize },
    Stop { deck: usize },
    Gain { deck: usize, value: f64 },
    Speed { deck: usize, ratio: f64 },
    Seek { deck: usize, seconds: f64 },
    Position { deck: usize, fraction: f64 },
    Reverb { deck: usize, field: ReverbField, value: f32 },
    ReverbReset { deck: usize },
    FadeIn { deck: usize },
    FadeOut { deck: usize },
    StopFade { deck: usize },
    FadeSpeed { deck: usize, speed: f64 },
    FadeRange { deck: usize, floor: f64, ceiling: f64 },
    Status,
    Events { count: usize },
    Help,
    Quit,
}

impl DeckCommand {
    /// Target deck and control action, or `None` for commands handled by the prompt itself
    pub fn into_action(self) -> Option<(usize, DeckAction)> {
        let action = match self {
            DeckCommand::Load { deck, path } => (deck, DeckAction::Load(path)),
            DeckCommand::Tone { deck, frequency, seconds } => (
                deck,
                DeckAction::LoadSource(Box::new(PcmSource::sine(
                    frequency,
                    0.5,
                    seconds,
                    1,
                    TONE_SAMPLE_RATE,
                ))),
            ),
            DeckCommand::Play { deck } => (deck, DeckAction::Play),
            DeckCommand::Stop { deck } => (deck, DeckAction::Stop),
            DeckCommand::Gain { deck, value } => (deck, DeckAction::SetGain(value)),
            DeckCommand::Speed { deck, ratio } => (deck, DeckAction::SetSpeed(ratio)),
            DeckCommand::Seek { deck, seconds } => (deck, DeckAction::SetPosition(seconds)),
            DeckCommand::Position { deck, fraction } => (deck, DeckAction::SetPositionRelative(fraction)),
            DeckCommand::Reverb { deck, field, value } => (deck, DeckAction::SetReverbField(field, value)),
            DeckCommand::ReverbReset { deck } => (deck, DeckAction::ResetReverb),
            DeckCommand::FadeIn { deck } => (deck, DeckAction::FadeIn),
            DeckCommand::FadeOut { deck } => (deck, DeckAction::FadeOut),
            DeckCommand::StopFade { deck } => (deck, DeckAction::StopFade),
            DeckCommand::FadeSpeed { deck, speed } => (deck, DeckAction::SetFadeSpeed(speed)),
            DeckCommand::FadeRange { deck, floor, ceiling } => {
                (deck, DeckAction::SetFadeRange { floor, ceiling })
            }
            DeckCommand::Status | DeckCommand::Events { .. } | DeckCommand::Help | DeckCommand::Quit => {
                return None
            }
        };
        Some(action)
    }
}

impl CliApp {
    /// Expand a leading `~` to the home directory
    pub fn expand_path(path_str: &str) -> PathBuf {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
        Path::new(path_str).to_path_buf()
    }

    /// Parse one line typed at the prompt
    pub fn parse_command(input: &str) -> Result<DeckCommand, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        if args.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        let command = args[0].to_lowercase();
        match command.as_str() {
            "load" => {
                let deck = Self::deck_arg(&args, "load")?;
                if args.len() < 3 {
                    return Err(ParseError::MissingArgument {
                        command: "load".to_string(),
                        argument: "path".to_string(),
                    });
                }
                // paths may contain spaces
                let path = Self::expand_path(&args[2..].join(" "));
                Ok(DeckCommand::Load { deck, path })
            }
            "tone" => {
                let deck = Self::deck_arg(&args, "tone")?;
                let frequency = Self::number_arg(&args, 2, "tone", "frequency", "a frequency in Hz")?;
                if !(frequency > 0.0 && frequency.is_finite()) {
                    return Err(ParseError::InvalidArgument {
                        argument: "frequency".to_string(),
                        value: args[2].to_string(),
                        expected: "a frequency in Hz".to_string(),
                    });
                }
                let seconds = match args.get(3) {
                    Some(value) => Self::parse_time(value)?,
                    None => 10.0,
                };
                if seconds > PcmSource::MAX_GENERATED_SECONDS {
                    return Err(ParseError::InvalidArgument {
                        argument: "time".to_string(),
                        value: args[3].to_string(),
                        expected: format!("at most {} seconds", PcmSource::MAX_GENERATED_SECONDS),
                    });
                }
                Ok(DeckCommand::Tone {
                    deck,
                    frequency: frequency as f32,
                    seconds,
                })
            }
            "play" => Ok(DeckCommand::Play { deck: Self::deck_arg(&args, "play")? }),
            "stop" => Ok(DeckCommand::Stop { deck: Self::deck_arg(&args, "stop")? }),
            "gain" | "vol" => {
                let deck = Self::deck_arg(&args, "gain")?;
                let value = Self::number_arg(&args, 2, "gain", "value", "a number between 0 and 1")?;
                Ok(DeckCommand::Gain { deck, value })
            }
            "speed" => {
                let deck = Self::deck_arg(&args, "speed")?;
                let ratio = Self::number_arg(&args, 2, "speed", "ratio", "a ratio such as 1.0")?;
                Ok(DeckCommand::Speed { deck, ratio })
            }
            "seek" => {
                let deck = Self::deck_arg(&args, "seek")?;
                let value = args.get(2).ok_or_else(|| ParseError::MissingArgument {
                    command: "seek".to_string(),
                    argument: "time".to_string(),
                })?;
                let seconds = Self::parse_time(value)?;
                Ok(DeckCommand::Seek { deck, seconds })
            }
            "pos" | "position" => {
                let deck = Self::deck_arg(&args, "pos")?;
                let fraction = Self::number_arg(&args, 2, "pos", "fraction", "a fraction between 0 and 1")?;
                Ok(DeckCommand::Position { deck, fraction })
            }
            "reverb" => {
                let deck = Self::deck_arg(&args, "reverb")?;
                let field_name = args.get(2).ok_or_else(|| ParseError::MissingArgument {
                    command: "reverb".to_string(),
                    argument: "field".to_string(),
                })?;
                if field_name.eq_ignore_ascii_case("reset") {
                    return Ok(DeckCommand::ReverbReset { deck });
                }
                let field = ReverbField::parse(field_name).ok_or_else(|| ParseError::InvalidArgument {
                    argument: "field".to_string(),
                    value: field_name.to_string(),
                    expected: "room, damping, wet, dry, width, freeze or reset".to_string(),
                })?;
                let value = Self::number_arg(&args, 3, "reverb", "value", "a number between 0 and 1")?;
                Ok(DeckCommand::Reverb {
                    deck,
                    field,
                    value: value as f32,
                })
            }
            "fadein" => Ok(DeckCommand::FadeIn { deck: Self::deck_arg(&args, "fadein")? }),
            "fadeout" => Ok(DeckCommand::FadeOut { deck: Self::deck_arg(&args, "fadeout")? }),
            "stopfade" => Ok(DeckCommand::StopFade { deck: Self::deck_arg(&args, "stopfade")? }),
            "fadespeed" => {
                let deck = Self::deck_arg(&args, "fadespeed")?;
                let speed = Self::number_arg(&args, 2, "fadespeed", "step", "a gain step per tick")?;
                Ok(DeckCommand::FadeSpeed { deck, speed })
            }
            "faderange" => {
                let deck = Self::deck_arg(&args, "faderange")?;
                let floor = Self::number_arg(&args, 2, "faderange", "floor", "a gain between 0 and 1")?;
                let ceiling = Self::number_arg(&args, 3, "faderange", "ceiling", "a gain between 0 and 1")?;
                Ok(DeckCommand::FadeRange { deck, floor, ceiling })
            }
            "status" => Ok(DeckCommand::Status),
            "events" => {
                let count = match args.get(1) {
                    Some(value) => value.parse().map_err(|_| ParseError::InvalidArgument {
                        argument: "count".to_string(),
                        value: value.to_string(),
                        expected: "a whole number".to_string(),
                    })?,
                    None => 10,
                };
                Ok(DeckCommand::Events { count })
            }
            "help" | "?" => Ok(DeckCommand::Help),
            "quit" | "exit" => Ok(DeckCommand::Quit),
            _ => Err(ParseError::UnknownCommand { command: args[0].to_string() }),
        }
    }

    /// Deck index from `a`/`b` (any letter) or a 1-based number
    pub fn parse_deck(value: &str) -> Result<usize, ParseError> {
        let invalid = || ParseError::InvalidArgument {
            argument: "deck".to_string(),
            value: value.to_string(),
            expected: "a, b or a deck number starting at 1".to_string(),
        };

        let mut chars = value.chars();
        if let (Some(letter), None) = (chars.next(), chars.next()) {
            if letter.is_ascii_alphabetic() {
                return Ok((letter.to_ascii_lowercase() as u8 - b'a') as usize);
            }
        }
        match value.parse::<usize>() {
            Ok(number) if number >= 1 => Ok(number - 1),
            _ => Err(invalid()),
        }
    }

    /// Parse seconds from "90", "90s", "1:30" or "1:30.5"
    pub fn parse_time(time_str: &str) -> Result<f64, ParseError> {
        let trimmed = time_str.trim();
        let invalid = || ParseError::InvalidTimeFormat {
            input: time_str.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid());
        }

        let seconds = if let Some((minutes, seconds)) = trimmed.split_once(':') {
            let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
            let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
            if !(0.0..60.0).contains(&seconds) {
                return Err(invalid());
            }
            minutes as f64 * 60.0 + seconds
        } else {
            trimmed.trim_end_matches('s').parse::<f64>().map_err(|_| invalid())?
        };

        if !seconds.is_finite() || seconds < 0.0 {
            return Err(invalid());
        }
        Ok(seconds)
    }

    fn deck_arg(args: &[&str], command: &str) -> Result<usize, ParseError> {
        match args.get(1) {
            Some(value) => Self::parse_deck(value),
            None => Err(ParseError::MissingArgument {
                command: command.to_string(),
                argument: "deck".to_string(),
            }),
        }
    }

    fn number_arg(
        args: &[&str],
        index: usize,
        command: &str,
        argument: &str,
        expected: &str,
    ) -> Result<f64, ParseError> {
        let value = args.get(index).ok_or_else(|| ParseError::MissingArgument {
            command: command.to_string(),
            argument: argument.to_string(),
        })?;
        value.parse::<f64>().map_err(|_| ParseError::InvalidArgument {
            argument: argument.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        })
    }

    /// Display help information
    pub fn display_help() {
        println!("Twin Deck - Available Commands (decks: a, b or 1, 2):");
        println!();
        println!("Tracks:");
        println!("  load <deck> <path>          - Decode a file onto a deck");
        println!("  tone <deck> <hz> [time]     - Load a test tone (default 10s, max 10:00)");
        println!();
        println!("Transport:");
        println!("  play <deck>                 - Start playback");
        println!("  stop <deck>                 - Stop playback, keeping the position");
        println!("  seek <deck> <time>          - Jump to a time (e.g. '1:30', '90s')");
        println!("  pos <deck> <0-1>            - Jump to a fraction of the track");
        println!("  speed <deck> <ratio>        - Playback speed, 1.0 is normal (max 100)");
        println!();
        println!("Gain and fades:");
        println!("  gain <deck> <0-1>           - Set deck gain");
        println!("  fadein <deck>               - Fade up towards the ceiling");
        println!("  fadeout <deck>              - Fade down towards the floor");
        println!("  stopfade <deck>             - Hold the current gain");
        println!("  fadespeed <deck> <step>     - Gain change per fade tick");
        println!("  faderange <deck> <lo> <hi>  - Fade floor and ceiling");
        println!();
        println!("Reverb:");
        println!("  reverb <deck> <field> <0-1> - field: room, damping, wet, dry, width, freeze");
        println!("  reverb <deck> reset         - Restore default reverb settings");
        println!();
        println!("General:");
        println!("  status                      - Show both decks");
        println!("  events [count]              - Show recent deck events");
        println!("  help                        - Show this help message");
        println!("  exit, quit                  - Exit");
    }
}

/// Command parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },
}
