use serde::{Deserialize, Serialize};

use crate::error::RenderFault;

/// Interleaved block of sample frames exchanged between pipeline stages.
///
/// The backing storage is allocated once (`with_capacity`) and reused; changing
/// the frame count within capacity never reallocates.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    samples: Vec<f32>,
    channels: u16,
    frames: usize,
}

impl AudioBlock {
    /// Create a zeroed block of `frames` frames
    pub fn new(channels: u16, frames: usize) -> Self {
        Self {
            samples: vec![0.0; frames * channels as usize],
            channels,
            frames,
        }
    }

    /// Create an empty block that can grow to `max_frames` without reallocating
    pub fn with_capacity(channels: u16, max_frames: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_frames * channels as usize),
            channels,
            frames: 0,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Grow the backing storage so `max_frames` frames fit without reallocating
    pub fn reserve_frames(&mut self, max_frames: usize) {
        let wanted = max_frames * self.channels as usize;
        self.samples.reserve(wanted.saturating_sub(self.samples.len()));
    }

    /// Frames that fit without reallocating
    #[cfg(test)]
    pub(crate) fn capacity_frames(&self) -> usize {
        self.samples.capacity() / self.channels.max(1) as usize
    }

    /// Resize to `frames` frames. Newly exposed samples are zero.
    pub fn set_frames(&mut self, frames: usize) {
        self.frames = frames;
        self.samples.resize(frames * self.channels as usize, 0.0);
    }

    /// Fill the block with silence, keeping its frame count
    pub fn clear(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Resize to `frames` and fill with silence
    pub fn silence(&mut self, frames: usize) {
        self.set_frames(frames);
        self.clear();
    }

    /// Samples of a single frame
    pub fn frame(&self, index: usize) -> &[f32] {
        let ch = self.channels as usize;
        &self.samples[index * ch..(index + 1) * ch]
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }

    /// Sum another block into this one, sample by sample. No clipping is applied.
    pub fn mix_from(&mut self, other: &AudioBlock) -> Result<(), RenderFault> {
        if other.samples.len() != self.samples.len() {
            return Err(RenderFault::MalformedBlock {
                expected: self.samples.len(),
                actual: other.samples.len(),
            });
        }
        for (dst, src) in self.samples.iter_mut().zip(other.samples.iter()) {
            *dst += *src;
        }
        Ok(())
    }

    pub fn apply_gain(&mut self, gain: f32) {
        if gain == 1.0 {
            return;
        }
        self.samples.iter_mut().for_each(|s| *s *= gain);
    }
}

/// Reverb knob settings, each conventionally in [0.0, 1.0]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReverbParameters {
    pub room_size: f32,
    pub damping: f32,
    pub wet_level: f32,
    pub dry_level: f32,
    pub width: f32,
    /// Values >= 0.5 hold the current tail indefinitely
    pub freeze_mode: f32,
}

impl Default for ReverbParameters {
    fn default() -> Self {
        Self {
            room_size: 0.5,
            damping: 0.5,
            wet_level: 0.33,
            dry_level: 0.4,
            width: 1.0,
            freeze_mode: 0.0,
        }
    }
}

impl ReverbParameters {
    /// Copy with every field clamped to [0, 1]
    pub fn clamped(&self) -> Self {
        Self {
            room_size: self.room_size.clamp(0.0, 1.0),
            damping: self.damping.clamp(0.0, 1.0),
            wet_level: self.wet_level.clamp(0.0, 1.0),
            dry_level: self.dry_level.clamp(0.0, 1.0),
            width: self.width.clamp(0.0, 1.0),
            freeze_mode: self.freeze_mode.clamp(0.0, 1.0),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_mode >= 0.5
    }
}

/// Names a single reverb knob, for field-wise updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbField {
    RoomSize,
    Damping,
    WetLevel,
    DryLevel,
    Width,
    FreezeMode,
}

impl ReverbField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReverbField::RoomSize => "room",
            ReverbField::Damping => "damping",
            ReverbField::WetLevel => "wet",
            ReverbField::DryLevel => "dry",
            ReverbField::Width => "width",
            ReverbField::FreezeMode => "freeze",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "room" | "roomsize" | "room_size" => Some(ReverbField::RoomSize),
            "damping" | "damp" => Some(ReverbField::Damping),
            "wet" | "wetlevel" | "wet_level" => Some(ReverbField::WetLevel),
            "dry" | "drylevel" | "dry_level" => Some(ReverbField::DryLevel),
            "width" => Some(ReverbField::Width),
            "freeze" | "freezemode" | "freeze_mode" => Some(ReverbField::FreezeMode),
            _ => None,
        }
    }

    /// Write `value`, clamped to [0, 1], into the matching field of `params`
    pub fn apply(&self, params: &mut ReverbParameters, value: f32) {
        let value = value.clamp(0.0, 1.0);
        match self {
            ReverbField::RoomSize => params.room_size = value,
            ReverbField::Damping => params.damping = value,
            ReverbField::WetLevel => params.wet_level = value,
            ReverbField::DryLevel => params.dry_level = value,
            ReverbField::Width => params.width = value,
            ReverbField::FreezeMode => params.freeze_mode = value,
        }
    }
}

/// Deck playback state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeckState {
    Empty,
    Stopped,
    Playing,
}

impl DeckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeckState::Empty => "Empty",
            DeckState::Stopped => "Stopped",
            DeckState::Playing => "Playing",
        }
    }
}

impl std::fmt::Display for DeckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of the automatic gain ramp
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum FadeDirection {
    None = 0,
    In = 1,
    Out = 2,
}

impl FadeDirection {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => FadeDirection::In,
            2 => FadeDirection::Out,
            _ => FadeDirection::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FadeDirection::None => "-",
            FadeDirection::In => "fading in",
            FadeDirection::Out => "fading out",
        }
    }
}

/// Snapshot of one deck for status displays
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeckStatus {
    pub state: DeckState,
    pub track: Option<String>,
    pub position_seconds: f64,
    pub length_seconds: f64,
    pub gain: f64,
    pub speed: f64,
    pub fade: FadeDirection,
    pub reverb: ReverbParameters,
}

impl DeckStatus {
    /// Position as a fraction of the track length, 0 when nothing is loaded
    pub fn progress(&self) -> f64 {
        if self.length_seconds > 0.0 {
            self.position_seconds / self.length_seconds
        } else {
            0.0
        }
    }

    pub fn position_formatted(&self) -> String {
        format_seconds(self.position_seconds)
    }

    pub fn length_formatted(&self) -> String {
        format_seconds(self.length_seconds)
    }
}

/// Format seconds as MM:SS
pub fn format_seconds(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}
