pub mod decoders;
pub mod deck;
pub mod device;
pub mod engine;
pub mod gain;
pub mod mixer;
pub mod resampler;
pub mod reverb;
pub mod transport;

#[cfg(test)]
pub mod tests;

use std::path::Path;

use crate::error::{LoadError, ReadError};

pub use deck::Deck;
pub use decoders::{PcmSource, SymphoniaOpener};
pub use device::{DeviceCapabilities, DeviceManager};
pub use engine::OutputEngine;
pub use gain::GainFade;
pub use mixer::Mixer;
pub use resampler::RateConverter;
pub use reverb::{ReverbStage, SharedReverbParameters};
pub use transport::{Transport, TransportState};

pub use crate::models::{AudioBlock, ReverbParameters};

/// A decoded, seekable stream of interleaved f32 frames
pub trait SourceReader: Send {
    /// Fill `out` with up to `out.len() / channels()` frames. Returns the
    /// number of frames written; 0 means end of stream.
    fn read_frames(&mut self, out: &mut [f32]) -> Result<usize, ReadError>;

    /// Move the read cursor to `frame` (clamped to the stream length)
    fn seek(&mut self, frame: u64) -> Result<(), ReadError>;

    fn length_in_frames(&self) -> u64;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Where the audio came from, for status output
    fn locator(&self) -> &str;
}

/// Turns a path into a ready-to-read source. Called off the render thread.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn SourceReader>, LoadError>;
}
