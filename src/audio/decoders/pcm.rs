use std::sync::Arc;

use crate::audio::SourceReader;
use crate::error::ReadError;

/// Decoded PCM held in memory, read as a seekable stream.
///
/// Sample data is shared, so cloning a source to load it on a second deck
/// does not copy the audio.
#[derive(Debug, Clone)]
pub struct PcmSource {
    locator: String,
    samples: Arc<[f32]>,
    channels: u16,
    sample_rate: u32,
    cursor: u64,
}

impl PcmSource {
    /// Wrap interleaved samples. Trailing samples that do not form a whole
    /// frame are ignored.
    pub fn new(locator: impl Into<String>, samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let mut samples = samples;
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            locator: locator.into(),
            samples: samples.into(),
            channels,
            sample_rate,
            cursor: 0,
        }
    }

    /// Longest tone or level the generators produce
    pub const MAX_GENERATED_SECONDS: f64 = 600.0;

    /// Frame count for a generated source; `seconds` is capped at
    /// [`Self::MAX_GENERATED_SECONDS`] and non-finite lengths give 0
    fn generated_frames(seconds: f64, channels: u16, sample_rate: u32) -> usize {
        let seconds = if seconds.is_finite() {
            seconds.clamp(0.0, Self::MAX_GENERATED_SECONDS)
        } else {
            0.0
        };
        let frames = (seconds * sample_rate as f64).round() as usize;
        match frames.checked_mul(channels.max(1) as usize) {
            Some(_) => frames,
            None => 0,
        }
    }

    /// Sine tone, identical on every channel
    pub fn sine(frequency: f32, amplitude: f32, seconds: f64, channels: u16, sample_rate: u32) -> Self {
        let frames = Self::generated_frames(seconds, channels, sample_rate);
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for n in 0..frames {
            let t = n as f32 / sample_rate as f32;
            let s = amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin();
            samples.extend(std::iter::repeat(s).take(channels as usize));
        }
        Self::new(format!("tone:{}Hz", frequency), samples, channels, sample_rate)
    }

    /// Constant DC level on every channel
    pub fn constant(level: f32, seconds: f64, channels: u16, sample_rate: u32) -> Self {
        let frames = Self::generated_frames(seconds, channels, sample_rate);
        Self::new(
            format!("constant:{}", level),
            vec![level; frames * channels as usize],
            channels,
            sample_rate,
        )
    }
}

impl SourceReader for PcmSource {
    fn read_frames(&mut self, out: &mut [f32]) -> Result<usize, ReadError> {
        let ch = self.channels as usize;
        let total = self.length_in_frames();
        let wanted = (out.len() / ch) as u64;
        let available = total.saturating_sub(self.cursor);
        let frames = wanted.min(available) as usize;

        let start = self.cursor as usize * ch;
        out[..frames * ch].copy_from_slice(&self.samples[start..start + frames * ch]);
        self.cursor += frames as u64;
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> Result<(), ReadError> {
        self.cursor = frame.min(self.length_in_frames());
        Ok(())
    }

    fn length_in_frames(&self) -> u64 {
        (self.samples.len() / self.channels as usize) as u64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn locator(&self) -> &str {
        &self.locator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_until_end() {
        let mut source = PcmSource::new("ramp", (0..10).map(|v| v as f32).collect(), 2, 48_000);
        assert_eq!(source.length_in_frames(), 5);

        let mut buf = [0.0f32; 6];
        assert_eq!(source.read_frames(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        assert_eq!(source.read_frames(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..4], &[6.0, 7.0, 8.0, 9.0]);

        assert_eq!(source.read_frames(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek_is_clamped() {
        let mut source = PcmSource::constant(0.5, 1.0, 1, 1000);
        source.seek(10_000).unwrap();
        let mut buf = [0.0f32; 4];
        assert_eq!(source.read_frames(&mut buf).unwrap(), 0);

        source.seek(998).unwrap();
        assert_eq!(source.read_frames(&mut buf).unwrap(), 2);
    }

    #[test]
    fn test_partial_frame_is_dropped() {
        let source = PcmSource::new("odd", vec![0.1; 7], 2, 44_100);
        assert_eq!(source.length_in_frames(), 3);
    }

    #[test]
    fn test_generated_length_is_capped() {
        let source = PcmSource::constant(0.1, 1e15, 1, 100);
        assert_eq!(source.length_in_frames(), 60_000);

        let source = PcmSource::sine(440.0, 0.5, f64::INFINITY, 2, 100);
        assert_eq!(source.length_in_frames(), 0);
        assert_eq!(PcmSource::sine(440.0, 0.5, -1.0, 2, 100).length_in_frames(), 0);
    }

    #[test]
    fn test_sine_length_and_range() {
        let source = PcmSource::sine(440.0, 0.8, 0.5, 2, 44_100);
        assert_eq!(source.length_in_frames(), 22_050);
        assert!(source.samples.iter().all(|s| s.abs() <= 0.8 + 1e-6));
    }
}
