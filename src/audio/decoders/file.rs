use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::pcm::PcmSource;
use crate::audio::{SourceOpener, SourceReader};
use crate::error::LoadError;

/// Opens files with symphonia and decodes them to memory before they reach a deck
#[derive(Debug, Default, Clone)]
pub struct SymphoniaOpener;

impl SymphoniaOpener {
    pub fn new() -> Self {
        Self
    }
}

impl SourceOpener for SymphoniaOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn SourceReader>, LoadError> {
        Ok(Box::new(decode_file(path)?))
    }
}

/// Decode every packet of the first audio track into interleaved f32
pub fn decode_file(path: &Path) -> Result<PcmSource, LoadError> {
    let locator = path.display().to_string();

    let file = File::open(path).map_err(|e| LoadError::UnreadableSource {
        locator: locator.clone(),
        reason: e.to_string(),
    })?;
    let media_source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, media_source, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| LoadError::UnsupportedFormat {
            locator: locator.clone(),
            format: format!("probe failed: {}", e),
        })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| LoadError::UnsupportedFormat {
            locator: locator.clone(),
            format: "no decodable audio track".to_string(),
        })?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params.sample_rate.unwrap_or(44_100);
    let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let expected_frames = codec_params.n_frames.unwrap_or(0) as usize;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| LoadError::UnsupportedFormat {
            locator: locator.clone(),
            format: format!("no decoder: {}", e),
        })?;

    let mut samples: Vec<f32> = Vec::with_capacity(expected_frames * channels.max(1) as usize);
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("Decoder reset required while reading '{}', stopping early", locator);
                break;
            }
            Err(e) => {
                return Err(LoadError::UnreadableSource {
                    locator,
                    reason: format!("failed to read packet: {}", e),
                });
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if channels == 0 {
                    channels = decoded.spec().channels.count() as u16;
                }
                append_interleaved(&mut sample_buf, decoded, channels, &mut samples);
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("Skipping undecodable packet in '{}': {}", locator, msg);
            }
            Err(e) => {
                return Err(LoadError::UnreadableSource {
                    locator,
                    reason: format!("decode failed: {}", e),
                });
            }
        }
    }

    if samples.is_empty() || channels == 0 {
        return Err(LoadError::UnreadableSource {
            locator,
            reason: "no audio frames decoded".to_string(),
        });
    }

    log::debug!(
        "Decoded '{}': {} frames, {} Hz, {} channels",
        locator,
        samples.len() / channels as usize,
        sample_rate,
        channels
    );

    Ok(PcmSource::new(locator, samples, channels, sample_rate))
}

/// Append one decoded packet, remapping to `channels` if the packet's layout differs
fn append_interleaved(
    sample_buf: &mut Option<SampleBuffer<f32>>,
    decoded: AudioBufferRef<'_>,
    channels: u16,
    samples: &mut Vec<f32>,
) {
    let spec = *decoded.spec();
    let needs_new = sample_buf
        .as_ref()
        .map_or(true, |buf| buf.capacity() < decoded.capacity() * spec.channels.count());
    if needs_new {
        *sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
    }
    let Some(buf) = sample_buf.as_mut() else {
        return;
    };
    buf.copy_interleaved_ref(decoded);

    let packet_channels = spec.channels.count();
    let out_channels = channels as usize;
    if packet_channels == out_channels {
        samples.extend_from_slice(buf.samples());
        return;
    }
    for frame in buf.samples().chunks_exact(packet_channels) {
        for c in 0..out_channels {
            samples.push(frame.get(c).copied().unwrap_or(0.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::write_wav;
    use tempfile::TempDir;

    #[test]
    fn test_decode_wav_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("half.wav");
        // 0.25 s of stereo at half scale
        write_wav(&path, 8_000, 2, &vec![16_384i16; 2 * 2_000]);

        let source = decode_file(&path).unwrap();
        assert_eq!(source.sample_rate(), 8_000);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.length_in_frames(), 2_000);

        let mut source = source;
        let mut buf = [0.0f32; 8];
        assert_eq!(source.read_frames(&mut buf).unwrap(), 4);
        assert!(buf.iter().all(|s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let result = SymphoniaOpener::new().open(Path::new("/nonexistent/track.flac"));
        match result {
            Err(LoadError::UnreadableSource { locator, .. }) => {
                assert!(locator.contains("track.flac"));
            }
            other => panic!("Expected UnreadableSource, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_garbage_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let result = decode_file(&path);
        assert!(matches!(
            result,
            Err(LoadError::UnsupportedFormat { .. }) | Err(LoadError::UnreadableSource { .. })
        ));
    }
}
