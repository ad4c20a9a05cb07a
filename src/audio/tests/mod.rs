//! Shared fixtures for the pipeline tests

mod deck_scenarios;

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use crate::audio::{Deck, PcmSource, SourceOpener, SourceReader};
use crate::error::LoadError;
use crate::models::ReverbParameters;

/// Write a 16-bit PCM WAV file
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let byte_rate = sample_rate * block_align as u32;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&bytes).unwrap();
}

/// Reverb settings that pass the signal through untouched (dry 0.5 is unity)
pub fn transparent_reverb() -> ReverbParameters {
    ReverbParameters {
        wet_level: 0.0,
        dry_level: 0.5,
        ..ReverbParameters::default()
    }
}

/// Opener for fake tracks named after their level, e.g. `0.25.pcm` is a
/// constant 0.25 stereo signal at 1 kHz lasting two seconds. Paths can be
/// gated so that opening them blocks until the test releases them.
#[derive(Default)]
pub struct GatedOpener {
    gates: Mutex<HashMap<PathBuf, mpsc::Receiver<()>>>,
    opened: AtomicUsize,
}

impl GatedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make opening `path` block until the returned sender fires (or is dropped)
    pub fn gate(&self, path: &str) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.gates.lock().unwrap().insert(PathBuf::from(path), rx);
        tx
    }

    /// Number of `open` calls that have started
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl SourceOpener for GatedOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn SourceReader>, LoadError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().remove(path);
        if let Some(gate) = gate {
            let _ = gate.recv();
        }

        let locator = path.display().to_string();
        let level: f32 = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| LoadError::UnsupportedFormat {
                locator: locator.clone(),
                format: "unknown".to_string(),
            })?;
        Ok(Box::new(PcmSource::new(locator, vec![level; 2 * 2_000], 2, 1_000)))
    }
}

/// A stereo deck with a transparent reverb, prepared for `sample_rate`
pub fn prepared_deck(name: &str, opener: Arc<dyn SourceOpener>, sample_rate: u32, block_size: usize) -> Arc<Deck> {
    let deck = Arc::new(Deck::new(name, opener, 2));
    deck.set_reverb_parameters(transparent_reverb());
    deck.prepare(sample_rate, block_size);
    deck
}
