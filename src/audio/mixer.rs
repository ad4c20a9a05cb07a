//! Sums every deck's block into the output block.
//!
//! No clipping or limiting is applied: two full-scale decks sum past 1.0 and
//! it is up to the device sink or the OS mixer to clamp.

use std::sync::Arc;

use log::debug;

use crate::audio::deck::Deck;
use crate::error::ValidationError;
use crate::models::AudioBlock;

pub struct Mixer {
    decks: Vec<Arc<Deck>>,
    channels: u16,
    scratch: AudioBlock,
}

impl Mixer {
    pub fn new(channels: u16) -> Self {
        let channels = channels.max(1);
        Self {
            decks: Vec::new(),
            channels,
            scratch: AudioBlock::with_capacity(channels, 0),
        }
    }

    pub fn add_deck(&mut self, deck: Arc<Deck>) {
        self.decks.push(deck);
    }

    pub fn decks(&self) -> &[Arc<Deck>] {
        &self.decks
    }

    /// Deck at zero-based `index`
    pub fn deck(&self, index: usize) -> Result<&Arc<Deck>, ValidationError> {
        self.decks
            .get(index)
            .ok_or(ValidationError::UnknownDeck { index })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn prepare(&mut self, sample_rate: u32, block_size: usize) {
        self.scratch = AudioBlock::with_capacity(self.channels, block_size);
        for deck in &self.decks {
            deck.prepare(sample_rate, block_size);
        }
        debug!("Mixer: prepared {} decks at {} Hz", self.decks.len(), sample_rate);
    }

    /// Render `frames` frames of the summed decks into `out`
    pub fn pull_block(&mut self, out: &mut AudioBlock, frames: usize) {
        out.silence(frames);
        for deck in &self.decks {
            deck.pull_block(&mut self.scratch, frames);
            // Deck::pull_block always leaves `frames` frames in the scratch block
            let mixed = out.mix_from(&self.scratch);
            debug_assert!(mixed.is_ok(), "deck {} rendered a malformed block", deck.name());
        }
    }

    pub fn release(&mut self) {
        for deck in &self.decks {
            deck.release();
        }
        self.scratch = AudioBlock::with_capacity(self.channels, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PcmSource, SymphoniaOpener};
    use crate::models::ReverbParameters;

    fn constant_deck(name: &str, level: f32) -> Arc<Deck> {
        let deck = Arc::new(Deck::new(name, Arc::new(SymphoniaOpener::new()), 2));
        deck.set_reverb_parameters(ReverbParameters {
            wet_level: 0.0,
            dry_level: 0.5,
            ..ReverbParameters::default()
        });
        deck.load_source(Box::new(PcmSource::constant(level, 5.0, 2, 44_100)))
            .unwrap();
        deck
    }

    #[test]
    fn test_empty_mixer_is_silent() {
        let mut mixer = Mixer::new(2);
        mixer.prepare(44_100, 256);
        let mut out = AudioBlock::with_capacity(2, 256);
        mixer.pull_block(&mut out, 256);
        assert_eq!(out.frames(), 256);
        assert!(out.is_silent());
    }

    #[test]
    fn test_only_playing_decks_are_heard() {
        let mut mixer = Mixer::new(2);
        let a = constant_deck("A", 0.3);
        let b = constant_deck("B", 0.6);
        mixer.add_deck(a.clone());
        mixer.add_deck(b);
        mixer.prepare(44_100, 128);

        a.play();
        let mut out = AudioBlock::with_capacity(2, 128);
        mixer.pull_block(&mut out, 128);
        assert!(out.samples().iter().all(|&s| (s - 0.3).abs() < 1e-6));
    }

    #[test]
    fn test_release_and_prepare_again() {
        let mut mixer = Mixer::new(2);
        let a = constant_deck("A", 0.3);
        mixer.add_deck(a.clone());
        mixer.prepare(44_100, 128);
        a.play();

        let mut out = AudioBlock::with_capacity(2, 128);
        mixer.pull_block(&mut out, 128);
        let position = a.get_position_seconds();

        mixer.release();
        mixer.pull_block(&mut out, 128);
        assert_eq!(out.frames(), 128);
        assert!(out.is_silent());
        assert_eq!(a.get_position_seconds(), position);

        mixer.prepare(44_100, 128);
        mixer.pull_block(&mut out, 128);
        assert_eq!(out.frames(), 128);
        assert!(out.samples().iter().all(|&s| (s - 0.3).abs() < 1e-6));
        assert_eq!(a.render_faults(), 0);
    }

    #[test]
    fn test_deck_lookup() {
        let mut mixer = Mixer::new(2);
        mixer.add_deck(constant_deck("A", 0.1));
        assert_eq!(mixer.deck(0).unwrap().name(), "A");
        assert_eq!(
            mixer.deck(3).unwrap_err(),
            ValidationError::UnknownDeck { index: 3 }
        );
        assert_eq!(mixer.decks().len(), 1);
    }
}
