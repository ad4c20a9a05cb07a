use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use super::{prepared_deck, write_wav, GatedOpener};
use crate::audio::{Mixer, PcmSource, SymphoniaOpener};
use crate::error::{LoadError, ValidationError};
use crate::models::{AudioBlock, DeckState};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_deck_renders_silence() {
        let deck = prepared_deck("A", Arc::new(SymphoniaOpener::new()), 44_100, 512);

        let mut block = AudioBlock::with_capacity(2, 512);
        deck.pull_block(&mut block, 512);
        assert_eq!(block.frames(), 512);
        assert_eq!(block.samples().len(), 1024);
        assert!(block.samples().iter().all(|&s| s == 0.0));

        let relative = deck.get_position_relative();
        assert!(!relative.is_nan());
        assert_eq!(relative, 0.0);
        assert_eq!(deck.state(), DeckState::Empty);
    }

    #[test]
    fn test_relative_seek_on_ten_second_track() {
        let deck = prepared_deck("A", Arc::new(SymphoniaOpener::new()), 44_100, 512);
        deck.load_source(Box::new(PcmSource::sine(440.0, 0.5, 10.0, 2, 44_100)))
            .unwrap();

        deck.set_position_relative(0.5).unwrap();
        deck.play();
        let mut block = AudioBlock::with_capacity(2, 512);
        deck.pull_block(&mut block, 512);

        assert_eq!(deck.get_track_length_in_seconds(), 10.0);
        assert!((deck.get_position_relative() - 0.5).abs() < 0.01);
        assert!(!block.is_silent());
    }

    #[test]
    fn test_two_decks_sum_without_clipping() {
        let opener = Arc::new(SymphoniaOpener::new());
        let a = prepared_deck("A", opener.clone(), 44_100, 256);
        let b = prepared_deck("B", opener, 44_100, 256);
        for deck in [&a, &b] {
            deck.load_source(Box::new(PcmSource::constant(0.5, 2.0, 2, 44_100)))
                .unwrap();
            deck.play();
        }

        let mut mixer = Mixer::new(2);
        mixer.add_deck(a);
        mixer.add_deck(b);
        mixer.prepare(44_100, 256);

        let mut out = AudioBlock::with_capacity(2, 256);
        mixer.pull_block(&mut out, 256);
        assert_eq!(out.frames(), 256);
        assert!(out.samples().iter().all(|&s| (s - 1.0).abs() < 1e-6));

        // Louder inputs are not limited either
        for deck in mixer.decks() {
            deck.load_source(Box::new(PcmSource::constant(0.8, 2.0, 2, 44_100)))
                .unwrap();
            deck.play();
        }
        mixer.pull_block(&mut out, 256);
        assert!(out.samples().iter().all(|&s| (s - 1.6).abs() < 1e-6));
    }

    #[test]
    fn test_out_of_range_relative_seek_is_rejected() {
        let deck = prepared_deck("A", Arc::new(SymphoniaOpener::new()), 44_100, 512);
        deck.load_source(Box::new(PcmSource::constant(0.1, 8.0, 2, 44_100)))
            .unwrap();
        deck.set_position_relative(0.25).unwrap();
        let before = deck.get_position_seconds();

        let err = deck.set_position_relative(1.5).unwrap_err();
        assert_eq!(err, ValidationError::RelativePositionOutOfRange { fraction: 1.5 });
        assert_eq!(deck.get_position_seconds(), before);
        assert!((deck.get_position_relative() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_superseded_load_is_discarded() {
        let opener = Arc::new(GatedOpener::new());
        let release_first = opener.gate("0.25.pcm");
        let deck = prepared_deck("A", opener.clone(), 1_000, 64);

        let first_deck = deck.clone();
        let first = thread::spawn(move || first_deck.load_track(Path::new("0.25.pcm")));
        while opener.opened() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        deck.load_track(Path::new("0.75.pcm")).unwrap();
        release_first.send(()).unwrap();
        let first_result = first.join().unwrap();
        assert!(matches!(first_result, Err(LoadError::Superseded { .. })));

        assert_eq!(deck.track().as_deref(), Some("0.75.pcm"));
        assert_eq!(deck.state(), DeckState::Stopped);
        deck.play();

        let mut block = AudioBlock::with_capacity(2, 64);
        for _ in 0..4 {
            deck.pull_block(&mut block, 64);
            assert!(block.samples().iter().all(|&s| (s - 0.75).abs() < 1e-6));
        }
    }

    #[test]
    fn test_deck_keeps_playing_old_track_while_loading() {
        let opener = Arc::new(GatedOpener::new());
        let release = opener.gate("0.6.pcm");
        let deck = prepared_deck("A", opener.clone(), 1_000, 64);
        deck.load_track(Path::new("0.2.pcm")).unwrap();
        deck.play();

        let loader_deck = deck.clone();
        let loader = thread::spawn(move || loader_deck.load_track(Path::new("0.6.pcm")));
        while opener.opened() < 2 {
            thread::sleep(Duration::from_millis(1));
        }

        let mut block = AudioBlock::with_capacity(2, 64);
        deck.pull_block(&mut block, 64);
        assert!(block.samples().iter().all(|&s| (s - 0.2).abs() < 1e-6));

        release.send(()).unwrap();
        loader.join().unwrap().unwrap();
        deck.pull_block(&mut block, 64);
        assert!(block.is_silent());
    }

    #[test]
    fn test_wav_file_through_symphonia() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quarter.wav");
        // one second of stereo at quarter scale, 22.05 kHz
        write_wav(&path, 22_050, 2, &vec![8_192i16; 2 * 22_050]);

        let deck = prepared_deck("A", Arc::new(SymphoniaOpener::new()), 44_100, 441);
        deck.load_track(&path).unwrap();
        assert!((deck.get_track_length_in_seconds() - 1.0).abs() < 1e-9);

        deck.play();
        let mut block = AudioBlock::with_capacity(2, 441);
        deck.pull_block(&mut block, 441);
        deck.pull_block(&mut block, 441);
        assert!(block.samples().iter().all(|&s| (s - 0.25).abs() < 1e-3));

        // 882 output frames at 44.1 kHz cover 20 ms of a 22.05 kHz track
        assert!((deck.get_position_seconds() - 0.02).abs() < 1e-3);
    }

    #[test]
    fn test_end_of_track_stops_deck() {
        let deck = prepared_deck("A", Arc::new(SymphoniaOpener::new()), 1_000, 64);
        deck.load_source(Box::new(PcmSource::constant(0.5, 0.1, 2, 1_000)))
            .unwrap();
        deck.play();

        let mut block = AudioBlock::with_capacity(2, 64);
        deck.pull_block(&mut block, 64);
        deck.pull_block(&mut block, 64);
        assert_eq!(deck.state(), DeckState::Stopped);
        assert_eq!(deck.get_position_relative(), 1.0);

        deck.pull_block(&mut block, 64);
        assert!(block.is_silent());
    }
}
