//! Transport control: the loaded source, play/stop, seek and position.
//!
//! State is split in two. [`TransportState`] is shared (behind an `Arc`) with
//! the control side and only holds atomics plus two short-lived hand-off slots.
//! [`Transport`] lives on the render thread and owns the source it reads from.
//! A new source is published into the `pending` slot and adopted by the
//! render thread at the start of its next block; the source it replaces is
//! handed back through the `retired` slot so it is dropped off the render
//! thread. While that slot is still occupied the render side keeps the old
//! source and holds off adopting the next one.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::SourceReader;
use crate::error::{LoadError, RenderFault, ValidationError};
use crate::models::AudioBlock;

const NO_SEEK: u64 = u64::MAX;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport flags and position, shared between control and render threads
pub struct TransportState {
    playing: AtomicBool,
    loaded: AtomicBool,
    // a published source is waiting to be adopted
    handing_over: AtomicBool,
    seek_target: AtomicU64,
    position_frames: AtomicU64,
    length_frames: AtomicU64,
    source_rate: AtomicU32,
    source_channels: AtomicU16,
    requested_generation: AtomicU64,
    pending: Mutex<Option<Box<dyn SourceReader>>>,
    retired: Mutex<Option<Box<dyn SourceReader>>>,
    track: Mutex<Option<String>>,
}

impl Default for TransportState {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportState {
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            handing_over: AtomicBool::new(false),
            seek_target: AtomicU64::new(NO_SEEK),
            position_frames: AtomicU64::new(0),
            length_frames: AtomicU64::new(0),
            source_rate: AtomicU32::new(0),
            source_channels: AtomicU16::new(0),
            requested_generation: AtomicU64::new(0),
            pending: Mutex::new(None),
            retired: Mutex::new(None),
            track: Mutex::new(None),
        }
    }

    /// Register a new load request. Any load started earlier that has not
    /// yet been published will be discarded when it completes.
    pub fn begin_load(&self) -> u64 {
        self.requested_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Publish a fully opened source for the load registered as `generation`.
    ///
    /// Playback stops and the position returns to 0; an explicit `play` is
    /// needed to hear the new track.
    pub fn publish(&self, generation: u64, source: Box<dyn SourceReader>) -> Result<(), LoadError> {
        let mut pending = lock(&self.pending);
        if self.requested_generation.load(Ordering::Acquire) != generation {
            return Err(LoadError::Superseded {
                locator: source.locator().to_string(),
            });
        }

        self.playing.store(false, Ordering::Release);
        self.seek_target.store(NO_SEEK, Ordering::Release);
        self.position_frames.store(0, Ordering::Release);
        self.length_frames.store(source.length_in_frames(), Ordering::Release);
        self.source_rate.store(source.sample_rate(), Ordering::Release);
        self.source_channels.store(source.channels(), Ordering::Release);
        *lock(&self.track) = Some(source.locator().to_string());

        // An unadopted earlier source is dropped here, on the caller's thread.
        *pending = Some(source);
        self.handing_over.store(true, Ordering::Release);
        self.loaded.store(true, Ordering::Release);
        drop(pending);

        self.collect_retired();
        Ok(())
    }

    /// Drop the source the render thread swapped out, if any
    pub fn collect_retired(&self) {
        let retired = lock(&self.retired).take();
        drop(retired);
    }

    /// Hand a swapped-out source to the control side. Gives it back when the
    /// slot is busy or still holds an uncollected source.
    fn retire(&self, source: Box<dyn SourceReader>) -> Result<(), Box<dyn SourceReader>> {
        match self.retired.try_lock() {
            Ok(mut slot) if slot.is_none() => {
                *slot = Some(source);
                Ok(())
            }
            _ => Err(source),
        }
    }

    /// Start playback. Returns false (and does nothing) when no track is loaded.
    pub fn play(&self) -> bool {
        if !self.is_loaded() {
            return false;
        }
        self.playing.store(true, Ordering::Release);
        true
    }

    /// Stop playback, keeping the current position
    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Seek to `seconds`, clamped to the track length. Applied before the next block.
    pub fn seek(&self, seconds: f64) {
        let rate = self.source_rate.load(Ordering::Acquire);
        let length = self.length_frames.load(Ordering::Acquire);
        let frame = if rate == 0 || !seconds.is_finite() || seconds <= 0.0 {
            0
        } else {
            ((seconds * rate as f64).round() as u64).min(length)
        };
        self.position_frames.store(frame, Ordering::Release);
        self.seek_target.store(frame, Ordering::Release);
    }

    /// Seek to a fraction of the track length. Fractions outside [0, 1] are
    /// rejected and the position is left unchanged.
    pub fn seek_relative(&self, fraction: f64) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ValidationError::RelativePositionOutOfRange { fraction });
        }
        self.seek(fraction * self.length_seconds());
        Ok(())
    }

    pub fn position_seconds(&self) -> f64 {
        let rate = self.source_rate.load(Ordering::Acquire);
        if rate == 0 {
            return 0.0;
        }
        self.position_frames.load(Ordering::Acquire) as f64 / rate as f64
    }

    pub fn length_seconds(&self) -> f64 {
        let rate = self.source_rate.load(Ordering::Acquire);
        if rate == 0 {
            return 0.0;
        }
        self.length_frames.load(Ordering::Acquire) as f64 / rate as f64
    }

    /// Position as a fraction of the length; 0 when the length is 0
    pub fn position_relative(&self) -> f64 {
        let length = self.length_frames.load(Ordering::Acquire);
        if length == 0 {
            return 0.0;
        }
        let position = self.position_frames.load(Ordering::Acquire);
        (position as f64 / length as f64).clamp(0.0, 1.0)
    }

    /// Native sample rate of the loaded track, 0 when empty
    pub fn source_rate(&self) -> u32 {
        self.source_rate.load(Ordering::Acquire)
    }

    /// Channel count of the loaded track, 0 when empty
    pub fn source_channels(&self) -> u16 {
        self.source_channels.load(Ordering::Acquire)
    }

    pub fn track(&self) -> Option<String> {
        lock(&self.track).clone()
    }
}

/// Render-side transport. Owns the source being played.
pub struct Transport {
    state: Arc<TransportState>,
    source: Option<Box<dyn SourceReader>>,
    // replaced source the control side has not taken yet
    held: Option<Box<dyn SourceReader>>,
    position: u64,
    channels: u16,
    read_buf: Vec<f32>,
}

impl Transport {
    pub fn new(state: Arc<TransportState>, channels: u16) -> Self {
        Self {
            state,
            source: None,
            held: None,
            position: 0,
            channels,
            read_buf: Vec::new(),
        }
    }

    pub fn state(&self) -> &Arc<TransportState> {
        &self.state
    }

    /// Reserve read space for blocks of up to `max_frames` output-layout frames
    pub fn prepare(&mut self, max_frames: usize) {
        self.reserve(max_frames, self.channels.max(2));
    }

    /// Make room for reading `max_frames` frames of a `source_channels` source
    pub fn reserve(&mut self, max_frames: usize, source_channels: u16) {
        let wanted = max_frames * source_channels.max(1) as usize;
        if self.read_buf.len() < wanted {
            self.read_buf.resize(wanted, 0.0);
        }
    }

    #[cfg(test)]
    pub(crate) fn reserved_samples(&self) -> usize {
        self.read_buf.len()
    }

    pub fn release(&mut self) {
        self.read_buf = Vec::new();
    }

    /// Adopt a newly published source and apply a pending seek.
    /// Called at the start of every block.
    pub fn sync(&mut self) -> Result<(), RenderFault> {
        if let Some(previous) = self.held.take() {
            self.held = self.state.retire(previous).err();
        }

        if self.held.is_none() {
            if let Ok(mut pending) = self.state.pending.try_lock() {
                if let Some(next) = pending.take() {
                    self.state.handing_over.store(false, Ordering::Release);
                    drop(pending);
                    self.position = 0;
                    // a block rendered during the hand-off may have stored the old position
                    if self.state.seek_target.load(Ordering::Acquire) == NO_SEEK {
                        self.state.position_frames.store(0, Ordering::Release);
                    }
                    if let Some(previous) = self.source.replace(next) {
                        self.held = self.state.retire(previous).err();
                    }
                }
            }
        }

        let target = self.state.seek_target.swap(NO_SEEK, Ordering::AcqRel);
        if target != NO_SEEK {
            if let Some(source) = self.source.as_mut() {
                let frame = target.min(source.length_in_frames());
                source
                    .seek(frame)
                    .map_err(|e| RenderFault::SourceRead(e.to_string()))?;
                self.position = frame;
                self.state.position_frames.store(frame, Ordering::Release);
            }
        }
        Ok(())
    }

    /// True when a source is loaded and playback is running. The previous
    /// track is never played once a new one has been published.
    pub fn is_active(&self) -> bool {
        self.source.is_some()
            && self.state.is_playing()
            && !self.state.handing_over.load(Ordering::Acquire)
    }

    /// Native sample rate of the adopted source
    pub fn source_rate(&self) -> u32 {
        self.source.as_ref().map_or(0, |s| s.sample_rate())
    }

    /// Read `frames` frames into `out`. Emits silence when stopped or empty;
    /// zero-pads past the end of the stream and stops playback there.
    /// Returns the number of frames taken from the source.
    pub fn pull_block(&mut self, out: &mut AudioBlock, frames: usize) -> Result<usize, RenderFault> {
        out.silence(frames);
        if !self.is_active() {
            return Ok(0);
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };

        let src_channels = source.channels().max(1) as usize;
        let needed = frames * src_channels;
        if self.read_buf.len() < needed {
            self.read_buf.resize(needed, 0.0);
        }

        let mut read = 0usize;
        while read < frames {
            let n = source
                .read_frames(&mut self.read_buf[read * src_channels..needed])
                .map_err(|e| RenderFault::SourceRead(e.to_string()))?;
            if n == 0 {
                break;
            }
            read += n;
        }

        remap_channels(
            &self.read_buf[..read * src_channels],
            src_channels,
            out.samples_mut(),
            self.channels as usize,
        );

        self.position += read as u64;
        self.state.position_frames.store(self.position, Ordering::Release);

        if read < frames {
            self.state.stop();
        }
        Ok(read)
    }
}

/// Copy interleaved frames between channel layouts. Mono is spread to every
/// output channel; surplus input channels are dropped; missing ones are silent.
fn remap_channels(input: &[f32], in_channels: usize, output: &mut [f32], out_channels: usize) {
    if in_channels == out_channels {
        output[..input.len()].copy_from_slice(input);
        return;
    }
    for (src, dst) in input.chunks_exact(in_channels).zip(output.chunks_exact_mut(out_channels)) {
        if in_channels == 1 {
            dst.iter_mut().for_each(|d| *d = src[0]);
        } else {
            for (c, d) in dst.iter_mut().enumerate() {
                *d = src.get(c).copied().unwrap_or(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PcmSource;

    fn loaded_transport(source: PcmSource) -> Transport {
        let state = Arc::new(TransportState::new());
        let generation = state.begin_load();
        state.publish(generation, Box::new(source)).unwrap();
        let mut transport = Transport::new(state, 2);
        transport.prepare(512);
        transport.sync().unwrap();
        transport
    }

    #[test]
    fn test_silence_without_source() {
        let state = Arc::new(TransportState::new());
        let mut transport = Transport::new(state.clone(), 2);
        assert!(!state.play());

        let mut block = AudioBlock::with_capacity(2, 512);
        assert_eq!(transport.pull_block(&mut block, 512).unwrap(), 0);
        assert_eq!(block.frames(), 512);
        assert!(block.is_silent());
        assert_eq!(state.position_relative(), 0.0);
    }

    #[test]
    fn test_play_advances_and_stop_keeps_position() {
        let mut transport = loaded_transport(PcmSource::constant(0.25, 1.0, 2, 1000));
        let state = transport.state().clone();
        let mut block = AudioBlock::with_capacity(2, 512);

        // Loaded but stopped
        transport.pull_block(&mut block, 100).unwrap();
        assert!(block.is_silent());

        assert!(state.play());
        assert_eq!(transport.pull_block(&mut block, 100).unwrap(), 100);
        assert!(block.samples().iter().all(|&s| s == 0.25));
        assert!((state.position_seconds() - 0.1).abs() < 1e-9);

        state.stop();
        transport.pull_block(&mut block, 100).unwrap();
        assert!(block.is_silent());
        assert!((state.position_seconds() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_seek_is_clamped_and_applied_before_next_block() {
        let mut transport = loaded_transport(PcmSource::new(
            "ramp",
            (0..1000).map(|v| v as f32).collect(),
            1,
            100,
        ));
        let state = transport.state().clone();

        state.seek(50.0);
        assert_eq!(state.position_seconds(), 10.0);

        state.seek(-3.0);
        assert_eq!(state.position_seconds(), 0.0);

        state.seek(2.5);
        state.play();
        let mut block = AudioBlock::with_capacity(2, 16);
        transport.sync().unwrap();
        transport.pull_block(&mut block, 2).unwrap();
        assert_eq!(block.samples(), &[250.0, 250.0, 251.0, 251.0]);
    }

    #[test]
    fn test_seek_relative_rejects_out_of_range() {
        let transport = loaded_transport(PcmSource::constant(0.1, 10.0, 2, 1000));
        let state = transport.state().clone();
        state.seek_relative(0.25).unwrap();

        let err = state.seek_relative(1.5).unwrap_err();
        assert_eq!(err, ValidationError::RelativePositionOutOfRange { fraction: 1.5 });
        assert!(state.seek_relative(-0.1).is_err());
        assert!(state.seek_relative(f64::NAN).is_err());
        assert!((state.position_relative() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_end_of_stream_pads_and_stops() {
        let mut transport = loaded_transport(PcmSource::constant(0.5, 0.01, 2, 1000));
        let state = transport.state().clone();
        state.play();

        let mut block = AudioBlock::with_capacity(2, 64);
        assert_eq!(transport.pull_block(&mut block, 16).unwrap(), 10);
        assert!(block.samples()[..20].iter().all(|&s| s == 0.5));
        assert!(block.samples()[20..].iter().all(|&s| s == 0.0));
        assert!(!state.is_playing());
        assert_eq!(state.position_relative(), 1.0);
    }

    #[test]
    fn test_mono_source_fills_both_channels() {
        let mut transport = loaded_transport(PcmSource::new("mono", vec![0.1, 0.2, 0.3], 1, 1000));
        transport.state().play();
        let mut block = AudioBlock::with_capacity(2, 8);
        transport.pull_block(&mut block, 3).unwrap();
        assert_eq!(block.samples(), &[0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_stale_generation_is_superseded() {
        let state = TransportState::new();
        let first = state.begin_load();
        let second = state.begin_load();

        let stale = state.publish(first, Box::new(PcmSource::constant(0.1, 1.0, 2, 1000)));
        assert!(matches!(stale, Err(LoadError::Superseded { .. })));
        assert!(!state.is_loaded());

        state
            .publish(second, Box::new(PcmSource::constant(0.2, 2.0, 2, 1000)))
            .unwrap();
        assert!(state.is_loaded());
        assert_eq!(state.length_seconds(), 2.0);
    }

    #[test]
    fn test_old_source_waits_for_the_retired_slot() {
        let mut transport = loaded_transport(PcmSource::constant(0.1, 1.0, 2, 1000));
        let state = transport.state().clone();

        // Control side has not collected an earlier source yet
        let generation = state.begin_load();
        state
            .publish(generation, Box::new(PcmSource::constant(0.2, 1.0, 2, 1000)))
            .unwrap();
        *lock(&state.retired) = Some(Box::new(PcmSource::constant(0.9, 0.1, 2, 1000)));

        transport.sync().unwrap();
        assert!(transport.held.is_some());
        assert_eq!(transport.source.as_ref().map(|s| s.locator()), Some("constant:0.2"));

        // The next load is not adopted while the replaced source is still held
        state.begin_load();
        *lock(&state.pending) = Some(Box::new(PcmSource::constant(0.3, 1.0, 2, 1000)));
        state.handing_over.store(true, Ordering::Release);
        state.play();
        transport.sync().unwrap();
        assert!(!transport.is_active());
        assert_eq!(transport.source.as_ref().map(|s| s.locator()), Some("constant:0.2"));

        let mut block = AudioBlock::with_capacity(2, 16);
        transport.pull_block(&mut block, 16).unwrap();
        assert!(block.is_silent());

        state.collect_retired();
        transport.sync().unwrap();
        assert_eq!(transport.source.as_ref().map(|s| s.locator()), Some("constant:0.3"));
        state.collect_retired();
        transport.sync().unwrap();
        assert!(transport.held.is_none());
        assert!(lock(&state.retired).is_some());
    }

    #[test]
    fn test_reserve_covers_source_layout() {
        let mut transport = Transport::new(Arc::new(TransportState::new()), 2);
        transport.prepare(64);
        assert_eq!(transport.reserved_samples(), 128);
        transport.reserve(400, 6);
        assert_eq!(transport.reserved_samples(), 2400);
        transport.reserve(10, 1);
        assert_eq!(transport.reserved_samples(), 2400);
    }

    #[test]
    fn test_new_load_stops_playback() {
        let transport = loaded_transport(PcmSource::constant(0.1, 1.0, 2, 1000));
        let state = transport.state().clone();
        state.play();
        state.seek(0.5);

        let generation = state.begin_load();
        state
            .publish(generation, Box::new(PcmSource::constant(0.2, 4.0, 2, 1000)))
            .unwrap();
        assert!(!state.is_playing());
        assert_eq!(state.position_seconds(), 0.0);
        assert_eq!(state.length_seconds(), 4.0);
        assert_eq!(state.track().as_deref(), Some("constant:0.2"));
    }
}
