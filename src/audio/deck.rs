//! One turntable: Transport → Rate Converter → Reverb → Gain, in that order.
//!
//! A `Deck` is shared as `Arc<Deck>` between the render callback (through the
//! mixer) and the control side. Control methods take `&self` and only touch
//! atomics or short-lived locks; the render chain itself sits behind a mutex
//! that the render thread only ever `try_lock`s.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::audio::gain::GainFade;
use crate::audio::resampler::{RateConverter, SpeedControl, MAX_SPEED};
use crate::audio::reverb::{ReverbStage, SharedReverbParameters};
use crate::audio::transport::{Transport, TransportState};
use crate::audio::{SourceOpener, SourceReader};
use crate::config::EngineConfig;
use crate::error::{LoadError, RenderFault, ValidationError};
use crate::models::{AudioBlock, DeckState, DeckStatus, ReverbField, ReverbParameters};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Render-thread half of a deck
struct RenderChain {
    transport: Transport,
    rate: RateConverter,
    reverb: ReverbStage,
    channels: u16,
    block_size: usize,
    // cleared by release; the chain is silent until prepared again
    prepared: bool,
}

impl RenderChain {
    /// Size scratch space so a source at `source_rate` renders at any valid
    /// speed without growing it on the render thread
    fn reserve_for_source(&mut self, source_rate: u32, source_channels: u16) {
        if self.block_size == 0 {
            return;
        }
        let ratio = self.rate.effective_ratio(MAX_SPEED, source_rate);
        let frames = RateConverter::max_input_frames(self.block_size, ratio);
        self.rate.reserve(frames);
        self.transport.reserve(frames, source_channels);
    }

    fn render(&mut self, speed: f64, out: &mut AudioBlock, frames: usize) -> Result<(), RenderFault> {
        if out.channels() != self.channels {
            return Err(RenderFault::MalformedBlock {
                expected: frames * self.channels as usize,
                actual: frames * out.channels() as usize,
            });
        }

        self.transport.sync()?;
        if !self.prepared || !self.transport.is_active() {
            out.silence(frames);
            self.rate.reset();
            return Ok(());
        }

        let ratio = self.rate.effective_ratio(speed, self.transport.source_rate());
        self.rate.pull_block(&mut self.transport, ratio, out, frames)?;
        if out.frames() != frames {
            return Err(RenderFault::MalformedBlock {
                expected: frames * self.channels as usize,
                actual: out.samples().len(),
            });
        }
        self.reverb.process(out);
        Ok(())
    }
}

pub struct Deck {
    name: String,
    opener: Arc<dyn SourceOpener>,
    transport: Arc<TransportState>,
    speed: SpeedControl,
    reverb: Arc<SharedReverbParameters>,
    gain: GainFade,
    chain: Mutex<RenderChain>,
    render_faults: AtomicU64,
    last_fault: Mutex<Option<RenderFault>>,
}

impl Deck {
    pub fn new(name: impl Into<String>, opener: Arc<dyn SourceOpener>, channels: u16) -> Self {
        Self::build(
            name.into(),
            opener,
            channels,
            GainFade::default(),
            ReverbParameters::default(),
        )
    }

    /// Build a deck with the gain, fade speed and reverb defaults from `config`
    pub fn with_config(
        name: impl Into<String>,
        opener: Arc<dyn SourceOpener>,
        channels: u16,
        config: &EngineConfig,
    ) -> Self {
        Self::build(
            name.into(),
            opener,
            channels,
            GainFade::new(config.default_gain, config.default_fade_speed),
            config.default_reverb,
        )
    }

    fn build(
        name: String,
        opener: Arc<dyn SourceOpener>,
        channels: u16,
        gain: GainFade,
        reverb: ReverbParameters,
    ) -> Self {
        let channels = channels.max(1);
        let transport = Arc::new(TransportState::new());
        let reverb = Arc::new(SharedReverbParameters::new(reverb));
        let chain = RenderChain {
            transport: Transport::new(transport.clone(), channels),
            rate: RateConverter::new(channels),
            reverb: ReverbStage::new(reverb.clone()),
            channels,
            block_size: 0,
            prepared: false,
        };
        Self {
            name,
            opener,
            transport,
            speed: SpeedControl::new(),
            reverb,
            gain,
            chain: Mutex::new(chain),
            render_faults: AtomicU64::new(0),
            last_fault: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open `path` and make it this deck's track.
    ///
    /// Blocks on decoder I/O, so call it off the render thread. The deck ends
    /// up stopped at position 0. If another load is requested while this one
    /// is opening, this one resolves to [`LoadError::Superseded`].
    pub fn load_track(&self, path: &Path) -> Result<(), LoadError> {
        let generation = self.transport.begin_load();
        debug!("Deck {}: opening {}", self.name, path.display());
        let source = self.opener.open(path).map_err(|e| {
            warn!("Deck {}: load failed: {}", self.name, e);
            e
        })?;
        self.publish(generation, source)
    }

    /// Make an already opened source this deck's track
    pub fn load_source(&self, source: Box<dyn SourceReader>) -> Result<(), LoadError> {
        let generation = self.transport.begin_load();
        self.publish(generation, source)
    }

    fn publish(&self, generation: u64, source: Box<dyn SourceReader>) -> Result<(), LoadError> {
        let locator = source.locator().to_string();
        let length = source.length_in_frames() as f64 / source.sample_rate().max(1) as f64;
        lock(&self.chain).reserve_for_source(source.sample_rate(), source.channels());
        self.transport.publish(generation, source)?;
        info!("Deck {}: loaded '{}' ({:.2}s)", self.name, locator, length);
        Ok(())
    }

    /// Prepare every stage for `sample_rate` and blocks of up to `block_size` frames
    pub fn prepare(&self, sample_rate: u32, block_size: usize) {
        let mut chain = lock(&self.chain);
        chain.transport.prepare(block_size);
        chain.rate.prepare(sample_rate, block_size);
        chain.reverb.prepare(sample_rate);
        chain.block_size = block_size;
        chain.prepared = true;

        let source_rate = match self.transport.source_rate() {
            0 => sample_rate,
            rate => rate,
        };
        let source_channels = self.transport.source_channels().max(chain.channels);
        chain.reserve_for_source(source_rate, source_channels);
        debug!("Deck {}: prepared at {} Hz, {} frames", self.name, sample_rate, block_size);
    }

    /// Free stage buffers. The deck renders silence and holds its position
    /// until `prepare` is called again.
    pub fn release(&self) {
        let mut chain = lock(&self.chain);
        chain.prepared = false;
        chain.block_size = 0;
        chain.transport.release();
        chain.rate.release();
        chain.reverb.release();
        drop(chain);
        self.transport.collect_retired();
    }

    /// Render the next `frames` frames into `out`.
    ///
    /// Never fails: a fault anywhere in the chain, or the chain being busy
    /// with a prepare/release, yields silence for this block.
    pub fn pull_block(&self, out: &mut AudioBlock, frames: usize) {
        let Ok(mut chain) = self.chain.try_lock() else {
            out.silence(frames);
            return;
        };

        match chain.render(self.speed.speed(), out, frames) {
            Ok(()) => self.gain.apply(out),
            Err(fault) => {
                out.silence(frames);
                // reported by the control loop
                if let Ok(mut slot) = self.last_fault.try_lock() {
                    if slot.is_none() {
                        *slot = Some(fault);
                    }
                }
                self.render_faults.fetch_add(1, Ordering::Release);
            }
        }
    }

    // Transport

    /// Start playback. Returns false when nothing is loaded.
    pub fn play(&self) -> bool {
        self.transport.play()
    }

    pub fn stop(&self) {
        self.transport.stop();
    }

    pub fn state(&self) -> DeckState {
        if !self.transport.is_loaded() {
            DeckState::Empty
        } else if self.transport.is_playing() {
            DeckState::Playing
        } else {
            DeckState::Stopped
        }
    }

    /// Seek to `seconds`, clamped to the track
    pub fn set_position(&self, seconds: f64) {
        self.transport.seek(seconds);
    }

    pub fn set_position_relative(&self, fraction: f64) -> Result<(), ValidationError> {
        self.transport.seek_relative(fraction)
    }

    pub fn get_position_relative(&self) -> f64 {
        self.transport.position_relative()
    }

    pub fn get_position_seconds(&self) -> f64 {
        self.transport.position_seconds()
    }

    pub fn get_track_length_in_seconds(&self) -> f64 {
        self.transport.length_seconds()
    }

    pub fn track(&self) -> Option<String> {
        self.transport.track()
    }

    // Speed and gain

    pub fn set_speed(&self, ratio: f64) -> Result<(), ValidationError> {
        self.speed.set_speed(ratio).map_err(|e| {
            warn!("Deck {}: {}", self.name, e);
            e
        })
    }

    pub fn speed(&self) -> f64 {
        self.speed.speed()
    }

    pub fn set_gain(&self, value: f64) {
        self.gain.set_gain(value);
    }

    pub fn get_gain(&self) -> f64 {
        self.gain.gain()
    }

    // Reverb

    pub fn set_reverb_parameters(&self, params: ReverbParameters) {
        self.reverb.set_parameters(params);
    }

    pub fn reverb_parameters(&self) -> ReverbParameters {
        self.reverb.parameters()
    }

    pub fn reset_reverb(&self) {
        self.reverb.reset_to_default();
    }

    pub fn set_reverb_field(&self, field: ReverbField, value: f32) {
        self.reverb.set_field(field, value);
    }

    pub fn set_room_size(&self, value: f32) {
        self.set_reverb_field(ReverbField::RoomSize, value);
    }

    pub fn set_damping(&self, value: f32) {
        self.set_reverb_field(ReverbField::Damping, value);
    }

    pub fn set_wet_level(&self, value: f32) {
        self.set_reverb_field(ReverbField::WetLevel, value);
    }

    pub fn set_dry_level(&self, value: f32) {
        self.set_reverb_field(ReverbField::DryLevel, value);
    }

    pub fn set_width(&self, value: f32) {
        self.set_reverb_field(ReverbField::Width, value);
    }

    pub fn set_freeze_mode(&self, value: f32) {
        self.set_reverb_field(ReverbField::FreezeMode, value);
    }

    // Fade

    pub fn set_fade_speed(&self, delta: f64) -> Result<(), ValidationError> {
        self.gain.set_fade_speed(delta)
    }

    pub fn set_fade_range(&self, floor: f64, ceiling: f64) -> Result<(), ValidationError> {
        self.gain.set_fade_range(floor, ceiling)
    }

    pub fn fade_in(&self) {
        self.gain.fade_in();
    }

    pub fn fade_out(&self) {
        self.gain.fade_out();
    }

    pub fn stop_fade(&self) {
        self.gain.stop_fade();
    }

    pub fn is_fading_in(&self) -> bool {
        self.gain.is_fading_in()
    }

    pub fn is_fading_out(&self) -> bool {
        self.gain.is_fading_out()
    }

    /// One step of the fade timer. Also drops any source the render thread retired.
    pub fn tick_fade(&self) {
        self.gain.tick();
        self.transport.collect_retired();
    }

    pub fn gain_fade(&self) -> &GainFade {
        &self.gain
    }

    /// Blocks replaced by silence because of a render fault
    pub fn render_faults(&self) -> u64 {
        self.render_faults.load(Ordering::Acquire)
    }

    /// Oldest render fault not yet reported
    pub fn take_render_fault(&self) -> Option<RenderFault> {
        lock(&self.last_fault).take()
    }

    pub fn status(&self) -> DeckStatus {
        DeckStatus {
            state: self.state(),
            track: self.track(),
            position_seconds: self.get_position_seconds(),
            length_seconds: self.get_track_length_in_seconds(),
            gain: self.get_gain(),
            speed: self.speed(),
            fade: self.gain.fade_direction(),
            reverb: self.reverb_parameters(),
        }
    }
}

impl std::fmt::Debug for Deck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deck")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("gain", &self.get_gain())
            .field("speed", &self.speed())
            .finish()
    }
}
