//! Freeverb-style stereo reverb: eight parallel damped comb filters feeding
//! four series all-pass filters per channel, the right channel's delay lines
//! offset by a fixed stereo spread.
//!
//! Parameters are published by the control side through
//! [`SharedReverbParameters`] and picked up by the render side at the start of
//! a block. Gains and filter coefficients then glide to their new values over
//! 10 ms so knob moves do not click.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::{AudioBlock, ReverbField, ReverbParameters};

const COMB_TUNINGS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNINGS: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const TUNING_RATE: f64 = 44_100.0;

const FIXED_GAIN: f32 = 0.015;
const WET_SCALE: f32 = 3.0;
const DRY_SCALE: f32 = 2.0;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;
const ALLPASS_FEEDBACK: f32 = 0.5;
const SMOOTHING_SECONDS: f64 = 0.01;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reverb settings shared between control and render threads.
///
/// All six values are replaced together under the lock; the render side only
/// ever `try_lock`s, keeping its previous snapshot if the lock is busy.
#[derive(Debug)]
pub struct SharedReverbParameters {
    params: Mutex<ReverbParameters>,
    version: AtomicU64,
}

impl Default for SharedReverbParameters {
    fn default() -> Self {
        Self::new(ReverbParameters::default())
    }
}

impl SharedReverbParameters {
    pub fn new(params: ReverbParameters) -> Self {
        Self {
            params: Mutex::new(params.clamped()),
            version: AtomicU64::new(1),
        }
    }

    /// Replace the whole parameter set. Values are clamped to [0, 1].
    pub fn set_parameters(&self, params: ReverbParameters) {
        *lock(&self.params) = params.clamped();
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Snapshot copy of the current parameters
    pub fn parameters(&self) -> ReverbParameters {
        *lock(&self.params)
    }

    pub fn reset_to_default(&self) {
        self.set_parameters(ReverbParameters::default());
    }

    /// Change a single knob, leaving the others as they are
    pub fn set_field(&self, field: ReverbField, value: f32) {
        let mut params = lock(&self.params);
        field.apply(&mut params, value);
        drop(params);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn try_snapshot(&self) -> Option<ReverbParameters> {
        self.params.try_lock().ok().map(|p| *p)
    }
}

#[derive(Debug, Clone, Copy)]
struct Smoothed {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
    ramp_len: u32,
}

impl Smoothed {
    fn new(value: f32) -> Self {
        Self { current: value, target: value, step: 0.0, remaining: 0, ramp_len: 0 }
    }

    fn set_ramp_length(&mut self, samples: u32) {
        self.ramp_len = samples;
        self.jump_to_target();
    }

    fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        self.target = target;
        if self.ramp_len == 0 {
            self.jump_to_target();
            return;
        }
        self.remaining = self.ramp_len;
        self.step = (self.target - self.current) / self.ramp_len as f32;
    }

    fn jump_to_target(&mut self) {
        self.current = self.target;
        self.remaining = 0;
    }

    #[inline]
    fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            } else {
                self.current += self.step;
            }
        }
        self.current
    }
}

#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    last: f32,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        Self { buffer: vec![0.0; size.max(1)], index: 0, last: 0.0 }
    }

    #[inline]
    fn process(&mut self, input: f32, damp: f32, feedback: f32) -> f32 {
        let output = self.buffer[self.index];
        self.last = output * (1.0 - damp) + self.last * damp;
        self.buffer[self.index] = input + self.last * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.last = 0.0;
    }
}

#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self { buffer: vec![0.0; size.max(1)], index: 0 }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        self.buffer[self.index] = input + buffered * ALLPASS_FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();
        buffered - input
    }

    fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// Render-side reverb processor
pub struct ReverbStage {
    shared: Arc<SharedReverbParameters>,
    seen_version: u64,
    active: ReverbParameters,
    combs: [Vec<CombFilter>; 2],
    allpasses: [Vec<AllpassFilter>; 2],
    damping: Smoothed,
    feedback: Smoothed,
    dry_gain: Smoothed,
    wet_gain1: Smoothed,
    wet_gain2: Smoothed,
    input_gain: f32,
}

impl ReverbStage {
    pub fn new(shared: Arc<SharedReverbParameters>) -> Self {
        let active = shared.parameters();
        let mut stage = Self {
            shared,
            seen_version: 0,
            active,
            combs: [Vec::new(), Vec::new()],
            allpasses: [Vec::new(), Vec::new()],
            damping: Smoothed::new(0.0),
            feedback: Smoothed::new(0.0),
            dry_gain: Smoothed::new(0.0),
            wet_gain1: Smoothed::new(0.0),
            wet_gain2: Smoothed::new(0.0),
            input_gain: FIXED_GAIN,
        };
        stage.apply_parameters(active);
        stage.jump_to_targets();
        stage
    }

    /// Allocate delay lines for `sample_rate`
    pub fn prepare(&mut self, sample_rate: u32) {
        let scale = sample_rate as f64 / TUNING_RATE;
        for (channel, spread) in [(0usize, 0usize), (1, STEREO_SPREAD)] {
            self.combs[channel] = COMB_TUNINGS
                .iter()
                .map(|&len| CombFilter::new(((len + spread) as f64 * scale) as usize))
                .collect();
            self.allpasses[channel] = ALLPASS_TUNINGS
                .iter()
                .map(|&len| AllpassFilter::new(((len + spread) as f64 * scale) as usize))
                .collect();
        }

        let ramp = (sample_rate as f64 * SMOOTHING_SECONDS) as u32;
        for smoothed in self.smoothed_values() {
            smoothed.set_ramp_length(ramp);
        }
        self.seen_version = 0;
        self.refresh_parameters();
        self.jump_to_targets();
    }

    pub fn release(&mut self) {
        self.combs = [Vec::new(), Vec::new()];
        self.allpasses = [Vec::new(), Vec::new()];
    }

    /// Clear the reverb tail
    pub fn reset(&mut self) {
        self.combs.iter_mut().flatten().for_each(CombFilter::clear);
        self.allpasses.iter_mut().flatten().for_each(AllpassFilter::clear);
    }

    pub fn is_prepared(&self) -> bool {
        !self.combs[0].is_empty()
    }

    /// Parameters currently driving the processor
    pub fn active_parameters(&self) -> ReverbParameters {
        self.active
    }

    /// Process the block in place. Mono blocks use the left bank; blocks with
    /// more than two channels only have their first two processed.
    pub fn process(&mut self, block: &mut AudioBlock) {
        if !self.is_prepared() {
            return;
        }
        self.refresh_parameters();

        let channels = block.channels() as usize;
        if channels == 1 {
            self.process_mono(block.samples_mut());
        } else if channels >= 2 {
            self.process_stereo(block.samples_mut(), channels);
        }
    }

    fn process_stereo(&mut self, samples: &mut [f32], channels: usize) {
        let [left_combs, right_combs] = &mut self.combs;
        let [left_allpasses, right_allpasses] = &mut self.allpasses;

        for frame in samples.chunks_exact_mut(channels) {
            let input = (frame[0] + frame[1]) * self.input_gain;
            let damp = self.damping.next();
            let feedback = self.feedback.next();

            let mut out_l = 0.0f32;
            let mut out_r = 0.0f32;
            for (l, r) in left_combs.iter_mut().zip(right_combs.iter_mut()) {
                out_l += l.process(input, damp, feedback);
                out_r += r.process(input, damp, feedback);
            }
            for (l, r) in left_allpasses.iter_mut().zip(right_allpasses.iter_mut()) {
                out_l = l.process(out_l);
                out_r = r.process(out_r);
            }

            let dry = self.dry_gain.next();
            let wet1 = self.wet_gain1.next();
            let wet2 = self.wet_gain2.next();
            frame[0] = out_l * wet1 + out_r * wet2 + frame[0] * dry;
            frame[1] = out_r * wet1 + out_l * wet2 + frame[1] * dry;
        }
    }

    fn process_mono(&mut self, samples: &mut [f32]) {
        let combs = &mut self.combs[0];
        let allpasses = &mut self.allpasses[0];

        for sample in samples.iter_mut() {
            let input = *sample * self.input_gain;
            let damp = self.damping.next();
            let feedback = self.feedback.next();

            let mut out = 0.0f32;
            for comb in combs.iter_mut() {
                out += comb.process(input, damp, feedback);
            }
            for allpass in allpasses.iter_mut() {
                out = allpass.process(out);
            }

            let dry = self.dry_gain.next();
            let wet1 = self.wet_gain1.next();
            self.wet_gain2.next();
            *sample = out * wet1 + *sample * dry;
        }
    }

    fn refresh_parameters(&mut self) {
        let version = self.shared.version();
        if version == self.seen_version {
            return;
        }
        if let Some(params) = self.shared.try_snapshot() {
            self.seen_version = version;
            self.apply_parameters(params);
        }
    }

    fn apply_parameters(&mut self, params: ReverbParameters) {
        self.active = params;
        let wet = params.wet_level * WET_SCALE;
        self.dry_gain.set_target(params.dry_level * DRY_SCALE);
        self.wet_gain1.set_target(0.5 * wet * (1.0 + params.width));
        self.wet_gain2.set_target(0.5 * wet * (1.0 - params.width));

        if params.is_frozen() {
            self.input_gain = 0.0;
            self.damping.set_target(0.0);
            self.feedback.set_target(1.0);
        } else {
            self.input_gain = FIXED_GAIN;
            self.damping.set_target(params.damping * DAMP_SCALE);
            self.feedback.set_target(params.room_size * ROOM_SCALE + ROOM_OFFSET);
        }
    }

    fn smoothed_values(&mut self) -> [&mut Smoothed; 5] {
        [
            &mut self.damping,
            &mut self.feedback,
            &mut self.dry_gain,
            &mut self.wet_gain1,
            &mut self.wet_gain2,
        ]
    }

    fn jump_to_targets(&mut self) {
        for smoothed in self.smoothed_values() {
            smoothed.jump_to_target();
        }
    }
}
