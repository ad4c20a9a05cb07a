use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::error::ValidationError;
use crate::models::{AudioBlock, FadeDirection};

const SNAP_EPSILON: f64 = 1e-9;

/// Deck gain and automatic fade ramp.
///
/// Every field is an atomic so the UI, the fade ticker and the render thread
/// can share one instance without locking. Fade direction is a single value,
/// which makes fading in and fading out mutually exclusive by construction.
#[derive(Debug)]
pub struct GainFade {
    gain: AtomicU64,
    direction: AtomicU8,
    fade_speed: AtomicU64,
    fade_floor: AtomicU64,
    fade_ceiling: AtomicU64,
}

impl Default for GainFade {
    fn default() -> Self {
        Self::new(1.0, 0.01)
    }
}

impl GainFade {
    /// `fade_speed` values that are not strictly positive fall back to 0.01
    pub fn new(gain: f64, fade_speed: f64) -> Self {
        let fade_speed = if fade_speed > 0.0 && fade_speed.is_finite() { fade_speed } else { 0.01 };
        Self {
            gain: AtomicU64::new(clamp_unit(gain).to_bits()),
            direction: AtomicU8::new(FadeDirection::None as u8),
            fade_speed: AtomicU64::new(fade_speed.to_bits()),
            fade_floor: AtomicU64::new(0.0f64.to_bits()),
            fade_ceiling: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    /// Set the gain, clamped to [0, 1]. NaN is ignored.
    pub fn set_gain(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.gain.store(clamp_unit(value).to_bits(), Ordering::Release);
    }

    pub fn gain(&self) -> f64 {
        f64::from_bits(self.gain.load(Ordering::Acquire))
    }

    /// Per-tick gain step; must be > 0
    pub fn set_fade_speed(&self, delta: f64) -> Result<(), ValidationError> {
        if !(delta > 0.0 && delta.is_finite()) {
            return Err(ValidationError::FadeSpeedNotPositive { speed: delta });
        }
        self.fade_speed.store(delta.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn fade_speed(&self) -> f64 {
        f64::from_bits(self.fade_speed.load(Ordering::Acquire))
    }

    /// Limit fades to `floor..=ceiling`. Fade-in stops at the ceiling,
    /// fade-out at the floor.
    pub fn set_fade_range(&self, floor: f64, ceiling: f64) -> Result<(), ValidationError> {
        let valid = (0.0..=1.0).contains(&floor) && (0.0..=1.0).contains(&ceiling) && floor < ceiling;
        if !valid {
            return Err(ValidationError::FadeRangeInvalid { floor, ceiling });
        }
        self.fade_floor.store(floor.to_bits(), Ordering::Release);
        self.fade_ceiling.store(ceiling.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn fade_range(&self) -> (f64, f64) {
        (
            f64::from_bits(self.fade_floor.load(Ordering::Acquire)),
            f64::from_bits(self.fade_ceiling.load(Ordering::Acquire)),
        )
    }

    pub fn fade_in(&self) {
        self.direction.store(FadeDirection::In as u8, Ordering::Release);
    }

    pub fn fade_out(&self) {
        self.direction.store(FadeDirection::Out as u8, Ordering::Release);
    }

    pub fn stop_fade(&self) {
        self.direction.store(FadeDirection::None as u8, Ordering::Release);
    }

    pub fn fade_direction(&self) -> FadeDirection {
        FadeDirection::from_u8(self.direction.load(Ordering::Acquire))
    }

    pub fn is_fading_in(&self) -> bool {
        self.fade_direction() == FadeDirection::In
    }

    pub fn is_fading_out(&self) -> bool {
        self.fade_direction() == FadeDirection::Out
    }

    /// Advance an active fade by one step. Called on the fade timer, not the render thread.
    pub fn tick(&self) {
        let direction = self.fade_direction();
        if direction == FadeDirection::None {
            return;
        }
        let step = self.fade_speed();
        let (floor, ceiling) = self.fade_range();

        // A concurrent set_gain is re-read and stepped from, never overwritten blindly
        let _ = self.gain.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            let g = f64::from_bits(bits);
            let next = match direction {
                FadeDirection::In if g < ceiling => {
                    let v = (g + step).min(ceiling);
                    if ceiling - v < SNAP_EPSILON { ceiling } else { v }
                }
                FadeDirection::Out if g > floor => {
                    let v = (g - step).max(floor);
                    if v - floor < SNAP_EPSILON { floor } else { v }
                }
                _ => g,
            };
            Some(next.to_bits())
        });
    }

    /// Scale every sample by the current gain
    pub fn apply(&self, block: &mut AudioBlock) {
        block.apply_gain(self.gain() as f32);
    }
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
