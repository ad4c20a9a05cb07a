/*!
Variable-rate linear resampler sitting between the transport and the reverb.

- Each block asks the transport for `frames × ratio` source frames (rounded) and
  stretches or squeezes them onto exactly `frames` output frames.
- Keeps the last source frame of the previous block, so interpolation is
  continuous across block boundaries.
- The sub-frame remainder of each rounded request is carried into the next
  block, so the long-run playback rate matches the ratio exactly.
- At ratio 1.0 the transport output is passed through untouched.

The ratio combines the user speed with the difference between the track's
native sample rate and the output rate:

```text
effective = speed × source_rate / output_rate
```
*/

use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio::transport::Transport;
use crate::error::{RenderFault, ValidationError};
use crate::models::AudioBlock;

pub const MAX_SPEED: f64 = 100.0;

/// Playback speed ratio shared with the control side
#[derive(Debug)]
pub struct SpeedControl {
    ratio: AtomicU64,
}

impl Default for SpeedControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedControl {
    pub fn new() -> Self {
        Self {
            ratio: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    /// Accepts ratios in (0, 100]; anything else is rejected and the current ratio stays
    pub fn set_speed(&self, ratio: f64) -> Result<(), ValidationError> {
        if !(ratio > 0.0 && ratio <= MAX_SPEED) {
            return Err(ValidationError::SpeedOutOfRange { ratio });
        }
        self.ratio.store(ratio.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.ratio.load(Ordering::Acquire))
    }
}

#[derive(Debug)]
pub struct RateConverter {
    channels: usize,
    output_rate: u32,
    // Source frames owed to or by the next block
    carry: f64,
    prev_frame: Vec<f32>,
    input: AudioBlock,
}

impl RateConverter {
    pub fn new(channels: u16) -> Self {
        Self {
            channels: channels as usize,
            output_rate: 0,
            carry: 0.0,
            prev_frame: vec![0.0; channels as usize],
            input: AudioBlock::with_capacity(channels, 0),
        }
    }

    /// Set the output rate and reserve space for blocks of `block_size` frames at normal speed
    pub fn prepare(&mut self, output_rate: u32, block_size: usize) {
        self.output_rate = output_rate;
        self.input = AudioBlock::with_capacity(self.channels as u16, block_size * 2 + 1);
        self.reset();
    }

    pub fn release(&mut self) {
        self.input = AudioBlock::with_capacity(self.channels as u16, 0);
        self.reset();
    }

    /// Make room for pulling up to `max_input_frames` source frames per block
    pub fn reserve(&mut self, max_input_frames: usize) {
        self.input.reserve_frames(max_input_frames);
    }

    /// Source frames one block of `block_size` frames can request at `ratio`,
    /// carry and rounding included
    pub fn max_input_frames(block_size: usize, ratio: f64) -> usize {
        (block_size as f64 * ratio).ceil() as usize + 2
    }

    #[cfg(test)]
    pub(crate) fn reserved_frames(&self) -> usize {
        self.input.capacity_frames()
    }

    /// Forget interpolation history
    pub fn reset(&mut self) {
        self.carry = 0.0;
        self.prev_frame.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Ratio of source frames consumed per output frame
    pub fn effective_ratio(&self, speed: f64, source_rate: u32) -> f64 {
        if self.output_rate == 0 || source_rate == 0 {
            return speed;
        }
        speed * source_rate as f64 / self.output_rate as f64
    }

    /// Pull `frames` output frames through the transport at `ratio`
    pub fn pull_block(
        &mut self,
        transport: &mut Transport,
        ratio: f64,
        out: &mut AudioBlock,
        frames: usize,
    ) -> Result<(), RenderFault> {
        let ch = self.channels;

        if ratio == 1.0 && self.carry == 0.0 {
            transport.pull_block(out, frames)?;
            if frames > 0 {
                self.prev_frame.copy_from_slice(out.frame(frames - 1));
            }
            return Ok(());
        }

        let exact = frames as f64 * ratio + self.carry;
        let in_frames = exact.round().max(0.0) as usize;
        self.carry = exact - in_frames as f64;

        transport.pull_block(&mut self.input, in_frames)?;
        if self.input.samples().len() != in_frames * ch {
            return Err(RenderFault::MalformedBlock {
                expected: in_frames * ch,
                actual: self.input.samples().len(),
            });
        }

        out.set_frames(frames);
        if in_frames == 0 {
            for frame in out.samples_mut().chunks_exact_mut(ch) {
                frame.copy_from_slice(&self.prev_frame);
            }
            return Ok(());
        }

        // Virtual input: index 0 is the previous block's last frame, 1..=in_frames the new ones.
        let input = self.input.samples();
        let prev = &self.prev_frame;
        let sample_at = |index: usize, c: usize| -> f32 {
            if index == 0 {
                prev[c]
            } else {
                input[(index - 1) * ch + c]
            }
        };

        let step = in_frames as f64 / frames as f64;
        let output = out.samples_mut();
        for j in 0..frames {
            let pos = (j + 1) as f64 * step;
            let i = (pos.floor() as usize).min(in_frames);
            let frac = (pos - i as f64) as f32;
            let next = (i + 1).min(in_frames);
            for c in 0..ch {
                let s0 = sample_at(i, c);
                let s1 = sample_at(next, c);
                output[j * ch + c] = s0 + (s1 - s0) * frac;
            }
        }

        let last = (in_frames - 1) * ch;
        self.prev_frame.copy_from_slice(&input[last..last + ch]);
        Ok(())
    }
}
