//! Feedback delay effect, processed in place on the instrument bus.

use crate::config::EffectConfig;
use crate::dsp::signal::MAX_SAMPLE_RATE;
use crate::dsp::{SharedAudioContext, Stage};

/// Maximum delay time in seconds.
const MAX_DELAY_SECONDS: f32 = 2.0;

/// Mono delay line with feedback and a wet/dry mix.
pub struct FeedbackDelay {
    delay_ms: f32,
    feedback: f32,
    mix: f32,
    delay_samples: f32,
    buffer: Vec<f32>,
    write_pos: usize,
}

impl FeedbackDelay {
    pub fn new(config: &EffectConfig) -> Self {
        Self {
            delay_ms: config.delay_ms.clamp(0.0, MAX_DELAY_SECONDS * 1000.0),
            feedback: config.feedback.clamp(0.0, 0.95),
            mix: config.mix.clamp(0.0, 1.0),
            delay_samples: 1.0,
            buffer: Vec::new(),
            write_pos: 0,
        }
    }

    /// Reads from the delay buffer with linear interpolation.
    #[inline]
    fn read_interpolated(buffer: &[f32], write_pos: usize, delay_samples: f32) -> f32 {
        let len = buffer.len();
        let int_delay = delay_samples as usize;
        let frac = delay_samples - int_delay as f32;

        let read_pos_1 = (write_pos + len - int_delay) % len;
        let read_pos_2 = (read_pos_1 + len - 1) % len;

        let sample_1 = buffer[read_pos_1];
        let sample_2 = buffer[read_pos_2];
        sample_1 + frac * (sample_2 - sample_1)
    }
}

impl Stage for FeedbackDelay {
    fn name(&self) -> &'static str {
        "effect"
    }

    /// Sized for the longest delay at the highest supported rate so a later
    /// rate change never reallocates.
    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        let max_samples = (MAX_DELAY_SECONDS * sample_rate.max(MAX_SAMPLE_RATE) as f32) as usize;
        if self.buffer.len() != max_samples {
            self.buffer = vec![0.0; max_samples];
            self.write_pos = 0;
        }
        self.set_sample_rate(sample_rate);
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        let max = self.buffer.len().saturating_sub(2).max(1) as f32;
        self.delay_samples = (self.delay_ms * 0.001 * sample_rate as f32).clamp(1.0, max);
    }

    fn process(&mut self, ctx: &mut SharedAudioContext, nframes: usize) {
        if self.buffer.len() < 2 {
            return;
        }
        let len = self.buffer.len();
        for sample in ctx.buffers.proc.frames_mut(nframes) {
            let dry = *sample;
            let wet = Self::read_interpolated(&self.buffer, self.write_pos, self.delay_samples);
            self.buffer[self.write_pos] = dry + wet * self.feedback;
            self.write_pos = (self.write_pos + 1) % len;
            *sample = dry * (1.0 - self.mix) + wet * self.mix;
        }
    }
}
