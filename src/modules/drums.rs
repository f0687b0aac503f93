//! Drum machine stage.
//!
//! Three synthesized voices triggered by note-ons on the drum channel:
//! kick (key 36), snare (38) and closed hat (42).

use std::f32::consts::TAU;

use crate::config::DrumsConfig;
use crate::dsp::signal::midi_to_unit;
use crate::dsp::{BlockSegments, Segment, SharedAudioContext, Stage};
use crate::engine::midi::MidiEvent;

pub const KICK: u8 = 36;
pub const SNARE: u8 = 38;
pub const CLOSED_HAT: u8 = 42;

const KICK_BASE_HZ: f32 = 45.0;
const KICK_SWEEP_HZ: f32 = 110.0;
const SNARE_TONE_HZ: f32 = 185.0;

/// Per-sample multiplier that decays to 1/e in `seconds`.
fn decay_coeff(seconds: f32, sample_rate: f32) -> f32 {
    (-1.0 / (seconds * sample_rate)).exp()
}

/// Simple xorshift PRNG for the noise sources.
#[derive(Clone, Copy, Debug)]
struct Noise {
    state: u32,
}

impl Noise {
    fn next(&mut self) -> f32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Kick {
    phase: f32,
    amp: f32,
    pitch_env: f32,
    amp_decay: f32,
    pitch_decay: f32,
}

impl Kick {
    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.amp_decay = decay_coeff(0.25, sample_rate);
        self.pitch_decay = decay_coeff(0.03, sample_rate);
    }

    fn trigger(&mut self, velocity: f32) {
        self.phase = 0.0;
        self.amp = velocity;
        self.pitch_env = 1.0;
    }

    #[inline]
    fn next(&mut self, sample_rate: f32) -> f32 {
        if self.amp < 1e-5 {
            return 0.0;
        }
        let out = (self.phase * TAU).sin() * self.amp;
        let freq = KICK_BASE_HZ + KICK_SWEEP_HZ * self.pitch_env;
        self.phase = (self.phase + freq / sample_rate).fract();
        self.amp *= self.amp_decay;
        self.pitch_env *= self.pitch_decay;
        out
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Snare {
    phase: f32,
    tone_amp: f32,
    noise_amp: f32,
    tone_decay: f32,
    noise_decay: f32,
}

impl Snare {
    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.tone_decay = decay_coeff(0.06, sample_rate);
        self.noise_decay = decay_coeff(0.12, sample_rate);
    }

    fn trigger(&mut self, velocity: f32) {
        self.phase = 0.0;
        self.tone_amp = velocity * 0.5;
        self.noise_amp = velocity * 0.6;
    }

    #[inline]
    fn next(&mut self, noise: &mut Noise, sample_rate: f32) -> f32 {
        if self.tone_amp < 1e-5 && self.noise_amp < 1e-5 {
            return 0.0;
        }
        let out = (self.phase * TAU).sin() * self.tone_amp + noise.next() * self.noise_amp;
        self.phase = (self.phase + SNARE_TONE_HZ / sample_rate).fract();
        self.tone_amp *= self.tone_decay;
        self.noise_amp *= self.noise_decay;
        out
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Hat {
    amp: f32,
    decay: f32,
    /// Previous noise sample, for the first-difference highpass.
    last: f32,
}

impl Hat {
    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.decay = decay_coeff(0.02, sample_rate);
    }

    fn trigger(&mut self, velocity: f32) {
        self.amp = velocity * 0.4;
    }

    #[inline]
    fn next(&mut self, noise: &mut Noise) -> f32 {
        if self.amp < 1e-5 {
            return 0.0;
        }
        let n = noise.next();
        let out = (n - self.last) * 0.5 * self.amp;
        self.last = n;
        self.amp *= self.decay;
        out
    }
}

/// The drum kit.
pub struct DrumMachine {
    channel: u8,
    level: f32,
    sample_rate: f32,
    kick: Kick,
    snare: Snare,
    hat: Hat,
    noise: Noise,
}

impl DrumMachine {
    pub fn new(config: &DrumsConfig, sample_rate: u32) -> Self {
        let mut drums = Self {
            channel: config.channel,
            level: config.level,
            sample_rate: sample_rate as f32,
            kick: Kick::default(),
            snare: Snare::default(),
            hat: Hat::default(),
            noise: Noise { state: 0x1234_5678 },
        };
        drums.set_sample_rate(sample_rate);
        drums
    }

    fn apply(&mut self, event: &MidiEvent) {
        let MidiEvent::NoteOn {
            channel,
            key,
            velocity,
            ..
        } = *event
        else {
            return;
        };
        if channel != self.channel || velocity == 0 {
            return;
        }
        let velocity = midi_to_unit(velocity);
        match key {
            KICK => self.kick.trigger(velocity),
            SNARE => self.snare.trigger(velocity),
            CLOSED_HAT => self.hat.trigger(velocity),
            _ => {}
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        for sample in out {
            let mix = self.kick.next(self.sample_rate)
                + self.snare.next(&mut self.noise, self.sample_rate)
                + self.hat.next(&mut self.noise);
            *sample += mix * self.level;
        }
    }
}

impl Stage for DrumMachine {
    fn name(&self) -> &'static str {
        "drums"
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.set_sample_rate(sample_rate);
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate as f32;
        self.kick.set_sample_rate(self.sample_rate);
        self.snare.set_sample_rate(self.sample_rate);
        self.hat.set_sample_rate(self.sample_rate);
    }

    fn process(&mut self, ctx: &mut SharedAudioContext, nframes: usize) {
        let events = ctx.events.as_slice();
        let proc = &mut ctx.buffers.proc.samples;
        for segment in BlockSegments::new(events, nframes) {
            match segment {
                Segment::Render(range) => self.render(&mut proc[range]),
                Segment::Event(event) => self.apply(event),
            }
        }
    }
}
