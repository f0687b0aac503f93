//! Metronome click overlay.
//!
//! Runs last, adding a short decaying sine burst to both outputs on every
//! beat. Beat positions come from the context's running frame counter, so
//! the click stays on the grid across blocks of any size.

use std::f32::consts::TAU;

use crate::config::MetronomeConfig;
use crate::dsp::{SharedAudioContext, Stage};
use crate::engine::midi::MidiEvent;

const CLICK_SECONDS: f32 = 0.03;
const BEAT_HZ: f32 = 1000.0;
const ACCENT_HZ: f32 = 1600.0;

pub struct Metronome {
    enabled: bool,
    level: f32,
    beats_per_bar: u32,
    toggle_cc: u8,
    /// Whether the toggle controller is currently held at or above 64.
    toggle_held: bool,
    tempo_bpm: f32,
    sample_rate: u32,
    /// Frames of the current click still to play.
    click_remaining: usize,
    click_len: usize,
    click_hz: f32,
    phase: f32,
}

impl Metronome {
    pub fn new(config: &MetronomeConfig, tempo_bpm: f32, sample_rate: u32) -> Self {
        let mut metronome = Self {
            enabled: config.enabled,
            level: config.level,
            beats_per_bar: config.beats_per_bar.max(1),
            toggle_cc: config.toggle_cc,
            toggle_held: false,
            tempo_bpm,
            sample_rate,
            click_remaining: 0,
            click_len: 0,
            click_hz: BEAT_HZ,
            phase: 0.0,
        };
        metronome.set_sample_rate(sample_rate);
        metronome
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn samples_per_beat(&self) -> f64 {
        self.sample_rate as f64 * 60.0 / self.tempo_bpm as f64
    }

    /// Beat index whose (rounded) start frame is exactly `frame`, if any.
    fn beat_at(&self, frame: u64) -> Option<u64> {
        let per_beat = self.samples_per_beat();
        let beat = (frame as f64 / per_beat).round();
        if (beat * per_beat).round() as u64 == frame {
            Some(beat as u64)
        } else {
            None
        }
    }
}

impl Stage for Metronome {
    fn name(&self) -> &'static str {
        "metronome"
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.click_len = (CLICK_SECONDS * sample_rate as f32) as usize;
    }

    fn process(&mut self, ctx: &mut SharedAudioContext, nframes: usize) {
        for event in &ctx.events {
            if let MidiEvent::ControlChange {
                controller, value, ..
            } = *event
            {
                if controller == self.toggle_cc {
                    let pressed = value >= 64;
                    if pressed && !self.toggle_held {
                        self.enabled = !self.enabled;
                    }
                    self.toggle_held = pressed;
                }
            }
        }
        if !self.enabled {
            self.click_remaining = 0;
            return;
        }

        let start = ctx.frame_position();
        let buffers = &mut ctx.buffers;
        for i in 0..nframes {
            if let Some(beat) = self.beat_at(start + i as u64) {
                let accent = beat % self.beats_per_bar as u64 == 0;
                self.click_hz = if accent { ACCENT_HZ } else { BEAT_HZ };
                self.click_remaining = self.click_len;
                self.phase = 0.0;
            }
            if self.click_remaining == 0 {
                continue;
            }
            let env = self.click_remaining as f32 / self.click_len as f32;
            let click = (self.phase * TAU).sin() * env * self.level;
            self.phase = (self.phase + self.click_hz / self.sample_rate as f32).fract();
            self.click_remaining -= 1;
            buffers.out_l.samples[i] += click;
            buffers.out_r.samples[i] += click;
        }
    }
}
