//! Tape deck (looper).
//!
//! Runs twice per block. The pre-pass plays the loop into the `tape` bus so
//! the mixer can hear it; the post-pass, after the effect, records the live
//! input plus the processed instrument bus into the loop.
//!
//! Transport is driven by two MIDI controllers: `record_cc` steps
//! Stopped -> Recording -> Playing -> Overdubbing -> Playing -> ... and
//! `clear_cc` stops and erases the loop.

use crate::config::TapeConfig;
use crate::dsp::signal::MAX_SAMPLE_RATE;
use crate::dsp::{SharedAudioContext, TapeStage};
use crate::engine::midi::MidiEvent;

/// Controller values at or above this count as "pressed". Only the
/// transition from released to pressed triggers an action.
const CC_ON_THRESHOLD: u8 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Recording,
    Playing,
    Overdubbing,
}

impl TransportState {
    /// Next state on a record press.
    fn advance(self) -> Self {
        match self {
            TransportState::Stopped => TransportState::Recording,
            TransportState::Recording => TransportState::Playing,
            TransportState::Playing => TransportState::Overdubbing,
            TransportState::Overdubbing => TransportState::Playing,
        }
    }

    fn is_playing(self) -> bool {
        matches!(self, TransportState::Playing | TransportState::Overdubbing)
    }
}

pub struct TapeDeck {
    loop_seconds: f32,
    record_cc: u8,
    clear_cc: u8,
    /// Last pressed state of the record and clear controllers.
    record_held: bool,
    clear_held: bool,
    state: TransportState,
    tape: Vec<f32>,
    /// Active loop length in samples at the current rate.
    loop_len: usize,
    head: usize,
}

impl TapeDeck {
    pub fn new(config: &TapeConfig) -> Self {
        Self {
            loop_seconds: config.loop_seconds,
            record_cc: config.record_cc,
            clear_cc: config.clear_cc,
            record_held: false,
            clear_held: false,
            state: TransportState::Stopped,
            tape: Vec::new(),
            loop_len: 0,
            head: 0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    fn apply(&mut self, event: &MidiEvent) {
        let MidiEvent::ControlChange {
            controller, value, ..
        } = *event
        else {
            return;
        };
        let pressed = value >= CC_ON_THRESHOLD;
        if controller == self.record_cc {
            let edge = pressed && !self.record_held;
            self.record_held = pressed;
            if edge {
                self.state = self.state.advance();
                if self.state == TransportState::Recording {
                    self.head = 0;
                }
            }
        } else if controller == self.clear_cc {
            let edge = pressed && !self.clear_held;
            self.clear_held = pressed;
            if edge {
                self.state = TransportState::Stopped;
                self.tape.fill(0.0);
                self.head = 0;
            }
        }
    }
}

impl TapeStage for TapeDeck {
    fn name(&self) -> &'static str {
        "tape"
    }

    /// Allocates the loop for the highest supported rate so a later rate
    /// change only shortens or lengthens the active region.
    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        let max_samples = (self.loop_seconds * sample_rate.max(MAX_SAMPLE_RATE) as f32) as usize;
        if self.tape.len() != max_samples {
            self.tape = vec![0.0; max_samples];
        }
        self.set_sample_rate(sample_rate);
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.loop_len = ((self.loop_seconds * sample_rate as f32) as usize).min(self.tape.len());
        if self.loop_len > 0 {
            self.head %= self.loop_len;
        } else {
            self.head = 0;
        }
    }

    fn pre_process(&mut self, ctx: &mut SharedAudioContext, nframes: usize) {
        for event in &ctx.events {
            self.apply(event);
        }
        if self.loop_len == 0 || !self.state.is_playing() {
            return;
        }
        let mut pos = self.head;
        for sample in ctx.buffers.tape.frames_mut(nframes) {
            *sample = self.tape[pos];
            pos = (pos + 1) % self.loop_len;
        }
    }

    fn post_process(&mut self, ctx: &mut SharedAudioContext, nframes: usize) {
        if self.loop_len == 0 || self.state == TransportState::Stopped {
            return;
        }
        let input = ctx.buffers.input.frames(nframes);
        let proc = ctx.buffers.proc.frames(nframes);
        for (dry, wet) in input.iter().zip(proc) {
            let live = dry + wet;
            match self.state {
                TransportState::Recording => self.tape[self.head] = live,
                TransportState::Overdubbing => self.tape[self.head] += live,
                _ => {}
            }
            self.head = (self.head + 1) % self.loop_len;
        }
    }
}
