//! Super-saw synthesizer stage.
//!
//! Monophonic: a stack of detuned band-limited saws shaped by one ADSR
//! envelope. Last-note priority; releasing the sounding note falls back to
//! the most recent key still held.

use crate::config::SynthConfig;
use crate::dsp::signal::{midi_to_unit, note_to_frequency};
use crate::dsp::{BlockSegments, Segment, SharedAudioContext, Stage};
use crate::engine::midi::MidiEvent;

use super::envelope::AdsrEnvelope;

/// Number of distinct MIDI keys; bounds the held-note stack.
const KEY_COUNT: usize = 128;

/// PolyBLEP residual that smooths the saw's discontinuity.
#[inline]
fn poly_blep(phase: f32, increment: f32) -> f32 {
    if phase < increment {
        let t = phase / increment;
        t + t - t * t - 1.0
    } else if phase > 1.0 - increment {
        let t = (phase - 1.0) / increment;
        t * t + t + t + 1.0
    } else {
        0.0
    }
}

/// Monophonic detuned super-saw.
pub struct SuperSaw {
    sample_rate: f32,
    drum_channel: u8,
    level: f32,
    detune_cents: f32,
    /// Per-voice phase in [0, 1).
    phases: Vec<f32>,
    /// Per-voice frequency ratio relative to the played note.
    ratios: Vec<f32>,
    envelope: AdsrEnvelope,
    /// Keys currently held, oldest first.
    held: Vec<u8>,
    note: Option<u8>,
    frequency: f32,
    velocity: f32,
}

impl SuperSaw {
    pub fn new(config: &SynthConfig, drum_channel: u8, sample_rate: u32) -> Self {
        let voices = config.voices.max(1);
        let mut synth = Self {
            sample_rate: sample_rate as f32,
            drum_channel,
            level: config.level,
            detune_cents: config.detune,
            // Spread the start phases so the voices don't sum into one spike
            phases: (0..voices).map(|v| v as f32 / voices as f32).collect(),
            ratios: vec![1.0; voices],
            envelope: AdsrEnvelope::new(
                config.attack,
                config.decay,
                config.sustain,
                config.release,
                sample_rate,
            ),
            held: Vec::with_capacity(KEY_COUNT),
            note: None,
            frequency: 0.0,
            velocity: 0.0,
        };
        synth.update_ratios();
        synth
    }

    /// Voices spread evenly over +/- the detune amount.
    fn update_ratios(&mut self) {
        let voices = self.ratios.len();
        for (v, ratio) in self.ratios.iter_mut().enumerate() {
            let cents = if voices == 1 {
                0.0
            } else {
                -self.detune_cents + 2.0 * self.detune_cents * v as f32 / (voices - 1) as f32
            };
            *ratio = 2.0_f32.powf(cents / 1200.0);
        }
    }

    /// The key currently sounding, if any.
    pub fn note(&self) -> Option<u8> {
        self.note
    }

    fn note_on(&mut self, key: u8, velocity: u8) {
        self.held.retain(|&k| k != key);
        self.held.push(key);
        self.note = Some(key);
        self.frequency = note_to_frequency(key);
        self.velocity = midi_to_unit(velocity);
        self.envelope.gate_on();
    }

    fn note_off(&mut self, key: u8) {
        self.held.retain(|&k| k != key);
        if self.note != Some(key) {
            return;
        }
        match self.held.last() {
            Some(&previous) => {
                self.note = Some(previous);
                self.frequency = note_to_frequency(previous);
            }
            None => {
                self.note = None;
                self.envelope.gate_off();
            }
        }
    }

    fn apply(&mut self, event: &MidiEvent) {
        if event.channel() == self.drum_channel {
            return;
        }
        match *event {
            MidiEvent::NoteOn { key, velocity, .. } if velocity > 0 => self.note_on(key, velocity),
            MidiEvent::NoteOn { key, .. } | MidiEvent::NoteOff { key, .. } => self.note_off(key),
            MidiEvent::ControlChange { .. } => {}
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        let gain = self.level * self.velocity / self.phases.len() as f32;
        for sample in out {
            let env = self.envelope.next();
            if self.envelope.is_idle() {
                continue;
            }
            let mut sum = 0.0;
            for (phase, ratio) in self.phases.iter_mut().zip(&self.ratios) {
                let increment = (self.frequency * ratio / self.sample_rate).min(0.5);
                sum += 2.0 * *phase - 1.0 - poly_blep(*phase, increment);
                *phase += increment;
                if *phase >= 1.0 {
                    *phase -= 1.0;
                }
            }
            *sample += sum * gain * env;
        }
    }
}

impl Stage for SuperSaw {
    fn name(&self) -> &'static str {
        "synth"
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.set_sample_rate(sample_rate);
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate as f32;
        self.envelope.set_sample_rate(sample_rate);
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
