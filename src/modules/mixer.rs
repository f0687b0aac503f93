//! Stereo output mixer.
//!
//! `out = soft_clip((proc + tape) * master * pan + input * monitor)`, with an
//! equal-power pan law on the instrument side and the live input centred.
//! Master gain follows CC 7 (channel volume) on any channel, smoothed.

use std::f32::consts::FRAC_PI_4;

use crate::config::MixerConfig;
use crate::dsp::signal::midi_to_unit;
use crate::dsp::{BlockSegments, Segment, SharedAudioContext, SmoothedValue, Stage};
use crate::engine::midi::MidiEvent;

/// MIDI channel volume controller.
pub const CHANNEL_VOLUME_CC: u8 = 7;

/// Cubic soft clipper: linear near zero, saturating smoothly at +/-1.
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    let x = x.clamp(-1.5, 1.5);
    x - (4.0 / 27.0) * x * x * x
}

/// Equal-power gains for a pan position in -1..=1.
fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

pub struct Mixer {
    master: SmoothedValue,
    pan_left: f32,
    pan_right: f32,
    input_monitor: f32,
}

impl Mixer {
    pub fn new(config: &MixerConfig, sample_rate: u32) -> Self {
        let (pan_left, pan_right) = pan_gains(config.pan);
        Self {
            master: SmoothedValue::with_default_smoothing(config.master, sample_rate),
            pan_left,
            pan_right,
            input_monitor: config.input_monitor,
        }
    }

    pub fn master_target(&self) -> f32 {
        self.master.target()
    }

    fn apply(&mut self, event: &MidiEvent) {
        if let MidiEvent::ControlChange {
            controller: CHANNEL_VOLUME_CC,
            value,
            ..
        } = *event
        {
            self.master.set_target(midi_to_unit(value));
        }
    }
}

impl Stage for Mixer {
    fn name(&self) -> &'static str {
        "mixer"
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.master.set_sample_rate(sample_rate);
    }

    fn process(&mut self, ctx: &mut SharedAudioContext, nframes: usize) {
        let events = ctx.events.as_slice();
        let buffers = &mut ctx.buffers;
        for segment in BlockSegments::new(events, nframes) {
            let range = match segment {
                Segment::Event(event) => {
                    self.apply(event);
                    continue;
                }
                Segment::Render(range) => range,
            };
            for i in range {
                let master = self.master.next();
                let bus = (buffers.proc.samples[i] + buffers.tape.samples[i]) * master;
                let live = buffers.input.samples[i] * self.input_monitor;
                buffers.out_l.samples[i] = soft_clip(bus * self.pan_left + live);
                buffers.out_r.samples[i] = soft_clip(bus * self.pan_right + live);
            }
        }
    }
}
