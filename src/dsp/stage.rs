//! Stage capability traits.
//!
//! A stage is one unit of the fixed processing pipeline. It owns its own
//! algorithm state and works on the [`SharedAudioContext`] it is handed for
//! each block; it knows nothing about the engine or the audio server.

use std::ops::Range;

use super::context::SharedAudioContext;
use crate::engine::midi::MidiEvent;

/// The core trait every pipeline stage implements.
///
/// # Thread Safety
///
/// Stages are moved into the audio callback, so they must be `Send`.
/// `process` and `set_sample_rate` run on the real-time thread and must not
/// allocate, lock or block.
pub trait Stage: Send {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Called once on the control thread before the stage is moved into the
    /// audio callback. May allocate.
    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {}

    /// Called on the real-time thread when the server reports a new rate.
    fn set_sample_rate(&mut self, _sample_rate: u32) {}

    /// Processes `nframes` frames of the current block.
    fn process(&mut self, ctx: &mut SharedAudioContext, nframes: usize);
}

/// A stage that runs twice per block: once before the instruments and once
/// after the effect (the looper).
pub trait TapeStage: Send {
    fn name(&self) -> &'static str;

    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {}

    fn set_sample_rate(&mut self, _sample_rate: u32) {}

    /// Runs before the synth.
    fn pre_process(&mut self, ctx: &mut SharedAudioContext, nframes: usize);

    /// Runs after the effect, before the mixer.
    fn post_process(&mut self, ctx: &mut SharedAudioContext, nframes: usize);
}

/// One step of a sample-accurate walk through a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment<'a> {
    /// Render these frames with the current state.
    Render(Range<usize>),
    /// Apply this event before rendering further.
    Event(&'a MidiEvent),
}

/// Splits a block into render ranges and events.
///
/// Events are visited in arrival order. An event whose offset lies before
/// the frames already rendered (server offsets are not guaranteed to be
/// sorted) is applied immediately; offsets past the block end are applied
/// after the last frame.
pub struct BlockSegments<'a> {
    events: std::slice::Iter<'a, MidiEvent>,
    pending: Option<&'a MidiEvent>,
    cursor: usize,
    nframes: usize,
}

impl<'a> BlockSegments<'a> {
    pub fn new(events: &'a [MidiEvent], nframes: usize) -> Self {
        Self {
            events: events.iter(),
            pending: None,
            cursor: 0,
            nframes,
        }
    }
}

impl<'a> Iterator for BlockSegments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.pending.take() {
            return Some(Segment::Event(event));
        }

        match self.events.next() {
            Some(event) => {
                let at = (event.offset() as usize).min(self.nframes);
                if at > self.cursor {
                    let range = self.cursor..at;
                    self.cursor = at;
                    self.pending = Some(event);
                    Some(Segment::Render(range))
                } else {
                    Some(Segment::Event(event))
                }
            }
            None if self.cursor < self.nframes => {
                let range = self.cursor..self.nframes;
                self.cursor = self.nframes;
                Some(Segment::Render(range))
            }
            None => None,
        }
    }
}
