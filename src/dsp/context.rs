//! Per-block state shared by the engine and the pipeline stages.
//!
//! The engine owns exactly one [`SharedAudioContext`]. Only the real-time
//! callback touches it: it is reset at the top of every block, filled with
//! the input samples and decoded MIDI, handed through every stage in order,
//! and finally copied out to the output ports.

use super::signal::SignalBuffer;
use crate::engine::midi::MidiEventQueue;

/// The block buffers stages read from and write to.
#[derive(Debug)]
pub struct AudioBuffers {
    /// Mono audio input captured this block.
    pub input: SignalBuffer,
    /// Mono instrument bus: synth and drums sum here, the effect runs in place.
    pub proc: SignalBuffer,
    /// Loop playback written by the tape deck's pre-pass.
    pub tape: SignalBuffer,
    /// Final left output.
    pub out_l: SignalBuffer,
    /// Final right output.
    pub out_r: SignalBuffer,
}

impl AudioBuffers {
    fn new(capacity: usize) -> Self {
        Self {
            input: SignalBuffer::new(capacity),
            proc: SignalBuffer::new(capacity),
            tape: SignalBuffer::new(capacity),
            out_l: SignalBuffer::new(capacity),
            out_r: SignalBuffer::new(capacity),
        }
    }

    fn clear(&mut self, nframes: usize) {
        self.input.clear(nframes);
        self.proc.clear(nframes);
        self.tape.clear(nframes);
        self.out_l.clear(nframes);
        self.out_r.clear(nframes);
    }
}

/// Process-lifetime buffers plus the current block's MIDI events.
#[derive(Debug)]
pub struct SharedAudioContext {
    /// Sample buffers, all `capacity` samples long.
    pub buffers: AudioBuffers,
    /// Decoded events of the current block, in arrival order.
    pub events: MidiEventQueue,
    capacity: usize,
    sample_rate: u32,
    nframes: usize,
    /// Frames processed before the current block.
    frame_position: u64,
}

impl SharedAudioContext {
    /// Allocates every buffer at `capacity` frames and the event queue at
    /// `midi_capacity` events. Nothing is allocated afterwards.
    pub fn new(capacity: usize, midi_capacity: usize, sample_rate: u32) -> Self {
        Self {
            buffers: AudioBuffers::new(capacity),
            events: MidiEventQueue::with_capacity(midi_capacity),
            capacity,
            sample_rate,
            nframes: 0,
            frame_position: 0,
        }
    }

    /// Starts a block of `nframes` frames: zeroes the active range of every
    /// buffer. The event queue is cleared separately by the decoder.
    pub fn begin_block(&mut self, nframes: usize) {
        self.nframes = nframes.min(self.capacity);
        self.buffers.clear(self.nframes);
    }

    /// Finishes the current block and advances the running frame position.
    pub fn end_block(&mut self) {
        self.frame_position += self.nframes as u64;
    }

    /// Maximum frames per block.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames in the current block.
    pub fn nframes(&self) -> usize {
        self.nframes
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    /// Absolute frame index of the first frame of the current block.
    pub fn frame_position(&self) -> u64 {
        self.frame_position
    }
}
