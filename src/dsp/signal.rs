//! Sample buffers shared between the engine and the pipeline stages.

/// A buffer of mono samples.
///
/// The buffer is allocated once at its full capacity and never grows in the
/// audio thread. Blocks only ever use the first `nframes` samples.
#[derive(Clone, Debug)]
pub struct SignalBuffer {
    /// The sample data. Length is the engine's maximum block size.
    pub samples: Vec<f32>,
}

impl SignalBuffer {
    /// Creates a zeroed buffer holding `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
        }
    }

    /// Zeroes the first `nframes` samples.
    pub fn clear(&mut self, nframes: usize) {
        let end = nframes.min(self.samples.len());
        self.samples[..end].fill(0.0);
    }

    /// Returns the first `nframes` samples.
    pub fn frames(&self, nframes: usize) -> &[f32] {
        &self.samples[..nframes.min(self.samples.len())]
    }

    /// Returns the first `nframes` samples mutably.
    pub fn frames_mut(&mut self, nframes: usize) -> &mut [f32] {
        let end = nframes.min(self.samples.len());
        &mut self.samples[..end]
    }

    /// Copies `source` into the start of the buffer, truncating to capacity.
    pub fn copy_from(&mut self, source: &[f32]) {
        for (dst, src) in self.samples.iter_mut().zip(source) {
            *dst = *src;
        }
    }

    /// Returns the capacity in samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Highest sample rate stages size their long buffers for.
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Converts a MIDI note number to frequency in Hz (A4 = 440 Hz).
pub fn note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// Converts a 7-bit MIDI value (velocity, CC) to 0.0-1.0.
pub fn midi_to_unit(value: u8) -> f32 {
    value as f32 / 127.0
}
