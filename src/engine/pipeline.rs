//! Processing Pipeline
//!
//! The fixed, statically ordered sequence of stages run once per block:
//!
//! ```text
//! tape (pre) -> synth -> drums -> effect -> tape (post) -> mixer -> metronome
//! ```
//!
//! Each stage reads buffers written by the ones before it, so the order is a
//! hard contract and nothing runs in parallel. Stages are resolved when the
//! pipeline is built and cannot be swapped afterwards. The pipeline does no
//! error handling of its own.

use crate::dsp::{SharedAudioContext, Stage, TapeStage};

/// The stage objects a pipeline is built from.
pub struct PipelineStages {
    pub tape: Box<dyn TapeStage>,
    pub synth: Box<dyn Stage>,
    pub drums: Box<dyn Stage>,
    pub effect: Box<dyn Stage>,
    pub mixer: Box<dyn Stage>,
    pub metronome: Box<dyn Stage>,
}

/// Runs the stages in their fixed order.
pub struct ProcessingPipeline {
    tape: Box<dyn TapeStage>,
    synth: Box<dyn Stage>,
    drums: Box<dyn Stage>,
    effect: Box<dyn Stage>,
    mixer: Box<dyn Stage>,
    metronome: Box<dyn Stage>,
}

impl ProcessingPipeline {
    pub fn new(stages: PipelineStages) -> Self {
        let PipelineStages {
            tape,
            synth,
            drums,
            effect,
            mixer,
            metronome,
        } = stages;
        Self {
            tape,
            synth,
            drums,
            effect,
            mixer,
            metronome,
        }
    }

    /// Stage names in execution order; the tape deck appears twice.
    pub fn stage_order(&self) -> [&'static str; 7] {
        [
            self.tape.name(),
            self.synth.name(),
            self.drums.name(),
            self.effect.name(),
            self.tape.name(),
            self.mixer.name(),
            self.metronome.name(),
        ]
    }

    /// Prepares every stage. Control context only; stages may allocate here.
    pub fn prepare(&mut self, sample_rate: u32, max_block_size: usize) {
        self.tape.prepare(sample_rate, max_block_size);
        self.synth.prepare(sample_rate, max_block_size);
        self.drums.prepare(sample_rate, max_block_size);
        self.effect.prepare(sample_rate, max_block_size);
        self.mixer.prepare(sample_rate, max_block_size);
        self.metronome.prepare(sample_rate, max_block_size);
    }

    /// Forwards a sample-rate change to every stage.
    ///
    /// REAL-TIME SAFE: stages must not allocate here.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.tape.set_sample_rate(sample_rate);
        self.synth.set_sample_rate(sample_rate);
        self.drums.set_sample_rate(sample_rate);
        self.effect.set_sample_rate(sample_rate);
        self.mixer.set_sample_rate(sample_rate);
        self.metronome.set_sample_rate(sample_rate);
    }

    /// Runs one block end-to-end.
    pub fn run(&mut self, ctx: &mut SharedAudioContext, nframes: usize) {
        self.tape.pre_process(ctx, nframes);
        self.synth.process(ctx, nframes);
        self.drums.process(ctx, nframes);
        self.effect.process(ctx, nframes);
        self.tape.post_process(ctx, nframes);
        self.mixer.process(ctx, nframes);
        self.metronome.process(ctx, nframes);
    }
}
