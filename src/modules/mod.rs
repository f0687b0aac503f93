//! Modules module
//!
//! The built-in pipeline stages: tape deck, synthesizer, drums, delay,
//! mixer and metronome.

pub mod drums;
pub mod effect;
pub mod envelope;
pub mod metronome;
pub mod mixer;
pub mod synth;
pub mod tapedeck;

pub use drums::DrumMachine;
pub use effect::FeedbackDelay;
pub use envelope::AdsrEnvelope;
pub use metronome::Metronome;
pub use mixer::Mixer;
pub use synth::SuperSaw;
pub use tapedeck::{TapeDeck, TransportState};

use crate::config::EngineConfig;
use crate::engine::pipeline::{PipelineStages, ProcessingPipeline};

/// Builds the standard pipeline from the configuration.
///
/// `sample_rate` is only a starting point; the engine prepares the stages
/// with the negotiated rate before the first block.
pub fn build_pipeline(config: &EngineConfig, sample_rate: u32) -> ProcessingPipeline {
    ProcessingPipeline::new(PipelineStages {
        tape: Box::new(TapeDeck::new(&config.tape)),
        synth: Box::new(SuperSaw::new(
            &config.synth,
            config.drums.channel,
            sample_rate,
        )),
        drums: Box::new(DrumMachine::new(&config.drums, sample_rate)),
        effect: Box::new(FeedbackDelay::new(&config.effect)),
        mixer: Box::new(Mixer::new(&config.mixer, sample_rate)),
        metronome: Box::new(Metronome::new(
            &config.metronome,
            config.tempo_bpm,
            sample_rate,
        )),
    })
}
