//! DSP module
//!
//! Block buffers, the shared per-block context, and the stage traits the
//! processing pipeline is built from.

pub mod context;
pub mod signal;
pub mod smoothed_value;
pub mod stage;

pub use context::{AudioBuffers, SharedAudioContext};
pub use signal::SignalBuffer;
pub use smoothed_value::SmoothedValue;
pub use stage::{BlockSegments, Segment, Stage, TapeStage};
