//! Engine module
//!
//! Audio server binding and processing orchestration.
//! Handles the server boundary, port wiring, MIDI decoding, the stage
//! pipeline and real-time notifications.

pub mod audio_engine;
pub mod channels;
pub mod cpal_server;
pub mod midi;
pub mod pipeline;
pub mod port_graph;
pub mod server;

#[cfg(test)]
pub(crate) mod test_server;

pub use audio_engine::{BlockProcessor, Engine, EngineError, EngineState};
pub use channels::{notification_channel, EngineEvent, EventReceiver, EventSender};
pub use cpal_server::CpalServer;
pub use midi::{decode_block, MidiEvent, MidiEventQueue, MidiPacket};
pub use pipeline::{PipelineStages, ProcessingPipeline};
pub use port_graph::{LogicalPorts, PortGraph};
pub use server::{
    AudioServer, PortDirection, PortFilter, PortId, PortKind, PortSpec, ProcessScope, ServerError,
    ServerLogLevel,
};
