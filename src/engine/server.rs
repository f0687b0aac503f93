//! Audio server boundary
//!
//! The engine talks to the low-latency audio server only through the
//! [`AudioServer`] trait: a client connection that owns ports, can wire them
//! to other ports by name, and dispatches the per-block process callback.
//! Callbacks are registered as boxed closures; the engine captures whatever
//! state it needs in them.

use super::midi::MidiPacket;

/// Whether a port carries audio samples or MIDI events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortKind {
    Audio,
    Midi,
}

impl PortKind {
    pub fn name(&self) -> &'static str {
        match self {
            PortKind::Audio => "audio",
            PortKind::Midi => "midi",
        }
    }
}

/// Data direction from the port's own point of view.
///
/// A physical capture port (a microphone, a MIDI keyboard) *outputs* data
/// into the graph; a physical playback port *takes* data as input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    pub fn name(&self) -> &'static str {
        match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        }
    }
}

/// A logical port owned by the engine's client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortSpec {
    /// Short name, unique within the client.
    pub name: &'static str,
    pub direction: PortDirection,
    pub kind: PortKind,
}

impl PortSpec {
    pub const fn new(name: &'static str, direction: PortDirection, kind: PortKind) -> Self {
        Self {
            name,
            direction,
            kind,
        }
    }
}

/// Handle to a port registered on the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortId(pub usize);

/// Capability filter used when querying the server's ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortFilter {
    pub kind: PortKind,
    pub direction: PortDirection,
    /// Only hardware-facing ports.
    pub physical: bool,
}

impl PortFilter {
    /// Physical ports that deliver data into the graph (capture side).
    pub fn physical_sources(kind: PortKind) -> Self {
        Self {
            kind,
            direction: PortDirection::Output,
            physical: true,
        }
    }

    /// Physical ports that take data out of the graph (playback side).
    pub fn physical_sinks(kind: PortKind) -> Self {
        Self {
            kind,
            direction: PortDirection::Input,
            physical: true,
        }
    }
}

/// Severity of a diagnostic line emitted by the server itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerLogLevel {
    Info,
    Error,
}

/// Errors reported by an audio server backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    #[error("audio server unavailable: {0}")]
    Unavailable(String),

    #[error("client activation failed: {0}")]
    ActivationFailed(String),

    #[error("failed to register port '{name}': {reason}")]
    PortRegistration { name: String, reason: String },

    #[error("failed to connect '{source_port}' -> '{destination}': {reason}")]
    ConnectionFailed {
        source_port: String,
        destination: String,
        reason: String,
    },

    #[error("unknown port: {0}")]
    UnknownPort(String),

    #[error("client is closed")]
    Closed,
}

/// What the process callback sees of one block.
///
/// Slices returned for a block are at least `nframes()` long.
pub trait ProcessScope {
    /// Frames in this block.
    fn nframes(&self) -> usize;

    /// Samples arriving at an audio input port.
    fn audio_in(&self, port: PortId) -> &[f32];

    /// Writable buffer of an audio output port.
    fn audio_out(&mut self, port: PortId) -> &mut [f32];

    /// Raw MIDI of a MIDI input port; the slice length is the event count.
    fn midi_in(&self, port: PortId) -> &[MidiPacket];
}

/// Runs once per block on the server's real-time thread.
pub type ProcessCallback = Box<dyn FnMut(&mut dyn ProcessScope) + Send>;

/// Sample-rate or buffer-size change notification.
pub type NotifyCallback = Box<dyn Fn(u32) + Send + Sync>;

/// Fired when the server shuts the client down.
pub type ShutdownCallback = Box<dyn Fn() + Send + Sync>;

/// Receives the server's own diagnostics.
pub type LogSink = Box<dyn Fn(ServerLogLevel, &str) + Send + Sync>;

/// A client connection to the audio server.
///
/// The engine drives it strictly from the control context; only the process
/// callback runs on the real-time thread.
pub trait AudioServer {
    /// Identity the client was opened under.
    fn client_name(&self) -> &str;

    /// Negotiated sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Negotiated maximum frames per block.
    fn buffer_size(&self) -> u32;

    fn set_process_callback(&mut self, callback: ProcessCallback) -> Result<(), ServerError>;

    fn set_sample_rate_callback(&mut self, callback: NotifyCallback) -> Result<(), ServerError>;

    fn set_buffer_size_callback(&mut self, callback: NotifyCallback) -> Result<(), ServerError>;

    fn on_shutdown(&mut self, callback: ShutdownCallback);

    fn set_log_sink(&mut self, sink: LogSink);

    /// Starts callback dispatch.
    fn activate(&mut self) -> Result<(), ServerError>;

    fn register_port(&mut self, spec: &PortSpec) -> Result<PortId, ServerError>;

    /// Fully qualified `client:port` name of a registered port.
    fn port_name(&self, port: PortId) -> Option<String>;

    /// Names of all ports matching `filter`, in server order.
    fn find_ports(&self, filter: PortFilter) -> Vec<String>;

    /// Requests one directed connection from an output port to an input port.
    fn connect(&mut self, source: &str, destination: &str) -> Result<(), ServerError>;

    /// Closes the connection. Once this returns no further callback is
    /// dispatched; a callback already running is allowed to finish first.
    fn close(&mut self) -> Result<(), ServerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_filters() {
        let capture = PortFilter::physical_sources(PortKind::Audio);
        assert_eq!(capture.direction, PortDirection::Output);
        assert!(capture.physical);

        let playback = PortFilter::physical_sinks(PortKind::Midi);
        assert_eq!(playback.direction, PortDirection::Input);
        assert_eq!(playback.kind, PortKind::Midi);
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::ConnectionFailed {
            source_port: "a:out".to_string(),
            destination: "b:in".to_string(),
            reason: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "failed to connect 'a:out' -> 'b:in': busy");
        assert!(ServerError::Unavailable("no host".into())
            .to_string()
            .contains("no host"));
    }
}
