//! Port Graph
//!
//! Registers the engine's logical ports and wires them to the physical
//! (hardware-facing) ports the server reports.
//!
//! Audio wiring is required: a missing physical endpoint or a refused
//! connection is fatal. MIDI wiring is best effort and only logged.

use tracing::{debug, info, warn};

use super::audio_engine::EngineError;
use super::server::{AudioServer, PortDirection, PortFilter, PortId, PortKind, PortSpec};

/// Mono audio input.
pub const AUDIO_IN: PortSpec = PortSpec::new("input", PortDirection::Input, PortKind::Audio);
/// Left audio output.
pub const OUT_LEFT: PortSpec = PortSpec::new("out_left", PortDirection::Output, PortKind::Audio);
/// Right audio output.
pub const OUT_RIGHT: PortSpec = PortSpec::new("out_right", PortDirection::Output, PortKind::Audio);
/// MIDI input.
pub const MIDI_IN: PortSpec = PortSpec::new("midi_in", PortDirection::Input, PortKind::Midi);
/// MIDI output.
pub const MIDI_OUT: PortSpec = PortSpec::new("midi_out", PortDirection::Output, PortKind::Midi);

/// Handles of the engine's registered ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogicalPorts {
    pub input: PortId,
    pub out_left: PortId,
    pub out_right: PortId,
    pub midi_in: PortId,
    /// Missing if its registration failed; that is only a warning.
    pub midi_out: Option<PortId>,
}

/// Port setup against one server client.
pub struct PortGraph<'a, S: AudioServer> {
    server: &'a mut S,
}

impl<'a, S: AudioServer> PortGraph<'a, S> {
    pub fn new(server: &'a mut S) -> Self {
        Self { server }
    }

    /// Registers the ports and wires them. Nothing is connected unless every
    /// required port registered.
    pub fn setup(&mut self) -> Result<LogicalPorts, EngineError> {
        let ports = self.register_ports()?;
        self.auto_connect(&ports)?;
        Ok(ports)
    }

    /// Creates one audio-in, two audio-out, one MIDI-in and one MIDI-out port.
    pub fn register_ports(&mut self) -> Result<LogicalPorts, EngineError> {
        let input = self.register_required(&AUDIO_IN)?;
        let out_left = self.register_required(&OUT_LEFT)?;
        let out_right = self.register_required(&OUT_RIGHT)?;
        let midi_in = self.register_required(&MIDI_IN)?;
        let midi_out = match self.server.register_port(&MIDI_OUT) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Couldn't register {} port: {}", MIDI_OUT.name, e);
                None
            }
        };

        info!("Registered logical ports");
        Ok(LogicalPorts {
            input,
            out_left,
            out_right,
            midi_in,
            midi_out,
        })
    }

    fn register_required(&mut self, spec: &PortSpec) -> Result<PortId, EngineError> {
        self.server
            .register_port(spec)
            .map_err(|source| EngineError::PortRegistration {
                port: spec.name,
                source,
            })
    }

    /// Physical ports of `kind` flowing in `direction`, in server order.
    pub fn discover_physical(&self, kind: PortKind, direction: PortDirection) -> Vec<String> {
        let filter = PortFilter {
            kind,
            direction,
            physical: true,
        };
        let ports = self.server.find_ports(filter);
        debug!(
            "Found {} physical {} {} ports: {:?}",
            ports.len(),
            kind.name(),
            direction.name(),
            ports
        );
        ports
    }

    /// Wires the logical ports to the discovered physical ones.
    ///
    /// Left goes to playback port 0 and right to port `1 % count`, so with a
    /// single playback port both outputs share it. MIDI uses the same
    /// index-mod-count pattern but its failures are non-fatal.
    pub fn auto_connect(&mut self, ports: &LogicalPorts) -> Result<(), EngineError> {
        let capture = self.discover_physical(PortKind::Audio, PortDirection::Output);
        if capture.is_empty() {
            return Err(EngineError::NoPhysicalPorts {
                kind: PortKind::Audio,
                direction: PortDirection::Output,
            });
        }
        let playback = self.discover_physical(PortKind::Audio, PortDirection::Input);
        if playback.is_empty() {
            return Err(EngineError::NoPhysicalPorts {
                kind: PortKind::Audio,
                direction: PortDirection::Input,
            });
        }

        let input = self.full_name(ports.input)?;
        let out_left = self.full_name(ports.out_left)?;
        let out_right = self.full_name(ports.out_right)?;

        self.connect_required(&capture[0], &input)?;
        self.connect_required(&out_left, &playback[0])?;
        self.connect_required(&out_right, &playback[1 % playback.len()])?;
        if playback.len() == 1 {
            info!("Only one playback port, both outputs go to {}", playback[0]);
        }

        self.connect_midi(ports);
        Ok(())
    }

    fn connect_midi(&mut self, ports: &LogicalPorts) {
        let midi_capture = self.discover_physical(PortKind::Midi, PortDirection::Output);
        if midi_capture.is_empty() {
            warn!("Couldn't find physical midi input port");
        } else if let Ok(midi_in) = self.full_name(ports.midi_in) {
            if !self.connect(&midi_capture[0], &midi_in) {
                warn!("Couldn't connect midi input");
            }
        }

        let Some(midi_out) = ports.midi_out else {
            return;
        };
        let midi_playback = self.discover_physical(PortKind::Midi, PortDirection::Input);
        if midi_playback.is_empty() {
            warn!("Couldn't find physical midi output port");
        } else if let Ok(midi_out) = self.full_name(midi_out) {
            if !self.connect(&midi_out, &midi_playback[0]) {
                warn!("Couldn't connect midi output");
            }
        }
    }

    /// Requests one connection. Never retried.
    pub fn connect(&mut self, source: &str, destination: &str) -> bool {
        match self.server.connect(source, destination) {
            Ok(()) => {
                debug!("Connected {} -> {}", source, destination);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    fn connect_required(&mut self, source: &str, destination: &str) -> Result<(), EngineError> {
        if self.connect(source, destination) {
            Ok(())
        } else {
            Err(EngineError::ConnectionFailed {
                source_port: source.to_string(),
                destination: destination.to_string(),
            })
        }
    }

    fn full_name(&self, port: PortId) -> Result<String, EngineError> {
        self.server
            .port_name(port)
            .ok_or(EngineError::UnknownPort(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_server::ScriptedServer;

    fn server() -> ScriptedServer {
        ScriptedServer::new("groovebox", 48000, 256)
            .with_physical(PortKind::Audio, PortDirection::Output, &["system:capture_1"])
            .with_physical(
                PortKind::Audio,
                PortDirection::Input,
                &["system:playback_1", "system:playback_2"],
            )
            .with_physical(PortKind::Midi, PortDirection::Output, &["keys:out"])
            .with_physical(PortKind::Midi, PortDirection::Input, &["synth:in"])
    }

    #[test]
    fn test_register_ports_creates_five_ports() {
        let mut server = server();
        let ports = PortGraph::new(&mut server).register_ports().unwrap();

        assert_eq!(server.registered().len(), 5);
        assert!(ports.midi_out.is_some());
        assert_eq!(
            server.port_name(ports.out_right).as_deref(),
            Some("groovebox:out_right")
        );
    }

    #[test]
    fn test_auto_connect_two_playback_ports() {
        let mut server = server();
        PortGraph::new(&mut server).setup().unwrap();

        let connections = server.connections();
        assert!(connections.contains(&("system:capture_1".into(), "groovebox:input".into())));
        assert!(connections.contains(&("groovebox:out_left".into(), "system:playback_1".into())));
        assert!(connections.contains(&("groovebox:out_right".into(), "system:playback_2".into())));
        assert!(connections.contains(&("keys:out".into(), "groovebox:midi_in".into())));
        assert!(connections.contains(&("groovebox:midi_out".into(), "synth:in".into())));
    }

    #[test]
    fn test_auto_connect_single_playback_port_binds_both_outputs() {
        let mut server = ScriptedServer::new("groovebox", 48000, 256)
            .with_physical(PortKind::Audio, PortDirection::Output, &["system:capture_1"])
            .with_physical(PortKind::Audio, PortDirection::Input, &["system:playback_1"]);
        PortGraph::new(&mut server).setup().unwrap();

        let connections = server.connections();
        assert!(connections.contains(&("groovebox:out_left".into(), "system:playback_1".into())));
        assert!(connections.contains(&("groovebox:out_right".into(), "system:playback_1".into())));
    }

    #[test]
    fn test_missing_audio_capture_is_fatal() {
        let mut server = ScriptedServer::new("groovebox", 48000, 256).with_physical(
            PortKind::Audio,
            PortDirection::Input,
            &["system:playback_1"],
        );
        let err = PortGraph::new(&mut server).setup().unwrap_err();
        assert!(matches!(
            err,
            EngineError::NoPhysicalPorts {
                kind: PortKind::Audio,
                direction: PortDirection::Output
            }
        ));
        assert!(server.connections().is_empty());
    }

    #[test]
    fn test_missing_audio_playback_is_fatal() {
        let mut server = ScriptedServer::new("groovebox", 48000, 256).with_physical(
            PortKind::Audio,
            PortDirection::Output,
            &["system:capture_1"],
        );
        let err = PortGraph::new(&mut server).setup().unwrap_err();
        assert!(matches!(
            err,
            EngineError::NoPhysicalPorts {
                direction: PortDirection::Input,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_midi_ports_is_not_fatal() {
        let mut server = ScriptedServer::new("groovebox", 48000, 256)
            .with_physical(PortKind::Audio, PortDirection::Output, &["system:capture_1"])
            .with_physical(PortKind::Audio, PortDirection::Input, &["system:playback_1"]);
        assert!(PortGraph::new(&mut server).setup().is_ok());
        assert_eq!(server.connections().len(), 3);
    }

    #[test]
    fn test_midi_connection_failure_is_not_fatal() {
        let mut server = server().fail_connect_to("synth:in");
        assert!(PortGraph::new(&mut server).setup().is_ok());
        assert!(!server
            .connections()
            .iter()
            .any(|(_, dest)| dest == "synth:in"));
    }

    #[test]
    fn test_audio_connection_failure_is_fatal() {
        let mut server = server().fail_connect_to("system:playback_2");
        let err = PortGraph::new(&mut server).setup().unwrap_err();
        assert!(matches!(err, EngineError::ConnectionFailed { .. }));
    }

    #[test]
    fn test_required_registration_failure_stops_wiring() {
        let mut server = server().fail_register("input");
        let err = PortGraph::new(&mut server).setup().unwrap_err();
        assert!(matches!(
            err,
            EngineError::PortRegistration { port: "input", .. }
        ));
        assert!(server.connections().is_empty());
        assert!(server.registered().is_empty());
    }

    #[test]
    fn test_midi_in_registration_failure_is_fatal() {
        let mut server = server().fail_register("midi_in");
        let err = PortGraph::new(&mut server).setup().unwrap_err();
        assert!(matches!(
            err,
            EngineError::PortRegistration { port: "midi_in", .. }
        ));
        assert!(server.connections().is_empty());
    }

    #[test]
    fn test_midi_out_registration_failure_is_a_warning() {
        let mut server = server().fail_register("midi_out");
        let ports = PortGraph::new(&mut server).setup().unwrap();
        assert!(ports.midi_out.is_none());
        assert!(!server
            .connections()
            .iter()
            .any(|(_, dest)| dest == "synth:in"));
    }
}
