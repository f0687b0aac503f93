//! Scripted in-memory audio server for tests.
//!
//! Records what the engine asks of the server into a shared [`Journal`] that
//! survives the server being moved into (or dropped by) the engine, can be
//! told to fail specific steps, and dispatches the registered callbacks on
//! demand.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::midi::MidiPacket;
use super::server::{
    AudioServer, LogSink, NotifyCallback, PortDirection, PortFilter, PortId, PortKind, PortSpec,
    ProcessCallback, ProcessScope, ServerError, ServerLogLevel, ShutdownCallback,
};

/// Everything the engine did to the server, in order.
#[derive(Debug, Default)]
pub struct Journal {
    pub calls: Vec<String>,
    pub registered: Vec<PortSpec>,
    pub connections: Vec<(String, String)>,
}

#[derive(Default)]
struct Callbacks {
    process: Option<ProcessCallback>,
    sample_rate: Option<NotifyCallback>,
    buffer_size: Option<NotifyCallback>,
    shutdown: Option<ShutdownCallback>,
    log: Option<LogSink>,
}

pub struct ScriptedServer {
    name: String,
    sample_rate: u32,
    buffer_size: u32,
    physical: Vec<(PortKind, PortDirection, String)>,
    fail_activate: bool,
    fail_register: Vec<&'static str>,
    fail_connect_to: Vec<String>,
    active: bool,
    closed: bool,
    callbacks: Callbacks,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedServer {
    pub fn new(name: &str, sample_rate: u32, buffer_size: u32) -> Self {
        Self {
            name: name.to_string(),
            sample_rate,
            buffer_size,
            physical: Vec::new(),
            fail_activate: false,
            fail_register: Vec::new(),
            fail_connect_to: Vec::new(),
            active: false,
            closed: false,
            callbacks: Callbacks::default(),
            journal: Arc::default(),
        }
    }

    /// A server with one capture port, two playback ports and one MIDI
    /// port each way.
    pub fn with_default_hardware(name: &str, sample_rate: u32, buffer_size: u32) -> Self {
        Self::new(name, sample_rate, buffer_size)
            .with_physical(PortKind::Audio, PortDirection::Output, &["system:capture_1"])
            .with_physical(
                PortKind::Audio,
                PortDirection::Input,
                &["system:playback_1", "system:playback_2"],
            )
            .with_physical(PortKind::Midi, PortDirection::Output, &["keys:out"])
            .with_physical(PortKind::Midi, PortDirection::Input, &["synth:in"])
    }

    pub fn with_physical(
        mut self,
        kind: PortKind,
        direction: PortDirection,
        names: &[&str],
    ) -> Self {
        self.physical
            .extend(names.iter().map(|n| (kind, direction, n.to_string())));
        self
    }

    pub fn fail_activate(mut self) -> Self {
        self.fail_activate = true;
        self
    }

    pub fn fail_register(mut self, port: &'static str) -> Self {
        self.fail_register.push(port);
        self
    }

    pub fn fail_connect_to(mut self, destination: &str) -> Self {
        self.fail_connect_to.push(destination.to_string());
        self
    }

    /// Shared handle to the journal.
    pub fn journal(&self) -> Arc<Mutex<Journal>> {
        Arc::clone(&self.journal)
    }

    fn log(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }

    pub fn registered(&self) -> Vec<PortSpec> {
        self.log().registered.clone()
    }

    pub fn connections(&self) -> Vec<(String, String)> {
        self.log().connections.clone()
    }

    /// Runs the process callback once, as the server would for a block.
    pub fn run_block(&mut self, scope: &mut ScriptedScope) {
        if !self.active || self.closed {
            return;
        }
        if let Some(process) = self.callbacks.process.as_mut() {
            process(scope);
        }
    }

    pub fn change_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
        if let Some(cb) = &self.callbacks.sample_rate {
            cb(rate);
        }
    }

    pub fn change_buffer_size(&mut self, size: u32) {
        self.buffer_size = size;
        if let Some(cb) = &self.callbacks.buffer_size {
            cb(size);
        }
    }

    pub fn kill(&mut self) {
        if let Some(cb) = &self.callbacks.shutdown {
            cb();
        }
    }

    pub fn emit_log(&self, level: ServerLogLevel, message: &str) {
        if let Some(sink) = &self.callbacks.log {
            sink(level, message);
        }
    }

    fn record(&self, call: &str) {
        self.log().calls.push(call.to_string());
    }
}

impl AudioServer for ScriptedServer {
    fn client_name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    fn set_process_callback(&mut self, callback: ProcessCallback) -> Result<(), ServerError> {
        self.record("set_process_callback");
        self.callbacks.process = Some(callback);
        Ok(())
    }

    fn set_sample_rate_callback(&mut self, callback: NotifyCallback) -> Result<(), ServerError> {
        self.record("set_sample_rate_callback");
        self.callbacks.sample_rate = Some(callback);
        Ok(())
    }

    fn set_buffer_size_callback(&mut self, callback: NotifyCallback) -> Result<(), ServerError> {
        self.record("set_buffer_size_callback");
        self.callbacks.buffer_size = Some(callback);
        Ok(())
    }

    fn on_shutdown(&mut self, callback: ShutdownCallback) {
        self.record("on_shutdown");
        self.callbacks.shutdown = Some(callback);
    }

    fn set_log_sink(&mut self, sink: LogSink) {
        self.record("set_log_sink");
        self.callbacks.log = Some(sink);
    }

    fn activate(&mut self) -> Result<(), ServerError> {
        self.record("activate");
        if self.fail_activate {
            return Err(ServerError::ActivationFailed("scripted".to_string()));
        }
        self.active = true;
        Ok(())
    }

    fn register_port(&mut self, spec: &PortSpec) -> Result<PortId, ServerError> {
        self.record(&format!("register {}", spec.name));
        if self.fail_register.contains(&spec.name) {
            return Err(ServerError::PortRegistration {
                name: spec.name.to_string(),
                reason: "scripted".to_string(),
            });
        }
        let mut journal = self.log();
        journal.registered.push(*spec);
        Ok(PortId(journal.registered.len() - 1))
    }

    fn port_name(&self, port: PortId) -> Option<String> {
        self.log()
            .registered
            .get(port.0)
            .map(|spec| format!("{}:{}", self.name, spec.name))
    }

    fn find_ports(&self, filter: PortFilter) -> Vec<String> {
        self.physical
            .iter()
            .filter(|(kind, direction, _)| *kind == filter.kind && *direction == filter.direction)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    fn connect(&mut self, source: &str, destination: &str) -> Result<(), ServerError> {
        if self.fail_connect_to.iter().any(|d| d == destination) {
            return Err(ServerError::ConnectionFailed {
                source_port: source.to_string(),
                destination: destination.to_string(),
                reason: "scripted".to_string(),
            });
        }
        self.log()
            .connections
            .push((source.to_string(), destination.to_string()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), ServerError> {
        self.record("close");
        self.closed = true;
        self.active = false;
        Ok(())
    }
}

/// Sentinel left in output buffers the engine did not write.
pub const STALE: f32 = 7.5;

/// Buffers for one scripted block.
pub struct ScriptedScope {
    nframes: usize,
    input: Vec<f32>,
    outputs: HashMap<PortId, Vec<f32>>,
    midi: Vec<MidiPacket>,
}

impl ScriptedScope {
    /// A block whose output buffers are pre-filled with [`STALE`].
    pub fn new(nframes: usize) -> Self {
        Self {
            nframes,
            input: vec![0.0; nframes],
            outputs: HashMap::new(),
            midi: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: Vec<f32>) -> Self {
        self.input = input;
        self
    }

    pub fn with_midi(mut self, packets: &[MidiPacket]) -> Self {
        self.midi = packets.to_vec();
        self
    }

    /// What the engine left in an output port.
    pub fn output(&self, port: PortId) -> Vec<f32> {
        self.outputs
            .get(&port)
            .cloned()
            .unwrap_or_else(|| vec![STALE; self.nframes])
    }
}

impl ProcessScope for ScriptedScope {
    fn nframes(&self) -> usize {
        self.nframes
    }

    fn audio_in(&self, _port: PortId) -> &[f32] {
        &self.input
    }

    fn audio_out(&mut self, port: PortId) -> &mut [f32] {
        let nframes = self.nframes;
        self.outputs
            .entry(port)
            .or_insert_with(|| vec![STALE; nframes])
    }

    fn midi_in(&self, _port: PortId) -> &[MidiPacket] {
        &self.midi
    }
}

/// Shared byte sink for a test log subscriber.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a thread-local fmt subscriber and returns what it logged.
pub fn capture_logs<F: FnOnce()>(f: F) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

