//! cpal/midir audio server backend
//!
//! Presents the sound devices of a cpal host as an audio server: every
//! device channel is a physical port (`"<device>:capture_<n>"` or
//! `"<device>:playback_<n>"`) and every midir port is a physical MIDI port.
//! Connections are recorded as routes; while the client is active the
//! streams are rebuilt whenever the routing changes.
//!
//! The output stream's callback plays the part of the server's real-time
//! thread. It splits each device callback into blocks of at most
//! `buffer_size` frames, pulls captured audio and incoming MIDI from rtrb
//! rings, and runs the process callback for each block.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleRate, Stream, StreamConfig, StreamError};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use rtrb::{Consumer, Producer, RingBuffer};

use super::midi::MidiPacket;
use super::server::{
    AudioServer, LogSink, NotifyCallback, PortDirection, PortFilter, PortId, PortKind, PortSpec,
    ProcessCallback, ProcessScope, ServerError, ServerLogLevel, ShutdownCallback,
};
use crate::config::ServerConfig;

/// Block size used when the configuration does not ask for one.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

const CAPTURE_PREFIX: &str = "capture_";
const PLAYBACK_PREFIX: &str = "playback_";

/// Physical port name of a device channel (`channel` is zero-based).
fn channel_port_name(device: &str, prefix: &str, channel: usize) -> String {
    format!("{}:{}{}", device, prefix, channel + 1)
}

/// Splits `"<device>:<prefix><n>"` into the device name and zero-based
/// channel.
fn parse_channel_port(name: &str, prefix: &str) -> Option<(String, usize)> {
    let (device, port) = name.rsplit_once(':')?;
    let number: usize = port.strip_prefix(prefix)?.parse().ok()?;
    number
        .checked_sub(1)
        .map(|channel| (device.to_string(), channel))
}

/// Callbacks registered by the client. The process callback is taken with
/// `try_lock` on the audio thread; the rest are only used off it.
#[derive(Default)]
struct Callbacks {
    process: Mutex<Option<ProcessCallback>>,
    sample_rate: Mutex<Option<NotifyCallback>>,
    buffer_size: Mutex<Option<NotifyCallback>>,
    shutdown: Mutex<Option<ShutdownCallback>>,
    log: Mutex<Option<LogSink>>,
}

impl Callbacks {
    fn log(&self, level: ServerLogLevel, message: &str) {
        if let Ok(sink) = self.log.lock() {
            if let Some(sink) = sink.as_ref() {
                sink(level, message);
            }
        }
    }

    fn notify(slot: &Mutex<Option<NotifyCallback>>, value: u32) {
        if let Ok(callback) = slot.lock() {
            if let Some(callback) = callback.as_ref() {
                callback(value);
            }
        }
    }

    fn shutdown(&self) {
        if let Ok(callback) = self.shutdown.lock() {
            if let Some(callback) = callback.as_ref() {
                callback();
            }
        }
    }

    fn stream_error(&self, err: StreamError) {
        match err {
            StreamError::DeviceNotAvailable => {
                self.log(ServerLogLevel::Error, "audio device disappeared");
                self.shutdown();
            }
            other => self.log(ServerLogLevel::Error, &other.to_string()),
        }
    }
}

/// A connection request that reached our client.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Route {
    /// Device capture channel feeding a logical audio input.
    Capture { device: String, channel: usize },
    /// Logical audio output feeding a device playback channel.
    Playback {
        port: PortId,
        device: String,
        channel: usize,
    },
    /// midir input port feeding the logical MIDI input.
    MidiIn { port_name: String },
    /// Logical MIDI output feeding a midir output port.
    MidiOut { port_name: String },
}

/// The buffers of one block, as seen by the process callback.
struct CpalScope {
    nframes: usize,
    input: Vec<f32>,
    /// Indexed by `PortId`; empty for ports that are not audio outputs.
    outputs: Vec<Vec<f32>>,
    midi: Vec<MidiPacket>,
    midi_limit: usize,
}

impl CpalScope {
    fn new(ports: &[PortSpec], max_frames: usize, midi_capacity: usize) -> Self {
        let outputs = ports
            .iter()
            .map(|spec| {
                if spec.kind == PortKind::Audio && spec.direction == PortDirection::Output {
                    vec![0.0; max_frames]
                } else {
                    Vec::new()
                }
            })
            .collect();
        Self {
            nframes: 0,
            input: vec![0.0; max_frames],
            outputs,
            midi: Vec::with_capacity(midi_capacity),
            midi_limit: midi_capacity,
        }
    }

    /// Loads the next block's inputs from the rings. Missing capture
    /// samples (underrun or no input stream) read as silence.
    ///
    /// REAL-TIME SAFE: no allocation.
    fn load(
        &mut self,
        nframes: usize,
        input: Option<&mut Consumer<f32>>,
        midi: Option<&mut Consumer<MidiPacket>>,
    ) {
        self.nframes = nframes.min(self.input.len());
        let frames = &mut self.input[..self.nframes];
        frames.fill(0.0);
        if let Some(rx) = input {
            for sample in frames.iter_mut() {
                match rx.pop() {
                    Ok(value) => *sample = value,
                    Err(_) => break,
                }
            }
        }

        self.midi.clear();
        if let Some(rx) = midi {
            while self.midi.len() < self.midi_limit {
                match rx.pop() {
                    Ok(packet) => self.midi.push(packet),
                    Err(_) => break,
                }
            }
        }

        for output in &mut self.outputs {
            let len = self.nframes.min(output.len());
            output[..len].fill(0.0);
        }
    }
}

impl ProcessScope for CpalScope {
    fn nframes(&self) -> usize {
        self.nframes
    }

    fn audio_in(&self, _port: PortId) -> &[f32] {
        &self.input[..self.nframes]
    }

    fn audio_out(&mut self, port: PortId) -> &mut [f32] {
        let nframes = self.nframes;
        match self.outputs.get_mut(port.0) {
            Some(buffer) if buffer.len() >= nframes => &mut buffer[..nframes],
            _ => &mut [],
        }
    }

    fn midi_in(&self, _port: PortId) -> &[MidiPacket] {
        &self.midi
    }
}

/// Writes the routed logical outputs into an interleaved device buffer.
/// Outputs routed to the same channel are summed; unrouted channels are
/// silent.
fn interleave(device: &mut [f32], channels: usize, routes: &[(PortId, usize)], scope: &CpalScope) {
    device.fill(0.0);
    for &(port, channel) in routes {
        let Some(samples) = scope.outputs.get(port.0) else {
            continue;
        };
        if channel >= channels {
            continue;
        }
        for (frame, sample) in device.chunks_mut(channels).zip(samples) {
            frame[channel] += *sample;
        }
    }
}

/// Streams and MIDI connections that exist while the client is active.
#[derive(Default)]
struct Running {
    output: Option<Stream>,
    input: Option<Stream>,
    midi_in: Option<MidiInputConnection<()>>,
    midi_out: Option<MidiOutputConnection>,
}

/// An audio server client backed by cpal and midir.
pub struct CpalServer {
    name: String,
    host: Host,
    sample_rate: u32,
    buffer_size: u32,
    midi_capacity: usize,
    ports: Vec<PortSpec>,
    routes: Vec<Route>,
    callbacks: Arc<Callbacks>,
    running: Running,
    active: bool,
    closed: bool,
}

impl CpalServer {
    /// Opens a client on the configured host, or the default host.
    pub fn open(name: &str, config: &ServerConfig) -> Result<Self, ServerError> {
        let host = match &config.host {
            Some(wanted) => {
                let id = cpal::available_hosts()
                    .into_iter()
                    .find(|id| id.name().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        ServerError::Unavailable(format!("unknown audio host '{}'", wanted))
                    })?;
                cpal::host_from_id(id).map_err(|e| ServerError::Unavailable(e.to_string()))?
            }
            None => cpal::default_host(),
        };

        let device = host
            .default_output_device()
            .ok_or_else(|| ServerError::Unavailable("no default output device".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| ServerError::Unavailable(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            host,
            sample_rate: supported.sample_rate().0,
            buffer_size: config.buffer_size.unwrap_or(DEFAULT_BLOCK_SIZE),
            midi_capacity: config.midi_buffer_size.max(1),
            ports: Vec::new(),
            routes: Vec::new(),
            callbacks: Arc::default(),
            running: Running::default(),
            active: false,
            closed: false,
        })
    }

    /// Name of the cpal host in use.
    pub fn host_name(&self) -> &'static str {
        self.host.id().name()
    }

    fn ensure_open(&self) -> Result<(), ServerError> {
        if self.closed {
            Err(ServerError::Closed)
        } else {
            Ok(())
        }
    }

    fn log(&self, level: ServerLogLevel, message: &str) {
        self.callbacks.log(level, message);
    }

    /// Our own port behind a `client:port` name.
    fn own_port(&self, full_name: &str) -> Option<(PortId, PortSpec)> {
        let short = full_name.strip_prefix(&self.name)?.strip_prefix(':')?;
        self.ports
            .iter()
            .position(|spec| spec.name == short)
            .map(|index| (PortId(index), self.ports[index]))
    }

    fn audio_port_names(&self, capture: bool) -> Vec<String> {
        let mut names = Vec::new();
        for device in self.devices(capture) {
            let Ok(name) = device.name() else {
                continue;
            };
            let config = if capture {
                device.default_input_config()
            } else {
                device.default_output_config()
            };
            let Ok(config) = config else {
                continue;
            };
            let prefix = if capture {
                CAPTURE_PREFIX
            } else {
                PLAYBACK_PREFIX
            };
            names.extend(
                (0..config.channels() as usize).map(|ch| channel_port_name(&name, prefix, ch)),
            );
        }
        names
    }

    fn midi_port_names(&self, capture: bool) -> Vec<String> {
        let scanner = format!("{} scanner", self.name);
        if capture {
            match MidiInput::new(&scanner) {
                Ok(midi) => midi
                    .ports()
                    .iter()
                    .filter_map(|port| midi.port_name(port).ok())
                    .collect(),
                Err(_) => Vec::new(),
            }
        } else {
            match MidiOutput::new(&scanner) {
                Ok(midi) => midi
                    .ports()
                    .iter()
                    .filter_map(|port| midi.port_name(port).ok())
                    .collect(),
                Err(_) => Vec::new(),
            }
        }
    }

    /// Capture-capable or playback-capable devices, in enumeration order.
    fn devices(&self, capture: bool) -> Vec<Device> {
        let devices = if capture {
            self.host.input_devices().map(|devices| devices.collect())
        } else {
            self.host.output_devices().map(|devices| devices.collect())
        };
        devices.unwrap_or_default()
    }

    fn find_device(&self, name: &str, capture: bool) -> Option<Device> {
        self.devices(capture)
            .into_iter()
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
    }

    /// Tears down and rebuilds the streams and MIDI connections for the
    /// current routes.
    fn rebuild(&mut self) -> Result<(), ServerError> {
        self.running = Running::default();

        let playback: Vec<(PortId, String, usize)> = self
            .routes
            .iter()
            .filter_map(|route| match route {
                Route::Playback {
                    port,
                    device,
                    channel,
                } => Some((*port, device.clone(), *channel)),
                _ => None,
            })
            .collect();
        let Some((_, device_name, _)) = playback.first().cloned() else {
            // Nothing to play to yet
            return Ok(());
        };
        let device = self.find_device(&device_name, false).ok_or_else(|| {
            ServerError::ActivationFailed(format!("playback device '{}' is gone", device_name))
        })?;
        let supported = device
            .default_output_config()
            .map_err(|e| ServerError::ActivationFailed(e.to_string()))?;
        let channels = (supported.channels() as usize).max(1);
        let sample_rate = supported.sample_rate().0;
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            Callbacks::notify(&self.callbacks.sample_rate, sample_rate);
        }

        let routes: Vec<(PortId, usize)> = playback
            .iter()
            .filter(|(_, device, _)| {
                let same = *device == device_name;
                if !same {
                    self.log(
                        ServerLogLevel::Error,
                        &format!("ignoring route to second playback device '{}'", device),
                    );
                }
                same
            })
            .map(|(port, _, channel)| (*port, *channel))
            .collect();

        let block_frames = self.buffer_size as usize;
        let ring_frames = block_frames * 8;

        let mut input_rx = self.build_input_stream(sample_rate, ring_frames)?;
        let mut midi_rx = self.connect_midi();

        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };
        let callbacks = Arc::clone(&self.callbacks);
        let error_callbacks = Arc::clone(&self.callbacks);
        let mut scope = CpalScope::new(&self.ports, block_frames, self.midi_capacity);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // REAL-TIME SAFE: No allocations, no blocking locks
                    for chunk in data.chunks_mut(block_frames * channels) {
                        let nframes = chunk.len() / channels;
                        scope.load(nframes, input_rx.as_mut(), midi_rx.as_mut());
                        match callbacks.process.try_lock() {
                            Ok(mut process) => {
                                if let Some(process) = process.as_mut() {
                                    process(&mut scope);
                                }
                                interleave(chunk, channels, &routes, &scope);
                            }
                            // Output silence if we can't get the lock
                            Err(_) => chunk.fill(0.0),
                        }
                    }
                },
                move |err| error_callbacks.stream_error(err),
                None,
            )
            .map_err(|e| ServerError::ActivationFailed(e.to_string()))?;
        stream
            .play()
            .map_err(|e| ServerError::ActivationFailed(e.to_string()))?;

        self.log(
            ServerLogLevel::Info,
            &format!(
                "playing to '{}' ({} channels, {} Hz, {} frame blocks)",
                device_name, channels, sample_rate, block_frames
            ),
        );
        self.running.output = Some(stream);
        self.connect_midi_out();
        Ok(())
    }

    /// Starts the capture stream for the routed input channel, if any.
    fn build_input_stream(
        &mut self,
        sample_rate: u32,
        ring_frames: usize,
    ) -> Result<Option<Consumer<f32>>, ServerError> {
        let Some((device_name, channel)) = self.routes.iter().find_map(|route| match route {
            Route::Capture { device, channel } => Some((device.clone(), *channel)),
            _ => None,
        }) else {
            return Ok(None);
        };
        let device = self.find_device(&device_name, true).ok_or_else(|| {
            ServerError::ActivationFailed(format!("capture device '{}' is gone", device_name))
        })?;
        let supported = device
            .default_input_config()
            .map_err(|e| ServerError::ActivationFailed(e.to_string()))?;
        let channels = (supported.channels() as usize).max(1);
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let (mut tx, rx): (Producer<f32>, Consumer<f32>) = RingBuffer::new(ring_frames);
        let error_callbacks = Arc::clone(&self.callbacks);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for frame in data.chunks(channels) {
                        if let Some(sample) = frame.get(channel) {
                            // Drop samples if the output side falls behind
                            let _ = tx.push(*sample);
                        }
                    }
                },
                move |err| error_callbacks.stream_error(err),
                None,
            )
            .map_err(|e| ServerError::ActivationFailed(e.to_string()))?;
        stream
            .play()
            .map_err(|e| ServerError::ActivationFailed(e.to_string()))?;

        self.running.input = Some(stream);
        Ok(Some(rx))
    }

    /// Opens the routed MIDI input. Failures are reported to the log sink
    /// and leave MIDI disconnected.
    fn connect_midi(&mut self) -> Option<Consumer<MidiPacket>> {
        let port_name = self.routes.iter().find_map(|route| match route {
            Route::MidiIn { port_name } => Some(port_name.clone()),
            _ => None,
        })?;
        match self.open_midi_in(&port_name) {
            Ok((connection, rx)) => {
                self.running.midi_in = Some(connection);
                Some(rx)
            }
            Err(e) => {
                self.log(ServerLogLevel::Error, &e);
                None
            }
        }
    }

    fn open_midi_in(
        &self,
        port_name: &str,
    ) -> Result<(MidiInputConnection<()>, Consumer<MidiPacket>), String> {
        let midi = MidiInput::new(&self.name).map_err(|e| e.to_string())?;
        let port = midi
            .ports()
            .into_iter()
            .find(|port| midi.port_name(port).map(|n| n == port_name).unwrap_or(false))
            .ok_or_else(|| format!("midi port '{}' is gone", port_name))?;

        let (mut tx, rx): (Producer<MidiPacket>, Consumer<MidiPacket>) =
            RingBuffer::new(self.midi_capacity);
        let connection = midi
            .connect(
                &port,
                &format!("{} midi_in", self.name),
                move |_timestamp_us, data, _| {
                    // Lossy push: drop packets if the audio side is behind.
                    // Packets arrive between blocks, so they all land at offset 0
                    let _ = tx.push(MidiPacket::new(0, data));
                },
                (),
            )
            .map_err(|e| e.to_string())?;
        Ok((connection, rx))
    }

    fn connect_midi_out(&mut self) {
        let Some(port_name) = self.routes.iter().find_map(|route| match route {
            Route::MidiOut { port_name } => Some(port_name.clone()),
            _ => None,
        }) else {
            return;
        };
        match self.open_midi_out(&port_name) {
            Ok(connection) => self.running.midi_out = Some(connection),
            Err(e) => self.log(ServerLogLevel::Error, &e),
        }
    }

    fn open_midi_out(&self, port_name: &str) -> Result<MidiOutputConnection, String> {
        let midi = MidiOutput::new(&self.name).map_err(|e| e.to_string())?;
        let port = midi
            .ports()
            .into_iter()
            .find(|port| midi.port_name(port).map(|n| n == port_name).unwrap_or(false))
            .ok_or_else(|| format!("midi port '{}' is gone", port_name))?;
        midi.connect(&port, &format!("{} midi_out", self.name))
            .map_err(|e| e.to_string())
    }

    /// Works out which side of a connection is ours and what it means.
    fn route_for(&self, source: &str, destination: &str) -> Result<Route, ServerError> {
        let failed = |reason: &str| ServerError::ConnectionFailed {
            source_port: source.to_string(),
            destination: destination.to_string(),
            reason: reason.to_string(),
        };

        if let Some((port, spec)) = self.own_port(source) {
            if spec.direction != PortDirection::Output {
                return Err(failed("source is not an output port"));
            }
            return match spec.kind {
                PortKind::Audio => {
                    let (device, channel) = parse_channel_port(destination, PLAYBACK_PREFIX)
                        .ok_or_else(|| failed("destination is not a playback channel"))?;
                    if !self.audio_port_names(false).iter().any(|n| n == destination) {
                        return Err(ServerError::UnknownPort(destination.to_string()));
                    }
                    Ok(Route::Playback {
                        port,
                        device,
                        channel,
                    })
                }
                PortKind::Midi => {
                    if !self.midi_port_names(false).iter().any(|n| n == destination) {
                        return Err(ServerError::UnknownPort(destination.to_string()));
                    }
                    Ok(Route::MidiOut {
                        port_name: destination.to_string(),
                    })
                }
            };
        }

        if let Some((_, spec)) = self.own_port(destination) {
            if spec.direction != PortDirection::Input {
                return Err(failed("destination is not an input port"));
            }
            return match spec.kind {
                PortKind::Audio => {
                    let (device, channel) = parse_channel_port(source, CAPTURE_PREFIX)
                        .ok_or_else(|| failed("source is not a capture channel"))?;
                    if !self.audio_port_names(true).iter().any(|n| n == source) {
                        return Err(ServerError::UnknownPort(source.to_string()));
                    }
                    Ok(Route::Capture { device, channel })
                }
                PortKind::Midi => {
                    if !self.midi_port_names(true).iter().any(|n| n == source) {
                        return Err(ServerError::UnknownPort(source.to_string()));
                    }
                    Ok(Route::MidiIn {
                        port_name: source.to_string(),
                    })
                }
            };
        }

        Err(failed("neither port belongs to this client"))
    }
}

impl AudioServer for CpalServer {
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
        self.ensure_open()?;
        let mut slot = self
            .callbacks
            .process
            .lock()
            .map_err(|_| ServerError::Closed)?;
        *slot = Some(callback);
        Ok(())
    }

    fn set_sample_rate_callback(&mut self, callback: NotifyCallback) -> Result<(), ServerError> {
        self.ensure_open()?;
        let mut slot = self
            .callbacks
            .sample_rate
            .lock()
            .map_err(|_| ServerError::Closed)?;
        *slot = Some(callback);
        Ok(())
    }

    fn set_buffer_size_callback(&mut self, callback: NotifyCallback) -> Result<(), ServerError> {
        self.ensure_open()?;
        let mut slot = self
            .callbacks
            .buffer_size
            .lock()
            .map_err(|_| ServerError::Closed)?;
        *slot = Some(callback);
        Ok(())
    }

    fn on_shutdown(&mut self, callback: ShutdownCallback) {
        if let Ok(mut slot) = self.callbacks.shutdown.lock() {
            *slot = Some(callback);
        }
    }

    fn set_log_sink(&mut self, sink: LogSink) {
        if let Ok(mut slot) = self.callbacks.log.lock() {
            *slot = Some(sink);
        }
    }

    fn activate(&mut self) -> Result<(), ServerError> {
        self.ensure_open()?;
        if self.active {
            return Ok(());
        }
        self.rebuild()?;
        self.active = true;
        Callbacks::notify(&self.callbacks.sample_rate, self.sample_rate);
        Callbacks::notify(&self.callbacks.buffer_size, self.buffer_size);
        self.log(
            ServerLogLevel::Info,
            &format!("client '{}' active on {}", self.name, self.host_name()),
        );
        Ok(())
    }

    fn register_port(&mut self, spec: &PortSpec) -> Result<PortId, ServerError> {
        self.ensure_open()?;
        if self.ports.iter().any(|existing| existing.name == spec.name) {
            return Err(ServerError::PortRegistration {
                name: spec.name.to_string(),
                reason: "name already in use".to_string(),
            });
        }
        self.ports.push(*spec);
        Ok(PortId(self.ports.len() - 1))
    }

    fn port_name(&self, port: PortId) -> Option<String> {
        self.ports
            .get(port.0)
            .map(|spec| format!("{}:{}", self.name, spec.name))
    }

    fn find_ports(&self, filter: PortFilter) -> Vec<String> {
        if !filter.physical {
            return self
                .ports
                .iter()
                .filter(|spec| spec.kind == filter.kind && spec.direction == filter.direction)
                .map(|spec| format!("{}:{}", self.name, spec.name))
                .collect();
        }
        // Capture ports deliver data into the graph, so they are outputs
        let capture = filter.direction == PortDirection::Output;
        match filter.kind {
            PortKind::Audio => self.audio_port_names(capture),
            PortKind::Midi => self.midi_port_names(capture),
        }
    }

    fn connect(&mut self, source: &str, destination: &str) -> Result<(), ServerError> {
        self.ensure_open()?;
        let route = self.route_for(source, destination)?;
        if !self.routes.contains(&route) {
            self.routes.push(route);
        }
        if self.active {
            self.rebuild()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ServerError> {
        if self.closed {
            return Ok(());
        }
        self.running = Running::default();
        self.active = false;
        self.closed = true;
        if let Ok(mut process) = self.callbacks.process.lock() {
            *process = None;
        }
        Ok(())
    }
}

impl Drop for CpalServer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
