//! Audio Engine
//!
//! Binds the processing pipeline to an audio server client. The control side
//! ([`Engine`]) opens the client, registers callbacks, activates it and wires
//! the ports; the real-time side ([`BlockProcessor`]) runs inside the server's
//! process callback and must be real-time safe.
//!
//! The two sides share only [`EngineState`] (atomics) and the notification
//! ring. Port handles are published once through a `OnceLock` because the
//! ports are registered after the client is activated.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{error, info, warn};

use super::channels::{notification_channel, EngineEvent, EventReceiver, EventSender};
use super::midi::decode_block;
use super::pipeline::ProcessingPipeline;
use super::port_graph::{LogicalPorts, PortGraph};
use super::server::{
    AudioServer, PortDirection, PortId, PortKind, ProcessScope, ServerError, ServerLogLevel,
};
use crate::config::EngineConfig;
use crate::dsp::SharedAudioContext;

/// Errors that stop the engine from starting.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("audio server not running")]
    ServerUnavailable(#[source] ServerError),

    #[error("cannot install server callbacks")]
    CallbackRegistration(#[source] ServerError),

    #[error("cannot activate client")]
    ActivationFailed(#[source] ServerError),

    #[error("couldn't register {port} port")]
    PortRegistration {
        port: &'static str,
        source: ServerError,
    },

    #[error("couldn't find physical {} {} ports", .kind.name(), .direction.name())]
    NoPhysicalPorts {
        kind: PortKind,
        direction: PortDirection,
    },

    #[error("couldn't connect '{source_port}' -> '{destination}'")]
    ConnectionFailed {
        source_port: String,
        destination: String,
    },

    #[error("port {0:?} is not registered on the client")]
    UnknownPort(PortId),

    #[error(
        "malformed negotiated state: sample rate {sample_rate}, buffer size {buffer_size} \
         (capacity {capacity})"
    )]
    InvalidNegotiatedState {
        sample_rate: u32,
        buffer_size: u32,
        capacity: usize,
    },
}

/// State shared between the control context and the process callback.
/// All fields use atomics for lock-free access; torn reads across fields are
/// tolerated.
#[derive(Debug)]
pub struct EngineState {
    sample_rate: AtomicU32,
    buffer_size: AtomicU32,
    processing: AtomicBool,
    running: AtomicBool,
    processed_blocks: AtomicU64,
    rejected_blocks: AtomicU64,
}

impl EngineState {
    fn new() -> Self {
        Self {
            sample_rate: AtomicU32::new(0),
            buffer_size: AtomicU32::new(0),
            processing: AtomicBool::new(false),
            running: AtomicBool::new(true),
            processed_blocks: AtomicU64::new(0),
            rejected_blocks: AtomicU64::new(0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size.load(Ordering::Relaxed)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Blocks that went through the pipeline.
    pub fn processed_blocks(&self) -> u64 {
        self.processed_blocks.load(Ordering::Relaxed)
    }

    /// Blocks skipped because they exceeded the buffer size.
    pub fn rejected_blocks(&self) -> u64 {
        self.rejected_blocks.load(Ordering::Relaxed)
    }

    /// Stops processing and asks the control loop to exit.
    fn signal_exit(&self) {
        self.processing.store(false, Ordering::Relaxed);
        self.running.store(false, Ordering::Relaxed);
    }

    /// REAL-TIME SAFE: atomic store only.
    fn on_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    /// REAL-TIME SAFE: atomic store only, except for the error log on an
    /// out-of-range size.
    fn on_buffer_size(&self, buffer_size: u32, capacity: usize) {
        if buffer_size == 0 || buffer_size as usize > capacity {
            error!(
                "Ignoring buffer size {} outside 1..={}",
                buffer_size, capacity
            );
            return;
        }
        self.buffer_size.store(buffer_size, Ordering::Relaxed);
    }
}

/// The real-time half of the engine, moved into the process callback.
pub struct BlockProcessor {
    state: Arc<EngineState>,
    ports: Arc<OnceLock<LogicalPorts>>,
    context: SharedAudioContext,
    pipeline: ProcessingPipeline,
    events: EventSender,
    applied_sample_rate: u32,
    applied_buffer_size: u32,
}

impl BlockProcessor {
    fn new(
        state: Arc<EngineState>,
        ports: Arc<OnceLock<LogicalPorts>>,
        context: SharedAudioContext,
        mut pipeline: ProcessingPipeline,
        events: EventSender,
    ) -> Self {
        let applied_sample_rate = state.sample_rate();
        let applied_buffer_size = state.buffer_size();
        pipeline.prepare(applied_sample_rate, context.capacity());
        Self {
            state,
            ports,
            context,
            pipeline,
            events,
            applied_sample_rate,
            applied_buffer_size,
        }
    }

    /// Processes one block.
    ///
    /// Does nothing unless processing is enabled, the engine is running and
    /// the ports exist. A block larger than the negotiated buffer size is
    /// rejected without touching the outputs.
    ///
    /// REAL-TIME SAFE: no allocation, no locks, no blocking.
    pub fn process(&mut self, scope: &mut dyn ProcessScope) {
        if !self.state.is_processing() || !self.state.is_running() {
            return;
        }
        let Some(ports) = self.ports.get().copied() else {
            return;
        };

        let nframes = scope.nframes();
        let buffer_size = self.state.buffer_size() as usize;
        if nframes > buffer_size {
            error!(
                "Block of {} frames exceeds buffer size {}",
                nframes, buffer_size
            );
            self.state.rejected_blocks.fetch_add(1, Ordering::Relaxed);
            self.events.send_lossy(EngineEvent::BlockRejected {
                nframes,
                buffer_size,
            });
            return;
        }

        self.apply_server_changes();
        self.context.begin_block(nframes);

        let input = scope.audio_in(ports.input);
        let available = nframes.min(input.len());
        self.context.buffers.input.copy_from(&input[..available]);

        decode_block(scope.midi_in(ports.midi_in), &mut self.context.events);
        let dropped = self.context.events.dropped();
        if dropped > 0 {
            self.events.send_lossy(EngineEvent::MidiOverflow { dropped });
        }

        self.pipeline.run(&mut self.context, nframes);

        write_output(
            scope.audio_out(ports.out_left),
            self.context.buffers.out_l.frames(nframes),
        );
        write_output(
            scope.audio_out(ports.out_right),
            self.context.buffers.out_r.frames(nframes),
        );

        self.context.end_block();
        self.state.processed_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Picks up sample-rate and buffer-size changes stored by the
    /// notification callbacks.
    fn apply_server_changes(&mut self) {
        let sample_rate = self.state.sample_rate();
        if sample_rate != 0 && sample_rate != self.applied_sample_rate {
            self.pipeline.set_sample_rate(sample_rate);
            self.context.set_sample_rate(sample_rate);
            self.applied_sample_rate = sample_rate;
            self.events
                .send_lossy(EngineEvent::SampleRateChanged(sample_rate));
        }

        let buffer_size = self.state.buffer_size();
        if buffer_size != self.applied_buffer_size {
            self.applied_buffer_size = buffer_size;
            self.events
                .send_lossy(EngineEvent::BufferSizeChanged(buffer_size));
        }
    }
}

fn write_output(port: &mut [f32], samples: &[f32]) {
    for (out, sample) in port.iter_mut().zip(samples) {
        *out = *sample;
    }
}

/// Control-side log line for a notification from the real-time side.
fn log_event(event: EngineEvent) {
    match event {
        EngineEvent::SampleRateChanged(rate) => info!("Sample rate is now {} Hz", rate),
        EngineEvent::BufferSizeChanged(size) => info!("Buffer size is now {} frames", size),
        EngineEvent::BlockRejected {
            nframes,
            buffer_size,
        } => error!(
            "Skipped a block of {} frames (buffer size {})",
            nframes, buffer_size
        ),
        EngineEvent::MidiOverflow { dropped } => {
            warn!("Dropped {} MIDI events in one block", dropped)
        }
    }
}

fn forward_server_log(level: ServerLogLevel, message: &str) {
    match level {
        ServerLogLevel::Error => error!("server: {}", message),
        ServerLogLevel::Info => info!("server: {}", message),
    }
}

/// The engine's connection to the audio server.
///
/// Owns the client for the whole session. Dropping the engine shuts it down.
pub struct Engine<S: AudioServer> {
    server: Option<S>,
    state: Arc<EngineState>,
    ports: LogicalPorts,
    events: EventReceiver,
}

impl<S: AudioServer> Engine<S> {
    /// Opens the client with `open`, installs the callbacks, activates the
    /// client and wires the ports. Processing stays disabled until
    /// [`Engine::start_processing`].
    ///
    /// Any failure closes the client again and is returned.
    pub fn init<F>(
        config: &EngineConfig,
        pipeline: ProcessingPipeline,
        open: F,
    ) -> Result<Self, EngineError>
    where
        F: FnOnce(&str) -> Result<S, ServerError>,
    {
        let state = Arc::new(EngineState::new());

        let mut server = match open(&config.client_name) {
            Ok(server) => server,
            Err(e) => {
                error!("Audio server not running: {}", e);
                state.signal_exit();
                return Err(EngineError::ServerUnavailable(e));
            }
        };
        info!("Connected to audio server as '{}'", server.client_name());

        match Self::setup(&mut server, &state, config, pipeline) {
            Ok((ports, events)) => {
                info!(
                    "Engine ready: {} Hz, {} frames per block",
                    state.sample_rate(),
                    state.buffer_size()
                );
                Ok(Self {
                    server: Some(server),
                    state,
                    ports,
                    events,
                })
            }
            Err(e) => {
                error!("Engine setup failed: {}", e);
                state.signal_exit();
                if let Err(close_err) = server.close() {
                    warn!("Failed to close audio server client: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn setup(
        server: &mut S,
        state: &Arc<EngineState>,
        config: &EngineConfig,
        pipeline: ProcessingPipeline,
    ) -> Result<(LogicalPorts, EventReceiver), EngineError> {
        let capacity = config.server.max_buffer_size;
        let sample_rate = server.sample_rate();
        let buffer_size = server.buffer_size();
        if sample_rate == 0 || buffer_size == 0 || buffer_size as usize > capacity {
            return Err(EngineError::InvalidNegotiatedState {
                sample_rate,
                buffer_size,
                capacity,
            });
        }
        state.on_sample_rate(sample_rate);
        state.buffer_size.store(buffer_size, Ordering::Relaxed);

        let (tx, rx) = notification_channel(config.notification_capacity);
        let ports = Arc::new(OnceLock::new());
        let context =
            SharedAudioContext::new(capacity, config.server.midi_buffer_size, sample_rate);
        let mut processor =
            BlockProcessor::new(Arc::clone(state), Arc::clone(&ports), context, pipeline, tx);

        server
            .set_process_callback(Box::new(move |scope: &mut dyn ProcessScope| {
                processor.process(scope)
            }))
            .map_err(EngineError::CallbackRegistration)?;

        let rate_state = Arc::clone(state);
        server
            .set_sample_rate_callback(Box::new(move |rate| rate_state.on_sample_rate(rate)))
            .map_err(EngineError::CallbackRegistration)?;

        let size_state = Arc::clone(state);
        server
            .set_buffer_size_callback(Box::new(move |size| {
                size_state.on_buffer_size(size, capacity)
            }))
            .map_err(EngineError::CallbackRegistration)?;

        let shutdown_state = Arc::clone(state);
        server.on_shutdown(Box::new(move || {
            info!("Audio server shut the client down, exiting");
            shutdown_state.signal_exit();
        }));
        server.set_log_sink(Box::new(forward_server_log));

        server.activate().map_err(EngineError::ActivationFailed)?;
        info!("Activated client");

        let logical = PortGraph::new(server).setup()?;
        // Only set here, so this cannot already be filled
        let _ = ports.set(logical);

        Ok((logical, rx))
    }

    /// Lets the process callback run the pipeline.
    pub fn start_processing(&mut self) {
        if self.server.is_some() && self.state.is_running() {
            self.state.processing.store(true, Ordering::Relaxed);
            info!("Processing started");
        }
    }

    /// Makes the process callback a no-op again.
    pub fn stop_processing(&mut self) {
        self.state.processing.store(false, Ordering::Relaxed);
        info!("Processing stopped");
    }

    /// Closes the client. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.state.signal_exit();
        if let Some(mut server) = self.server.take() {
            info!("Closing audio server client");
            if let Err(e) = server.close() {
                warn!("Failed to close audio server client: {}", e);
            }
        }
    }

    /// False once the server shut the client down or [`Engine::shutdown`]
    /// ran.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn ports(&self) -> &LogicalPorts {
        &self.ports
    }

    /// The open client, until shutdown.
    pub fn server(&self) -> Option<&S> {
        self.server.as_ref()
    }

    pub fn server_mut(&mut self) -> Option<&mut S> {
        self.server.as_mut()
    }

    /// Pending notifications from the real-time side.
    pub fn drain_events(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        self.events.drain()
    }

    /// Control loop: logs notifications every `poll_interval` until `stop`
    /// resolves or the server shuts the client down, then shuts down.
    pub async fn run_until<F>(&mut self, stop: F, poll_interval: Duration)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let mut ticker = tokio::time::interval(poll_interval);
        while self.is_running() {
            tokio::select! {
                _ = &mut stop => {
                    info!("Stop requested");
                    break;
                }
                _ = ticker.tick() => {
                    for event in self.drain_events() {
                        log_event(event);
                    }
                }
            }
        }
        for event in self.drain_events() {
            log_event(event);
        }
        self.shutdown();
    }
}

impl<S: AudioServer> Drop for Engine<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::midi::MidiPacket;
    use crate::engine::pipeline::tests::{recording_pipeline, CallLog};
    use crate::dsp::{SharedAudioContext, Stage};
    use crate::engine::pipeline::tests::{RampMixer, Recorder, TapeRecorder};
    use crate::engine::pipeline::PipelineStages;
    use crate::engine::test_server::{capture_logs, ScriptedScope, ScriptedServer, STALE};
    use std::sync::Mutex;

    /// Synth stand-in that keeps a copy of the input bus it was handed.
    struct InputCapture {
        seen: Arc<Mutex<Vec<f32>>>,
    }

    impl Stage for InputCapture {
        fn name(&self) -> &'static str {
            "synth"
        }

        fn process(&mut self, ctx: &mut SharedAudioContext, nframes: usize) {
            *self.seen.lock().unwrap() = ctx.buffers.input.frames(nframes).to_vec();
        }
    }

    fn input_capture_pipeline(seen: &Arc<Mutex<Vec<f32>>>, log: &CallLog) -> ProcessingPipeline {
        let stage = |name: &'static str| -> Box<dyn Stage> {
            Box::new(Recorder {
                name,
                log: Arc::clone(log),
            })
        };
        ProcessingPipeline::new(PipelineStages {
            tape: Box::new(TapeRecorder {
                log: Arc::clone(log),
            }),
            synth: Box::new(InputCapture {
                seen: Arc::clone(seen),
            }),
            drums: stage("drums"),
            effect: stage("effect"),
            mixer: Box::new(RampMixer {
                log: Arc::clone(log),
            }),
            metronome: stage("metronome"),
        })
    }

    fn start(server: ScriptedServer) -> (Engine<ScriptedServer>, CallLog) {
        let log = CallLog::default();
        let engine = Engine::init(&EngineConfig::default(), recording_pipeline(&log), |_| {
            Ok(server)
        })
        .unwrap();
        (engine, log)
    }

    fn hardware() -> ScriptedServer {
        ScriptedServer::with_default_hardware("groovebox", 48000, 256)
    }

    fn run(engine: &mut Engine<ScriptedServer>, scope: &mut ScriptedScope) {
        engine.server_mut().unwrap().run_block(scope);
    }

    #[test]
    fn test_init_order() {
        let server = hardware();
        let journal = server.journal();
        let (engine, _log) = start(server);

        let calls = journal.lock().unwrap().calls.clone();
        let position = |name: &str| calls.iter().position(|c| c == name).unwrap();
        assert!(position("set_process_callback") < position("activate"));
        assert!(position("set_log_sink") < position("activate"));
        assert!(position("activate") < position("register input"));
        assert_eq!(engine.state().sample_rate(), 48000);
        assert_eq!(engine.state().buffer_size(), 256);
        assert!(engine.is_running());
        assert!(!engine.state().is_processing());
    }

    #[test]
    fn test_block_output_matches_context() {
        let (mut engine, log) = start(hardware());
        engine.start_processing();
        let ports = *engine.ports();

        let mut scope = ScriptedScope::new(64);
        run(&mut engine, &mut scope);

        let left = scope.output(ports.out_left);
        let right = scope.output(ports.out_right);
        for i in 0..64 {
            assert_eq!(left[i], i as f32);
            assert_eq!(right[i], -(i as f32));
        }
        assert_eq!(log.lock().unwrap().len(), 7);
        assert_eq!(engine.state().processed_blocks(), 1);
    }

    #[test]
    fn test_oversized_block_is_rejected() {
        let (mut engine, log) = start(hardware());
        engine.start_processing();
        let ports = *engine.ports();

        let mut scope = ScriptedScope::new(512);
        run(&mut engine, &mut scope);
        run(&mut engine, &mut scope);

        assert!(scope.output(ports.out_left).iter().all(|&s| s == STALE));
        assert!(scope.output(ports.out_right).iter().all(|&s| s == STALE));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(engine.state().rejected_blocks(), 2);
        assert_eq!(engine.state().processed_blocks(), 0);

        let events: Vec<_> = engine.drain_events().collect();
        assert_eq!(
            events[0],
            EngineEvent::BlockRejected {
                nframes: 512,
                buffer_size: 256
            }
        );
    }

    #[test]
    fn test_block_equal_to_buffer_size_is_processed() {
        let (mut engine, _log) = start(hardware());
        engine.start_processing();
        let mut scope = ScriptedScope::new(256);
        run(&mut engine, &mut scope);
        assert_eq!(engine.state().processed_blocks(), 1);
        assert_eq!(engine.state().rejected_blocks(), 0);
    }

    #[test]
    fn test_no_processing_before_start() {
        let (mut engine, log) = start(hardware());
        let ports = *engine.ports();

        let mut scope = ScriptedScope::new(64);
        run(&mut engine, &mut scope);

        assert!(log.lock().unwrap().is_empty());
        assert!(scope.output(ports.out_left).iter().all(|&s| s == STALE));

        engine.start_processing();
        engine.stop_processing();
        run(&mut engine, &mut scope);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_midi_overflow_reported() {
        let mut config = EngineConfig::default();
        config.server.midi_buffer_size = 2;
        let log = CallLog::default();
        let mut engine =
            Engine::init(&config, recording_pipeline(&log), |_| Ok(hardware())).unwrap();
        engine.start_processing();

        let packets: Vec<_> = (0..3)
            .map(|i| MidiPacket::new(i, &[0x90, 60, 100]))
            .collect();
        let mut scope = ScriptedScope::new(64).with_midi(&packets);
        run(&mut engine, &mut scope);

        let events: Vec<_> = engine.drain_events().collect();
        assert_eq!(events, vec![EngineEvent::MidiOverflow { dropped: 1 }]);
    }

    #[test]
    fn test_sample_rate_change_reaches_stages() {
        let (mut engine, log) = start(hardware());
        engine.start_processing();

        engine.server_mut().unwrap().change_sample_rate(44100);
        assert_eq!(engine.state().sample_rate(), 44100);
        run(&mut engine, &mut ScriptedScope::new(32));

        assert!(log.lock().unwrap().contains(&"rate"));
        let events: Vec<_> = engine.drain_events().collect();
        assert_eq!(events, vec![EngineEvent::SampleRateChanged(44100)]);
    }

    #[test]
    fn test_buffer_size_change() {
        let (mut engine, _log) = start(hardware());
        engine.start_processing();

        engine.server_mut().unwrap().change_buffer_size(1024);
        assert_eq!(engine.state().buffer_size(), 1024);
        run(&mut engine, &mut ScriptedScope::new(512));
        assert_eq!(engine.state().processed_blocks(), 1);

        let events: Vec<_> = engine.drain_events().collect();
        assert_eq!(events, vec![EngineEvent::BufferSizeChanged(1024)]);
    }

    #[test]
    fn test_buffer_size_above_capacity_ignored() {
        let (mut engine, _log) = start(hardware());
        engine.server_mut().unwrap().change_buffer_size(16384);
        assert_eq!(engine.state().buffer_size(), 256);
        engine.server_mut().unwrap().change_buffer_size(0);
        assert_eq!(engine.state().buffer_size(), 256);
    }

    #[test]
    fn test_server_unavailable() {
        let log = CallLog::default();
        let result = Engine::<ScriptedServer>::init(
            &EngineConfig::default(),
            recording_pipeline(&log),
            |_| Err(ServerError::Unavailable("no server".into())),
        );
        assert!(matches!(result, Err(EngineError::ServerUnavailable(_))));
    }

    #[test]
    fn test_activation_failure_closes_client() {
        let server = hardware().fail_activate();
        let journal = server.journal();
        let log = CallLog::default();
        let result = Engine::init(&EngineConfig::default(), recording_pipeline(&log), |_| {
            Ok(server)
        });

        assert!(matches!(result, Err(EngineError::ActivationFailed(_))));
        let journal = journal.lock().unwrap();
        assert_eq!(journal.calls.last().map(String::as_str), Some("close"));
        assert!(journal.registered.is_empty());
    }

    #[test]
    fn test_registration_failure_prevents_wiring() {
        let server = hardware().fail_register("input");
        let journal = server.journal();
        let log = CallLog::default();
        let result = Engine::init(&EngineConfig::default(), recording_pipeline(&log), |_| {
            Ok(server)
        });

        assert!(matches!(
            result,
            Err(EngineError::PortRegistration { port: "input", .. })
        ));
        let journal = journal.lock().unwrap();
        assert!(journal.connections.is_empty());
        assert!(journal.calls.contains(&"close".to_string()));
    }

    #[test]
    fn test_invalid_negotiated_state() {
        let log = CallLog::default();
        let result = Engine::init(&EngineConfig::default(), recording_pipeline(&log), |_| {
            Ok(ScriptedServer::with_default_hardware("groovebox", 48000, 0))
        });
        assert!(matches!(
            result,
            Err(EngineError::InvalidNegotiatedState { buffer_size: 0, .. })
        ));

        let mut config = EngineConfig::default();
        config.server.max_buffer_size = 128;
        let result = Engine::init(&config, recording_pipeline(&log), |_| Ok(hardware()));
        assert!(matches!(
            result,
            Err(EngineError::InvalidNegotiatedState { capacity: 128, .. })
        ));
    }

    #[test]
    fn test_server_shutdown_stops_engine() {
        let (mut engine, log) = start(hardware());
        engine.start_processing();

        engine.server_mut().unwrap().kill();
        assert!(!engine.is_running());
        assert!(!engine.state().is_processing());

        run(&mut engine, &mut ScriptedScope::new(64));
        assert!(log.lock().unwrap().is_empty());

        engine.start_processing();
        assert!(!engine.state().is_processing());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let server = hardware();
        let journal = server.journal();
        let (mut engine, _log) = start(server);

        engine.shutdown();
        engine.shutdown();
        drop(engine);

        let closes = journal
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == "close")
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_input_reaches_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = CallLog::default();
        let mut engine = Engine::init(
            &EngineConfig::default(),
            input_capture_pipeline(&seen, &log),
            |_| Ok(hardware()),
        )
        .unwrap();
        engine.start_processing();

        let input: Vec<f32> = (0..32).map(|i| i as f32 * 0.01).collect();
        let mut scope = ScriptedScope::new(32).with_input(input.clone());
        run(&mut engine, &mut scope);

        assert_eq!(*seen.lock().unwrap(), input);
    }

    #[test]
    fn test_oversized_block_logs_error() {
        let (mut engine, _log) = start(hardware());
        engine.start_processing();

        let output = capture_logs(|| run(&mut engine, &mut ScriptedScope::new(512)));
        assert!(output.contains("ERROR"));
        assert!(output.contains("Block of 512 frames exceeds buffer size 256"));
    }

    #[test]
    fn test_server_log_forwarded() {
        let (engine, _log) = start(hardware());
        let server = engine.server().unwrap();

        let output = capture_logs(|| {
            server.emit_log(ServerLogLevel::Error, "xrun detected");
            server.emit_log(ServerLogLevel::Info, "period 256");
        });
        assert!(output.contains("ERROR"));
        assert!(output.contains("server: xrun detected"));
        assert!(output.contains("INFO"));
        assert!(output.contains("server: period 256"));
    }

    #[test]
    fn test_rejected_block_event_logged() {
        let output = capture_logs(|| {
            log_event(EngineEvent::BlockRejected {
                nframes: 1024,
                buffer_size: 256,
            })
        });
        assert!(output.contains("ERROR"));
        assert!(output.contains("Skipped a block of 1024 frames (buffer size 256)"));
    }

    #[tokio::test]
    async fn test_run_until_stop_shuts_down() {
        let server = hardware();
        let journal = server.journal();
        let (mut engine, _log) = start(server);
        engine.start_processing();

        engine
            .run_until(std::future::ready(()), Duration::from_millis(5))
            .await;

        assert!(!engine.is_running());
        assert!(engine.server().is_none());
        let journal = journal.lock().unwrap();
        assert_eq!(journal.calls.last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn test_run_until_returns_when_server_shuts_down() {
        let (mut engine, _log) = start(hardware());
        engine.start_processing();
        engine.server_mut().unwrap().kill();

        engine
            .run_until(std::future::pending(), Duration::from_millis(5))
            .await;

        assert!(engine.server().is_none());
    }

    #[tokio::test]
    async fn test_run_until_drains_events() {
        let (mut engine, _log) = start(hardware());
        engine.start_processing();
        run(&mut engine, &mut ScriptedScope::new(512));

        engine
            .run_until(std::future::ready(()), Duration::from_millis(5))
            .await;

        assert_eq!(engine.drain_events().count(), 0);
    }
}
