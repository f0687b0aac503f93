//! Engine Configuration
//!
//! JSON configuration loaded with serde. Every section has defaults, so an
//! empty object (or no file at all) yields a working engine.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::channels::DEFAULT_EVENT_BUFFER_SIZE;
use crate::engine::midi::DEFAULT_MIDI_BUFFER_SIZE;

/// Largest block the engine can ever process, in frames.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 8192;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Audio server connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// cpal host name (e.g. "JACK", "ALSA"); the default host if unset.
    pub host: Option<String>,
    /// Requested frames per block; the device default if unset.
    pub buffer_size: Option<u32>,
    /// Capacity of every per-block buffer.
    pub max_buffer_size: usize,
    /// MIDI events kept per block.
    pub midi_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            buffer_size: None,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            midi_buffer_size: DEFAULT_MIDI_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Envelope attack in seconds.
    pub attack: f32,
    pub decay: f32,
    /// Sustain level (0-1).
    pub sustain: f32,
    pub release: f32,
    /// Spread between saw voices in cents.
    pub detune: f32,
    pub voices: usize,
    pub level: f32,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.15,
            sustain: 0.7,
            release: 0.25,
            detune: 12.0,
            voices: 5,
            level: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrumsConfig {
    /// Zero-based MIDI channel the kit listens on.
    pub channel: u8,
    pub level: f32,
}

impl Default for DrumsConfig {
    fn default() -> Self {
        Self {
            channel: 9,
            level: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    pub delay_ms: f32,
    pub feedback: f32,
    /// Wet/dry mix (0 = dry, 1 = wet).
    pub mix: f32,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 375.0,
            feedback: 0.35,
            mix: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    pub loop_seconds: f32,
    /// Controller that steps the transport.
    pub record_cc: u8,
    /// Controller that stops and erases the loop.
    pub clear_cc: u8,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            loop_seconds: 8.0,
            record_cc: 64,
            clear_cc: 65,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub master: f32,
    /// Stereo position of the instrument bus (-1 left, 1 right).
    pub pan: f32,
    /// Level of the live input in the mix.
    pub input_monitor: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            master: 0.8,
            pan: 0.0,
            input_monitor: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub enabled: bool,
    pub level: f32,
    pub beats_per_bar: u32,
    pub toggle_cc: u8,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 0.5,
            beats_per_bar: 4,
            toggle_cc: 66,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name the engine registers under on the audio server.
    pub client_name: String,
    pub server: ServerConfig,
    /// Capacity of the real-time notification ring.
    pub notification_capacity: usize,
    pub tempo_bpm: f32,
    pub synth: SynthConfig,
    pub drums: DrumsConfig,
    pub effect: EffectConfig,
    pub tape: TapeConfig,
    pub mixer: MixerConfig,
    pub metronome: MetronomeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_name: "groovebox".to_string(),
            server: ServerConfig::default(),
            notification_capacity: DEFAULT_EVENT_BUFFER_SIZE,
            tempo_bpm: 120.0,
            synth: SynthConfig::default(),
            drums: DrumsConfig::default(),
            effect: EffectConfig::default(),
            tape: TapeConfig::default(),
            mixer: MixerConfig::default(),
            metronome: MetronomeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Checks every value the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.into()))
        }

        if self.client_name.trim().is_empty() {
            return invalid("client_name must not be empty");
        }
        if self.server.max_buffer_size == 0 {
            return invalid("server.max_buffer_size must be positive");
        }
        if let Some(size) = self.server.buffer_size {
            if size == 0 || size as usize > self.server.max_buffer_size {
                return invalid(format!(
                    "server.buffer_size must be in 1..={}",
                    self.server.max_buffer_size
                ));
            }
        }
        if self.server.midi_buffer_size == 0 {
            return invalid("server.midi_buffer_size must be positive");
        }
        if self.notification_capacity == 0 {
            return invalid("notification_capacity must be positive");
        }
        if !(self.tempo_bpm > 0.0) {
            return invalid("tempo_bpm must be positive");
        }
        if self.synth.voices == 0 {
            return invalid("synth.voices must be positive");
        }
        if !(0.0..=1.0).contains(&self.synth.sustain) {
            return invalid("synth.sustain must be in 0..=1");
        }
        if self.drums.channel > 15 {
            return invalid("drums.channel must be in 0..=15");
        }
        if !(0.0..1.0).contains(&self.effect.feedback) {
            return invalid("effect.feedback must be in 0..1");
        }
        if !(0.0..=1.0).contains(&self.effect.mix) {
            return invalid("effect.mix must be in 0..=1");
        }
        if self.effect.delay_ms < 0.0 {
            return invalid("effect.delay_ms must not be negative");
        }
        if !(self.tape.loop_seconds > 0.0) {
            return invalid("tape.loop_seconds must be positive");
        }
        if !(-1.0..=1.0).contains(&self.mixer.pan) {
            return invalid("mixer.pan must be in -1..=1");
        }
        if self.metronome.beats_per_bar == 0 {
            return invalid("metronome.beats_per_bar must be positive");
        }
        let controllers = [
            ("tape.record_cc", self.tape.record_cc),
            ("tape.clear_cc", self.tape.clear_cc),
            ("metronome.toggle_cc", self.metronome.toggle_cc),
        ];
        for (name, cc) in controllers {
            if cc > 127 {
                return invalid(format!("{} must be in 0..=127", name));
            }
        }
        Ok(())
    }
}
