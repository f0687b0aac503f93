//! Groovebox Library
//!
//! Real-time audio engine for a MIDI groovebox: an audio server binding,
//! port wiring, MIDI decoding and a fixed pipeline of instrument stages.

pub mod config;
pub mod dsp;
pub mod engine;
pub mod modules;
