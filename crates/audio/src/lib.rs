//! Funkraum Audio – Codec, DSP und Geraete-I/O
//!
//! Sende-Seite: Capture-Bloecke (mono 48 kHz f32) laufen durch die
//! [`pipeline::AufnahmePipeline`] (optionaler Entrauscher auf 10 ms-Frames,
//! dann Opus-Encoding auf 20 ms-Frames) und verlassen das Crate als
//! Opus-Pakete. Empfangs-Seite: dekodierte 20 ms-Frames (i16) werden pro
//! SSRC in das [`senke::Mischpult`] eingespeist und im cpal-Callback
//! gemischt.
//!
//! Die Session haengt nur an den Abstraktionen [`capture::CaptureQuelle`]
//! und [`senke::AudioSenke`]; die cpal-Implementierungen sind austauschbar.

pub mod capture;
pub mod codec;
pub mod denoise;
pub mod error;
pub mod pipeline;
pub mod senke;

pub use capture::{CaptureQuelle, CpalQuelle};
pub use codec::{OpusDecoder, OpusEncoder};
pub use denoise::Entrauscher;
pub use error::{AudioError, AudioResult};
pub use pipeline::AufnahmePipeline;
pub use senke::{AudioSenke, CpalSenke, Mischpult};

/// Abtastrate des gesamten Audio-Pfads
pub const SAMPLE_RATE: u32 = 48_000;

/// Frame-Groesse des Opus-Codecs: 20 ms bei 48 kHz Mono
pub const OPUS_FRAME: usize = 960;

/// Frame-Groesse des Entrauschers: 10 ms bei 48 kHz Mono
pub const ENTRAUSCHER_FRAME: usize = 480;
