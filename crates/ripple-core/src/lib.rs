//! Ripple Core - waveform and spectrogram generation engine
//!
//! Decodes audio, reduces it to a fixed-width peak envelope (and optionally
//! a log-frequency spectrogram) on background threads, and keeps peaks in a
//! per-directory JSON cache so a file is only analyzed once.
//!
//! Start with [`engine::WaveformEngine`].

pub mod audio_file;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod peaks;
pub mod spectral;
pub mod store;
pub mod types;
pub mod worker;

pub use engine::{GenerateOutcome, WaveformEngine};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use events::EngineEvent;
pub use types::*;
