//! Engine settings
//!
//! Every field has a default, and `#[serde(default)]` lets a config file
//! override only what it mentions.

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_BATCH_SIZE, DEFAULT_COLUMN_COUNT};

/// Default cache index file name, one per audio directory
pub const DEFAULT_CACHE_FILE_NAME: &str = ".ripple-peaks.json";

/// Which peak kernel to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelPreference {
    /// Detect CPU capabilities at startup
    #[default]
    Auto,
    /// Always use the plain scalar loop
    Scalar,
    /// Use the lane kernel even if detection would not pick it
    Lanes,
}

/// STFT parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    /// FFT size in samples (power of two)
    pub fft_size: usize,
    /// Hop length between frames in samples
    pub hop_length: usize,
    /// Number of log-spaced frequency bands
    pub bins: usize,
    /// Lowest band edge in Hz
    pub min_hz: f32,
    /// Highest band edge in Hz (clamped to Nyquist)
    pub max_hz: f32,
    /// Range below the loudest cell that maps onto [0, 1], in dB
    pub dynamic_range_db: f32,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_length: 512,
            bins: 128,
            min_hz: 60.0,
            max_hz: 8000.0,
            dynamic_range_db: 80.0,
        }
    }
}

/// Waveform engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of peak columns per file
    /// Default: 2000
    pub column_count: usize,

    /// Columns (or STFT frames) computed between cancellation checks
    /// Default: 100
    pub batch_size: usize,

    /// How long cancel/shutdown waits for a worker before detaching it
    /// Default: 2000 ms
    pub join_timeout_ms: u64,

    /// File name of the per-directory cache index
    pub cache_file_name: String,

    /// Peak kernel selection
    pub kernel: KernelPreference,

    /// Spectrogram parameters
    pub spectrogram: SpectrogramConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            column_count: DEFAULT_COLUMN_COUNT,
            batch_size: DEFAULT_BATCH_SIZE,
            join_timeout_ms: 2000,
            cache_file_name: DEFAULT_CACHE_FILE_NAME.to_string(),
            kernel: KernelPreference::Auto,
            spectrogram: SpectrogramConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Column count with 0 treated as the default
    pub fn effective_column_count(&self) -> usize {
        if self.column_count == 0 {
            DEFAULT_COLUMN_COUNT
        } else {
            self.column_count
        }
    }

    /// Batch size with 0 treated as the default
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }
}
