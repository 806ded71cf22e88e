//! Spectral analysis
//!
//! Short-time Fourier transform of mono audio, remapped onto log-spaced
//! frequency bands and normalized for display.
//!
//! ## Pipeline
//!
//! 1. Frame `col` starts at `col * hop`; frames past the end are zero-padded
//! 2. Hann window + forward real FFT (realfft)
//! 3. Linear FFT bins → `bins` log-spaced bands between `min_hz` and
//!    `min(max_hz, nyquist)`
//! 4. `20·log10(mag + ε)`, then mapped onto [0, 1] against the loudest cell
//!    with a fixed dynamic range
//!
//! The realfft backend lives behind the `spectrogram` feature. Without it
//! `SpectralAnalyzer::new` fails with `AnalysisUnavailable`.

use std::sync::atomic::AtomicBool;
#[cfg(feature = "spectrogram")]
use std::sync::atomic::Ordering;
#[cfg(feature = "spectrogram")]
use std::sync::Arc;

#[cfg(feature = "spectrogram")]
use realfft::{RealFftPlanner, RealToComplex};

use crate::config::SpectrogramConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{SpectrogramArtifact, DEFAULT_BATCH_SIZE};
#[cfg(feature = "spectrogram")]
use crate::audio_file::duration_ms;

/// Added before taking the log so silence stays finite
const MAGNITUDE_EPSILON: f32 = 1e-10;

/// Loudest band magnitude below which the whole grid counts as silence
const SILENCE_THRESHOLD: f32 = 1e-7;

/// Number of columns produced for `len` samples at `hop`
pub fn column_count(len: usize, hop: usize) -> usize {
    if hop == 0 {
        return 0;
    }
    len.div_ceil(hop)
}

// =============================================================================
// Band Layout
// =============================================================================

/// How one band is read out of the linear spectrum
#[derive(Debug, Clone, Copy, PartialEq)]
enum BandSource {
    /// Mean of FFT bins `[start, end)`
    Mean { start: usize, end: usize },
    /// Band narrower than one FFT bin: interpolate between `lower` and `lower + 1`
    Interpolate { lower: usize, frac: f32 },
}

/// Mapping from FFT bins to log-spaced bands for one sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct BandLayout {
    edges: Vec<f32>,
    centers: Vec<f32>,
    sources: Vec<BandSource>,
    fft_bins: usize,
}

impl BandLayout {
    pub fn new(config: &SpectrogramConfig, sample_rate: u32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let fmax = config.max_hz.min(nyquist);
        // Very low sample rates can push Nyquist under min_hz
        let fmin = config.min_hz.min(fmax * 0.5).max(f32::MIN_POSITIVE);
        let bins = config.bins;
        let fft_bins = config.fft_size / 2 + 1;
        let bin_hz = sample_rate as f32 / config.fft_size as f32;

        let ratio = fmax / fmin;
        let edges: Vec<f32> = (0..=bins)
            .map(|b| fmin * ratio.powf(b as f32 / bins as f32))
            .collect();

        let mut centers = Vec::with_capacity(bins);
        let mut sources = Vec::with_capacity(bins);
        for band in edges.windows(2) {
            let (lo_hz, hi_hz) = (band[0], band[1]);
            let center_hz = (lo_hz * hi_hz).sqrt();
            centers.push(center_hz);

            let start = (lo_hz / bin_hz).ceil() as usize;
            let end = ((hi_hz / bin_hz).ceil() as usize).min(fft_bins);
            if end > start {
                sources.push(BandSource::Mean { start, end });
            } else {
                let position = center_hz / bin_hz;
                let lower = (position.floor() as usize).min(fft_bins.saturating_sub(1));
                sources.push(BandSource::Interpolate {
                    lower,
                    frac: (position - lower as f32).clamp(0.0, 1.0),
                });
            }
        }

        Self {
            edges,
            centers,
            sources,
            fft_bins,
        }
    }

    /// Band edges in Hz, `len() + 1` values
    pub fn edges(&self) -> &[f32] {
        &self.edges
    }

    /// Geometric band centers in Hz
    pub fn centers(&self) -> &[f32] {
        &self.centers
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Collapse one linear magnitude spectrum into band values
    fn apply(&self, spectrum: &[f32], out: &mut [f32]) {
        debug_assert_eq!(spectrum.len(), self.fft_bins);
        for (value, source) in out.iter_mut().zip(&self.sources) {
            *value = match *source {
                BandSource::Mean { start, end } => {
                    spectrum[start..end].iter().sum::<f32>() / (end - start) as f32
                }
                BandSource::Interpolate { lower, frac } => {
                    let upper = (lower + 1).min(self.fft_bins - 1);
                    spectrum[lower] * (1.0 - frac) + spectrum[upper] * frac
                }
            };
        }
    }
}

// =============================================================================
// Analyzer
// =============================================================================

/// STFT analyzer with a pre-planned FFT
pub struct SpectralAnalyzer {
    config: SpectrogramConfig,
    batch_size: usize,
    #[cfg(feature = "spectrogram")]
    fft: Arc<dyn RealToComplex<f32>>,
    #[cfg(feature = "spectrogram")]
    window: Vec<f32>,
}

impl SpectralAnalyzer {
    /// Plan the FFT for `config`
    ///
    /// Fails with `AnalysisUnavailable` when built without the realfft
    /// backend, or `Config` when the parameters cannot describe a valid STFT.
    pub fn new(config: &SpectrogramConfig, batch_size: usize) -> EngineResult<Self> {
        validate(config)?;
        let batch_size = if batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };

        #[cfg(feature = "spectrogram")]
        {
            let mut planner = RealFftPlanner::<f32>::new();
            let fft = planner.plan_fft_forward(config.fft_size);

            // Periodic Hann window
            let n = config.fft_size;
            let window: Vec<f32> = (0..n)
                .map(|i| {
                    let phase = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
                    0.5 * (1.0 - phase.cos())
                })
                .collect();

            log::debug!(
                "[SPECTRAL] Planned FFT: size {}, hop {}, {} bands",
                config.fft_size,
                config.hop_length,
                config.bins
            );

            Ok(Self {
                config: config.clone(),
                batch_size,
                fft,
                window,
            })
        }

        #[cfg(not(feature = "spectrogram"))]
        {
            let _ = batch_size;
            Err(EngineError::AnalysisUnavailable(
                "built without the spectrogram feature".to_string(),
            ))
        }
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Compute the normalized magnitude grid
    ///
    /// `progress(current, total)` counts frames and is called after every
    /// batch; cancellation is checked before each batch.
    #[cfg(feature = "spectrogram")]
    pub fn analyze<F>(
        &self,
        samples: &[f32],
        sample_rate: u32,
        cancel: &AtomicBool,
        mut progress: F,
    ) -> EngineResult<SpectrogramArtifact>
    where
        F: FnMut(usize, usize),
    {
        let n_fft = self.config.fft_size;
        let hop = self.config.hop_length;
        let layout = BandLayout::new(&self.config, sample_rate);
        let bins = layout.len();
        let columns = column_count(samples.len(), hop);

        let mut grid = vec![0.0f32; bins * columns];
        let norm_factor = 1.0 / (n_fft as f32).sqrt();

        let mut frame_buf = vec![0.0f32; n_fft];
        let mut spectrum = self.fft.make_output_vec();
        let mut scratch = self.fft.make_scratch_vec();
        let mut magnitudes = vec![0.0f32; spectrum.len()];
        let mut band_values = vec![0.0f32; bins];
        let mut loudest = 0.0f32;

        let mut col = 0;
        while col < columns {
            if cancel.load(Ordering::Acquire) {
                return Err(EngineError::Cancelled);
            }

            let batch_end = (col + self.batch_size).min(columns);
            for frame in col..batch_end {
                let start = frame * hop;
                let available = samples.len().saturating_sub(start).min(n_fft);
                for i in 0..n_fft {
                    frame_buf[i] = if i < available {
                        samples[start + i] * self.window[i]
                    } else {
                        0.0
                    };
                }

                self.fft
                    .process_with_scratch(&mut frame_buf, &mut spectrum, &mut scratch)
                    .map_err(|e| {
                        EngineError::AnalysisUnavailable(format!("FFT failed: {:?}", e))
                    })?;

                for (mag, c) in magnitudes.iter_mut().zip(&spectrum) {
                    *mag = c.norm() * norm_factor;
                }
                layout.apply(&magnitudes, &mut band_values);

                for (band, &value) in band_values.iter().enumerate() {
                    loudest = loudest.max(value);
                    grid[band * columns + frame] = 20.0 * (value + MAGNITUDE_EPSILON).log10();
                }
            }

            col = batch_end;
            progress(col, columns);
        }

        normalize(&mut grid, loudest, self.config.dynamic_range_db);

        let duration = duration_ms(samples.len(), sample_rate);
        SpectrogramArtifact::from_grid(
            grid,
            bins,
            columns,
            layout.centers().to_vec(),
            hop,
            sample_rate,
            duration,
        )
        .ok_or_else(|| EngineError::AnalysisUnavailable("spectrogram grid shape mismatch".into()))
    }

    #[cfg(not(feature = "spectrogram"))]
    pub fn analyze<F>(
        &self,
        _samples: &[f32],
        _sample_rate: u32,
        _cancel: &AtomicBool,
        _progress: F,
    ) -> EngineResult<SpectrogramArtifact>
    where
        F: FnMut(usize, usize),
    {
        Err(EngineError::AnalysisUnavailable(
            "built without the spectrogram feature".to_string(),
        ))
    }
}

fn validate(config: &SpectrogramConfig) -> EngineResult<()> {
    if config.fft_size < 2 || config.fft_size % 2 != 0 {
        return Err(EngineError::Config(format!(
            "fft_size must be even and at least 2, got {}",
            config.fft_size
        )));
    }
    if config.hop_length == 0 {
        return Err(EngineError::Config("hop_length must be positive".into()));
    }
    if config.bins == 0 {
        return Err(EngineError::Config("bins must be positive".into()));
    }
    if !(config.min_hz > 0.0 && config.max_hz > config.min_hz) {
        return Err(EngineError::Config(format!(
            "frequency range {}..{} Hz is invalid",
            config.min_hz, config.max_hz
        )));
    }
    if config.dynamic_range_db <= 0.0 {
        return Err(EngineError::Config("dynamic_range_db must be positive".into()));
    }
    Ok(())
}

/// Map dB values onto [0, 1]: the loudest cell is 1, `range_db` below it is 0
#[cfg_attr(not(feature = "spectrogram"), allow(dead_code))]
fn normalize(grid: &mut [f32], loudest: f32, range_db: f32) {
    if loudest < SILENCE_THRESHOLD {
        grid.iter_mut().for_each(|v| *v = 0.0);
        return;
    }

    let top_db = 20.0 * (loudest + MAGNITUDE_EPSILON).log10();
    let floor_db = top_db - range_db;
    for value in grid.iter_mut() {
        *value = ((*value - floor_db) / range_db).clamp(0.0, 1.0);
    }
}
