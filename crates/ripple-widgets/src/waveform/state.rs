//! Render surface state
//!
//! Holds the artifacts and playback position the canvas draws from. Following
//! the iced 0.14 pattern, state lives at the application level and the view
//! function borrows it. The application feeds it engine events and position
//! updates; the canvas only reads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use iced::widget::canvas;
use ripple_core::{EngineEvent, PeakArtifact, SpectrogramArtifact, WaveformEngine};

use super::layout;

/// What the content layer shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceMode {
    #[default]
    Waveform,
    Spectrogram,
}

/// State behind one waveform surface
///
/// The content layer (waveform or spectrogram plus grid) is cached and only
/// cleared when the artifacts, tempo or mode change. Position updates leave
/// it alone and only move the indicator.
pub struct SurfaceState {
    file: Option<PathBuf>,
    peaks: Option<Arc<PeakArtifact>>,
    spectrogram: Option<Arc<SpectrogramArtifact>>,
    duration_ms: u64,
    position_ms: u64,
    tempo: Option<f64>,
    mode: SurfaceMode,
    loading: bool,
    progress: Option<(usize, usize)>,
    error: Option<String>,
    pub(crate) content: canvas::Cache,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceState {
    pub fn new() -> Self {
        Self {
            file: None,
            peaks: None,
            spectrogram: None,
            duration_ms: 0,
            position_ms: 0,
            tempo: None,
            mode: SurfaceMode::Waveform,
            loading: false,
            progress: None,
            error: None,
            content: canvas::Cache::new(),
        }
    }

    // =========================================================================
    // Engine wiring
    // =========================================================================

    /// Point the surface at a new file and show the loading state
    ///
    /// Previous artifacts are dropped. Call alongside
    /// `WaveformEngine::set_audio_file`, then call `sync` in case the peaks
    /// were already in memory or cached.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) {
        self.file = Some(path.as_ref().to_path_buf());
        self.peaks = None;
        self.spectrogram = None;
        self.duration_ms = 0;
        self.position_ms = 0;
        self.loading = true;
        self.progress = None;
        self.error = None;
        self.content.clear();
    }

    /// Pull whatever the engine already holds for the current file
    pub fn sync(&mut self, engine: &WaveformEngine) {
        let Some(file) = self.file.clone() else {
            return;
        };
        if let Some(peaks) = engine.get_peaks(&file) {
            self.set_peaks(Some(peaks));
        }
        if let Some(spectrogram) = engine.get_spectrogram(&file) {
            self.set_spectrogram(Some(spectrogram));
        }
        self.set_tempo(engine.tempo());
    }

    /// Apply an engine event; returns true if the surface needs a redraw
    ///
    /// Events for files other than the current one are ignored.
    pub fn handle_event(&mut self, event: &EngineEvent, engine: &WaveformEngine) -> bool {
        if self.file.as_deref() != Some(event.path().as_path()) {
            return false;
        }

        match event {
            EngineEvent::Progress { current, total, .. } => {
                if !self.loading {
                    return false;
                }
                self.progress = Some((*current, *total));
                true
            }
            // The loading bar tracks peaks only
            EngineEvent::SpectrogramProgress { .. } => false,
            EngineEvent::Ready { path, .. } => match engine.get_peaks(path) {
                Some(peaks) => {
                    self.set_peaks(Some(peaks));
                    true
                }
                None => {
                    log::debug!("[SURFACE] Ready for {:?} but peaks already evicted", path);
                    false
                }
            },
            EngineEvent::SpectrogramReady { path } => match engine.get_spectrogram(path) {
                Some(spectrogram) => {
                    self.set_spectrogram(Some(spectrogram));
                    true
                }
                None => false,
            },
            EngineEvent::Error { kind, message, .. } => {
                // A failed spectrogram still leaves a usable waveform
                if self.peaks.is_some() {
                    log::warn!("[SURFACE] {}: {}", kind, message);
                    return false;
                }
                self.set_error(Some(format!("{}: {}", kind, message)));
                true
            }
        }
    }

    // =========================================================================
    // Content (invalidates the cache)
    // =========================================================================

    /// Replace the peak artifact; its duration becomes the surface duration
    pub fn set_peaks(&mut self, peaks: Option<Arc<PeakArtifact>>) {
        if let Some(peaks) = &peaks {
            self.duration_ms = peaks.duration_ms;
            self.loading = false;
            self.progress = None;
            self.error = None;
        }
        self.peaks = peaks;
        self.content.clear();
    }

    pub fn set_spectrogram(&mut self, spectrogram: Option<Arc<SpectrogramArtifact>>) {
        if let Some(spectrogram) = &spectrogram {
            if self.duration_ms == 0 {
                self.duration_ms = spectrogram.duration_ms;
            }
        }
        self.spectrogram = spectrogram;
        self.content.clear();
    }

    /// Override the duration, e.g. from the playback engine
    pub fn set_duration(&mut self, duration_ms: u64) {
        if duration_ms != self.duration_ms {
            self.duration_ms = duration_ms;
            self.content.clear();
        }
    }

    /// Set the grid tempo; non-finite or non-positive values hide the grid
    pub fn set_tempo(&mut self, bpm: Option<f64>) {
        let bpm = bpm.filter(|b| b.is_finite() && *b > 0.0);
        if bpm != self.tempo {
            self.tempo = bpm;
            self.content.clear();
        }
    }

    pub fn set_mode(&mut self, mode: SurfaceMode) {
        if mode != self.mode {
            self.mode = mode;
            self.content.clear();
        }
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
        if !loading {
            self.progress = None;
        }
    }

    pub fn set_error(&mut self, error: Option<String>) {
        if error.is_some() {
            self.loading = false;
            self.progress = None;
        }
        self.error = error;
    }

    /// Drop every artifact and return to the blank surface
    pub fn clear(&mut self) {
        let mode = self.mode;
        let tempo = self.tempo;
        *self = Self::new();
        self.mode = mode;
        self.tempo = tempo;
    }

    // =========================================================================
    // Position (overlay only)
    // =========================================================================

    /// Playback position in milliseconds; only the indicator moves
    pub fn set_position(&mut self, position_ms: u64) {
        self.position_ms = position_ms;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn peaks(&self) -> Option<&PeakArtifact> {
        self.peaks.as_deref()
    }

    pub fn spectrogram(&self) -> Option<&SpectrogramArtifact> {
        self.spectrogram.as_deref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn tempo(&self) -> Option<f64> {
        self.tempo
    }

    pub fn mode(&self) -> SurfaceMode {
        self.mode
    }

    /// Mode actually drawn: spectrogram mode falls back to the waveform
    /// until a spectrogram is available
    pub fn effective_mode(&self) -> SurfaceMode {
        match self.mode {
            SurfaceMode::Spectrogram if self.spectrogram.is_some() => SurfaceMode::Spectrogram,
            _ => SurfaceMode::Waveform,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Fraction of the current job done, if the engine reported any
    pub fn progress(&self) -> Option<f32> {
        self.progress
            .filter(|(_, total)| *total > 0)
            .map(|(current, total)| (current as f32 / total as f32).clamp(0.0, 1.0))
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// x of `time_ms` on a surface `width` pixels wide
    pub fn x_for_time(&self, time_ms: u64, width: f32) -> f32 {
        layout::x_for_time(time_ms, self.duration_ms, width)
    }

    /// Timestamp under `x` on a surface `width` pixels wide
    pub fn time_for_x(&self, x: f32, width: f32) -> u64 {
        layout::time_for_x(x, width, self.duration_ms)
    }
}
