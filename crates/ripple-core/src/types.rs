//! Common types for Ripple
//!
//! File identity (`AudioFileRef`, `FileSignature`) and the two artifacts the
//! engine produces: the persisted `PeakArtifact` and the session-only
//! `SpectrogramArtifact`.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Default number of peak columns per file
pub const DEFAULT_COLUMN_COUNT: usize = 2000;

/// Default number of columns computed between cancellation checks
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Which artifact a generation job produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Amplitude envelope (persisted)
    Peaks,
    /// STFT magnitude grid (memory only)
    Spectrogram,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peaks => write!(f, "peaks"),
            Self::Spectrogram => write!(f, "spectrogram"),
        }
    }
}

// =============================================================================
// File Identity
// =============================================================================

/// Size + modification time of a file, used to validate cache entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSignature {
    /// File size in bytes
    pub size: u64,
    /// Modification time in milliseconds since the UNIX epoch
    pub mtime: u64,
}

/// A file captured at a point in time
///
/// Created on the first generation request for a path. The signature is
/// never refreshed; capture a new ref to observe changes on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFileRef {
    path: PathBuf,
    signature: FileSignature,
}

impl AudioFileRef {
    /// Stat `path` and capture its signature
    ///
    /// A missing or unreadable file is a `DecodeFailed` error, since nothing
    /// downstream could decode it either.
    pub fn capture<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| EngineError::DecodeFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !metadata.is_file() {
            return Err(EngineError::DecodeFailed {
                path: path.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }

        // Filesystems without mtime support report 0, which still compares stably
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            signature: FileSignature {
                size: metadata.len(),
                mtime,
            },
        })
    }

    /// Build a ref from already-known parts
    pub fn from_parts(path: PathBuf, signature: FileSignature) -> Self {
        Self { path, signature }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn signature(&self) -> FileSignature {
        self.signature
    }

    /// File name used as the key inside the directory index
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    /// Directory that scopes this file's cache index
    pub fn directory(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

// =============================================================================
// Peak Artifact
// =============================================================================

/// Downsampled amplitude envelope of a whole file
///
/// One `(min, max)` pair per column. Shared read-only with the render surface
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakArtifact {
    /// Per-column (min, max) sample values in [-1.0, 1.0]
    pub peaks: Vec<(f32, f32)>,
    /// Total duration of the source audio in milliseconds
    pub duration_ms: u64,
    /// Column count that was requested when this artifact was produced
    pub column_count: usize,
}

impl PeakArtifact {
    /// Artifact for zero-length audio
    pub fn empty(column_count: usize) -> Self {
        Self {
            peaks: Vec::new(),
            duration_ms: 0,
            column_count,
        }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    /// Absolute peak per column: `max(|min|, |max|)`
    pub fn magnitudes(&self) -> impl Iterator<Item = f32> + '_ {
        self.peaks.iter().map(|&(min, max)| min.abs().max(max.abs()))
    }
}

// =============================================================================
// Spectrogram Artifact
// =============================================================================

/// Normalized STFT magnitude grid, indexed `[bin][column]`
///
/// Row 0 is the lowest frequency band. Values are in [0.0, 1.0] and can be
/// fed straight into a colormap.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramArtifact {
    /// Row-major magnitudes, `bins * columns` values
    magnitudes: Vec<f32>,
    bins: usize,
    columns: usize,
    /// Center frequency of each band in Hz
    pub band_frequencies: Vec<f32>,
    /// Hop length used between columns, in samples
    pub hop_length: usize,
    /// Source sample rate in Hz
    pub sample_rate: u32,
    /// Total duration of the source audio in milliseconds
    pub duration_ms: u64,
}

impl SpectrogramArtifact {
    /// Build an artifact from a row-major grid
    ///
    /// Returns `None` if `magnitudes.len() != bins * columns`.
    pub fn from_grid(
        magnitudes: Vec<f32>,
        bins: usize,
        columns: usize,
        band_frequencies: Vec<f32>,
        hop_length: usize,
        sample_rate: u32,
        duration_ms: u64,
    ) -> Option<Self> {
        if magnitudes.len() != bins * columns {
            return None;
        }
        Some(Self {
            magnitudes,
            bins,
            columns,
            band_frequencies,
            hop_length,
            sample_rate,
            duration_ms,
        })
    }

    /// Number of frequency bands (rows)
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Number of time columns
    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns == 0
    }

    /// Magnitude at `[bin][column]`, `None` when out of range
    pub fn get(&self, bin: usize, column: usize) -> Option<f32> {
        if bin >= self.bins || column >= self.columns {
            return None;
        }
        self.magnitudes.get(bin * self.columns + column).copied()
    }

    /// All columns of one frequency band
    pub fn row(&self, bin: usize) -> &[f32] {
        if bin >= self.bins {
            return &[];
        }
        &self.magnitudes[bin * self.columns..(bin + 1) * self.columns]
    }
}
