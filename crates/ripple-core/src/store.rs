//! In-memory artifacts
//!
//! Finished peaks and spectrograms keyed by path. Workers insert, the engine
//! reads and evicts. Artifacts are handed out as `Arc`s so the render
//! surface can hold one while the store moves on.
//!
//! Each artifact is stored with the signature of the file it was computed
//! from, so the engine can tell when the file changed underneath it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::types::{ArtifactKind, FileSignature, PeakArtifact, SpectrogramArtifact};

struct Stored<T> {
    signature: FileSignature,
    artifact: Arc<T>,
}

#[derive(Default)]
pub struct ArtifactStore {
    peaks: RwLock<HashMap<PathBuf, Stored<PeakArtifact>>>,
    spectrograms: RwLock<HashMap<PathBuf, Stored<SpectrogramArtifact>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_peaks(&self, path: PathBuf, signature: FileSignature, artifact: Arc<PeakArtifact>) {
        if let Ok(mut peaks) = self.peaks.write() {
            peaks.insert(path, Stored { signature, artifact });
        }
    }

    pub fn peaks(&self, path: &Path) -> Option<Arc<PeakArtifact>> {
        self.peaks
            .read()
            .ok()?
            .get(path)
            .map(|stored| Arc::clone(&stored.artifact))
    }

    pub fn has_peaks(&self, path: &Path) -> bool {
        self.peaks
            .read()
            .map(|peaks| peaks.contains_key(path))
            .unwrap_or(false)
    }

    /// Drop every peak artifact except the one for `keep`
    pub fn retain_peaks_for(&self, keep: &Path) {
        if let Ok(mut peaks) = self.peaks.write() {
            peaks.retain(|path, _| path == keep);
        }
    }

    pub fn clear_peaks(&self) {
        if let Ok(mut peaks) = self.peaks.write() {
            peaks.clear();
        }
    }

    pub fn insert_spectrogram(
        &self,
        path: PathBuf,
        signature: FileSignature,
        artifact: Arc<SpectrogramArtifact>,
    ) {
        if let Ok(mut spectrograms) = self.spectrograms.write() {
            spectrograms.insert(path, Stored { signature, artifact });
        }
    }

    pub fn spectrogram(&self, path: &Path) -> Option<Arc<SpectrogramArtifact>> {
        self.spectrograms
            .read()
            .ok()?
            .get(path)
            .map(|stored| Arc::clone(&stored.artifact))
    }

    pub fn clear_spectrograms(&self) {
        if let Ok(mut spectrograms) = self.spectrograms.write() {
            spectrograms.clear();
        }
    }

    /// Signature of the file the held `kind` artifact was computed from
    pub fn signature(&self, path: &Path, kind: ArtifactKind) -> Option<FileSignature> {
        match kind {
            ArtifactKind::Peaks => self.peaks.read().ok()?.get(path).map(|s| s.signature),
            ArtifactKind::Spectrogram => {
                self.spectrograms.read().ok()?.get(path).map(|s| s.signature)
            }
        }
    }

    /// Evict the `kind` artifact for `path`; returns whether one was held
    pub fn remove(&self, path: &Path, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Peaks => self
                .peaks
                .write()
                .map(|mut peaks| peaks.remove(path).is_some())
                .unwrap_or(false),
            ArtifactKind::Spectrogram => self
                .spectrograms
                .write()
                .map(|mut spectrograms| spectrograms.remove(path).is_some())
                .unwrap_or(false),
        }
    }

    /// Number of (peak, spectrogram) artifacts held
    pub fn len(&self) -> (usize, usize) {
        let peaks = self.peaks.read().map(|p| p.len()).unwrap_or(0);
        let spectrograms = self.spectrograms.read().map(|s| s.len()).unwrap_or(0);
        (peaks, spectrograms)
    }
}
