use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam::channel::Receiver;

use crate::audio_file::AudioLoader;
use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorKind};
use crate::events::{EngineEvent, EventBus};
use crate::peaks::{select_kernel, PeakReducer};
use crate::spectral::SpectralAnalyzer;
use crate::store::ArtifactStore;
use crate::types::{ArtifactKind, AudioFileRef, PeakArtifact, SpectrogramArtifact};
use crate::worker::{GenerationJob, JobContext};

/// Result of a `generate` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateOutcome {
    /// A new worker was spawned; it reads the cache index before decoding
    Started,
    /// A worker for this file is already running
    Coalesced,
    /// Peaks for the current version of the file are already in memory
    AlreadyReady,
    /// Rejected before any worker ran; an `Error` event was published
    Failed(ErrorKind),
}

/// Selection state driven by the surrounding application
#[derive(Debug, Default)]
struct ViewState {
    active_file: Option<PathBuf>,
    directory: Option<PathBuf>,
    spectrogram_mode: bool,
    tempo: Option<f64>,
}

type JobKey = (PathBuf, ArtifactKind);

/// Waveform generation engine
///
/// All methods take `&self`; the engine can be shared behind an `Arc`
/// between the UI thread and anything else issuing requests.
pub struct WaveformEngine {
    config: EngineConfig,
    ctx: Arc<JobContext>,
    jobs: Mutex<HashMap<JobKey, GenerationJob>>,
    view: Mutex<ViewState>,
    shut_down: AtomicBool,
}

impl WaveformEngine {
    /// Engine with every decoder compiled into this build
    pub fn new(config: EngineConfig) -> Self {
        let cache = Arc::new(CacheStore::new(config.cache_file_name.clone()));
        Self::with_parts(config, AudioLoader::detect(), cache)
    }

    /// Engine with a caller-chosen loader and cache store
    pub fn with_parts(config: EngineConfig, loader: AudioLoader, cache: Arc<CacheStore>) -> Self {
        let kernel = select_kernel(config.kernel);
        let reducer = PeakReducer::new(kernel, config.effective_batch_size());

        let analyzer = match SpectralAnalyzer::new(&config.spectrogram, config.effective_batch_size()) {
            Ok(analyzer) => Some(Arc::new(analyzer)),
            Err(e) => {
                log::warn!("[ENGINE] Spectrogram mode unavailable, peaks only: {}", e);
                None
            }
        };

        let ctx = Arc::new(JobContext {
            loader: Arc::new(loader),
            reducer,
            analyzer,
            cache,
            store: Arc::new(ArtifactStore::new()),
            events: Arc::new(EventBus::new()),
            column_count: config.effective_column_count(),
            join_timeout: Duration::from_millis(config.join_timeout_ms),
        });

        log::info!(
            "[ENGINE] Ready: {} columns, {} kernel, decoders {:?}",
            ctx.column_count,
            ctx.reducer.kernel_name(),
            ctx.loader.decoder_names()
        );

        Self {
            config,
            ctx,
            jobs: Mutex::new(HashMap::new()),
            view: Mutex::new(ViewState::default()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.ctx.cache
    }

    /// New receiver for every event published from now on
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.ctx.events.subscribe()
    }

    // =========================================================================
    // Peaks
    // =========================================================================

    /// Make peaks for `path` available, starting a worker if needed
    ///
    /// Safe to call repeatedly: a second call while the first is in flight
    /// coalesces onto the running worker. The caller only pays for a stat;
    /// the cache index is read by the worker. Peaks held for an older
    /// version of the file (different size or mtime) are dropped and
    /// regenerated.
    pub fn generate<P: AsRef<Path>>(&self, path: P) -> GenerateOutcome {
        let path = path.as_ref();
        if self.shut_down.load(Ordering::Acquire) {
            log::warn!("[ENGINE] Ignoring request for {:?} after shutdown", path);
            return GenerateOutcome::Failed(ErrorKind::Internal);
        }

        match AudioFileRef::capture(path) {
            Ok(file) => self.ensure(file, ArtifactKind::Peaks),
            Err(e) => {
                self.ctx.store.remove(path, ArtifactKind::Peaks);
                self.reject(path, e)
            }
        }
    }

    pub fn is_ready<P: AsRef<Path>>(&self, path: P) -> bool {
        self.ctx.store.has_peaks(path.as_ref())
    }

    pub fn get_peaks<P: AsRef<Path>>(&self, path: P) -> Option<Arc<PeakArtifact>> {
        self.ctx.store.peaks(path.as_ref())
    }

    /// Duration in milliseconds, once peaks are available
    pub fn get_duration<P: AsRef<Path>>(&self, path: P) -> Option<u64> {
        self.ctx.store.peaks(path.as_ref()).map(|p| p.duration_ms)
    }

    // =========================================================================
    // Active File & Spectrogram
    // =========================================================================

    /// Make `path` the active file
    ///
    /// Discards in-memory artifacts of every other file, requests peaks and,
    /// in spectrogram mode, a spectrogram for the new file.
    pub fn set_audio_file<P: AsRef<Path>>(&self, path: P) -> GenerateOutcome {
        let path = path.as_ref().to_path_buf();
        let spectrogram_mode = {
            let mut view = self.lock_view();
            if view.active_file.as_deref() != Some(path.as_path()) {
                log::debug!("[ENGINE] Active file -> {:?}", path);
            }
            view.active_file = Some(path.clone());
            view.spectrogram_mode
        };

        self.ctx.store.retain_peaks_for(&path);
        self.ctx.store.clear_spectrograms();
        self.cancel_matching(|(job_path, kind)| {
            *kind == ArtifactKind::Spectrogram && job_path != &path
        });

        let outcome = self.generate(&path);
        if spectrogram_mode {
            self.request_spectrogram(&path);
        }
        outcome
    }

    pub fn active_file(&self) -> Option<PathBuf> {
        self.lock_view().active_file.clone()
    }

    /// Switch between peak and spectrogram rendering
    ///
    /// Toggling discards any computed spectrogram. Enabling starts analysis
    /// of the active file.
    pub fn set_spectrogram_mode(&self, enabled: bool) {
        let active = {
            let mut view = self.lock_view();
            if view.spectrogram_mode == enabled {
                return;
            }
            view.spectrogram_mode = enabled;
            view.active_file.clone()
        };

        log::info!("[ENGINE] Spectrogram mode {}", if enabled { "on" } else { "off" });
        self.ctx.store.clear_spectrograms();
        self.cancel_matching(|(_, kind)| *kind == ArtifactKind::Spectrogram);

        if let (true, Some(path)) = (enabled, active) {
            self.request_spectrogram(&path);
        }
    }

    pub fn spectrogram_mode(&self) -> bool {
        self.lock_view().spectrogram_mode
    }

    pub fn get_spectrogram<P: AsRef<Path>>(&self, path: P) -> Option<Arc<SpectrogramArtifact>> {
        self.ctx.store.spectrogram(path.as_ref())
    }

    /// Whether this build can produce spectrograms at all
    pub fn spectrogram_available(&self) -> bool {
        self.ctx.analyzer.is_some()
    }

    fn request_spectrogram(&self, path: &Path) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        if self.ctx.analyzer.is_none() {
            let err = EngineError::AnalysisUnavailable(
                "spectral backend not compiled in; showing peaks".to_string(),
            );
            self.reject(path, err);
            return;
        }

        match AudioFileRef::capture(path) {
            Ok(file) => {
                self.ensure(file, ArtifactKind::Spectrogram);
            }
            Err(e) => {
                self.ctx.store.remove(path, ArtifactKind::Spectrogram);
                self.reject(path, e);
            }
        }
    }

    /// Serve `kind` for `file` from memory, join a running job, or start one
    ///
    /// Memory and running jobs only count if they were made from the same
    /// file signature; stale ones are evicted or cancelled.
    fn ensure(&self, file: AudioFileRef, kind: ArtifactKind) -> GenerateOutcome {
        let path = file.path().to_path_buf();
        let signature = file.signature();

        let mut jobs = self.lock_jobs();
        reap_finished(&mut jobs);

        match self.ctx.store.signature(&path, kind) {
            Some(held) if held == signature => return GenerateOutcome::AlreadyReady,
            Some(_) => {
                log::info!("[ENGINE] {:?} changed on disk, regenerating {}", path, kind);
                self.ctx.store.remove(&path, kind);
            }
            None => {}
        }

        let key = (path.clone(), kind);
        let stale = match jobs.get(&key) {
            Some(job) if job.signature() == signature => {
                log::debug!("[ENGINE] Coalescing {} request for {:?}", kind, path);
                return GenerateOutcome::Coalesced;
            }
            Some(_) => jobs.remove(&key),
            None => None,
        };
        if let Some(job) = &stale {
            job.cancel();
        }

        let started = GenerationJob::start(file, kind, Arc::clone(&self.ctx));
        let result = started.map(|job| {
            jobs.insert(key, job);
        });
        drop(jobs);

        // Joined outside the lock; it was cancelled above
        drop(stale);

        match result {
            Ok(()) => GenerateOutcome::Started,
            Err(e) => self.reject(&path, e),
        }
    }

    // =========================================================================
    // Tempo Grid
    // =========================================================================

    /// Tempo for the measure-grid overlay; non-positive values clear it
    pub fn set_tempo(&self, bpm: Option<f64>) {
        let bpm = bpm.filter(|b| b.is_finite() && *b > 0.0);
        self.lock_view().tempo = bpm;
    }

    pub fn tempo(&self) -> Option<f64> {
        self.lock_view().tempo
    }

    // =========================================================================
    // Cancellation & Lifecycle
    // =========================================================================

    /// Cancel every job for `path`; returns whether any was running
    ///
    /// The path can be requested again immediately afterwards.
    pub fn cancel<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        self.cancel_matching(|(job_path, _)| job_path == path) > 0
    }

    pub fn cancel_all(&self) {
        let cancelled = self.cancel_matching(|_| true);
        if cancelled > 0 {
            log::info!("[ENGINE] Cancelled {} jobs", cancelled);
        }
    }

    /// Switch to another directory: stops all work, drops in-memory artifacts
    pub fn set_directory<P: AsRef<Path>>(&self, dir: P) {
        let dir = dir.as_ref().to_path_buf();
        self.cancel_all();
        self.ctx.store.clear_peaks();
        self.ctx.store.clear_spectrograms();

        let mut view = self.lock_view();
        log::info!("[ENGINE] Directory -> {:?}", dir);
        view.directory = Some(dir);
        view.active_file = None;
    }

    pub fn directory(&self) -> Option<PathBuf> {
        self.lock_view().directory.clone()
    }

    /// Stop all workers; later requests are refused. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[ENGINE] Shutting down");
        self.cancel_all();
    }

    /// Number of workers whose threads are still running
    pub fn active_jobs(&self) -> usize {
        let mut jobs = self.lock_jobs();
        reap_finished(&mut jobs);
        jobs.len()
    }

    /// Cancel and join every job whose key matches; returns how many
    fn cancel_matching<F>(&self, matches: F) -> usize
    where
        F: Fn(&JobKey) -> bool,
    {
        let mut removed: Vec<GenerationJob> = {
            let mut jobs = self.lock_jobs();
            let keys: Vec<JobKey> = jobs.keys().filter(|k| matches(k)).cloned().collect();
            keys.iter().filter_map(|k| jobs.remove(k)).collect()
        };

        // Flag everything first so workers stop in parallel
        for job in &removed {
            job.cancel();
        }
        for job in &mut removed {
            // A timeout is already logged; the thread is detached and silent
            let _ = job.join(self.ctx.join_timeout);
        }
        removed.len()
    }

    /// Publish an error for a request that never reached a worker
    fn reject(&self, path: &Path, err: EngineError) -> GenerateOutcome {
        log::warn!("[ENGINE] Rejected {:?}: {}", path, err);
        self.ctx
            .events
            .publish(EngineEvent::error(path.to_path_buf(), &err));
        GenerateOutcome::Failed(err.kind())
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<JobKey, GenerationJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_view(&self) -> MutexGuard<'_, ViewState> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for WaveformEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drop jobs whose threads have exited so their slot can be reused
fn reap_finished(jobs: &mut HashMap<JobKey, GenerationJob>) {
    jobs.retain(|_, job| !job.is_finished());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::test_support::write_sine_wav;
    use crate::audio_file::{AudioDecoder, DecodedAudio, WavDecoder};
    use crate::error::EngineResult;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// WAV decoder that counts calls and can be held shut
    struct CountingDecoder {
        calls: Arc<AtomicUsize>,
        gate: Arc<AtomicBool>,
    }

    impl AudioDecoder for CountingDecoder {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn accepts(&self, path: &Path, header: &[u8]) -> bool {
            WavDecoder.accepts(path, header)
        }
        fn decode(&self, path: &Path) -> EngineResult<DecodedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            while !self.gate.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(2));
            }
            WavDecoder.decode(path)
        }
    }

    struct Harness {
        engine: WaveformEngine,
        calls: Arc<AtomicUsize>,
        gate: Arc<AtomicBool>,
    }

    fn harness(config: EngineConfig, gate_open: bool) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(AtomicBool::new(gate_open));
        let loader = AudioLoader::with_decoders(vec![Box::new(CountingDecoder {
            calls: Arc::clone(&calls),
            gate: Arc::clone(&gate),
        })]);
        let cache = Arc::new(CacheStore::new(config.cache_file_name.clone()));
        Harness {
            engine: WaveformEngine::with_parts(config, loader, cache),
            calls,
            gate,
        }
    }

    /// Collect events until one matches `done`, or panic after `timeout`
    fn wait_for<F>(rx: &Receiver<EngineEvent>, timeout: Duration, done: F) -> Vec<EngineEvent>
    where
        F: Fn(&EngineEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = rx
                .recv_timeout(remaining)
                .unwrap_or_else(|_| panic!("timed out waiting for event, saw {:?}", seen));
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    }

    fn is_ready(event: &EngineEvent) -> bool {
        matches!(event, EngineEvent::Ready { .. })
    }

    #[test]
    fn test_ten_second_file_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "ten.wav", 44100, 441_000);
        let h = harness(EngineConfig::default(), true);
        let rx = h.engine.subscribe();

        assert_eq!(h.engine.generate(&path), GenerateOutcome::Started);
        let events = wait_for(&rx, Duration::from_secs(30), is_ready);

        let progress: Vec<(usize, usize)> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Progress { current, total, .. } => Some((*current, *total)),
                _ => None,
            })
            .collect();
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(progress.last(), Some(&(2000, 2000)));

        assert!(h.engine.is_ready(&path));
        assert_eq!(h.engine.get_peaks(&path).unwrap().len(), 2000);
        assert_eq!(h.engine.get_duration(&path), Some(10_000));

        // Exactly one Ready
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(h.engine.generate(&path), GenerateOutcome::AlreadyReady);
    }

    #[test]
    fn test_missing_file_fails_without_worker() {
        let h = harness(EngineConfig::default(), true);
        let rx = h.engine.subscribe();

        let outcome = h.engine.generate("/nonexistent/ripple/missing.wav");
        assert_eq!(outcome, GenerateOutcome::Failed(ErrorKind::DecodeFailed));
        assert_eq!(h.engine.active_jobs(), 0);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        match rx.try_recv().unwrap() {
            EngineEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::DecodeFailed),
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_requests_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 8000);
        let h = harness(EngineConfig::default(), false);
        let rx_a = h.engine.subscribe();
        let rx_b = h.engine.subscribe();

        assert_eq!(h.engine.generate(&path), GenerateOutcome::Started);
        assert_eq!(h.engine.generate(&path), GenerateOutcome::Coalesced);
        assert_eq!(h.engine.active_jobs(), 1);

        h.gate.store(true, Ordering::Release);
        wait_for(&rx_a, Duration::from_secs(10), is_ready);
        wait_for(&rx_b, Duration::from_secs(10), is_ready);

        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_files_run_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sine_wav(dir.path(), "a.wav", 8000, 800);
        let b = write_sine_wav(dir.path(), "b.wav", 8000, 800);
        let h = harness(EngineConfig::default(), false);
        let rx = h.engine.subscribe();

        assert_eq!(h.engine.generate(&a), GenerateOutcome::Started);
        assert_eq!(h.engine.generate(&b), GenerateOutcome::Started);
        assert_eq!(h.engine.active_jobs(), 2);

        h.gate.store(true, Ordering::Release);
        let mut ready = 0;
        while ready < 2 {
            wait_for(&rx, Duration::from_secs(10), is_ready);
            ready += 1;
        }
        assert!(h.engine.is_ready(&a) && h.engine.is_ready(&b));
    }

    #[test]
    fn test_cache_roundtrip_skips_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 16000);

        let first = harness(EngineConfig::default(), true);
        let rx = first.engine.subscribe();
        first.engine.generate(&path);
        wait_for(&rx, Duration::from_secs(10), is_ready);
        let original = first.engine.get_peaks(&path).unwrap();
        drop(first);

        let second = harness(EngineConfig::default(), true);
        let rx = second.engine.subscribe();
        assert_eq!(second.engine.generate(&path), GenerateOutcome::Started);
        let events = wait_for(&rx, Duration::from_secs(10), is_ready);
        assert!(matches!(events.last(), Some(EngineEvent::Ready { cached: true, .. })));
        assert!(events.iter().all(|e| !matches!(e, EngineEvent::Progress { .. })));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*second.engine.get_peaks(&path).unwrap(), *original);
    }

    #[test]
    fn test_changed_file_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 8000);

        let first = harness(EngineConfig::default(), true);
        let rx = first.engine.subscribe();
        first.engine.generate(&path);
        wait_for(&rx, Duration::from_secs(10), is_ready);
        drop(first);

        // Different length means a different size signature
        write_sine_wav(dir.path(), "a.wav", 8000, 4000);

        let second = harness(EngineConfig::default(), true);
        let rx = second.engine.subscribe();
        assert_eq!(second.engine.generate(&path), GenerateOutcome::Started);
        wait_for(&rx, Duration::from_secs(10), is_ready);
        assert_eq!(second.engine.get_duration(&path), Some(500));
    }

    #[test]
    fn test_modified_file_recomputed_in_same_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 8000);
        let h = harness(EngineConfig::default(), true);
        let rx = h.engine.subscribe();

        assert_eq!(h.engine.generate(&path), GenerateOutcome::Started);
        wait_for(&rx, Duration::from_secs(10), is_ready);
        assert_eq!(h.engine.get_duration(&path), Some(1000));

        write_sine_wav(dir.path(), "a.wav", 8000, 4000);

        assert_eq!(h.engine.generate(&path), GenerateOutcome::Started);
        let events = wait_for(&rx, Duration::from_secs(10), is_ready);
        assert!(matches!(events.last(), Some(EngineEvent::Ready { cached: false, .. })));
        assert_eq!(h.engine.get_duration(&path), Some(500));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.engine.generate(&path), GenerateOutcome::AlreadyReady);
    }

    #[test]
    fn test_deleted_file_evicts_peaks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 800);
        let h = harness(EngineConfig::default(), true);
        let rx = h.engine.subscribe();

        h.engine.generate(&path);
        wait_for(&rx, Duration::from_secs(10), is_ready);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            h.engine.generate(&path),
            GenerateOutcome::Failed(ErrorKind::DecodeFailed)
        );
        assert!(!h.engine.is_ready(&path));
    }

    #[test]
    fn test_cancel_suppresses_ready_and_frees_slot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 8000);
        let config = EngineConfig {
            join_timeout_ms: 50,
            ..EngineConfig::default()
        };
        let h = harness(config, false);
        let rx = h.engine.subscribe();

        assert_eq!(h.engine.generate(&path), GenerateOutcome::Started);
        assert!(h.engine.cancel(&path));
        assert!(!h.engine.cancel(&path));
        assert_eq!(h.engine.active_jobs(), 0);

        // Release the detached worker; it must stay silent
        h.gate.store(true, Ordering::Release);
        std::thread::sleep(Duration::from_millis(200));
        assert!(rx.try_iter().all(|e| !is_ready(&e)));
        assert!(!h.engine.is_ready(&path));

        assert_eq!(h.engine.generate(&path), GenerateOutcome::Started);
        wait_for(&rx, Duration::from_secs(10), is_ready);
    }

    #[test]
    fn test_set_audio_file_drops_other_peaks() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sine_wav(dir.path(), "a.wav", 8000, 800);
        let b = write_sine_wav(dir.path(), "b.wav", 8000, 800);
        let h = harness(EngineConfig::default(), true);
        let rx = h.engine.subscribe();

        h.engine.set_audio_file(&a);
        wait_for(&rx, Duration::from_secs(10), is_ready);
        assert!(h.engine.is_ready(&a));

        h.engine.set_audio_file(&b);
        assert!(!h.engine.is_ready(&a));
        assert_eq!(h.engine.active_file(), Some(b.clone()));
        wait_for(&rx, Duration::from_secs(10), is_ready);
        assert!(h.engine.is_ready(&b));
    }

    #[cfg(feature = "spectrogram")]
    #[test]
    fn test_spectrogram_mode_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 8000);
        let h = harness(EngineConfig::default(), true);
        let rx = h.engine.subscribe();

        h.engine.set_audio_file(&path);
        h.engine.set_spectrogram_mode(true);
        assert!(h.engine.spectrogram_mode());
        wait_for(&rx, Duration::from_secs(10), |e| {
            matches!(e, EngineEvent::SpectrogramReady { .. })
        });

        let spec = h.engine.get_spectrogram(&path).unwrap();
        assert_eq!(spec.bins(), 128);
        assert_eq!(spec.columns(), 16);

        h.engine.set_spectrogram_mode(false);
        assert!(h.engine.get_spectrogram(&path).is_none());
    }

    #[cfg(feature = "spectrogram")]
    #[test]
    fn test_progress_per_file_monotonic_with_spectrogram() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "ten.wav", 44100, 441_000);
        let config = EngineConfig {
            batch_size: 10,
            ..EngineConfig::default()
        };
        let h = harness(config, true);
        let rx = h.engine.subscribe();

        h.engine.set_spectrogram_mode(true);
        h.engine.set_audio_file(&path);

        let mut events = Vec::new();
        let (mut peaks_done, mut spectrogram_done) = (false, false);
        while !(peaks_done && spectrogram_done) {
            let event = rx
                .recv_timeout(Duration::from_secs(30))
                .unwrap_or_else(|_| panic!("timed out, saw {} events", events.len()));
            match &event {
                EngineEvent::Ready { .. } => peaks_done = true,
                EngineEvent::SpectrogramReady { .. } => spectrogram_done = true,
                EngineEvent::Error { message, .. } => panic!("unexpected error: {}", message),
                _ => {}
            }
            events.push(event);
        }

        let peak_progress: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Progress { current, .. } => Some(*current),
                _ => None,
            })
            .collect();
        let spectrogram_progress: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::SpectrogramProgress { current, .. } => Some(*current),
                _ => None,
            })
            .collect();

        assert!(peak_progress.len() > 1);
        assert!(peak_progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(peak_progress.last(), Some(&2000));
        assert!(!spectrogram_progress.is_empty());
        assert!(spectrogram_progress.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_tempo_validation() {
        let h = harness(EngineConfig::default(), true);
        assert_eq!(h.engine.tempo(), None);
        h.engine.set_tempo(Some(128.0));
        assert_eq!(h.engine.tempo(), Some(128.0));
        h.engine.set_tempo(Some(-5.0));
        assert_eq!(h.engine.tempo(), None);
        h.engine.set_tempo(Some(f64::NAN));
        assert_eq!(h.engine.tempo(), None);
    }

    #[test]
    fn test_set_directory_clears_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 800);
        let h = harness(EngineConfig::default(), true);
        let rx = h.engine.subscribe();

        h.engine.set_audio_file(&path);
        wait_for(&rx, Duration::from_secs(10), is_ready);

        h.engine.set_directory(dir.path());
        assert!(!h.engine.is_ready(&path));
        assert_eq!(h.engine.active_file(), None);
        assert_eq!(h.engine.directory(), Some(dir.path().to_path_buf()));

        // Served from disk on the next request
        assert_eq!(h.engine.generate(&path), GenerateOutcome::Started);
        let events = wait_for(&rx, Duration::from_secs(10), is_ready);
        assert!(matches!(events.last(), Some(EngineEvent::Ready { cached: true, .. })));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 800);
        let config = EngineConfig {
            join_timeout_ms: 50,
            ..EngineConfig::default()
        };
        let h = harness(config, false);

        h.engine.generate(&path);
        h.engine.shutdown();
        h.engine.shutdown();
        assert_eq!(h.engine.active_jobs(), 0);
        assert_eq!(
            h.engine.generate(&path),
            GenerateOutcome::Failed(ErrorKind::Internal)
        );
        h.gate.store(true, Ordering::Release);
    }
}
