//! Background generation jobs
//!
//! One `GenerationJob` owns one named thread that loads a file and reduces
//! it to peaks (or analyzes it into a spectrogram). Peak jobs look in the
//! directory's cache index first, so the caller never touches the disk
//! beyond a stat.
//!
//! ## Lifecycle
//!
//! ```text
//! Loading ──► Reducing / Analyzing ──► Completed
//!    │  └─ cache hit ─────────────────► Completed
//!    │                │
//!    └───────┬────────┴──► Cancelled   (flag observed, no event)
//!            └───────────► Failed      (Error event)
//! ```
//!
//! Completion and cancellation race on the job's state lock. The worker
//! writes the cache entry, stores its artifact and publishes the ready event
//! only while holding that lock and after re-checking the cancel flag, so a
//! `cancel()` that takes the lock first guarantees the job writes and
//! reports nothing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};

use crate::audio_file::AudioLoader;
use crate::cache::CacheStore;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::peaks::PeakReducer;
use crate::spectral::SpectralAnalyzer;
use crate::store::ArtifactStore;
use crate::types::{ArtifactKind, AudioFileRef, FileSignature, PeakArtifact};

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Loading,
    Reducing,
    Analyzing,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Loading | JobState::Reducing | JobState::Analyzing)
    }
}

/// Everything a worker needs, shared by all jobs of one engine
pub struct JobContext {
    pub loader: Arc<AudioLoader>,
    pub reducer: PeakReducer,
    /// `None` when the spectral backend is unavailable
    pub analyzer: Option<Arc<SpectralAnalyzer>>,
    pub cache: Arc<CacheStore>,
    pub store: Arc<ArtifactStore>,
    pub events: Arc<EventBus>,
    pub column_count: usize,
    pub join_timeout: Duration,
}

/// State shared between the job handle and its thread
struct JobShared {
    cancel: AtomicBool,
    current: AtomicUsize,
    total: AtomicUsize,
    state: Mutex<JobState>,
}

impl JobShared {
    fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            current: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            state: Mutex::new(JobState::Loading),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn check_cancelled(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move to `next` unless the job already left the running states
    fn advance(&self, next: JobState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.is_running() {
            *state = next;
        }
    }

    /// Run `publish` and mark the job completed, unless it was cancelled
    fn complete<F: FnOnce()>(&self, publish: F) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.is_cancelled() || !state.is_running() {
            *state = JobState::Cancelled;
            return Err(EngineError::Cancelled);
        }
        publish();
        *state = JobState::Completed;
        Ok(())
    }

    /// Record a failure; returns false if the job was cancelled instead
    fn fail(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.is_cancelled() || *state == JobState::Cancelled {
            *state = JobState::Cancelled;
            return false;
        }
        *state = JobState::Failed;
        true
    }

    fn report(&self, current: usize, total: usize) {
        self.total.store(total, Ordering::Release);
        self.current.store(current, Ordering::Release);
    }
}

/// Owned handle to one background generation thread
pub struct GenerationJob {
    path: PathBuf,
    kind: ArtifactKind,
    signature: FileSignature,
    shared: Arc<JobShared>,
    handle: Option<JoinHandle<()>>,
    /// Disconnects when the thread exits, normally or by panic
    done: Receiver<()>,
    join_timeout: Duration,
}

impl GenerationJob {
    /// Spawn a worker thread for `file`
    pub fn start(file: AudioFileRef, kind: ArtifactKind, ctx: Arc<JobContext>) -> EngineResult<Self> {
        let path = file.path().to_path_buf();
        let signature = file.signature();
        let shared = Arc::new(JobShared::new());
        let (done_tx, done_rx) = bounded::<()>(1);
        let join_timeout = ctx.join_timeout;

        let thread_name = format!(
            "ripple-{}-{}",
            kind,
            file.file_name().unwrap_or_else(|| "file".to_string())
        );
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let _done = done_tx;
                run_job(file, kind, worker_shared, ctx)
            })
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        log::debug!("[WORKER] Started {} job for {:?}", kind, path);

        Ok(Self {
            path,
            kind,
            signature,
            shared,
            handle: Some(handle),
            done: done_rx,
            join_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Signature of the file as it was when the job started
    pub fn signature(&self) -> FileSignature {
        self.signature
    }

    /// Ask the worker to stop at its next batch boundary
    ///
    /// Idempotent. Once this returns the job will not publish its artifact.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.is_running() {
            *state = JobState::Cancelled;
            log::debug!("[WORKER] Cancelled {} job for {:?}", self.kind, self.path);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Wait up to `timeout` for the thread to exit
    ///
    /// On timeout the thread is detached and `GenerationTimeout` returned;
    /// the handle is never dropped while the thread may still be running
    /// without this bounded wait first.
    pub fn join(&mut self, timeout: Duration) -> EngineResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(timeout) {
            let err = EngineError::GenerationTimeout {
                path: self.path.clone(),
                waited_ms: timeout.as_millis() as u64,
            };
            log::warn!("[WORKER] {}, detaching thread", err);
            drop(handle);
            return Err(err);
        }

        if handle.join().is_err() {
            log::error!("[WORKER] {} job for {:?} panicked", self.kind, self.path);
        }
        Ok(())
    }

    /// Whether the thread has exited (or was already joined / detached)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// `(current, total)` of the last reported batch
    pub fn progress(&self) -> (usize, usize) {
        (
            self.shared.current.load(Ordering::Acquire),
            self.shared.total.load(Ordering::Acquire),
        )
    }
}

impl Drop for GenerationJob {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if !self.is_finished() {
                self.cancel();
            }
            let _ = self.join(self.join_timeout);
        }
    }
}

impl std::fmt::Debug for GenerationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationJob")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish()
    }
}

// =============================================================================
// Worker Thread
// =============================================================================

fn run_job(file: AudioFileRef, kind: ArtifactKind, shared: Arc<JobShared>, ctx: Arc<JobContext>) {
    let start_time = Instant::now();
    let path = file.path().to_path_buf();

    let result = match kind {
        ArtifactKind::Peaks => run_peaks(&file, &shared, &ctx),
        ArtifactKind::Spectrogram => run_spectrogram(&file, &shared, &ctx),
    };

    match result {
        Ok(()) => {
            log::info!(
                "[WORKER] {} ready for {:?} in {:?}",
                kind,
                path,
                start_time.elapsed()
            );
        }
        Err(EngineError::Cancelled) => {
            shared.advance(JobState::Cancelled);
            log::debug!("[WORKER] {} job for {:?} stopped after cancel", kind, path);
        }
        Err(e) => {
            if shared.fail() {
                log::warn!("[WORKER] {} job for {:?} failed: {}", kind, path, e);
                ctx.events.publish(EngineEvent::error(path, &e));
            }
        }
    }
}

fn run_peaks(file: &AudioFileRef, shared: &JobShared, ctx: &JobContext) -> EngineResult<()> {
    let path = file.path();

    if let Some(artifact) = ctx.cache.load(file, ctx.column_count) {
        log::debug!("[WORKER] Cache hit for {:?}", path);
        let artifact = Arc::new(artifact);
        return shared.complete(|| {
            ctx.store.insert_peaks(path.to_path_buf(), file.signature(), artifact);
            ctx.events.publish(EngineEvent::Ready {
                path: path.to_path_buf(),
                cached: true,
            });
        });
    }
    shared.check_cancelled()?;

    let audio = ctx.loader.load(path)?;
    shared.check_cancelled()?;

    shared.advance(JobState::Reducing);
    let artifact = ctx.reducer.reduce(
        &audio.samples,
        audio.sample_rate,
        ctx.column_count,
        &shared.cancel,
        |current, total| {
            shared.report(current, total);
            ctx.events.publish(EngineEvent::Progress {
                path: path.to_path_buf(),
                current,
                total,
            });
        },
    )?;

    publish_peaks(file, artifact, shared, ctx)
}

/// Cache, store and announce freshly reduced peaks
///
/// All three happen under the job's state lock, after the final cancel check.
fn publish_peaks(
    file: &AudioFileRef,
    artifact: PeakArtifact,
    shared: &JobShared,
    ctx: &JobContext,
) -> EngineResult<()> {
    let path = file.path();
    let artifact = Arc::new(artifact);
    shared.complete(|| {
        // Cache failures only cost a recompute next time
        if let Err(e) = ctx.cache.save(file, &artifact) {
            log::warn!("[WORKER] Could not cache peaks for {:?}: {}", path, e);
        }
        ctx.store.insert_peaks(path.to_path_buf(), file.signature(), artifact);
        ctx.events.publish(EngineEvent::Ready {
            path: path.to_path_buf(),
            cached: false,
        });
    })
}

fn run_spectrogram(file: &AudioFileRef, shared: &JobShared, ctx: &JobContext) -> EngineResult<()> {
    let path = file.path();
    let analyzer = ctx.analyzer.as_ref().ok_or_else(|| {
        EngineError::AnalysisUnavailable("spectral backend not initialized".to_string())
    })?;

    let audio = ctx.loader.load(path)?;
    shared.check_cancelled()?;

    shared.advance(JobState::Analyzing);
    let artifact = analyzer.analyze(
        &audio.samples,
        audio.sample_rate,
        &shared.cancel,
        |current, total| {
            shared.report(current, total);
            ctx.events.publish(EngineEvent::SpectrogramProgress {
                path: path.to_path_buf(),
                current,
                total,
            });
        },
    )?;

    let artifact = Arc::new(artifact);
    shared.complete(|| {
        ctx.store
            .insert_spectrogram(path.to_path_buf(), file.signature(), artifact);
        ctx.events.publish(EngineEvent::SpectrogramReady {
            path: path.to_path_buf(),
        });
    })
}
