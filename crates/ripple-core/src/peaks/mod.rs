//! Progressive peak reduction
//!
//! Downsamples mono audio into a fixed number of (min, max) columns. Column
//! `i` of `n` covers samples `[i*len/n, (i+1)*len/n)`, so every sample lands
//! in exactly one column and column widths differ by at most one sample.
//!
//! Columns are produced in batches. Between batches the reducer checks the
//! cancel flag and reports progress, which keeps a worker responsive on
//! long files.

mod kernel;

pub use kernel::{select_kernel, LaneKernel, PeakKernel, ScalarKernel};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio_file::duration_ms;
use crate::error::{EngineError, EngineResult};
use crate::types::{PeakArtifact, DEFAULT_BATCH_SIZE, DEFAULT_COLUMN_COUNT};

/// Sample range of column `index` when `len` samples are split into `columns`
#[inline]
pub fn window_bounds(len: usize, columns: usize, index: usize) -> (usize, usize) {
    let len = len as u64;
    let columns = columns as u64;
    let index = index as u64;
    let start = index * len / columns;
    let end = (index + 1) * len / columns;
    (start as usize, end as usize)
}

/// Number of columns actually produced for `len` samples
///
/// `requested == 0` means the default; never more columns than samples.
pub fn effective_columns(requested: usize, len: usize) -> usize {
    let requested = if requested == 0 {
        DEFAULT_COLUMN_COUNT
    } else {
        requested
    };
    requested.min(len)
}

/// Batched, cancellable peak reducer
#[derive(Clone)]
pub struct PeakReducer {
    kernel: Arc<dyn PeakKernel>,
    batch_size: usize,
}

impl PeakReducer {
    pub fn new(kernel: Arc<dyn PeakKernel>, batch_size: usize) -> Self {
        let batch_size = if batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        Self { kernel, batch_size }
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    /// Reduce `samples` to at most `column_count` columns
    ///
    /// `progress(current, total)` is called after each finished batch, with a
    /// final call where `current == total`. Returns `Cancelled` as soon as
    /// the flag is observed between batches.
    pub fn reduce<F>(
        &self,
        samples: &[f32],
        sample_rate: u32,
        column_count: usize,
        cancel: &AtomicBool,
        mut progress: F,
    ) -> EngineResult<PeakArtifact>
    where
        F: FnMut(usize, usize),
    {
        let requested = if column_count == 0 {
            DEFAULT_COLUMN_COUNT
        } else {
            column_count
        };

        let len = samples.len();
        if len == 0 {
            return Ok(PeakArtifact::empty(requested));
        }

        let total = effective_columns(requested, len);
        let mut peaks = Vec::with_capacity(total);
        let mut bounds = Vec::with_capacity(self.batch_size);

        let mut done = 0;
        while done < total {
            if cancel.load(Ordering::Acquire) {
                return Err(EngineError::Cancelled);
            }

            let batch_end = (done + self.batch_size).min(total);
            bounds.clear();
            bounds.extend((done..batch_end).map(|i| window_bounds(len, total, i)));
            self.kernel.reduce_batch(samples, &bounds, &mut peaks);

            done = batch_end;
            progress(done, total);
        }

        Ok(PeakArtifact {
            peaks,
            duration_ms: duration_ms(len, sample_rate),
            column_count: requested,
        })
    }
}

impl std::fmt::Debug for PeakReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeakReducer")
            .field("kernel", &self.kernel.name())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_reducer(batch: usize) -> PeakReducer {
        PeakReducer::new(Arc::new(ScalarKernel), batch)
    }

    fn sine(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.01).sin()).collect()
    }

    #[test]
    fn test_windows_cover_all_samples() {
        let len = 1003;
        let cols = 17;
        let mut expected_start = 0;
        for i in 0..cols {
            let (start, end) = window_bounds(len, cols, i);
            assert_eq!(start, expected_start);
            assert!(end > start);
            expected_start = end;
        }
        assert_eq!(expected_start, len);
    }

    #[test]
    fn test_ten_seconds_at_44100() {
        let samples = sine(441_000);
        let never = AtomicBool::new(false);
        let mut reports = Vec::new();

        let artifact = scalar_reducer(100)
            .reduce(&samples, 44100, 2000, &never, |c, t| reports.push((c, t)))
            .unwrap();

        assert_eq!(artifact.len(), 2000);
        assert_eq!(artifact.duration_ms, 10_000);
        assert_eq!(artifact.column_count, 2000);
        assert_eq!(reports.len(), 20);
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(reports.last(), Some(&(2000, 2000)));
    }

    #[test]
    fn test_columns_clamped_to_sample_count() {
        let samples = vec![0.5, -0.5, 0.25];
        let never = AtomicBool::new(false);

        let artifact = scalar_reducer(100)
            .reduce(&samples, 8000, 2000, &never, |_, _| {})
            .unwrap();

        assert_eq!(artifact.peaks, vec![(0.5, 0.5), (-0.5, -0.5), (0.25, 0.25)]);
        // Requested count is kept so cache lookups match
        assert_eq!(artifact.column_count, 2000);
    }

    #[test]
    fn test_zero_columns_uses_default() {
        let samples = sine(5000);
        let never = AtomicBool::new(false);

        let artifact = scalar_reducer(100)
            .reduce(&samples, 8000, 0, &never, |_, _| {})
            .unwrap();
        assert_eq!(artifact.len(), DEFAULT_COLUMN_COUNT);
    }

    #[test]
    fn test_empty_input_reports_nothing() {
        let never = AtomicBool::new(false);
        let mut called = false;

        let artifact = scalar_reducer(100)
            .reduce(&[], 44100, 2000, &never, |_, _| called = true)
            .unwrap();

        assert!(artifact.is_empty());
        assert_eq!(artifact.duration_ms, 0);
        assert!(!called);
    }

    #[test]
    fn test_cancel_stops_between_batches() {
        let samples = sine(100_000);
        let cancel = AtomicBool::new(false);
        let mut reports = 0;

        let result = scalar_reducer(10).reduce(&samples, 44100, 1000, &cancel, |_, _| {
            reports += 1;
            if reports == 3 {
                cancel.store(true, Ordering::Release);
            }
        });

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(reports, 3);
    }

    #[test]
    fn test_lane_reducer_matches_scalar() {
        let samples = sine(123_457);
        let never = AtomicBool::new(false);

        let scalar = scalar_reducer(64)
            .reduce(&samples, 44100, 2000, &never, |_, _| {})
            .unwrap();
        let lanes = PeakReducer::new(Arc::new(LaneKernel), 64)
            .reduce(&samples, 44100, 2000, &never, |_, _| {})
            .unwrap();

        assert_eq!(scalar, lanes);
    }
}
