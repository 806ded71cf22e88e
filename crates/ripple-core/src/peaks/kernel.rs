//! Min/max kernels
//!
//! The reducer hands each kernel a batch of window bounds. `ScalarKernel`
//! walks them one at a time; `LaneKernel` keeps 8 independent accumulators
//! so the compiler can vectorize the inner loop, and spreads the windows of a
//! batch over the rayon pool.

use std::sync::Arc;

use rayon::prelude::*;

use crate::config::KernelPreference;

/// Number of accumulator lanes in `LaneKernel`
const LANES: usize = 8;

/// Strategy for reducing sample windows to (min, max) pairs
pub trait PeakKernel: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Min and max of one window; `(0.0, 0.0)` for an empty window
    fn min_max(&self, window: &[f32]) -> (f32, f32);

    /// Reduce every `[start, end)` window in `bounds`, appending to `out` in order
    fn reduce_batch(&self, samples: &[f32], bounds: &[(usize, usize)], out: &mut Vec<(f32, f32)>) {
        out.extend(
            bounds
                .iter()
                .map(|&(start, end)| self.min_max(&samples[start..end])),
        );
    }
}

/// Plain sequential loop
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalarKernel;

impl PeakKernel for ScalarKernel {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn min_max(&self, window: &[f32]) -> (f32, f32) {
        if window.is_empty() {
            return (0.0, 0.0);
        }

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &sample in window {
            min = min.min(sample);
            max = max.max(sample);
        }
        (min, max)
    }
}

/// 8-lane accumulators + rayon across windows
#[derive(Debug, Default, Clone, Copy)]
pub struct LaneKernel;

impl PeakKernel for LaneKernel {
    fn name(&self) -> &'static str {
        "lanes"
    }

    fn min_max(&self, window: &[f32]) -> (f32, f32) {
        if window.is_empty() {
            return (0.0, 0.0);
        }

        let mut mins = [f32::INFINITY; LANES];
        let mut maxs = [f32::NEG_INFINITY; LANES];

        let chunks = window.chunks_exact(LANES);
        let remainder = chunks.remainder();
        for chunk in chunks {
            for lane in 0..LANES {
                mins[lane] = mins[lane].min(chunk[lane]);
                maxs[lane] = maxs[lane].max(chunk[lane]);
            }
        }

        let mut min = mins.iter().copied().fold(f32::INFINITY, f32::min);
        let mut max = maxs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        for &sample in remainder {
            min = min.min(sample);
            max = max.max(sample);
        }
        (min, max)
    }

    fn reduce_batch(&self, samples: &[f32], bounds: &[(usize, usize)], out: &mut Vec<(f32, f32)>) {
        out.par_extend(
            bounds
                .par_iter()
                .map(|&(start, end)| self.min_max(&samples[start..end])),
        );
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Whether the CPU reports the vector extensions the lane kernel benefits from
fn cpu_has_simd() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        return is_x86_feature_detected!("avx2") || is_x86_feature_detected!("sse4.1");
    }

    #[cfg(target_arch = "aarch64")]
    {
        return std::arch::is_aarch64_feature_detected!("neon");
    }

    #[allow(unreachable_code)]
    false
}

/// Pick a kernel once at startup
pub fn select_kernel(preference: KernelPreference) -> Arc<dyn PeakKernel> {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let kernel: Arc<dyn PeakKernel> = match preference {
        KernelPreference::Scalar => Arc::new(ScalarKernel),
        KernelPreference::Lanes => Arc::new(LaneKernel),
        KernelPreference::Auto => {
            if cpu_has_simd() && threads > 1 {
                Arc::new(LaneKernel)
            } else {
                Arc::new(ScalarKernel)
            }
        }
    };

    log::info!(
        "[PEAKS] Using {} kernel (preference: {:?}, simd: {}, threads: {})",
        kernel.name(),
        preference,
        cpu_has_simd(),
        threads
    );
    kernel
}
