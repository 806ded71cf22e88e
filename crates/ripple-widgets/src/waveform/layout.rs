//! Renderer-independent layout math
//!
//! Everything the canvas draws is positioned by these functions, so they can
//! be tested without a renderer. Annotation overlays use `x_for_time` and
//! `time_for_x` to line up with the surface.

use ripple_core::SpectrogramArtifact;

/// Beats per measure (4/4)
pub const BEATS_PER_MEASURE: u64 = 4;

/// Measures between labels
pub const MEASURES_PER_LABEL: u64 = 4;

/// Grid lines closer than this many pixels are not drawn
pub const MIN_LINE_SPACING: f32 = 3.0;

// =============================================================================
// Time <-> X
// =============================================================================

/// Horizontal position of `time_ms`, clamped to the surface
///
/// Zero duration or width maps everything to x = 0.
pub fn x_for_time(time_ms: u64, duration_ms: u64, width: f32) -> f32 {
    if duration_ms == 0 || width <= 0.0 {
        return 0.0;
    }
    let t = time_ms.min(duration_ms) as f64 / duration_ms as f64;
    (t * width as f64) as f32
}

/// Timestamp under `x`, clamped to `[0, duration_ms]`
pub fn time_for_x(x: f32, width: f32, duration_ms: u64) -> u64 {
    if duration_ms == 0 || width <= 0.0 || !x.is_finite() {
        return 0;
    }
    let fraction = (x / width).clamp(0.0, 1.0) as f64;
    ((fraction * duration_ms as f64).round() as u64).min(duration_ms)
}

// =============================================================================
// Measure Grid
// =============================================================================

/// Strength of a grid line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridLineKind {
    Beat,
    Measure,
}

/// One vertical grid line
#[derive(Debug, Clone, PartialEq)]
pub struct GridLine {
    pub x: f32,
    pub kind: GridLineKind,
    /// 1-based measure number, set every `MEASURES_PER_LABEL` measures
    pub label: Option<u64>,
}

/// 4/4 grid for `tempo_bpm` over `duration_ms`, starting at time 0
///
/// Beat lines are dropped when they would sit closer than
/// `MIN_LINE_SPACING`; if measures would too, the grid is empty.
pub fn beat_grid(tempo_bpm: f64, duration_ms: u64, width: f32) -> Vec<GridLine> {
    if !tempo_bpm.is_finite() || tempo_bpm <= 0.0 || duration_ms == 0 || width <= 0.0 {
        return Vec::new();
    }

    let beat_ms = 60_000.0 / tempo_bpm;
    let px_per_ms = width as f64 / duration_ms as f64;
    let beat_px = beat_ms * px_per_ms;
    let measure_px = beat_px * BEATS_PER_MEASURE as f64;

    if measure_px < MIN_LINE_SPACING as f64 {
        return Vec::new();
    }
    let show_beats = beat_px >= MIN_LINE_SPACING as f64;

    let mut lines = Vec::new();
    let mut beat: u64 = 0;
    loop {
        let time_ms = beat as f64 * beat_ms;
        if time_ms >= duration_ms as f64 {
            break;
        }

        let is_measure = beat % BEATS_PER_MEASURE == 0;
        if is_measure || show_beats {
            let measure = beat / BEATS_PER_MEASURE;
            let label = (is_measure && measure % MEASURES_PER_LABEL == 0).then_some(measure + 1);
            lines.push(GridLine {
                x: (time_ms * px_per_ms) as f32,
                kind: if is_measure {
                    GridLineKind::Measure
                } else {
                    GridLineKind::Beat
                },
                label,
            });
        }

        beat += 1;
    }

    lines
}

// =============================================================================
// Waveform Columns
// =============================================================================

/// One vertical min/max stroke
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformColumn {
    pub x: f32,
    /// y of the max value (smaller y is higher on screen)
    pub top: f32,
    /// y of the min value
    pub bottom: f32,
}

/// Scale `(min, max)` peaks to a `width` x `height` surface around its center
///
/// When there are more peaks than pixels, neighbouring peaks are merged so
/// that each pixel column keeps the extremes of the peaks it covers.
pub fn waveform_columns(peaks: &[(f32, f32)], width: f32, height: f32) -> Vec<WaveformColumn> {
    if peaks.is_empty() || width <= 0.0 || height <= 0.0 {
        return Vec::new();
    }

    let center_y = height / 2.0;
    let half = height / 2.0;
    let pixels = (width.floor() as usize).max(1);
    let count = peaks.len().min(pixels);
    let step = width / count as f32;

    (0..count)
        .map(|i| {
            let start = i * peaks.len() / count;
            let end = ((i + 1) * peaks.len() / count).max(start + 1);
            let (min, max) = peaks[start..end]
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), &(min, max)| (lo.min(min), hi.max(max)));

            WaveformColumn {
                x: (i as f32 + 0.5) * step,
                top: center_y - max.clamp(-1.0, 1.0) * half,
                bottom: center_y - min.clamp(-1.0, 1.0) * half,
            }
        })
        .collect()
}

// =============================================================================
// Spectrogram Cells
// =============================================================================

/// One filled rectangle of the spectrogram raster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrogramCell {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Normalized magnitude in [0, 1]
    pub value: f32,
}

/// Lay out `spectrogram` as a raster on a `width` x `height` surface
///
/// Band 0 (lowest frequency) is the bottom row. Columns are downsampled to
/// at most one per pixel, keeping the loudest value in each group.
pub fn spectrogram_cells(
    spectrogram: &SpectrogramArtifact,
    width: f32,
    height: f32,
) -> Vec<SpectrogramCell> {
    let bins = spectrogram.bins();
    let columns = spectrogram.columns();
    if bins == 0 || columns == 0 || width <= 0.0 || height <= 0.0 {
        return Vec::new();
    }

    let pixels = (width.floor() as usize).max(1);
    let out_columns = columns.min(pixels);
    let cell_width = width / out_columns as f32;
    let cell_height = height / bins as f32;

    let mut cells = Vec::with_capacity(bins * out_columns);
    for bin in 0..bins {
        let row = spectrogram.row(bin);
        let y = height - (bin + 1) as f32 * cell_height;
        for col in 0..out_columns {
            let start = col * columns / out_columns;
            let end = ((col + 1) * columns / out_columns).max(start + 1);
            let value = row[start..end].iter().copied().fold(0.0f32, f32::max);
            cells.push(SpectrogramCell {
                x: col as f32 * cell_width,
                y,
                width: cell_width,
                height: cell_height,
                value,
            });
        }
    }

    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x_for_time_scales_and_clamps() {
        assert_eq!(x_for_time(500, 1000, 200.0), 100.0);
        assert_eq!(x_for_time(5000, 1000, 200.0), 200.0);
        assert_eq!(x_for_time(500, 0, 200.0), 0.0);
    }

    #[test]
    fn test_time_for_x_clamps_to_duration() {
        assert_eq!(time_for_x(50.0, 200.0, 1000), 250);
        assert_eq!(time_for_x(-10.0, 200.0, 1000), 0);
        assert_eq!(time_for_x(999.0, 200.0, 1000), 1000);
        assert_eq!(time_for_x(50.0, 200.0, 0), 0);
        assert_eq!(time_for_x(50.0, 0.0, 1000), 0);
    }

    #[test]
    fn test_beat_grid_measures_and_labels() {
        // 120 BPM: one beat per 500 ms, 40 beats = 10 measures in 20 s
        let grid = beat_grid(120.0, 20_000, 2000.0);
        assert_eq!(grid.len(), 40);

        let measures: Vec<&GridLine> = grid
            .iter()
            .filter(|l| l.kind == GridLineKind::Measure)
            .collect();
        assert_eq!(measures.len(), 10);
        assert_eq!(measures[1].x, 200.0);

        let labels: Vec<u64> = grid.iter().filter_map(|l| l.label).collect();
        assert_eq!(labels, vec![1, 5, 9]);
        assert_eq!(grid[1].kind, GridLineKind::Beat);
        assert_eq!(grid[1].x, 50.0);
    }

    #[test]
    fn test_beat_grid_drops_crowded_beats() {
        // 10 minutes at 120 BPM on 400 px: beats 0.33 px apart, measures 1.33 px
        assert!(beat_grid(120.0, 600_000, 400.0).is_empty());

        // 1 minute on 400 px: beats 3.33 px apart survive
        let grid = beat_grid(120.0, 60_000, 400.0);
        assert!(grid.iter().any(|l| l.kind == GridLineKind::Beat));

        // 2 minutes: beats 1.67 px apart dropped, measures kept
        let grid = beat_grid(120.0, 120_000, 400.0);
        assert!(!grid.is_empty());
        assert!(grid.iter().all(|l| l.kind == GridLineKind::Measure));
    }

    #[test]
    fn test_beat_grid_rejects_bad_input() {
        assert!(beat_grid(0.0, 1000, 100.0).is_empty());
        assert!(beat_grid(-120.0, 1000, 100.0).is_empty());
        assert!(beat_grid(f64::NAN, 1000, 100.0).is_empty());
        assert!(beat_grid(120.0, 0, 100.0).is_empty());
    }

    #[test]
    fn test_waveform_columns_centered() {
        let cols = waveform_columns(&[(-1.0, 1.0), (-0.5, 0.25)], 100.0, 50.0);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].x, 25.0);
        assert_eq!(cols[0].top, 0.0);
        assert_eq!(cols[0].bottom, 50.0);
        assert_eq!(cols[1].top, 25.0 - 0.25 * 25.0);
        assert_eq!(cols[1].bottom, 25.0 + 0.5 * 25.0);
    }

    #[test]
    fn test_waveform_columns_merge_to_pixels() {
        let peaks = vec![(-0.1, 0.1), (-0.9, 0.2), (-0.2, 0.8), (-0.1, 0.1)];
        let cols = waveform_columns(&peaks, 2.0, 2.0);
        assert_eq!(cols.len(), 2);
        // first pixel covers peaks 0..2, second 2..4
        assert!((cols[0].bottom - 1.9).abs() < 1e-6);
        assert!((cols[1].top - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_waveform_columns_empty() {
        assert!(waveform_columns(&[], 100.0, 50.0).is_empty());
        assert!(waveform_columns(&[(-1.0, 1.0)], 0.0, 50.0).is_empty());
    }

    #[test]
    fn test_spectrogram_low_band_at_bottom() {
        // 2 bins x 4 columns, upper band louder
        let grid = vec![0.1, 0.2, 0.3, 0.4, 0.9, 0.8, 0.7, 0.6];
        let spec = SpectrogramArtifact::from_grid(grid, 2, 4, vec![100.0, 1000.0], 512, 44100, 100)
            .unwrap();

        let cells = spectrogram_cells(&spec, 2.0, 10.0);
        assert_eq!(cells.len(), 4);

        let low: Vec<&SpectrogramCell> = cells.iter().filter(|c| c.y == 5.0).collect();
        let high: Vec<&SpectrogramCell> = cells.iter().filter(|c| c.y == 0.0).collect();
        assert_eq!(low.len(), 2);
        assert_eq!(high.len(), 2);
        // columns merged pairwise, keeping the max
        assert_eq!(low[0].value, 0.2);
        assert_eq!(low[1].value, 0.4);
        assert_eq!(high[0].value, 0.9);
        assert_eq!(high[1].x, 1.0);
    }

    #[test]
    fn test_spectrogram_empty() {
        let spec = SpectrogramArtifact::from_grid(Vec::new(), 4, 0, vec![0.0; 4], 512, 44100, 0)
            .unwrap();
        assert!(spectrogram_cells(&spec, 100.0, 100.0).is_empty());
    }
}
