//! Shared theme constants for the ripple render surface
//!
//! Colors for the waveform, grid overlay and position indicator, plus the
//! colormap used to paint spectrogram magnitudes.

use iced::Color;

/// Surface background
pub const BACKGROUND: Color = Color::from_rgb(0.1, 0.1, 0.12);

/// Horizontal zero line
pub const AXIS_COLOR: Color = Color::from_rgba(0.4, 0.4, 0.45, 0.6);

/// Min/max strokes
pub const WAVEFORM_COLOR: Color = Color::from_rgb(0.0, 0.8, 0.8);

/// Faint per-beat grid lines
pub const BEAT_LINE_COLOR: Color = Color::from_rgba(0.4, 0.4, 0.4, 0.35);

/// Stronger per-measure grid lines
pub const MEASURE_LINE_COLOR: Color = Color::from_rgba(0.7, 0.7, 0.75, 0.6);

/// Measure number labels
pub const LABEL_COLOR: Color = Color::from_rgb(0.7, 0.7, 0.8);

/// Moving position indicator
pub const POSITION_COLOR: Color = Color::from_rgb(1.0, 1.0, 1.0);

/// Loading bar fill
pub const LOADING_COLOR: Color = Color::from_rgba(0.6, 0.6, 0.6, 0.8);

/// Loading bar track
pub const LOADING_TRACK_COLOR: Color = Color::from_rgba(0.6, 0.6, 0.6, 0.3);

/// Dashed line shown when generation failed
pub const ERROR_COLOR: Color = Color::from_rgba(0.8, 0.35, 0.3, 0.7);

/// Render surface dimensions
pub struct SurfaceConfig {
    /// Surface height in pixels
    pub height: f32,
    /// Measure label font size
    pub label_size: f32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            height: 120.0,
            label_size: 11.0,
        }
    }
}

// Viridis stops: dark purple, navy, teal, pale yellow
const COLORMAP_STOPS: [(f32, f32, f32); 4] = [
    (0.267, 0.004, 0.329),
    (0.231, 0.322, 0.545),
    (0.129, 0.569, 0.549),
    (0.992, 0.906, 0.145),
];

/// Map a normalized magnitude in [0, 1] to a color
///
/// Values outside the range are clamped; NaN maps to the darkest stop.
pub fn spectrogram_color(value: f32) -> Color {
    let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    let scaled = value * (COLORMAP_STOPS.len() - 1) as f32;
    let lo = (scaled as usize).min(COLORMAP_STOPS.len() - 2);
    let t = scaled - lo as f32;

    let (r0, g0, b0) = COLORMAP_STOPS[lo];
    let (r1, g1, b1) = COLORMAP_STOPS[lo + 1];
    Color::from_rgb(
        r0 + (r1 - r0) * t,
        g0 + (g1 - g0) * t,
        b0 + (b1 - b0) * t,
    )
}
