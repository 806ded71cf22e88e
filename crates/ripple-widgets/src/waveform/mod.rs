//! Waveform render surface
//!
//! Paints a file's peaks (or its spectrogram) with an optional measure grid
//! and a moving position indicator, and turns clicks into seek requests.
//!
//! - `state`: `SurfaceState`, fed by engine events and position updates
//! - `layout`: pure geometry, shared with annotation overlays
//! - `canvas`: the iced `Program`
//! - `view`: `waveform_surface`, the function applications call

mod canvas;
pub mod layout;
mod state;
mod view;

pub use canvas::{SurfaceCanvas, SurfaceInteraction};
pub use layout::{GridLine, GridLineKind, SpectrogramCell, WaveformColumn};
pub use state::{SurfaceMode, SurfaceState};
pub use view::{waveform_surface, waveform_surface_with};
