//! UI widgets for ripple
//!
//! An iced canvas surface that renders what `ripple-core` produces.
//!
//! ## Architecture (iced 0.14 patterns)
//!
//! - **State struct**: `SurfaceState` holds shared artifacts and position
//! - **View function**: `waveform_surface` takes state + a seek callback
//! - **Canvas Program**: `SurfaceCanvas` draws and translates clicks
//!
//! ```ignore
//! // update()
//! Message::Engine(event) => { self.surface.handle_event(&event, &self.engine); }
//! Message::Position(ms) => self.surface.set_position(ms),
//!
//! // view()
//! waveform_surface(&self.surface, Message::Seek)
//! ```

pub mod theme;
pub mod waveform;

pub use theme::{spectrogram_color, SurfaceConfig};
pub use waveform::{waveform_surface, waveform_surface_with, SurfaceMode, SurfaceState};
