//! Waveform view function
//!
//! Plain function that takes a state reference and a callback closure and
//! returns an `Element`, following the iced 0.14 pattern.
//!
//! ## Usage
//!
//! ```ignore
//! fn view(&self) -> Element<Message> {
//!     let surface = waveform_surface(&self.surface, |ms| Message::Seek(ms));
//!     column![surface, /* transport controls */].into()
//! }
//! ```

use super::canvas::SurfaceCanvas;
use super::state::SurfaceState;
use crate::theme::SurfaceConfig;
use iced::widget::Canvas;
use iced::{Element, Length};

/// Render surface with click-to-seek at the default height
///
/// `on_seek` is called with the clicked timestamp in milliseconds.
pub fn waveform_surface<'a, Message>(
    state: &'a SurfaceState,
    on_seek: impl Fn(u64) -> Message + 'a,
) -> Element<'a, Message>
where
    Message: Clone + 'a,
{
    waveform_surface_with(state, &SurfaceConfig::default(), on_seek)
}

/// Render surface with explicit dimensions
pub fn waveform_surface_with<'a, Message>(
    state: &'a SurfaceState,
    config: &SurfaceConfig,
    on_seek: impl Fn(u64) -> Message + 'a,
) -> Element<'a, Message>
where
    Message: Clone + 'a,
{
    Canvas::new(SurfaceCanvas {
        state,
        label_size: config.label_size,
        on_seek,
    })
    .width(Length::Fill)
    .height(Length::Fixed(config.height))
    .into()
}
