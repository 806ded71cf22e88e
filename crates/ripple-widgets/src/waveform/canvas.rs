//! Canvas Program for the render surface
//!
//! Two layers: the cached content layer (background, axis, waveform or
//! spectrogram, measure grid) and an overlay redrawn every frame (position
//! indicator, loading and error placeholders).

use iced::alignment::{Horizontal, Vertical};
use iced::widget::canvas::{self, Event, Frame, Geometry, Path, Program, Stroke, Text};
use iced::{mouse, Point, Rectangle, Size, Theme};

use super::layout::{self, GridLineKind};
use super::state::{SurfaceMode, SurfaceState};
use crate::theme::{
    spectrogram_color, AXIS_COLOR, BACKGROUND, BEAT_LINE_COLOR, ERROR_COLOR, LABEL_COLOR,
    LOADING_COLOR, LOADING_TRACK_COLOR, MEASURE_LINE_COLOR, POSITION_COLOR, WAVEFORM_COLOR,
};

/// Mouse state for drag-seeking
#[derive(Debug, Clone, Copy, Default)]
pub struct SurfaceInteraction {
    pub is_dragging: bool,
}

/// Canvas program for the waveform / spectrogram surface with click-to-seek
///
/// `on_seek` receives the clicked timestamp in milliseconds. The surface
/// never changes the position itself; the playback engine does that and
/// pushes the new position back through the state.
pub struct SurfaceCanvas<'a, Message, F>
where
    F: Fn(u64) -> Message,
{
    pub state: &'a SurfaceState,
    pub label_size: f32,
    pub on_seek: F,
}

impl<'a, Message, F> SurfaceCanvas<'a, Message, F>
where
    F: Fn(u64) -> Message,
{
    fn seek_action(&self, x: f32, width: f32) -> Option<canvas::Action<Message>> {
        let duration = self.state.duration_ms();
        if duration == 0 {
            return None;
        }
        let time_ms = layout::time_for_x(x, width, duration);
        Some(canvas::Action::publish((self.on_seek)(time_ms)))
    }
}

impl<'a, Message, F> Program<Message> for SurfaceCanvas<'a, Message, F>
where
    Message: Clone,
    F: Fn(u64) -> Message,
{
    type State = SurfaceInteraction;

    fn update(
        &self,
        interaction: &mut Self::State,
        event: &Event,
        bounds: Rectangle,
        cursor: mouse::Cursor,
    ) -> Option<canvas::Action<Message>> {
        if let Some(position) = cursor.position_in(bounds) {
            match event {
                Event::Mouse(mouse::Event::ButtonPressed(mouse::Button::Left)) => {
                    interaction.is_dragging = true;
                    return self.seek_action(position.x, bounds.width);
                }
                Event::Mouse(mouse::Event::ButtonReleased(mouse::Button::Left)) => {
                    interaction.is_dragging = false;
                }
                Event::Mouse(mouse::Event::CursorMoved { .. }) => {
                    if interaction.is_dragging {
                        return self.seek_action(position.x, bounds.width);
                    }
                }
                _ => {}
            }
        } else if matches!(event, Event::Mouse(mouse::Event::ButtonReleased(_))) {
            interaction.is_dragging = false;
        }

        None
    }

    fn mouse_interaction(
        &self,
        _interaction: &Self::State,
        bounds: Rectangle,
        cursor: mouse::Cursor,
    ) -> mouse::Interaction {
        if cursor.is_over(bounds) && self.state.duration_ms() > 0 {
            mouse::Interaction::Pointer
        } else {
            mouse::Interaction::default()
        }
    }

    fn draw(
        &self,
        _interaction: &Self::State,
        renderer: &iced::Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<Geometry> {
        let state = self.state;
        let size = bounds.size();

        let content = state.content.draw(renderer, size, |frame| {
            draw_content(frame, state, size, self.label_size);
        });

        let mut overlay = Frame::new(renderer, size);
        draw_overlay(&mut overlay, state, size);

        vec![content, overlay.into_geometry()]
    }
}

// =============================================================================
// Content layer
// =============================================================================

fn draw_content(frame: &mut Frame, state: &SurfaceState, size: Size, label_size: f32) {
    frame.fill_rectangle(Point::ORIGIN, size, BACKGROUND);

    let center_y = size.height / 2.0;
    frame.stroke(
        &Path::line(Point::new(0.0, center_y), Point::new(size.width, center_y)),
        Stroke::default().with_color(AXIS_COLOR).with_width(1.0),
    );

    // Nothing to place on a time axis yet
    if state.duration_ms() == 0 {
        return;
    }

    match state.effective_mode() {
        SurfaceMode::Spectrogram => {
            if let Some(spectrogram) = state.spectrogram() {
                for cell in layout::spectrogram_cells(spectrogram, size.width, size.height) {
                    frame.fill_rectangle(
                        Point::new(cell.x, cell.y),
                        Size::new(cell.width, cell.height),
                        spectrogram_color(cell.value),
                    );
                }
            }
        }
        SurfaceMode::Waveform => {
            if let Some(peaks) = state.peaks() {
                draw_waveform(frame, &peaks.peaks, size);
            }
        }
    }

    if let Some(bpm) = state.tempo() {
        draw_grid(frame, bpm, state.duration_ms(), size, label_size);
    }
}

fn draw_waveform(frame: &mut Frame, peaks: &[(f32, f32)], size: Size) {
    let columns = layout::waveform_columns(peaks, size.width, size.height);
    if columns.is_empty() {
        return;
    }

    let path = Path::new(|builder| {
        for column in &columns {
            builder.move_to(Point::new(column.x, column.top));
            builder.line_to(Point::new(column.x, column.bottom));
        }
    });

    let stroke_width = (size.width / columns.len() as f32).clamp(1.0, 3.0);
    frame.stroke(
        &path,
        Stroke::default().with_color(WAVEFORM_COLOR).with_width(stroke_width),
    );
}

fn draw_grid(frame: &mut Frame, bpm: f64, duration_ms: u64, size: Size, label_size: f32) {
    for line in layout::beat_grid(bpm, duration_ms, size.width) {
        let (color, width) = match line.kind {
            GridLineKind::Measure => (MEASURE_LINE_COLOR, 1.5),
            GridLineKind::Beat => (BEAT_LINE_COLOR, 1.0),
        };
        frame.stroke(
            &Path::line(Point::new(line.x, 0.0), Point::new(line.x, size.height)),
            Stroke::default().with_color(color).with_width(width),
        );

        if let Some(measure) = line.label {
            frame.fill_text(Text {
                content: measure.to_string(),
                position: Point::new(line.x + 3.0, 2.0),
                size: label_size.into(),
                color: LABEL_COLOR,
                align_x: Horizontal::Left.into(),
                align_y: Vertical::Top.into(),
                ..Text::default()
            });
        }
    }
}

// =============================================================================
// Overlay
// =============================================================================

fn draw_overlay(frame: &mut Frame, state: &SurfaceState, size: Size) {
    let center_y = size.height / 2.0;

    if state.is_loading() {
        let track_x = size.width * 0.3;
        let track_width = size.width * 0.4;
        frame.fill_rectangle(
            Point::new(track_x, center_y - 2.0),
            Size::new(track_width, 4.0),
            LOADING_TRACK_COLOR,
        );
        let done = state.progress().unwrap_or(0.0);
        frame.fill_rectangle(
            Point::new(track_x, center_y - 2.0),
            Size::new(track_width * done, 4.0),
            LOADING_COLOR,
        );
        return;
    }

    if state.error().is_some() {
        let mut x = 0.0;
        while x < size.width {
            frame.fill_rectangle(Point::new(x, center_y - 1.0), Size::new(10.0, 2.0), ERROR_COLOR);
            x += 20.0;
        }
        return;
    }

    if state.duration_ms() == 0 {
        return;
    }

    let x = layout::x_for_time(state.position_ms(), state.duration_ms(), size.width);
    frame.stroke(
        &Path::line(Point::new(x, 0.0), Point::new(x, size.height)),
        Stroke::default().with_color(POSITION_COLOR).with_width(2.0),
    );
}
