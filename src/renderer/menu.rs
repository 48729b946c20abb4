use crate::canvas::{Canvas, FontState};
use crate::renderer::{MenuRow, PanelState, Rect, FULL_CHARGE_TEXT};
use crate::widget::{position_to_percent, Slider};

pub fn slider_caption(slider: Slider, percent: u8) -> String {
    match slider {
        Slider::Start => format!("Start {}%", percent),
        Slider::End => format!("Stop {}%", percent),
    }
}

fn with_alpha(color: [u8; 4], alpha: u8) -> [u8; 4] {
    [color[0], color[1], color[2], alpha]
}

pub fn render(canvas: &mut Canvas, state: &PanelState, font: &FontState) {
    let theme = state.theme;
    let m = &state.layout.metrics;

    for (row, rect) in &state.layout.rows {
        if state.hover == Some(*row) && !matches!(row, MenuRow::Mode) {
            let inset = m.pad * 0.25;
            canvas.fill_rounded_rect(
                rect.x + inset,
                rect.y + inset,
                rect.w - inset * 2.0,
                rect.h - inset * 2.0,
                m.pad * 0.5,
                with_alpha(theme.accent_color, 0x33),
            );
        }

        let text_y = rect.center_y() - m.font_size / 2.0;
        match row {
            MenuRow::Mode => {
                let dim = with_alpha(theme.fg_color, 0xAA);
                font.draw_text(canvas, &state.model.mode, rect.x + m.pad, text_y, m.font_size, dim);
            }
            MenuRow::Slider(slider) => {
                let position = match slider {
                    Slider::Start => state.model.start,
                    Slider::End => state.model.end,
                };
                let caption = slider_caption(*slider, position_to_percent(position));
                font.draw_text(canvas, &caption, rect.x + m.pad, text_y, m.font_size, theme.fg_color);
                if let Some(track) = state.layout.slider_track(*slider) {
                    draw_slider(canvas, track, position, m.font_size, state);
                }
            }
            MenuRow::SetThreshold => {
                font.draw_text(canvas, &state.model.threshold_item, rect.x + m.pad, text_y, m.font_size, theme.fg_color);
            }
            MenuRow::FullCharge => {
                font.draw_text(canvas, FULL_CHARGE_TEXT, rect.x + m.pad, text_y, m.font_size, theme.fg_color);
            }
        }
    }
}

fn draw_slider(canvas: &mut Canvas, track: Rect, position: f64, font_size: f32, state: &PanelState) {
    let theme = state.theme;
    let cy = track.center_y();
    let thickness = (font_size * 0.25).max(2.0);
    let knob_r = (font_size * 0.45).max(4.0);
    let x0 = track.x;
    let x1 = track.x + track.w;
    let knob_x = x0 + (x1 - x0) * position as f32;

    canvas.draw_line(x0, cy, x1, cy, with_alpha(theme.fg_color, 0x55), thickness);
    canvas.draw_line(x0, cy, knob_x, cy, theme.accent_color, thickness);
    canvas.fill_circle(knob_x, cy, knob_r, theme.fg_color);
}
