pub mod icon;
pub mod menu;

use crate::canvas::{Canvas, FontState};
use crate::config::ThemeConfig;
use crate::widget::{PanelModel, Slider};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.h / 2.0
    }
}

/// Rows of the popup menu, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuRow {
    Mode,
    Slider(Slider),
    SetThreshold,
    FullCharge,
}

pub const MENU_ROWS: [MenuRow; 5] = [
    MenuRow::Mode,
    MenuRow::Slider(Slider::Start),
    MenuRow::Slider(Slider::End),
    MenuRow::SetThreshold,
    MenuRow::FullCharge,
];

/// What a pointer position lands on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Hit {
    Bar,
    Slider(Slider, f64),
    SetThreshold,
    FullCharge,
}

pub const FULL_CHARGE_TEXT: &str = "Charge Fully";

/// Sizes derived from the configured font size.
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    pub font_size: f32,
    pub pad: f32,
    pub bar_h: f32,
    pub icon_size: f32,
    pub row_h: f32,
    pub caption_w: f32,
}

impl Metrics {
    pub fn new(font_size: f32, measure: &dyn Fn(&str, f32) -> f32) -> Self {
        let pad = (font_size * 0.6).round();
        Self {
            font_size,
            pad,
            bar_h: (font_size * 2.0).round(),
            icon_size: (font_size * 1.25).round(),
            row_h: (font_size * 2.2).round(),
            caption_w: measure(&menu::slider_caption(Slider::Start, 100), font_size).ceil(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub metrics: Metrics,
    pub bar: Rect,
    pub icon: Rect,
    pub label_x: f32,
    pub rows: Vec<(MenuRow, Rect)>,
}

impl Layout {
    pub fn compute(model: &PanelModel, font_size: f32, menu_open: bool, measure: &dyn Fn(&str, f32) -> f32) -> Self {
        let m = Metrics::new(font_size, measure);
        let label_w = measure(&model.label, font_size).ceil();
        let bar_w = m.pad + m.icon_size + m.pad * 0.6 + label_w + m.pad;

        let mut width = bar_w;
        let mut height = m.bar_h;
        let mut rows = Vec::new();

        if menu_open {
            let text_w = [model.mode.as_str(), model.threshold_item.as_str(), FULL_CHARGE_TEXT]
                .iter()
                .map(|t| measure(t, font_size).ceil())
                .fold(0.0f32, f32::max);
            let slider_w = m.caption_w + m.pad + font_size * 10.0;
            width = width.max(text_w + m.pad * 2.0).max(slider_w + m.pad * 2.0);

            let mut y = m.bar_h + m.pad * 0.5;
            for row in MENU_ROWS {
                rows.push((row, Rect::new(0.0, y, width, m.row_h)));
                y += m.row_h;
            }
            height = y + m.pad * 0.5;
        }

        let bar = Rect::new(0.0, 0.0, width, m.bar_h);
        let icon = Rect::new(m.pad, (m.bar_h - m.icon_size) / 2.0, m.icon_size, m.icon_size);
        let label_x = icon.x + icon.w + m.pad * 0.6;

        Self {
            width: width.ceil() as u32,
            height: height.ceil() as u32,
            metrics: m,
            bar,
            icon,
            label_x,
            rows,
        }
    }

    pub fn row(&self, row: MenuRow) -> Option<Rect> {
        self.rows.iter().find(|(r, _)| *r == row).map(|(_, rect)| *rect)
    }

    /// Horizontal extent of a slider's track within its row.
    pub fn slider_track(&self, slider: Slider) -> Option<Rect> {
        let row = self.row(MenuRow::Slider(slider))?;
        let m = &self.metrics;
        let x = row.x + m.pad + m.caption_w + m.pad;
        let w = (row.w - (x - row.x) - m.pad).max(1.0);
        Some(Rect::new(x, row.y, w, row.h))
    }

    /// Slider position under `x`, clamped to [0, 1].
    pub fn slider_position(&self, slider: Slider, x: f32) -> Option<f64> {
        let track = self.slider_track(slider)?;
        Some((((x - track.x) / track.w) as f64).clamp(0.0, 1.0))
    }

    pub fn row_at(&self, x: f32, y: f32) -> Option<MenuRow> {
        self.rows.iter().find(|(_, rect)| rect.contains(x, y)).map(|(row, _)| *row)
    }

    pub fn hit(&self, x: f32, y: f32) -> Option<Hit> {
        if self.bar.contains(x, y) {
            return Some(Hit::Bar);
        }
        match self.row_at(x, y)? {
            MenuRow::Mode => None,
            MenuRow::Slider(slider) => self.slider_position(slider, x).map(|p| Hit::Slider(slider, p)),
            MenuRow::SetThreshold => Some(Hit::SetThreshold),
            MenuRow::FullCharge => Some(Hit::FullCharge),
        }
    }
}

pub struct PanelState<'a> {
    pub model: &'a PanelModel,
    pub theme: &'a ThemeConfig,
    pub layout: &'a Layout,
    pub hover: Option<MenuRow>,
}

pub fn render(canvas: &mut Canvas, state: &PanelState, font: &FontState) {
    let theme = state.theme;
    let layout = state.layout;
    let m = &layout.metrics;
    let w = canvas.width() as f32;
    let h = canvas.height() as f32;

    canvas.clear([0, 0, 0, 0]);
    canvas.fill_rounded_rect(0.0, 0.0, w, h, m.pad * 0.75, theme.bg_color);

    icon::draw(canvas, state.model.icon, layout.icon, theme);

    let text_y = layout.bar.center_y() - m.font_size / 2.0;
    font.draw_text(canvas, &state.model.label, layout.label_x, text_y, m.font_size, theme.fg_color);

    if !layout.rows.is_empty() {
        let sep = [theme.fg_color[0], theme.fg_color[1], theme.fg_color[2], 0x44];
        canvas.draw_line(m.pad, layout.bar.h, w - m.pad, layout.bar.h, sep, 1.0);
        menu::render(canvas, state, font);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measure(text: &str, size: f32) -> f32 {
        text.chars().count() as f32 * size * 0.5
    }

    fn model() -> PanelModel {
        PanelModel {
            label: "AC | Charging".into(),
            mode: "TLP Mode: AC".into(),
            threshold_item: "Set Charge Threshold: 60% -> 80%".into(),
            start: 0.6,
            end: 0.8,
            ..PanelModel::default()
        }
    }

    #[test]
    fn closed_layout_is_just_the_bar() {
        let layout = Layout::compute(&model(), 10.0, false, &measure);
        assert_eq!(layout.height, 20);
        assert!(layout.rows.is_empty());
        // pad 6 + icon 13 + gap 3.6 + label 65 + pad 6
        assert_eq!(layout.width, 94);
        assert_eq!(layout.hit(5.0, 5.0), Some(Hit::Bar));
        assert_eq!(layout.hit(5.0, 25.0), None);
    }

    #[test]
    fn open_layout_stacks_rows_below_bar() {
        let layout = Layout::compute(&model(), 10.0, true, &measure);
        assert_eq!(layout.rows.len(), MENU_ROWS.len());
        let mut prev_bottom = layout.bar.h;
        for (_, rect) in &layout.rows {
            assert!(rect.y >= prev_bottom);
            prev_bottom = rect.y + rect.h;
        }
        assert!(layout.height as f32 >= prev_bottom);
        assert!(layout.width as f32 >= measure(&model().threshold_item, 10.0));
    }

    #[test]
    fn hits_menu_items_and_sliders() {
        let layout = Layout::compute(&model(), 10.0, true, &measure);
        let set = layout.row(MenuRow::SetThreshold).unwrap();
        assert_eq!(layout.hit(10.0, set.center_y()), Some(Hit::SetThreshold));
        let full = layout.row(MenuRow::FullCharge).unwrap();
        assert_eq!(layout.hit(10.0, full.center_y()), Some(Hit::FullCharge));
        let mode = layout.row(MenuRow::Mode).unwrap();
        assert_eq!(layout.hit(10.0, mode.center_y()), None);

        let track = layout.slider_track(Slider::End).unwrap();
        let mid = track.x + track.w / 2.0;
        match layout.hit(mid, track.center_y()) {
            Some(Hit::Slider(Slider::End, p)) => assert!((p - 0.5).abs() < 1e-6),
            other => panic!("unexpected hit {:?}", other),
        }
        assert_eq!(layout.slider_position(Slider::Start, -100.0), Some(0.0));
        assert_eq!(layout.slider_position(Slider::Start, 10_000.0), Some(1.0));
    }
}
