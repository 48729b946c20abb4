use crate::canvas::Canvas;
use crate::config::ThemeConfig;
use crate::renderer::Rect;
use crate::widget::IconId;

pub fn draw(canvas: &mut Canvas, icon: IconId, area: Rect, theme: &ThemeConfig) {
    match icon {
        IconId::Charging => draw_battery(canvas, area, theme, true),
        IconId::Battery => draw_battery(canvas, area, theme, false),
        IconId::PluggedIn => draw_plug(canvas, area, theme),
    }
}

/// Horizontal battery body with terminal nub; charging adds a bolt.
fn draw_battery(canvas: &mut Canvas, area: Rect, theme: &ThemeConfig, charging: bool) {
    let body_w = area.w * 0.82;
    let body_h = area.h * 0.5;
    let nub_w = area.w * 0.08;
    let nub_h = body_h * 0.45;
    let border = (area.h * 0.08).max(1.5);
    let x = area.x;
    let y = area.y + (area.h - body_h) / 2.0;

    let outline = theme.fg_color;
    canvas.stroke_rect(x, y, body_w, body_h, outline, border);
    canvas.fill_rect(x + body_w, y + (body_h - nub_h) / 2.0, nub_w, nub_h, outline);

    let inner = border + 1.0;
    let fill_color = if charging { theme.charging_color } else { outline };
    let fill_w = if charging { body_w - inner * 2.0 } else { (body_w - inner * 2.0) * 0.6 };
    canvas.fill_rect(x + inner, y + inner, fill_w, body_h - inner * 2.0, fill_color);

    if charging {
        let cx = x + body_w / 2.0;
        let cy = y + body_h / 2.0;
        let bh = body_h * 0.42;
        let bw = body_w * 0.16;
        canvas.fill_polygon(
            &[
                (cx + bw * 0.2, cy - bh),
                (cx - bw * 0.6, cy + bh * 0.15),
                (cx - bw * 0.05, cy + bh * 0.15),
                (cx - bw * 0.2, cy + bh),
                (cx + bw * 0.6, cy - bh * 0.15),
                (cx + bw * 0.05, cy - bh * 0.15),
            ],
            theme.bg_color,
        );
    }
}

/// Mains plug: two prongs, a rounded head and a cord.
fn draw_plug(canvas: &mut Canvas, area: Rect, theme: &ThemeConfig) {
    let color = theme.fg_color;
    let cx = area.x + area.w / 2.0;
    let stroke = (area.w * 0.09).max(1.5);

    let head_w = area.w * 0.5;
    let head_h = area.h * 0.32;
    let head_y = area.y + area.h * 0.3;
    canvas.fill_rounded_rect(cx - head_w / 2.0, head_y, head_w, head_h, head_h * 0.35, color);

    let prong_top = area.y + area.h * 0.08;
    for dx in [-head_w * 0.25, head_w * 0.25] {
        canvas.draw_line(cx + dx, prong_top, cx + dx, head_y, color, stroke);
    }

    canvas.draw_line(cx, head_y + head_h, cx, area.y + area.h * 0.92, color, stroke);
}
