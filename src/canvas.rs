use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Rect, Stroke, Transform};

pub struct Canvas {
    pub pixmap: Pixmap,
}

pub struct FontState {
    font: fontdue::Font,
}

fn paint(color: [u8; 4]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
    paint.anti_alias = true;
    paint
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self { pixmap: Pixmap::new(width, height)? })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn clear(&mut self, color: [u8; 4]) {
        self.pixmap.fill(Color::from_rgba8(color[0], color[1], color[2], color[3]));
    }

    pub fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: [u8; 4]) {
        if let Some(rect) = Rect::from_xywh(x, y, w, h) {
            self.pixmap.fill_rect(rect, &paint(color), Transform::identity(), None);
        }
    }

    /// Rectangle with quarter-circle corners of radius `r`.
    pub fn fill_rounded_rect(&mut self, x: f32, y: f32, w: f32, h: f32, r: f32, color: [u8; 4]) {
        let r = r.min(w / 2.0).min(h / 2.0).max(0.0);
        let mut pb = PathBuilder::new();
        pb.move_to(x + r, y);
        pb.line_to(x + w - r, y);
        pb.quad_to(x + w, y, x + w, y + r);
        pb.line_to(x + w, y + h - r);
        pb.quad_to(x + w, y + h, x + w - r, y + h);
        pb.line_to(x + r, y + h);
        pb.quad_to(x, y + h, x, y + h - r);
        pb.line_to(x, y + r);
        pb.quad_to(x, y, x + r, y);
        pb.close();
        if let Some(path) = pb.finish() {
            self.pixmap.fill_path(&path, &paint(color), FillRule::Winding, Transform::identity(), None);
        }
    }

    pub fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: [u8; 4], width: f32) {
        if let Some(rect) = Rect::from_xywh(x, y, w, h) {
            let path = PathBuilder::from_rect(rect);
            let stroke = Stroke { width, ..Stroke::default() };
            self.pixmap.stroke_path(&path, &paint(color), &stroke, Transform::identity(), None);
        }
    }

    pub fn draw_line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, color: [u8; 4], width: f32) {
        let mut pb = PathBuilder::new();
        pb.move_to(x1, y1);
        pb.line_to(x2, y2);
        if let Some(path) = pb.finish() {
            let stroke = Stroke { width, line_cap: tiny_skia::LineCap::Round, ..Stroke::default() };
            self.pixmap.stroke_path(&path, &paint(color), &stroke, Transform::identity(), None);
        }
    }

    pub fn fill_circle(&mut self, cx: f32, cy: f32, r: f32, color: [u8; 4]) {
        if let Some(path) = PathBuilder::from_circle(cx, cy, r) {
            self.pixmap.fill_path(&path, &paint(color), FillRule::Winding, Transform::identity(), None);
        }
    }

    /// Closed filled polygon through `points`.
    pub fn fill_polygon(&mut self, points: &[(f32, f32)], color: [u8; 4]) {
        let Some((&(x0, y0), rest)) = points.split_first() else { return };
        let mut pb = PathBuilder::new();
        pb.move_to(x0, y0);
        for &(x, y) in rest {
            pb.line_to(x, y);
        }
        pb.close();
        if let Some(path) = pb.finish() {
            self.pixmap.fill_path(&path, &paint(color), FillRule::Winding, Transform::identity(), None);
        }
    }

    /// Scale every pixel's alpha (and premultiplied channels) by `opacity`.
    pub fn apply_opacity(&mut self, opacity: f32) {
        if opacity >= 1.0 {
            return;
        }
        let scale = (opacity.max(0.0) * 255.0) as u32;
        for px in self.pixmap.data_mut().chunks_exact_mut(4) {
            for channel in px.iter_mut() {
                *channel = ((*channel as u32 * scale) / 255) as u8;
            }
        }
    }

    /// Copy pixels into a wl_shm ARGB8888 (little-endian BGRA) buffer.
    pub fn write_argb8888(&self, out: &mut [u8]) {
        for (src, dst) in self.pixmap.data().chunks_exact(4).zip(out.chunks_exact_mut(4)) {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
            dst[3] = src[3];
        }
    }
}

const FONT_DIRS: [&str; 4] = [
    "/usr/share/fonts",
    "/usr/local/share/fonts",
    "/run/current-system/sw/share/X11/fonts",
    "/nix/var/nix/profiles/system/sw/share/X11/fonts",
];

const FALLBACK_FONTS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

impl FontState {
    /// Load `name` as a path, then as a name fragment under the system font
    /// directories, then fall back to any common sans font.
    pub fn load(name: &str) -> Result<Self> {
        if let Some(font) = Self::from_file(Path::new(name)) {
            return Ok(Self { font });
        }

        let needle = name.to_lowercase().replace(' ', "");
        let search_dirs: Vec<PathBuf> = user_font_dir().into_iter().chain(FONT_DIRS.iter().map(PathBuf::from)).collect();

        for dir in &search_dirs {
            if let Some(font) = walk_fonts(dir, &|path| file_stem_lower(path).contains(&needle)) {
                return Ok(Self { font });
            }
        }

        for path in FALLBACK_FONTS {
            if let Some(font) = Self::from_file(Path::new(path)) {
                log::info!("Font '{}' not found, using fallback {}", name, path);
                return Ok(Self { font });
            }
        }

        search_dirs
            .iter()
            .find_map(|dir| walk_fonts(dir, &|_| true))
            .map(|font| Self { font })
            .with_context(|| format!("No usable font found for '{}'. Install a TTF font or set theme.font to a file path.", name))
    }

    fn from_file(path: &Path) -> Option<fontdue::Font> {
        let data = std::fs::read(path).ok()?;
        let font = fontdue::Font::from_bytes(data, fontdue::FontSettings::default()).ok()?;
        log::info!("Loaded font {}", path.display());
        Some(font)
    }

    pub fn measure_text(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|ch| self.font.metrics(ch, size).advance_width).sum()
    }

    /// Draw `text` with its top at `y`.
    pub fn draw_text(&self, canvas: &mut Canvas, text: &str, x: f32, y: f32, size: f32, color: [u8; 4]) {
        let baseline = y + size * 0.8;
        let mut cursor_x = x;
        for ch in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(ch, size);
            let gx = cursor_x.round() as i32 + metrics.xmin;
            let gy = baseline.round() as i32 - metrics.height as i32 - metrics.ymin;
            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let coverage = bitmap[row * metrics.width + col];
                    let (px, py) = (gx + col as i32, gy + row as i32);
                    if coverage == 0 || px < 0 || py < 0 || px as u32 >= canvas.width() || py as u32 >= canvas.height() {
                        continue;
                    }
                    let alpha = (coverage as u32 * color[3] as u32) / 255;
                    blend_pixel(&mut canvas.pixmap, px as u32, py as u32, color, alpha as u8);
                }
            }
            cursor_x += metrics.advance_width;
        }
    }
}

fn user_font_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".local/share/fonts"))
}

fn file_stem_lower(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase().replace([' ', '-', '_'], ""))
        .unwrap_or_default()
}

fn walk_fonts(dir: &Path, accept: &dyn Fn(&Path) -> bool) -> Option<fontdue::Font> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(font) = walk_fonts(&path, accept) {
                return Some(font);
            }
            continue;
        }
        let is_font = path
            .extension()
            .map(|ext| matches!(ext.to_string_lossy().to_lowercase().as_str(), "ttf" | "otf"))
            .unwrap_or(false);
        if is_font && accept(&path) {
            if let Some(font) = FontState::from_file(&path) {
                return Some(font);
            }
        }
    }
    None
}

/// Source-over blend of a straight-alpha colour onto premultiplied pixels.
fn blend_pixel(pixmap: &mut Pixmap, x: u32, y: u32, color: [u8; 4], alpha: u8) {
    let idx = ((y * pixmap.width() + x) * 4) as usize;
    let data = pixmap.data_mut();
    if idx + 3 >= data.len() || alpha == 0 {
        return;
    }

    let a = alpha as u32;
    let inv_a = 255 - a;
    for c in 0..3 {
        data[idx + c] = ((color[c] as u32 * a + data[idx + c] as u32 * inv_a) / 255) as u8;
    }
    data[idx + 3] = (a + data[idx + 3] as u32 * inv_a / 255).min(255) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_canvas_is_rejected() {
        assert!(Canvas::new(0, 10).is_none());
        assert!(Canvas::new(4, 4).is_some());
    }

    #[test]
    fn swizzles_to_bgra() {
        let mut canvas = Canvas::new(1, 1).unwrap();
        canvas.clear([0x10, 0x20, 0x30, 0xFF]);
        let mut out = [0u8; 4];
        canvas.write_argb8888(&mut out);
        assert_eq!(out, [0x30, 0x20, 0x10, 0xFF]);
    }

    #[test]
    fn opacity_scales_premultiplied_pixels() {
        let mut canvas = Canvas::new(1, 1).unwrap();
        canvas.clear([0xFF, 0xFF, 0xFF, 0xFF]);
        canvas.apply_opacity(0.5);
        let px = &canvas.pixmap.data()[..4];
        assert!(px.iter().all(|&c| c == px[3]));
        assert!(px[3] > 0x70 && px[3] < 0x90);
    }

    #[test]
    fn blend_writes_inside_bounds_only() {
        let mut canvas = Canvas::new(2, 2).unwrap();
        blend_pixel(&mut canvas.pixmap, 1, 1, [0xFF, 0, 0, 0xFF], 0xFF);
        blend_pixel(&mut canvas.pixmap, 5, 5, [0xFF, 0, 0, 0xFF], 0xFF);
        let data = canvas.pixmap.data();
        assert_eq!(&data[12..16], &[0xFF, 0, 0, 0xFF]);
        assert_eq!(&data[0..4], &[0, 0, 0, 0]);
    }
}
