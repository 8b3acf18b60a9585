//! Plotters drawing backend that renders into a region of a PDF [`Canvas`].
//!
//! One backend pixel is one PDF point. Text is emitted as real PDF text in
//! Helvetica, so the chart labels stay selectable and sharp.

use std::convert::Infallible;

use plotters_backend::text_anchor::{HPos, VPos};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingBackend, DrawingErrorKind, FontStyle,
    FontTransform,
};

use super::pdf::{Canvas, Direction, Font, Rgb, text_width};

/// Renders plotters primitives into `canvas`, offset to `origin` (page points).
pub struct PdfBackend<'a> {
    canvas: &'a mut Canvas,
    origin: (f64, f64),
    size: (u32, u32),
}

impl<'a> PdfBackend<'a> {
    pub fn new(canvas: &'a mut Canvas, origin: (f64, f64), size: (u32, u32)) -> Self {
        Self { canvas, origin, size }
    }

    fn at(&self, p: BackendCoord) -> (f64, f64) {
        (self.origin.0 + p.0 as f64, self.origin.1 + p.1 as f64)
    }

    /// Set the paint colour; `false` means the colour is fully transparent and nothing should be drawn.
    fn stroke(&mut self, color: BackendColor, width: u32) -> bool {
        if color.alpha <= 0.0 {
            return false;
        }
        let c = blend_on_white(color);
        self.canvas.stroke_color(c);
        self.canvas.line_width(width.max(1) as f64 * 0.75);
        true
    }

    fn fill(&mut self, color: BackendColor) -> bool {
        if color.alpha <= 0.0 {
            return false;
        }
        self.canvas.fill_color(blend_on_white(color));
        true
    }
}

/// Pre-multiply translucent colours against the white page.
fn blend_on_white(color: BackendColor) -> Rgb {
    let (r, g, b) = color.rgb;
    Rgb(255, 255, 255).lerp(Rgb(r, g, b), color.alpha)
}

fn font_of<S: BackendTextStyle>(style: &S) -> Font {
    match style.style() {
        FontStyle::Bold => Font::Bold,
        _ => Font::Regular,
    }
}

impl DrawingBackend for PdfBackend<'_> {
    type ErrorType = Infallible;

    fn get_size(&self) -> (u32, u32) {
        self.size
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Infallible>> {
        Ok(())
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Infallible>> {
        Ok(())
    }

    fn draw_pixel(&mut self, point: BackendCoord, color: BackendColor) -> Result<(), DrawingErrorKind<Infallible>> {
        if self.fill(color) {
            let (x, y) = self.at(point);
            self.canvas.rect(x, y, 1.0, 1.0, true);
        }
        Ok(())
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Infallible>> {
        if self.stroke(style.color(), style.stroke_width()) {
            let (a, b) = (self.at(from), self.at(to));
            self.canvas.line(a, b);
        }
        Ok(())
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Infallible>> {
        let (x0, y0) = self.at(upper_left);
        let (x1, y1) = self.at(bottom_right);
        let painted = if fill {
            self.fill(style.color())
        } else {
            self.stroke(style.color(), style.stroke_width())
        };
        if painted {
            self.canvas.rect(x0, y0, x1 - x0, y1 - y0, fill);
        }
        Ok(())
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Infallible>> {
        if self.stroke(style.color(), style.stroke_width()) {
            let points: Vec<(f64, f64)> = path.into_iter().map(|p| self.at(p)).collect();
            self.canvas.path(&points, false, false);
        }
        Ok(())
    }

    fn draw_circle<S: BackendStyle>(
        &mut self,
        center: BackendCoord,
        radius: u32,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Infallible>> {
        let painted = if fill {
            self.fill(style.color())
        } else {
            self.stroke(style.color(), style.stroke_width())
        };
        if painted {
            let c = self.at(center);
            self.canvas.circle(c, radius as f64, fill);
        }
        Ok(())
    }

    fn fill_polygon<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        vert: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Infallible>> {
        if self.fill(style.color()) {
            let points: Vec<(f64, f64)> = vert.into_iter().map(|p| self.at(p)).collect();
            self.canvas.path(&points, true, true);
        }
        Ok(())
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Infallible>> {
        if !self.fill(style.color()) {
            return Ok(());
        }
        let size = style.size();
        let font = font_of(style);
        let width = text_width(text, size, font);

        // Offsets in the text's own frame: `along` the reading direction and
        // `down` from the anchor to the baseline.
        let anchor = style.anchor();
        let along = match anchor.h_pos {
            HPos::Left => 0.0,
            HPos::Center => -width / 2.0,
            HPos::Right => -width,
        };
        let down = match anchor.v_pos {
            VPos::Top => 0.75 * size,
            VPos::Center => 0.35 * size,
            VPos::Bottom => -0.2 * size,
        };

        let (dx, dy, direction) = match style.transform() {
            FontTransform::None => (along, down, Direction::Right),
            FontTransform::Rotate90 => (-down, along, Direction::Down),
            FontTransform::Rotate180 => (-along, -down, Direction::Left),
            FontTransform::Rotate270 => (down, -along, Direction::Up),
        };
        let (x, y) = self.at(pos);
        self.canvas.text_at((x + dx, y + dy), size, font, direction, text);
        Ok(())
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<Infallible>> {
        let size = style.size();
        let width = text_width(text, size, font_of(style));
        Ok((width.ceil() as u32, size.ceil() as u32))
    }
}
