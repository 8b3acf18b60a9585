//! Single-page PDF writer.
//!
//! [`Canvas`] collects vector drawing operators in page points with the origin
//! at the top-left corner and y growing downward (the convention plotters uses);
//! the flip to PDF's bottom-up coordinates happens here. [`write_pdf`] wraps the
//! operators into a complete PDF 1.4 file with the two standard Helvetica fonts,
//! so nothing needs to be embedded.

/// A4 landscape, in points.
pub const PAGE_WIDTH: f64 = 841.89;
pub const PAGE_HEIGHT: f64 = 595.28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Linear blend towards `other` (`t = 0` is `self`).
    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "/F1",
            Font::Bold => "/F2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

/// Text direction on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Right,
    Up,
    Down,
    Left,
}

/// Page content under construction.
#[derive(Debug, Clone, Default)]
pub struct Canvas {
    ops: String,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operators(&self) -> &str {
        &self.ops
    }

    pub fn stroke_color(&mut self, c: Rgb) {
        self.ops.push_str(&format!("{} {} {} RG\n", unit(c.0), unit(c.1), unit(c.2)));
    }

    pub fn fill_color(&mut self, c: Rgb) {
        self.ops.push_str(&format!("{} {} {} rg\n", unit(c.0), unit(c.1), unit(c.2)));
    }

    pub fn line_width(&mut self, w: f64) {
        self.ops.push_str(&format!("{} w\n", num(w)));
    }

    pub fn line(&mut self, from: (f64, f64), to: (f64, f64)) {
        self.path(&[from, to], false, false);
    }

    /// Poly-line through `points`; `close` joins the ends, `fill` paints the inside.
    pub fn path(&mut self, points: &[(f64, f64)], close: bool, fill: bool) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        self.ops.push_str(&format!("{} {} m\n", num(first.0), num(flip(first.1))));
        for p in rest {
            self.ops.push_str(&format!("{} {} l\n", num(p.0), num(flip(p.1))));
        }
        let paint = match (close, fill) {
            (_, true) => "h f",
            (true, false) => "h S",
            (false, false) => "S",
        };
        self.ops.push_str(paint);
        self.ops.push('\n');
    }

    /// Axis-aligned rectangle with top-left corner `(x, y)`.
    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: bool) {
        self.ops.push_str(&format!(
            "{} {} {} {} re {}\n",
            num(x),
            num(flip(y + h)),
            num(w),
            num(h),
            if fill { "f" } else { "S" }
        ));
    }

    /// Circle from four cubic Bézier arcs.
    pub fn circle(&mut self, center: (f64, f64), r: f64, fill: bool) {
        const KAPPA: f64 = 0.552_284_749_8;
        let (cx, cy) = (center.0, flip(center.1));
        let k = KAPPA * r;
        let mut s = format!("{} {} m\n", num(cx + r), num(cy));
        let arcs = [
            (cx + r, cy + k, cx + k, cy + r, cx, cy + r),
            (cx - k, cy + r, cx - r, cy + k, cx - r, cy),
            (cx - r, cy - k, cx - k, cy - r, cx, cy - r),
            (cx + k, cy - r, cx + r, cy - k, cx + r, cy),
        ];
        for (x1, y1, x2, y2, x3, y3) in arcs {
            s.push_str(&format!(
                "{} {} {} {} {} {} c\n",
                num(x1),
                num(y1),
                num(x2),
                num(y2),
                num(x3),
                num(y3)
            ));
        }
        s.push_str(if fill { "f\n" } else { "S\n" });
        self.ops.push_str(&s);
    }

    /// Horizontal text with its baseline at `y`, aligned on `x`.
    pub fn text(&mut self, x: f64, y: f64, size: f64, font: Font, align: Align, text: &str) {
        let w = text_width(text, size, font);
        let x = match align {
            Align::Left => x,
            Align::Center => x - w / 2.0,
            Align::Right => x - w,
        };
        self.text_at((x, y), size, font, Direction::Right, text);
    }

    /// Text starting at `origin` (baseline) and running in `direction`.
    pub fn text_at(&mut self, origin: (f64, f64), size: f64, font: Font, direction: Direction, text: &str) {
        let (a, b, c, d) = match direction {
            Direction::Right => (1, 0, 0, 1),
            Direction::Up => (0, 1, -1, 0),
            Direction::Down => (0, -1, 1, 0),
            Direction::Left => (-1, 0, 0, -1),
        };
        self.ops.push_str(&format!(
            "BT {} {} Tf {a} {b} {c} {d} {} {} Tm ({}) Tj ET\n",
            font.resource(),
            num(size),
            num(origin.0),
            num(flip(origin.1)),
            escape(text)
        ));
    }
}

/// Approximate Helvetica advance width of `text` in points.
pub fn text_width(text: &str, size: f64, font: Font) -> f64 {
    let em: f64 = text
        .chars()
        .map(|ch| match ch {
            'i' | 'j' | 'l' | '\'' | '|' => 0.222,
            ' ' | '.' | ',' | ':' | ';' | '!' | 'f' | 't' | 'I' | '[' | ']' | '(' | ')' | '/' => 0.278,
            'r' | '-' => 0.333,
            'm' | 'M' | 'W' => 0.833,
            'w' | '%' => 0.8,
            'A'..='Z' => 0.667,
            '0'..='9' | 'a'..='z' | '+' | '=' | '<' | '>' | '^' | '_' | '$' | '?' => 0.556,
            _ => 0.6,
        })
        .sum();
    let bold = if font == Font::Bold { 1.06 } else { 1.0 };
    em * size * bold
}

/// Assemble a complete one-page PDF around the content stream.
pub fn write_pdf(canvas: &Canvas, title: &str, timestamp: &str) -> Vec<u8> {
    let content = canvas.operators();
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
             /Resources << /Font << /F1 4 0 R /F2 5 0 R >> >> /Contents 6 0 R >>",
            num(PAGE_WIDTH),
            num(PAGE_HEIGHT)
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>".to_string(),
        format!("<< /Length {} >>\nstream\n{content}endstream", content.len()),
        format!(
            "<< /Title ({}) /Producer (pfit) /CreationDate (D:{timestamp}) >>",
            escape(title)
        ),
    ];

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{body}\nendobj\n", i + 1));
    }

    let xref = out.len();
    out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    out.push_str("0000000000 65535 f \n");
    for off in &offsets {
        out.push_str(&format!("{off:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R /Info {} 0 R >>\nstartxref\n{xref}\n%%EOF\n",
        objects.len() + 1,
        objects.len()
    ));
    out.into_bytes()
}

fn flip(y: f64) -> f64 {
    PAGE_HEIGHT - y
}

fn unit(c: u8) -> String {
    num(c as f64 / 255.0)
}

/// Compact decimal with at most three fractional digits.
fn num(v: f64) -> String {
    let s = format!("{v:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".to_string() } else { s.to_string() }
}

/// PDF literal string body for the WinAnsi-encoded fonts. Non-ASCII characters
/// with a WinAnsi code become octal escapes; anything else becomes `?`.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            ' '..='~' => out.push(ch),
            _ => match win_ansi(ch) {
                Some(code) => out.push_str(&format!("\\{code:03o}")),
                None => out.push('?'),
            },
        }
    }
    out
}

/// WinAnsiEncoding byte of a non-ASCII character.
fn win_ansi(ch: char) -> Option<u8> {
    let code = match ch {
        '\u{a0}'..='\u{ff}' => return u8::try_from(u32::from(ch)).ok(),
        // Greek small mu shares the micro sign glyph.
        'μ' => 0xb5,
        '€' => 0x80,
        '‚' => 0x82,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        '‰' => 0x89,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '™' => 0x99,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xref_offsets(pdf: &str) -> Vec<usize> {
        let start = pdf.find("xref\n").unwrap();
        pdf[start..]
            .lines()
            .skip(3)
            .take_while(|l| l.ends_with(" n "))
            .map(|l| l[..10].parse().unwrap())
            .collect()
    }

    #[test]
    fn document_structure_is_consistent() {
        let mut canvas = Canvas::new();
        canvas.stroke_color(Rgb(255, 0, 0));
        canvas.line((10.0, 10.0), (100.0, 50.0));
        canvas.text(20.0, 30.0, 12.0, Font::Bold, Align::Left, "Fit (k)");

        let bytes = write_pdf(&canvas, "Report", "20260101120000");
        let pdf = String::from_utf8(bytes).unwrap();
        assert!(pdf.starts_with("%PDF-1.4\n"));
        assert!(pdf.ends_with("%%EOF\n"));

        let offsets = xref_offsets(&pdf);
        assert_eq!(offsets.len(), 7);
        for (i, off) in offsets.iter().enumerate() {
            assert!(pdf[*off..].starts_with(&format!("{} 0 obj\n", i + 1)));
        }

        let startxref: usize = pdf
            .lines()
            .skip_while(|l| *l != "startxref")
            .nth(1)
            .unwrap()
            .parse()
            .unwrap();
        assert!(pdf[startxref..].starts_with("xref\n"));

        let stream_len = canvas.operators().len();
        assert!(pdf.contains(&format!("<< /Length {stream_len} >>")));
        assert!(pdf.contains("(Fit \\(k\\)) Tj"));
    }

    #[test]
    fn coordinates_are_flipped_to_pdf_space() {
        let mut canvas = Canvas::new();
        canvas.line((0.0, 0.0), (10.5, PAGE_HEIGHT));
        assert_eq!(canvas.operators(), "0 595.28 m\n10.5 0 l\nS\n");

        let mut canvas = Canvas::new();
        canvas.rect(10.0, 20.0, 30.0, 40.0, true);
        assert_eq!(canvas.operators(), format!("10 {} 30 40 re f\n", num(PAGE_HEIGHT - 60.0)));
    }

    #[test]
    fn text_is_escaped_and_measured() {
        assert_eq!(escape("a(b)\\c"), "a\\(b\\)\\\\c");
        assert_eq!(escape("χ²"), "?\\262");
        assert_eq!(escape("µM kinetics"), "\\265M kinetics");
        assert_eq!(escape("5 μM – 25 °C"), "5 \\265M \\226 25 \\260C");
        assert!(text_width("MMM", 10.0, Font::Regular) > text_width("iii", 10.0, Font::Regular));
        assert!(text_width("Fit", 10.0, Font::Bold) > text_width("Fit", 10.0, Font::Regular));
    }

    #[test]
    fn colours_blend() {
        assert_eq!(Rgb(0, 0, 0).lerp(Rgb(255, 255, 255), 0.5), Rgb(128, 128, 128));
        assert_eq!(Rgb(10, 20, 30).lerp(Rgb(0, 0, 0), -1.0), Rgb(10, 20, 30));
    }
}
