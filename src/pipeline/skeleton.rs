use std::{fs, path::Path};

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use anyhow::{Context, Result, anyhow};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;

use crate::types::{Detections, Frame, Keypoint, Landmark, Person};

/// COCO limb pairs: face, arms, torso, legs.
pub const CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    (5, 6),
    (5, 7),
    (7, 9),
    (6, 8),
    (8, 10),
    (5, 11),
    (6, 12),
    (11, 12),
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
];

const TORSO: [Landmark; 4] = [
    Landmark::LeftShoulder,
    Landmark::RightShoulder,
    Landmark::LeftHip,
    Landmark::RightHip,
];

pub const SKELETON_LINE_THICKNESS: i32 = 2;
const KEYPOINT_RADIUS: i32 = 3;
const CENTROID_RADIUS: i32 = 5;
const LABEL_OFFSET_Y: i32 = 10;
const LABEL_FONT_PX: f32 = 26.0;

const LINE_COLOR: [u8; 4] = [0, 255, 0, 255];
const KEYPOINT_COLOR: [u8; 4] = [255, 0, 0, 255];
const CENTROID_COLOR: [u8; 4] = [0, 255, 255, 255];

static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans-Bold.ttf");

/// Font used for the `#idx` person labels. Parsed once and shared by every
/// frame the processor renders.
#[derive(Clone)]
pub struct LabelFont {
    font: FontArc,
    scale: PxScale,
    ascent: i32,
}

impl LabelFont {
    pub fn embedded() -> Result<Self> {
        let font = FontArc::try_from_slice(EMBEDDED_FONT)
            .map_err(|err| anyhow!("embedded label font is invalid: {err}"))?;
        Ok(Self::from_font(font))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read label font {}", path.display()))?;
        let font = FontArc::try_from_vec(data)
            .map_err(|err| anyhow!("invalid label font {}: {err}", path.display()))?;
        Ok(Self::from_font(font))
    }

    /// A configured font file when given, the embedded one otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::embedded(),
        }
    }

    fn from_font(font: FontArc) -> Self {
        let scale = PxScale::from(LABEL_FONT_PX);
        let ascent = font.as_scaled(scale).ascent().round() as i32;
        Self {
            font,
            scale,
            ascent,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub lines: usize,
    pub markers: usize,
    /// `(person index, centroid)` for every person that got a label.
    pub labels: Vec<(usize, (i32, i32))>,
}

#[derive(Clone, Debug)]
pub struct Annotated {
    pub frame: Frame,
    pub stats: RenderStats,
}

/// Draws every person onto a copy of `frame`. The source buffer is left
/// untouched so the caller can keep using it for analysis.
pub fn render(frame: &Frame, detections: &Detections, font: &LabelFont) -> Annotated {
    let mut stats = RenderStats::default();

    let expected_len = (frame.width as usize)
        .checked_mul(frame.height as usize)
        .and_then(|pixels| pixels.checked_mul(4));
    let canvas = (expected_len == Some(frame.rgba.len()))
        .then(|| RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone()))
        .flatten();
    let Some(mut canvas) = canvas else {
        log::warn!(
            "frame buffer of {} bytes does not match {}x{}, overlay skipped",
            frame.rgba.len(),
            frame.width,
            frame.height
        );
        return Annotated {
            frame: frame.clone(),
            stats,
        };
    };

    for (idx, person) in detections.persons.iter().enumerate() {
        draw_person(&mut canvas, idx, person, font, &mut stats);
    }

    log::trace!(
        "rendered {} persons: {} lines, {} markers, {} labels",
        detections.len(),
        stats.lines,
        stats.markers,
        stats.labels.len()
    );

    Annotated {
        frame: Frame {
            rgba: canvas.into_raw(),
            width: frame.width,
            height: frame.height,
            timestamp: frame.timestamp,
        },
        stats,
    }
}

fn draw_person(
    canvas: &mut RgbaImage,
    idx: usize,
    person: &Person,
    font: &LabelFont,
    stats: &mut RenderStats,
) {
    let points = &person.keypoints;

    for &(a, b) in CONNECTIONS {
        let (Some(pa), Some(pb)) = (points.get(a), points.get(b)) else {
            continue;
        };
        let (Some(pa), Some(pb)) = (visible_pixel(pa), visible_pixel(pb)) else {
            continue;
        };
        draw_line(canvas, pa, pb, LINE_COLOR, SKELETON_LINE_THICKNESS);
        stats.lines += 1;
    }

    for kp in points {
        if let Some(center) = visible_pixel(kp) {
            draw_circle(canvas, center, KEYPOINT_RADIUS, KEYPOINT_COLOR);
            stats.markers += 1;
        }
    }

    let Some(center) = centroid(person) else {
        return;
    };

    draw_label(canvas, center, &format!("#{idx}"), font, CENTROID_COLOR);
    draw_circle(canvas, center, CENTROID_RADIUS, CENTROID_COLOR);
    stats.labels.push((idx, center));
}

/// Truncates to the pixel grid first, then requires both axes to be positive.
/// Non-finite coordinates never reach the pixel grid.
fn visible_pixel(kp: &Keypoint) -> Option<(i32, i32)> {
    if !kp.x.is_finite() || !kp.y.is_finite() {
        return None;
    }
    let (px, py) = (kp.x as i32, kp.y as i32);
    (px > 0 && py > 0).then_some((px, py))
}

/// Mean of the visible torso points, falling back to every visible point.
/// `None` when the person has nothing visible at all.
pub fn centroid(person: &Person) -> Option<(i32, i32)> {
    let torso = TORSO
        .iter()
        .filter_map(|lm| person.get(*lm))
        .filter(|kp| kp.is_drawable());
    if let Some(center) = mean(torso) {
        return Some(center);
    }
    mean(person.keypoints.iter().filter(|kp| kp.is_drawable()))
}

fn mean<'a>(points: impl Iterator<Item = &'a Keypoint>) -> Option<(i32, i32)> {
    let (mut sx, mut sy, mut n) = (0.0f64, 0.0f64, 0usize);
    for kp in points.filter(|kp| kp.x.is_finite() && kp.y.is_finite()) {
        sx += f64::from(kp.x);
        sy += f64::from(kp.y);
        n += 1;
    }
    if n == 0 {
        return None;
    }
    // `as` saturates, so a far-away mean lands on the i32 edge instead of wrapping.
    Some(((sx / n as f64) as i32, (sy / n as f64) as i32))
}

/// Pixel offsets covered by a square brush `thickness` pixels wide.
fn brush_span(thickness: i32) -> (i32, i32) {
    let thickness = thickness.max(1);
    (-(thickness - 1) / 2, thickness / 2)
}

/// Liang-Barsky clip of `p0 -> p1` against the inclusive box `min..=max`.
fn clip_segment(
    p0: (i32, i32),
    p1: (i32, i32),
    min: (i32, i32),
    max: (i32, i32),
) -> Option<((i32, i32), (i32, i32))> {
    let (x0, y0) = (f64::from(p0.0), f64::from(p0.1));
    let (dx, dy) = (f64::from(p1.0) - x0, f64::from(p1.1) - y0);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);

    let edges = [
        (-dx, x0 - f64::from(min.0)),
        (dx, f64::from(max.0) - x0),
        (-dy, y0 - f64::from(min.1)),
        (dy, f64::from(max.1) - y0),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| ((x0 + t * dx).round() as i32, (y0 + t * dy).round() as i32);
    Some((at(t0), at(t1)))
}

fn draw_line(
    canvas: &mut RgbaImage,
    p0: (i32, i32),
    p1: (i32, i32),
    color: [u8; 4],
    thickness: i32,
) {
    let (lo, hi) = brush_span(thickness);
    let (width, height) = canvas.dimensions();
    let max = (
        (width as i32).saturating_sub(1).saturating_add(hi),
        (height as i32).saturating_sub(1).saturating_add(hi),
    );
    // Only the on-frame part is stepped, so far-away endpoints cost nothing.
    let Some(((mut x0, mut y0), (x1, y1))) = clip_segment(p0, p1, (-hi, -hi), max) else {
        return;
    };

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        for oy in lo..=hi {
            for ox in lo..=hi {
                put_pixel_safe(canvas, x0 + ox, y0 + oy, color);
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(canvas: &mut RgbaImage, center: (i32, i32), radius: i32, color: [u8; 4]) {
    let (cx, cy) = center;
    let (width, height) = canvas.dimensions();
    if cx.saturating_sub(radius) >= width as i32 || cy.saturating_sub(radius) >= height as i32 {
        return;
    }
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(canvas, cx.saturating_add(dx), cy.saturating_add(dy), color);
            }
        }
    }
}

/// Text baseline sits `LABEL_OFFSET_Y` pixels above `center`, starting at its x.
fn draw_label(
    canvas: &mut RgbaImage,
    center: (i32, i32),
    text: &str,
    font: &LabelFont,
    color: [u8; 4],
) {
    let (width, height) = canvas.dimensions();
    let left = center.0;
    let top = center
        .1
        .saturating_sub(LABEL_OFFSET_Y)
        .saturating_sub(font.ascent);
    // Text only grows right and down from its origin.
    if left >= width as i32 || top >= height as i32 {
        return;
    }
    draw_text_mut(canvas, Rgba(color), left, top, font.scale, &font.font, text);
}

fn put_pixel_safe(canvas: &mut RgbaImage, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux < canvas.width() && uy < canvas.height() {
        canvas.put_pixel(ux, uy, Rgba(color));
    }
}
