//! # Detection overlay drawing (C9)
//!
//! Draws bounding boxes and class/confidence labels directly into an RGBA
//! surface buffer. Every size and gating decision is viewport-adaptive: a
//! channel squeezed into a compositor quad gets thinner boxes, smaller text,
//! and a stricter low-confidence filter than the same channel shown
//! full-screen, all driven from the channel's [`ViewportRenderConfig`]
//! rather than hard-coded against the raw frame dimensions. Glyphs come from
//! a small fixed-width bitmap font (digits, uppercase letters, and a few
//! punctuation marks); any character outside that set draws as a blank space
//! rather than a missing-glyph box.

use crate::config::ViewportRenderConfig;
use crate::frame::Detection;

/// Draws every detection's box and label onto `buffer` (RGBA8888, `stride`
/// bytes per row), governed by `cfg`.
pub fn draw_detections(buffer: &mut [u8], frame_w: u32, frame_h: u32, stride: u32, detections: &[Detection], cfg: &ViewportRenderConfig) {
    let viewport_area = cfg.width.max(1) as f32 * cfg.height.max(1) as f32;

    for det in detections {
        if cfg.is_small_viewport && !passes_small_viewport_filter(det, viewport_area) {
            continue;
        }

        let color = det.color();
        let min_dim = det.w.min(det.h).max(0) as f32;

        let base_thickness = (min_dim / 200.0).clamp(1.0, cfg.max_box_thickness as f32);
        let thickness = ((base_thickness * cfg.scale_factor).round() as u32).clamp(cfg.min_box_thickness, cfg.max_box_thickness).max(1);
        draw_rect_outline(buffer, stride, frame_h, det.x, det.y, det.w, det.h, thickness, color);

        if let Some(label) = label_text(det, cfg) {
            let text_scale = (min_dim / 1000.0 * cfg.scale_factor).clamp(cfg.min_text_scale, cfg.max_text_scale);
            draw_label(buffer, stride, frame_w, frame_h, det.x, det.y, text_scale, &label, color);
        }
    }
}

/// Small-viewport detection filter (spec §4.9): low-confidence and tiny
/// boxes clutter a sub-window more than they help, so they're dropped
/// entirely rather than just drawn smaller.
fn passes_small_viewport_filter(det: &Detection, viewport_area: f32) -> bool {
    if det.confidence < 0.7 {
        return false;
    }
    if det.w < 10 || det.h < 10 {
        return false;
    }
    if det.confidence > 0.9 {
        return true;
    }
    let relative_area = (det.w as f32 * det.h as f32) / viewport_area.max(1.0);
    relative_area > 0.01
}

/// `None` means draw the outline only.
fn label_text(det: &Detection, cfg: &ViewportRenderConfig) -> Option<String> {
    match (cfg.show_class_names, cfg.show_confidence) {
        (true, true) => Some(format!("{} {:.2}", det.class_name, det.confidence)),
        (true, false) => Some(det.class_name.clone()),
        (false, true) => Some(format!("{:.2}", det.confidence)),
        (false, false) => None,
    }
}

fn put_pixel(buffer: &mut [u8], stride: u32, x: i32, y: i32, frame_h: u32, color: (u8, u8, u8)) {
    if x < 0 || y < 0 || y as u32 >= frame_h {
        return;
    }
    let offset = y as usize * stride as usize + x as usize * 4;
    if offset + 4 > buffer.len() {
        return;
    }
    buffer[offset] = color.0;
    buffer[offset + 1] = color.1;
    buffer[offset + 2] = color.2;
    buffer[offset + 3] = 255;
}

/// Halves R, G, B in place (preserving A) to shade a label's background
/// rectangle before text is drawn over it.
fn shade_pixel(buffer: &mut [u8], stride: u32, x: i32, y: i32, frame_h: u32) {
    if x < 0 || y < 0 || y as u32 >= frame_h {
        return;
    }
    let offset = y as usize * stride as usize + x as usize * 4;
    if offset + 4 > buffer.len() {
        return;
    }
    buffer[offset] /= 2;
    buffer[offset + 1] /= 2;
    buffer[offset + 2] /= 2;
}

#[allow(clippy::too_many_arguments)]
fn draw_rect_outline(buffer: &mut [u8], stride: u32, frame_h: u32, x: i32, y: i32, w: i32, h: i32, thickness: u32, color: (u8, u8, u8)) {
    let t = thickness as i32;
    for dy in 0..t {
        for dx in 0..w {
            put_pixel(buffer, stride, x + dx, y + dy, frame_h, color);
            put_pixel(buffer, stride, x + dx, y + h - 1 - dy, frame_h, color);
        }
    }
    for dx in 0..t {
        for dy in 0..h {
            put_pixel(buffer, stride, x + dx, y + dy, frame_h, color);
            put_pixel(buffer, stride, x + w - 1 - dx, y + dy, frame_h, color);
        }
    }
}

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;
const GLYPH_GAP: u32 = 1;

/// 3x5 bitmap glyph, one `u8` per row with the three low bits set left to right.
fn glyph_for(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b101, 0b111, 0b111, 0b111, 0b101],
        'O' => [0b111, 0b101, 0b101, 0b101, 0b111],
        'P' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'Q' => [0b111, 0b101, 0b101, 0b111, 0b001],
        'R' => [0b111, 0b101, 0b111, 0b110, 0b101],
        'S' => [0b011, 0b100, 0b111, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '%' => [0b101, 0b001, 0b010, 0b100, 0b101],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        // Any other printable character, including out-of-range codepoints
        // a detector's class name could theoretically contain, renders blank
        // rather than a missing-glyph placeholder.
        _ => [0; 5],
    }
}

/// Draws `text` above (or, if that would underflow, inside) the box whose
/// top-left corner is `(x, y)`. `text_scale` is the clamped multiplier from
/// [`draw_detections`]; it's converted to a whole-pixel glyph scale here
/// since the bitmap font only draws at integer pixel multiples.
#[allow(clippy::too_many_arguments)]
fn draw_label(buffer: &mut [u8], stride: u32, frame_w: u32, frame_h: u32, x: i32, y: i32, text_scale: f32, text: &str, color: (u8, u8, u8)) {
    let px_scale = (text_scale * 2.0).round().max(1.0) as u32;
    let glyph_px_w = (GLYPH_W + GLYPH_GAP) * px_scale;
    let label_w = glyph_px_w * text.chars().count() as u32;
    let label_h = (GLYPH_H + 2) * px_scale;

    // Position just above the box unless that underflows the buffer, in
    // which case the label moves inside the box instead.
    let above = y - 4 - label_h as i32;
    let label_y = if above < 0 { y + 12 } else { above };
    let label_x = x.clamp(0, (frame_w as i32 - label_w as i32).max(0));

    if text_scale > 0.5 {
        for row in 0..label_h {
            for col in 0..label_w.min(frame_w.saturating_sub(label_x.max(0) as u32)) {
                shade_pixel(buffer, stride, label_x + col as i32, label_y + row as i32, frame_h);
            }
        }
    }

    for (i, ch) in text.chars().enumerate() {
        let glyph = glyph_for(ch);
        let gx = label_x + (i as u32 * glyph_px_w) as i32 + px_scale as i32;
        let gy = label_y + px_scale as i32;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) != 0 {
                    for sy in 0..px_scale {
                        for sx in 0..px_scale {
                            put_pixel(buffer, stride, gx + (col * px_scale + sx) as i32, gy + (row as u32 * px_scale + sy) as i32, frame_h, color);
                        }
                    }
                }
            }
        }
    }
}
