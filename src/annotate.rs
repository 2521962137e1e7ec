//! Detection overlay.
//!
//! Draws a rectangle and a `label confidence` caption for every detection on
//! a copy of the frame, using a built-in 5x7 bitmap font.

use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

/// Overlay color (RGB).
pub const BOX_COLOR: [u8; 3] = [0, 255, 0];
/// Rectangle stroke width in pixels, drawn inside the box.
pub const BOX_THICKNESS: i32 = 2;
/// Gap between the caption's top edge and the box's top edge.
pub const CAPTION_OFFSET: i32 = 10;

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_WIDTH + 1;

/// Draw `detections` onto a copy of `frame`.
///
/// The result always has the frame's dimensions and layout. An empty
/// detection list yields a pixel-identical frame.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Frame {
    if detections.is_empty() {
        return frame.clone();
    }
    let color = frame.layout().color(BOX_COLOR);
    let (width, height) = (frame.width() as i32, frame.height() as i32);

    frame.redrawn(|data| {
        let mut canvas = Canvas {
            data,
            width,
            height,
        };
        for detection in detections {
            canvas.stroke_rect(&detection.bbox, BOX_THICKNESS, color);
        }
        for detection in detections {
            let top = (detection.bbox.y - CAPTION_OFFSET).max(0);
            let left = detection.bbox.x.max(0);
            canvas.draw_text(left, top, &detection.caption(), color);
        }
    })
}

/// Width in pixels of `text` rendered with the overlay font.
pub fn text_width(text: &str) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE
}

struct Canvas<'a> {
    data: &'a mut [u8],
    width: i32,
    height: i32,
}

impl Canvas<'_> {
    fn put(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        if let Some(px) = self.data.get_mut(offset..offset + 3) {
            px.copy_from_slice(&color);
        }
    }

    fn fill(&mut self, left: i32, top: i32, right: i32, bottom: i32, color: [u8; 3]) {
        let left = left.max(0);
        let top = top.max(0);
        let right = right.min(self.width);
        let bottom = bottom.min(self.height);
        for y in top..bottom {
            for x in left..right {
                self.put(x, y, color);
            }
        }
    }

    /// Outline `bbox` with a stroke of `thickness` pixels on its inside.
    fn stroke_rect(&mut self, bbox: &BoundingBox, thickness: i32, color: [u8; 3]) {
        let (left, top, right, bottom) = (bbox.x, bbox.y, bbox.right(), bbox.bottom());
        let t = thickness.max(1);
        self.fill(left, top, right, top + t, color);
        self.fill(left, bottom - t, right, bottom, color);
        self.fill(left, top, left + t, bottom, color);
        self.fill(right - t, top, right, bottom, color);
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str, color: [u8; 3]) {
        let mut pen = x;
        for ch in text.chars().flat_map(char::to_uppercase) {
            if let Some(rows) = glyph(ch) {
                for (row, bits) in rows.iter().enumerate() {
                    for col in 0..GLYPH_WIDTH {
                        if bits & (1 << (GLYPH_WIDTH - 1 - col)) != 0 {
                            self.put(pen + col, y + row as i32, color);
                        }
                    }
                }
            }
            pen += GLYPH_ADVANCE;
            if pen >= self.width {
                break;
            }
        }
    }
}

fn glyph(ch: char) -> Option<[u8; GLYPH_HEIGHT as usize]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '%' => [0b11000, 0b11001, 0b00010, 0b00100, 0b01000, 0b10011, 0b00011],
        _ => return None,
    };
    Some(rows)
}
