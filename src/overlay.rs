//! Overlay rendering.
//!
//! The loop hands each resolved frame and its detection sequence to an
//! `OverlayRenderer`. The built-in renderers composite the frame into an
//! RGBA image with a box border and a label tag strip per detection; hosts
//! with their own display surface implement the trait instead.

use std::path::PathBuf;

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};

use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

const BORDER_THICKNESS: u32 = 2;
const TAG_HEIGHT: u32 = 10;

/// Draw surface seam between the loop and the host.
pub trait OverlayRenderer {
    /// Paint one frame and its detection sequence.
    ///
    /// Called once per resolved detection, before the results callback.
    fn render(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()>;
}

/// Renderer that drops everything. For headless hosts that only want the
/// results callback.
#[derive(Default)]
pub struct DiscardRenderer;

impl OverlayRenderer for DiscardRenderer {
    fn render(&mut self, _frame: &Frame, _detections: &[Detection]) -> Result<()> {
        Ok(())
    }
}

/// Renderer that writes the composited overlay to a PNG file, overwriting
/// on each frame.
pub struct PngSink {
    path: PathBuf,
}

impl PngSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OverlayRenderer for PngSink {
    fn render(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
        let composed = compose_overlay(frame, detections);
        composed
            .save(&self.path)
            .with_context(|| format!("write overlay to {}", self.path.display()))?;
        Ok(())
    }
}

/// Composite a frame and its detections into an RGBA image.
pub fn compose_overlay(frame: &Frame, detections: &[Detection]) -> RgbaImage {
    let mut img = frame_to_rgba(frame);
    for detection in detections {
        let Some(bbox_px) = clamp_box(&detection.bbox, (frame.width, frame.height)) else {
            continue;
        };
        let color = label_color(&detection.label);
        draw_rect(&mut img, bbox_px, color, BORDER_THICKNESS);
        draw_tag(&mut img, bbox_px, color);
    }
    img
}

fn frame_to_rgba(frame: &Frame) -> RgbaImage {
    let mut img = RgbaImage::new(frame.width, frame.height);
    for (pixel, rgb) in img.pixels_mut().zip(frame.pixels().chunks_exact(3)) {
        *pixel = Rgba([rgb[0], rgb[1], rgb[2], 255]);
    }
    img
}

/// Clamp a pixel-space box to image bounds as inclusive corners. `None` for
/// boxes that are degenerate or entirely outside the frame.
fn clamp_box(bbox: &BoundingBox, dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 || bbox.width <= 0.0 || bbox.height <= 0.0 {
        return None;
    }
    let x1 = bbox.x + bbox.width;
    let y1 = bbox.y + bbox.height;
    if x1 <= 0.0 || y1 <= 0.0 || bbox.x >= w as f32 || bbox.y >= h as f32 {
        return None;
    }
    let clamp = |v: f32, max: u32| -> u32 { v.max(0.0).min((max - 1) as f32) as u32 };
    let x0 = clamp(bbox.x, w);
    let y0 = clamp(bbox.y, h);
    let x1 = clamp(x1 - 1.0, w);
    let y1 = clamp(y1 - 1.0, h);
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some([x0, y0, x1, y1])
}

/// Draw a rectangle border with the given thickness.
fn draw_rect(img: &mut RgbaImage, bbox_px: [u32; 4], color: Rgba<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    let [x0, y0, x1, y1] = bbox_px;
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 >= w || yy0 >= h || xx0 > xx1 || yy0 > yy1 {
            continue;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            if yy1 < h {
                img.put_pixel(x, yy1, color);
            }
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            if xx1 < w {
                img.put_pixel(xx1, y, color);
            }
        }
    }
}

/// Filled tag strip above the box (or inside it at the top edge), marking
/// where the textual label belongs. Text itself travels in the results
/// sequence.
fn draw_tag(img: &mut RgbaImage, bbox_px: [u32; 4], color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    let [x0, y0, x1, _] = bbox_px;
    let tag_y0 = y0.saturating_sub(TAG_HEIGHT);
    let tag_x1 = x1.min(x0.saturating_add((x1 - x0) / 3).max(x0 + 1));
    for y in tag_y0..y0.max(1) {
        for x in x0..=tag_x1 {
            if x < w && y < h {
                img.put_pixel(x, y, color);
            }
        }
    }
}

/// Stable per-label color derived from the label bytes.
fn label_color(label: &str) -> Rgba<u8> {
    let mut acc: u32 = 0x811c_9dc5;
    for byte in label.bytes() {
        acc ^= byte as u32;
        acc = acc.wrapping_mul(0x0100_0193);
    }
    let r = 96 + (acc & 0x7f) as u8;
    let g = 96 + ((acc >> 8) & 0x7f) as u8;
    let b = 96 + ((acc >> 16) & 0x7f) as u8;
    Rgba([r, g, b, 255])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn black_frame(width: u32, height: u32) -> Frame {
        Frame::new(vec![0u8; (width * height * 3) as usize], width, height)
    }

    fn det(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new("cat", 0.9, BoundingBox::new(x, y, w, h))
    }

    #[test]
    fn clamp_keeps_in_bounds_boxes() {
        let clamped = clamp_box(&BoundingBox::new(10.0, 10.0, 100.0, 80.0), (640, 480));
        assert_eq!(clamped, Some([10, 10, 109, 89]));
    }

    #[test]
    fn clamp_trims_boxes_crossing_the_edge() {
        let clamped = clamp_box(&BoundingBox::new(600.0, 400.0, 100.0, 100.0), (640, 480));
        assert_eq!(clamped, Some([600, 400, 639, 479]));
    }

    #[test]
    fn clamp_rejects_degenerate_and_outside_boxes() {
        assert_eq!(clamp_box(&BoundingBox::new(5.0, 5.0, 0.0, 10.0), (64, 64)), None);
        assert_eq!(
            clamp_box(&BoundingBox::new(100.0, 100.0, 10.0, 10.0), (64, 64)),
            None
        );
        assert_eq!(
            clamp_box(&BoundingBox::new(-50.0, -50.0, 20.0, 20.0), (64, 64)),
            None
        );
    }

    #[test]
    fn compose_draws_the_border() {
        let frame = black_frame(64, 64);
        let img = compose_overlay(&frame, &[det(16.0, 16.0, 20.0, 20.0)]);

        let border = img.get_pixel(16, 16);
        assert_ne!(border.0[..3], [0, 0, 0]);
        // Center stays untouched.
        assert_eq!(img.get_pixel(26, 26).0[..3], [0, 0, 0]);
    }

    #[test]
    fn compose_ignores_undrawable_boxes() {
        let frame = black_frame(32, 32);
        let img = compose_overlay(&frame, &[det(-100.0, -100.0, 5.0, 5.0)]);
        assert!(img.pixels().all(|p| p.0[..3] == [0, 0, 0]));
    }

    #[test]
    fn label_colors_are_stable_and_distinct() {
        assert_eq!(label_color("cat"), label_color("cat"));
        assert_ne!(label_color("cat"), label_color("dog"));
    }
}
