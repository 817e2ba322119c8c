use anyhow::Result;

use crate::detect::backend::{DetectionCapability, DetectorBackend, ModelParams};
use crate::detect::result::{BoundingBox, Detection};

/// Per-pixel luma delta that counts as "changed".
const LUMA_DELTA_THRESHOLD: i16 = 24;
/// Fraction of changed pixels below which a frame is considered static.
const MIN_CHANGED_FRACTION: f32 = 0.002;

/// CPU backend: frame-differencing motion boxes.
///
/// Compares each frame's luma plane against the previous frame and reports
/// the bounding box of the changed region, labeled `"motion"`. Needs no
/// model file, which makes it the fallback when no accelerated backend is
/// available.
#[derive(Default)]
pub struct CpuBackend {
    prev_luma: Option<LumaPlane>,
}

struct LumaPlane {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::MotionBoxes)
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        params: &ModelParams,
    ) -> Result<Vec<Detection>> {
        let luma = luma_plane(pixels, width, height)?;

        let prev = self.prev_luma.replace(luma);
        let current = self.prev_luma.as_ref().unwrap();

        let Some(prev) = prev else {
            // First frame: nothing to diff against.
            return Ok(vec![]);
        };
        if prev.width != current.width || prev.height != current.height {
            // Resolution change resets the reference frame.
            return Ok(vec![]);
        }

        let mut changed = 0usize;
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;

        for y in 0..height {
            let row = (y * width) as usize;
            for x in 0..width {
                let idx = row + x as usize;
                let delta = (current.data[idx] as i16 - prev.data[idx] as i16).abs();
                if delta >= LUMA_DELTA_THRESHOLD {
                    changed += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        let total = (width as usize) * (height as usize);
        let fraction = changed as f32 / total as f32;
        if fraction < MIN_CHANGED_FRACTION {
            return Ok(vec![]);
        }

        let bbox = BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x - min_x + 1) as f32,
            (max_y - min_y + 1) as f32,
        );
        // Confidence scales with how much of the changed box actually moved.
        let density = changed as f32 / bbox.area().max(1.0);
        let confidence = density.clamp(0.25, 1.0);

        Ok(params.filter(vec![Detection::new("motion", confidence, bbox)]))
    }
}

fn luma_plane(pixels: &[u8], width: u32, height: u32) -> Result<LumaPlane> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow::anyhow!("frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow::anyhow!(
            "expected {} RGB bytes for {}x{}, received {}",
            expected,
            width,
            height,
            pixels.len()
        ));
    }

    let mut data = Vec::with_capacity((width * height) as usize);
    for rgb in pixels.chunks_exact(3) {
        // Integer BT.601 luma approximation.
        let luma = (77 * rgb[0] as u32 + 150 * rgb[1] as u32 + 29 * rgb[2] as u32) >> 8;
        data.push(luma as u8);
    }
    Ok(LumaPlane {
        data,
        width,
        height,
    })
}
