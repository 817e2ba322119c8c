use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::{DetectionCapability, DetectorBackend, ModelParams};
use crate::detect::result::{BoundingBox, Detection};

/// Stub backend for tests and model-free demos.
///
/// Emits one deterministic detection per frame, with the box position
/// seeded from a content hash so identical frames always produce identical
/// results.
#[derive(Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ObjectDetection)
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        params: &ModelParams,
    ) -> Result<Vec<Detection>> {
        if pixels.is_empty() || width == 0 || height == 0 {
            return Ok(vec![]);
        }

        let digest: [u8; 32] = Sha256::digest(pixels).into();

        // Seed a box covering roughly a quarter of the frame from the hash.
        let x_frac = digest[0] as f32 / 512.0;
        let y_frac = digest[1] as f32 / 512.0;
        let bbox = BoundingBox::new(
            x_frac * width as f32,
            y_frac * height as f32,
            width as f32 / 2.0,
            height as f32 / 2.0,
        );
        let confidence = 0.80 + (digest[2] as f32 / 255.0) * 0.19;

        Ok(params.filter(vec![Detection::new("object", confidence, bbox)]))
    }
}
