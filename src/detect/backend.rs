use anyhow::Result;

use crate::detect::result::Detection;

/// Detection capabilities supported by backends.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Labeled object classes with bounding boxes.
    ObjectDetection,
    /// Class-free motion regions.
    MotionBoxes,
}

/// Model parameters passed through the capture loop to the backend.
///
/// The loop treats these as opaque; only backends interpret them.
#[derive(Clone, Debug)]
pub struct ModelParams {
    /// Detections below this confidence are dropped.
    pub confidence_threshold: f32,
    /// Upper bound on detections returned per frame.
    pub max_results: usize,
    /// When set, only these labels are reported.
    pub label_allowlist: Option<Vec<String>>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_results: 20,
            label_allowlist: None,
        }
    }
}

impl ModelParams {
    /// Apply threshold, allowlist, and result cap to a raw detection list.
    ///
    /// Backends call this after decoding model output so the filtering
    /// behavior is identical across backends.
    pub fn filter(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let mut kept: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.confidence >= self.confidence_threshold)
            .filter(|d| match &self.label_allowlist {
                Some(labels) => labels.iter().any(|l| l == &d.label),
                None => true,
            })
            .collect();
        kept.truncate(self.max_results);
        kept
    }
}

/// Detector backend trait.
///
/// Implementations must treat the pixel slice as read-only and ephemeral:
/// the slice is only valid for the duration of the call, and the frame it
/// belongs to is owned by the dispatching worker until the call returns.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on one RGB8 frame.
    ///
    /// Failures are per-frame: the caller logs and recovers, so an error
    /// here must not poison backend state for subsequent frames.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        params: &ModelParams,
    ) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once at context initialization.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
