//! Sightline
//!
//! A capture-and-inference loop for object detection overlays: acquire a
//! frame from a still image or a live camera, run a negotiated detector
//! backend against it, draw bounding boxes, and report the detection
//! sequence to the host.
//!
//! # Architecture
//!
//! - `frame`: owned pixel samples, immutable across a detection pass
//! - `source`: still-image and camera frame sources with explicit
//!   lifecycles
//! - `detect`: the detector adapter (trait, backends, registry, worker)
//! - `overlay`: the draw surface seam and built-in RGBA compositing
//! - `capture`: the tick-driven state machine tying it all together
//! - `config`: JSON file + env configuration
//!
//! The loop guarantees: one results callback per completed pass (empty on
//! failure, never skipped), at most one detection in flight per source,
//! render-then-report ordering, and deterministic release of the camera
//! acquisition on every exit path.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod overlay;
pub mod source;
pub mod ui;

pub use capture::scheduler::{IntervalScheduler, ManualScheduler, TickScheduler};
pub use capture::{CaptureLoop, CaptureStats, LoopState, ResultsCallback};
pub use config::{ModelSettings, OverlaySettings, SightlineConfig};
pub use detect::{
    select_backend, BackendKind, BackendRegistry, BackendSelection, BoundingBox, CpuBackend,
    Detection, DetectionCapability, DetectorBackend, DetectorWorker, DeviceCapabilities,
    ModelParams, StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use frame::Frame;
pub use overlay::{compose_overlay, DiscardRenderer, OverlayRenderer, PngSink};
pub use source::{
    active_device_count, peak_device_count, CameraSettings, CameraSource, CameraStats,
    SourceError, StillError, StillImage, UploadLimits, SYNTHETIC_WARMUP_POLLS,
};

/// Process-wide capture context.
///
/// Replaces implicit global initialization: backend negotiation happens
/// exactly once, here, and every capture loop borrows the negotiated
/// detector from this object. Teardown is `Drop`.
pub struct Context {
    registry: BackendRegistry,
    backend: BackendKind,
}

impl Context {
    /// Build the registry, probe capabilities, negotiate the backend, and
    /// warm it up.
    pub fn init(cfg: &SightlineConfig) -> Result<Self> {
        let capabilities = DeviceCapabilities::probe(cfg.model.model_path.as_deref());
        let backend = select_backend(cfg.model.selection, &capabilities)?;

        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        registry.register(CpuBackend::new());

        #[cfg(feature = "backend-tract")]
        if backend == BackendKind::Tract {
            let model_path = cfg
                .model
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("tract backend negotiated without a model path"))?;
            let labels = match &cfg.model.labels_path {
                Some(path) => config::read_labels_file(path)?,
                None => Vec::new(),
            };
            registry.register(TractBackend::new(
                model_path,
                cfg.camera.width,
                cfg.camera.height,
                labels,
            )?);
        }

        registry.set_default(backend.as_str())?;
        registry.warm_up()?;
        log::info!("inference backend negotiated: {}", backend.as_str());

        Ok(Self { registry, backend })
    }

    /// The backend negotiated at init.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Handle to the negotiated detector.
    pub fn detector(&self) -> Result<Arc<Mutex<dyn DetectorBackend>>> {
        self.registry
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))
    }

    /// Spawn a detection worker around the negotiated detector.
    pub fn spawn_worker(&self) -> Result<DetectorWorker> {
        Ok(DetectorWorker::spawn(self.detector()?))
    }
}
