//! Detector adapter.
//!
//! The loop-facing surface is deliberately small:
//! - `DetectorBackend` is the adapter trait all inference engines implement.
//! - `BackendRegistry` holds the engines compiled into this build.
//! - `select_backend` negotiates one of them at startup.
//! - `DetectorWorker` runs the negotiated engine off-thread so a slow call
//!   never blocks the tick.

mod backend;
mod backends;
mod registry;
mod result;
mod select;
mod worker;

pub use backend::{DetectionCapability, DetectorBackend, ModelParams};
pub use backends::CpuBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::BackendRegistry;
pub use result::{BoundingBox, Detection};
pub use select::{select_backend, BackendKind, BackendSelection, DeviceCapabilities};
pub use worker::{DetectOutcome, DetectorWorker};
