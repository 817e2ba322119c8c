//! Frame sources.
//!
//! Two ways pixels enter the capture loop:
//! - `still`: an uploaded image, validated and decoded before the loop ever
//!   sees it; acquisition is then synchronous and infallible.
//! - `camera`: a live device with an explicit open/poll/close lifecycle and
//!   classified open failures.
//!
//! Sources own frame construction; nothing else in the crate creates
//! frames.

pub mod camera;
pub mod still;

pub use camera::{
    active_device_count, peak_device_count, CameraSettings, CameraSource, CameraStats,
    SourceError, SYNTHETIC_WARMUP_POLLS,
};
pub use still::{StillError, StillImage, UploadLimits};
