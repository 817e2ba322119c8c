//! Live camera frame source.
//!
//! `CameraSource` wraps one exclusive device acquisition:
//!
//! - `open` either succeeds or fails with a cause the UI can message on
//!   (`PermissionDenied`, `NoDeviceFound`, `DeviceUnavailable`).
//! - `poll_frame` returns `Ok(None)` while the device has not yet produced
//!   a sample; callers must treat that as "not ready", never as an error.
//! - The acquisition is released when the source is closed or dropped, on
//!   every exit path.
//!
//! Backends: a synthetic source for `stub://` devices (always available,
//! scriptable failures for tests) and a V4L2 device source behind the
//! `camera-v4l2` feature.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use crate::frame::Frame;

/// Polls the synthetic camera answers with `NotReady` before its first
/// sample, modeling a real device's start-up window.
pub const SYNTHETIC_WARMUP_POLLS: u32 = 2;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraSettings {
    /// Device path or `stub://` URI (e.g. "/dev/video0", "stub://camera").
    pub device: String,
    /// Target frame rate; the tick scheduler runs at this cadence.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            target_fps: 15,
            width: 640,
            height: 480,
        }
    }
}

/// Stream-open failures, classified so the UI can select a message by
/// cause. Surfaced once at open time; per-frame trouble after a successful
/// open is transient and handled by the loop.
#[derive(Debug)]
pub enum SourceError {
    PermissionDenied { device: String },
    NoDeviceFound { device: String },
    DeviceUnavailable { device: String, cause: String },
}

impl SourceError {
    /// User-facing message with a retry affordance.
    pub fn user_message(&self) -> String {
        match self {
            SourceError::PermissionDenied { .. } => {
                "camera access denied, grant camera permission and retry".to_string()
            }
            SourceError::NoDeviceFound { .. } => {
                "no camera found, connect a camera and retry".to_string()
            }
            SourceError::DeviceUnavailable { cause, .. } => {
                format!("failed to access camera ({}), retry", cause)
            }
        }
    }

    pub fn device(&self) -> &str {
        match self {
            SourceError::PermissionDenied { device }
            | SourceError::NoDeviceFound { device }
            | SourceError::DeviceUnavailable { device, .. } => device,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::PermissionDenied { device } => {
                write!(f, "permission denied opening camera {}", device)
            }
            SourceError::NoDeviceFound { device } => write!(f, "no camera device at {}", device),
            SourceError::DeviceUnavailable { device, cause } => {
                write!(f, "camera {} unavailable: {}", device, cause)
            }
        }
    }
}

impl std::error::Error for SourceError {}

// ----------------------------------------------------------------------------
// Exclusive-acquisition accounting
// ----------------------------------------------------------------------------

static ACTIVE_DEVICES: AtomicUsize = AtomicUsize::new(0);
static PEAK_DEVICES: AtomicUsize = AtomicUsize::new(0);

/// RAII claim on one device acquisition. Dropping the claim releases it.
struct DeviceClaim;

impl DeviceClaim {
    fn acquire() -> Self {
        let now = ACTIVE_DEVICES.fetch_add(1, Ordering::SeqCst) + 1;
        PEAK_DEVICES.fetch_max(now, Ordering::SeqCst);
        Self
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        ACTIVE_DEVICES.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Number of camera acquisitions currently open in this process.
///
/// Diagnostic surface: the invariant is that this never exceeds one per
/// capture loop, and returns to zero on every exit path.
pub fn active_device_count() -> usize {
    ACTIVE_DEVICES.load(Ordering::SeqCst)
}

/// High-water mark of concurrently open acquisitions since process start.
pub fn peak_device_count() -> usize {
    PEAK_DEVICES.load(Ordering::SeqCst)
}

// ----------------------------------------------------------------------------
// CameraSource
// ----------------------------------------------------------------------------

/// One open camera acquisition.
pub struct CameraSource {
    backend: CameraBackend,
}

impl std::fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSource").finish_non_exhaustive()
    }
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    /// Open the device. Exactly one acquisition exists per source; callers
    /// owning an old source must drop it before (or by) opening a new one.
    pub fn open(settings: &CameraSettings) -> Result<Self, SourceError> {
        if settings.device.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::open(settings)?),
            })
        } else {
            #[cfg(feature = "camera-v4l2")]
            {
                Ok(Self {
                    backend: CameraBackend::Device(DeviceCamera::open(settings)?),
                })
            }
            #[cfg(not(feature = "camera-v4l2"))]
            {
                Err(SourceError::DeviceUnavailable {
                    device: settings.device.clone(),
                    cause: "camera support requires the camera-v4l2 feature".to_string(),
                })
            }
        }
    }

    /// Poll for the latest frame. `Ok(None)` means the device has not
    /// produced a sample yet.
    pub fn poll_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.poll_frame(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.poll_frame(),
        }
    }

    /// Check if the source is healthy.
    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.is_healthy(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.is_healthy(),
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.stats(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.stats(),
        }
    }

    /// Release the device acquisition. Dropping the source does the same;
    /// this spelling exists so release points read as deliberate.
    pub fn close(self) {}
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests and demos
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    settings: CameraSettings,
    _claim: DeviceClaim,
    polls: u32,
    frame_count: u64,
    /// Simulated scene state; changes occasionally so the cpu backend sees
    /// motion.
    scene_state: u8,
}

impl SyntheticCamera {
    fn open(settings: &CameraSettings) -> Result<Self, SourceError> {
        // Scriptable open failures for tests.
        match settings.device.as_str() {
            "stub://denied" => {
                return Err(SourceError::PermissionDenied {
                    device: settings.device.clone(),
                })
            }
            "stub://absent" => {
                return Err(SourceError::NoDeviceFound {
                    device: settings.device.clone(),
                })
            }
            "stub://busy" => {
                return Err(SourceError::DeviceUnavailable {
                    device: settings.device.clone(),
                    cause: "device is busy".to_string(),
                })
            }
            _ => {}
        }

        log::info!("CameraSource: opened {} (synthetic)", settings.device);
        Ok(Self {
            settings: settings.clone(),
            _claim: DeviceClaim::acquire(),
            polls: 0,
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn poll_frame(&mut self) -> Result<Option<Frame>> {
        self.polls += 1;
        if self.polls <= SYNTHETIC_WARMUP_POLLS {
            // Device still warming up; no sample yet.
            return Ok(None);
        }

        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Ok(Some(Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
        )))
    }

    /// Generate synthetic pixel data.
    ///
    /// Simulates a scene with occasional changes so downstream motion
    /// detection has something to find.
    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.settings.width * self.settings.height * 3) as usize;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count / 50 + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.settings.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// V4L2 device camera
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
struct DeviceCamera {
    settings: CameraSettings,
    _claim: DeviceClaim,
    state: DeviceCameraState,
    frame_count: u64,
    last_frame_at: Option<std::time::Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "camera-v4l2")]
#[ouroboros::self_referencing]
struct DeviceCameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "camera-v4l2")]
impl DeviceCamera {
    fn open(settings: &CameraSettings) -> Result<Self, SourceError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let classify = |err: std::io::Error| -> SourceError {
            match err.kind() {
                std::io::ErrorKind::PermissionDenied => SourceError::PermissionDenied {
                    device: settings.device.clone(),
                },
                std::io::ErrorKind::NotFound => SourceError::NoDeviceFound {
                    device: settings.device.clone(),
                },
                _ => SourceError::DeviceUnavailable {
                    device: settings.device.clone(),
                    cause: err.to_string(),
                },
            }
        };

        let mut device = v4l::Device::with_path(&settings.device).map_err(|err| classify(err))?;

        let mut format = device.format().map_err(|err| classify(err))?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    settings.device,
                    err
                );
                device.format().map_err(|err| classify(err))?
            }
        };

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    settings.device,
                    err
                );
            }
        }

        let active_width = format.width;
        let active_height = format.height;

        let state = DeviceCameraStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| classify(err))?;

        log::info!(
            "CameraSource: opened {} ({}x{})",
            settings.device,
            active_width,
            active_height
        );

        Ok(Self {
            settings: settings.clone(),
            _claim: DeviceClaim::acquire(),
            state,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            active_width,
            active_height,
        })
    }

    fn poll_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let (buf, _meta) = self.state.with_stream_mut(|stream| stream.next()).map_err(|err| {
            self.last_error = Some(err.to_string());
            anyhow::Error::new(err).context("capture camera frame")
        })?;
        let pixels = buf.to_vec();

        self.frame_count += 1;
        self.last_frame_at = Some(std::time::Instant::now());

        Ok(Some(Frame::new(
            pixels,
            self.active_width,
            self.active_height,
        )))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.settings.device.clone(),
        }
    }

    fn health_grace(&self) -> std::time::Duration {
        let base_ms = if self.settings.target_fps == 0 {
            2_000
        } else {
            (1000 / self.settings.target_fps).saturating_mul(6)
        };
        std::time::Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The acquisition counters are process-global; tests that open devices
    // run serialized.
    static COUNTER_LOCK: Mutex<()> = Mutex::new(());

    fn stub_settings(device: &str) -> CameraSettings {
        CameraSettings {
            device: device.to_string(),
            target_fps: 15,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn camera_warms_up_before_producing_frames() {
        let _guard = COUNTER_LOCK.lock().unwrap();
        let mut camera = CameraSource::open(&stub_settings("stub://warmup")).expect("open");

        for _ in 0..SYNTHETIC_WARMUP_POLLS {
            assert!(camera.poll_frame().expect("poll").is_none());
        }

        let frame = camera.poll_frame().expect("poll").expect("frame");
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(camera.stats().frames_captured, 1);
    }

    #[test]
    fn scripted_devices_fail_with_classified_causes() {
        let denied = CameraSource::open(&stub_settings("stub://denied")).unwrap_err();
        assert!(matches!(denied, SourceError::PermissionDenied { .. }));
        assert!(denied.user_message().contains("permission"));

        let absent = CameraSource::open(&stub_settings("stub://absent")).unwrap_err();
        assert!(matches!(absent, SourceError::NoDeviceFound { .. }));
        assert!(absent.user_message().contains("no camera"));

        let busy = CameraSource::open(&stub_settings("stub://busy")).unwrap_err();
        assert!(matches!(busy, SourceError::DeviceUnavailable { .. }));
        assert!(busy.user_message().contains("retry"));
    }

    #[test]
    fn failed_opens_do_not_leak_acquisitions() {
        let _guard = COUNTER_LOCK.lock().unwrap();
        let before = active_device_count();
        let _ = CameraSource::open(&stub_settings("stub://denied"));
        assert_eq!(active_device_count(), before);
    }

    #[test]
    fn close_releases_the_acquisition() {
        let _guard = COUNTER_LOCK.lock().unwrap();
        let before = active_device_count();
        let camera = CameraSource::open(&stub_settings("stub://release")).expect("open");
        assert_eq!(active_device_count(), before + 1);
        camera.close();
        assert_eq!(active_device_count(), before);
    }
}
