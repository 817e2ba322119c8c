//! The capture loop.
//!
//! One state machine drives both modes: a single detection pass over an
//! uploaded still, or a continuous tick-driven pass over a live camera.
//! Each tick drains resolved detections (render, report) and then, if
//! nothing is in flight, acquires the latest frame and starts exactly one
//! detection.
//!
//! Rules the loop enforces:
//! - The results callback fires for every completed pass, with an empty
//!   slice on failure. It is never skipped.
//! - At most one detection is in flight; busy ticks skip acquisition.
//! - Render and callback for detection N happen before detection N+1
//!   starts.
//! - The camera acquisition is released on every exit path: mode change,
//!   fatal error, teardown.
//! - Stopping never waits on in-flight inference; late outcomes are
//!   discarded by generation.

pub mod scheduler;

use anyhow::{bail, Result};

use crate::detect::{Detection, DetectorWorker, ModelParams};
use crate::overlay::OverlayRenderer;
use crate::source::{CameraSettings, CameraSource};
use scheduler::TickScheduler;

/// Capture loop states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// No source active.
    Idle,
    /// One still-image detection pass is in flight.
    StillDetecting,
    /// Camera open in progress.
    StreamStarting,
    /// Live mode: ticking, acquiring, detecting.
    StreamRunning,
    /// Camera release in progress.
    StreamStopping,
    /// A setup failure stopped the loop; `retry()` re-arms it.
    Error,
}

/// Counters exposed for health logging and tests.
#[derive(Clone, Debug, Default)]
pub struct CaptureStats {
    /// Completed still-image passes.
    pub stills_processed: u64,
    /// Live-stream detections that resolved successfully.
    pub frames_detected: u64,
    /// Per-frame detection failures (non-fatal).
    pub detect_failures: u64,
    /// Outcomes discarded because their pass was cancelled.
    pub results_discarded: u64,
    /// Live ticks skipped because the camera had no sample yet.
    pub notready_skips: u64,
}

/// Host callback receiving the detection sequence for each completed pass.
pub type ResultsCallback = Box<dyn FnMut(&[Detection])>;

/// The capture loop. Generic over the tick source so the same machine runs
/// under a timer, a GUI frame callback, or a test harness.
pub struct CaptureLoop<S: TickScheduler> {
    worker: DetectorWorker,
    renderer: Box<dyn OverlayRenderer>,
    callback: ResultsCallback,
    scheduler: S,
    params: ModelParams,
    camera_settings: CameraSettings,
    state: LoopState,
    camera: Option<CameraSource>,
    in_flight: bool,
    /// Cancellation generation: bumped when a pass is cancelled, so late
    /// outcomes from before the bump are discarded.
    generation: u64,
    last_error: Option<String>,
    stats: CaptureStats,
}

impl<S: TickScheduler> CaptureLoop<S> {
    pub fn new(
        worker: DetectorWorker,
        params: ModelParams,
        camera_settings: CameraSettings,
        renderer: Box<dyn OverlayRenderer>,
        scheduler: S,
        callback: ResultsCallback,
    ) -> Self {
        Self {
            worker,
            renderer,
            callback,
            scheduler,
            params,
            camera_settings,
            state: LoopState::Idle,
            camera: None,
            in_flight: false,
            generation: 0,
            last_error: None,
            stats: CaptureStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// User-facing message for the most recent setup failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Camera statistics while a stream is open.
    pub fn camera_stats(&self) -> Option<crate::source::CameraStats> {
        self.camera.as_ref().map(|camera| camera.stats())
    }

    /// The host drives ticks through this accessor.
    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    // ------------------------------------------------------------------
    // Still-image mode
    // ------------------------------------------------------------------

    /// Start one detection pass over a decoded still image.
    ///
    /// The pass resolves on a later tick: render, report, back to `Idle`.
    /// Internal failures transition to `Error` and still fire the callback
    /// with an empty sequence.
    pub fn submit_still(&mut self, still: &crate::source::StillImage) -> Result<()> {
        if self.state != LoopState::Idle {
            bail!(
                "still submission requires an idle loop (currently {:?})",
                self.state
            );
        }

        let frame = still.acquire();
        log::debug!("still pass: {}x{} frame", frame.width, frame.height);
        match self
            .worker
            .dispatch(frame, self.generation, self.params.clone())
        {
            Ok(()) => {
                self.in_flight = true;
                self.state = LoopState::StillDetecting;
                self.scheduler.schedule_tick();
            }
            Err(err) => {
                self.fail(format!("detector unavailable: {}", err));
            }
        }
        Ok(())
    }

    /// Drive ticks until a still pass resolves. Convenience for one-shot
    /// hosts without an event loop of their own.
    pub fn run_still_blocking(
        &mut self,
        still: &crate::source::StillImage,
        max_wait: std::time::Duration,
    ) -> Result<()> {
        self.submit_still(still)?;
        let deadline = std::time::Instant::now() + max_wait;
        while self.state == LoopState::StillDetecting {
            if std::time::Instant::now() >= deadline {
                self.fail("detection timed out".to_string());
                break;
            }
            self.on_tick();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Live-stream mode
    // ------------------------------------------------------------------

    /// Enable live mode: open the camera and start ticking.
    ///
    /// Re-enabling while already live closes the current acquisition first;
    /// two concurrent device handles never exist.
    pub fn enable_live(&mut self) -> Result<()> {
        match self.state {
            LoopState::Idle => {}
            LoopState::StreamRunning => {
                log::info!("live mode restart requested, closing current camera");
                self.stop_stream();
            }
            LoopState::Error => bail!("capture loop is in an error state, call retry() first"),
            other => bail!("cannot enable live mode while {:?}", other),
        }

        self.state = LoopState::StreamStarting;
        log::info!("opening camera {}", self.camera_settings.device);

        match CameraSource::open(&self.camera_settings) {
            Ok(camera) => {
                self.camera = Some(camera);
                self.state = LoopState::StreamRunning;
                self.scheduler.schedule_tick();
                log::info!("live capture running on {}", self.camera_settings.device);
            }
            Err(err) => {
                log::error!("camera open failed: {}", err);
                self.fail(err.user_message());
            }
        }
        Ok(())
    }

    /// Disable live mode: release the camera and stop ticking. Never waits
    /// for in-flight inference.
    pub fn disable_live(&mut self) {
        if self.state != LoopState::StreamRunning {
            return;
        }
        self.stop_stream();
        log::info!("live capture stopped");
    }

    /// Re-arm the loop after a setup failure.
    pub fn retry(&mut self) {
        if self.state == LoopState::Error {
            self.last_error = None;
            self.state = LoopState::Idle;
        }
    }

    /// Tear down from any state. Used on unmount; also run by `Drop`.
    pub fn shutdown(&mut self) {
        self.generation += 1;
        self.scheduler.cancel_tick();
        self.discard_resolved();
        self.in_flight = false;
        if let Some(camera) = self.camera.take() {
            camera.close();
        }
        self.state = LoopState::Idle;
    }

    // ------------------------------------------------------------------
    // Tick handling
    // ------------------------------------------------------------------

    /// Process one tick. Ticks arriving outside an active pass are stale
    /// and ignored.
    pub fn on_tick(&mut self) {
        match self.state {
            LoopState::StreamRunning => self.stream_tick(),
            LoopState::StillDetecting => self.still_tick(),
            _ => {}
        }
    }

    fn still_tick(&mut self) {
        let Some(outcome) = self.worker.try_recv() else {
            // Detection still running; check again next tick.
            self.scheduler.schedule_tick();
            return;
        };
        if outcome.generation != self.generation {
            self.stats.results_discarded += 1;
            log::debug!("discarding detection result from a cancelled pass");
            self.scheduler.schedule_tick();
            return;
        }

        self.in_flight = false;
        match outcome.result {
            Ok(detections) => {
                if let Err(err) = self.renderer.render(&outcome.frame, &detections) {
                    log::warn!("overlay render failed: {:#}", err);
                    self.fail(format!("overlay render failed: {}", err));
                    return;
                }
                self.stats.stills_processed += 1;
                self.state = LoopState::Idle;
                (self.callback)(&detections);
            }
            Err(err) => {
                log::warn!("still detection failed: {:#}", err);
                self.stats.detect_failures += 1;
                self.fail(format!("detection failed: {}", err));
            }
        }
    }

    fn stream_tick(&mut self) {
        // Resolve finished detections before starting a new one: render and
        // callback for frame N precede the dispatch of frame N+1.
        while let Some(outcome) = self.worker.try_recv() {
            if outcome.generation != self.generation {
                self.stats.results_discarded += 1;
                log::debug!("discarding stale detection result");
                continue;
            }
            self.in_flight = false;
            match outcome.result {
                Ok(detections) => {
                    if let Err(err) = self.renderer.render(&outcome.frame, &detections) {
                        // Rendering trouble is not a reason to stop the stream.
                        log::warn!("overlay render failed: {:#}", err);
                    }
                    self.stats.frames_detected += 1;
                    (self.callback)(&detections);
                }
                Err(err) => {
                    // Per-frame failure: report the empty sequence and keep
                    // ticking. The loop self-heals on the next frame.
                    log::warn!("detection failed: {:#}", err);
                    self.stats.detect_failures += 1;
                    (self.callback)(&[]);
                }
            }
        }

        if !self.in_flight {
            let Some(camera) = self.camera.as_mut() else {
                log::error!("stream running without a camera, stopping");
                self.stop_stream();
                return;
            };
            match camera.poll_frame() {
                Ok(Some(frame)) => {
                    match self
                        .worker
                        .dispatch(frame, self.generation, self.params.clone())
                    {
                        Ok(()) => self.in_flight = true,
                        Err(err) => {
                            // Worker death is a setup failure, not a frame
                            // glitch: release the device and surface it.
                            self.fail(format!("detector unavailable: {}", err));
                            return;
                        }
                    }
                }
                Ok(None) => {
                    self.stats.notready_skips += 1;
                }
                Err(err) => {
                    log::warn!("frame acquisition failed, skipping tick: {:#}", err);
                }
            }
        }

        self.scheduler.schedule_tick();
    }

    // ------------------------------------------------------------------
    // Internal transitions
    // ------------------------------------------------------------------

    fn stop_stream(&mut self) {
        self.state = LoopState::StreamStopping;
        self.generation += 1;
        self.scheduler.cancel_tick();
        self.discard_resolved();
        self.in_flight = false;
        if let Some(camera) = self.camera.take() {
            camera.close();
        }
        self.state = LoopState::Idle;
    }

    /// Fatal setup failure: release everything, record the message, and
    /// fire the never-skipped results callback with an empty sequence.
    fn fail(&mut self, message: String) {
        self.generation += 1;
        self.scheduler.cancel_tick();
        self.discard_resolved();
        self.in_flight = false;
        if let Some(camera) = self.camera.take() {
            camera.close();
        }
        self.last_error = Some(message);
        self.state = LoopState::Error;
        (self.callback)(&[]);
    }

    /// Throw away already-resolved outcomes after a generation bump.
    fn discard_resolved(&mut self) {
        while let Some(outcome) = self.worker.try_recv() {
            if outcome.generation != self.generation {
                self.stats.results_discarded += 1;
            }
        }
    }
}

impl<S: TickScheduler> Drop for CaptureLoop<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
