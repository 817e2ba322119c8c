//! sightlined - live capture daemon
//!
//! This daemon:
//! 1. Loads configuration (file + env)
//! 2. Negotiates an inference backend once at startup
//! 3. Opens the configured camera and runs the capture loop on a timer
//! 4. Logs each detection sequence and periodic source health
//! 5. Releases the camera on shutdown (ctrl-c) or fatal error

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use sightline::{
    active_device_count, CaptureLoop, Context, DiscardRenderer, IntervalScheduler, LoopState,
    OverlayRenderer, PngSink, SightlineConfig,
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cfg = SightlineConfig::load()?;
    let ctx = Context::init(&cfg)?;

    let renderer: Box<dyn OverlayRenderer> = match &cfg.overlay.output_path {
        Some(path) => {
            log::info!("writing overlay frames to {}", path.display());
            Box::new(PngSink::new(path.clone()))
        }
        None => Box::new(DiscardRenderer),
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })?;

    let scheduler = IntervalScheduler::from_fps(cfg.camera.target_fps);
    let mut capture = CaptureLoop::new(
        ctx.spawn_worker()?,
        cfg.model.params.clone(),
        cfg.camera.clone(),
        renderer,
        scheduler,
        Box::new(|detections| {
            for detection in detections {
                log::info!(
                    "detection: {} conf={:.2} box=({:.0},{:.0} {:.0}x{:.0})",
                    detection.label,
                    detection.confidence,
                    detection.bbox.x,
                    detection.bbox.y,
                    detection.bbox.width,
                    detection.bbox.height,
                );
            }
        }),
    );

    capture.enable_live()?;
    if capture.state() == LoopState::Error {
        let message = capture
            .last_error()
            .unwrap_or("camera setup failed")
            .to_string();
        anyhow::bail!("{}", message);
    }

    log::info!(
        "sightlined running on {} ({} fps target, backend {})",
        cfg.camera.device,
        cfg.camera.target_fps,
        ctx.backend().as_str(),
    );

    let mut last_health_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        if !capture.scheduler_mut().wait_tick() {
            // No tick armed: the loop left streaming on its own.
            break;
        }
        capture.on_tick();

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let stats = capture.stats().clone();
            if let Some(camera) = capture.camera_stats() {
                log::info!(
                    "camera health frames={} device={} open_acquisitions={}",
                    camera.frames_captured,
                    camera.device,
                    active_device_count(),
                );
            }
            log::debug!(
                "loop stats detected={} failures={} skips={}",
                stats.frames_detected,
                stats.detect_failures,
                stats.notready_skips,
            );
            last_health_log = Instant::now();
        }
    }

    if capture.state() == LoopState::Error {
        let message = capture
            .last_error()
            .unwrap_or("capture stopped on an error")
            .to_string();
        capture.shutdown();
        anyhow::bail!("{}", message);
    }

    capture.disable_live();
    let stats = capture.stats();
    log::info!(
        "shut down cleanly: {} frames detected, {} failures, {} open acquisitions",
        stats.frames_detected,
        stats.detect_failures,
        active_device_count(),
    );
    Ok(())
}
