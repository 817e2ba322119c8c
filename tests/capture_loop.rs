//! Capture loop behavior tests.
//!
//! Covers the loop's externally observable contract: callback discipline,
//! single-detection-in-flight, device release on every exit path, and
//! self-healing on per-frame failures.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbImage;

use sightline::{
    active_device_count, BoundingBox, CameraSettings, CaptureLoop, Detection, DetectionCapability,
    DetectorBackend, DetectorWorker, Frame, LoopState, ManualScheduler, ModelParams,
    OverlayRenderer, StillImage, SYNTHETIC_WARMUP_POLLS,
};

// Device acquisition counters are process-global; tests that assert on them
// run serialized.
static TEST_LOCK: Mutex<()> = Mutex::new(());

enum Step {
    Emit(Vec<Detection>),
    Fail(&'static str),
}

/// Backend with a scripted result queue, a call counter, and an optional
/// gate that holds each call open until the test releases it.
struct ScriptedBackend {
    script: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<AtomicUsize>,
    gate: Option<Receiver<()>>,
}

impl ScriptedBackend {
    fn new(steps: Vec<Step>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                script: Arc::new(Mutex::new(steps.into())),
                calls: calls.clone(),
                gate: None,
            },
            calls,
        )
    }

    fn gated(steps: Vec<Step>) -> (Self, Arc<AtomicUsize>, Sender<()>) {
        let (gate_tx, gate_rx) = channel();
        let (mut backend, calls) = Self::new(steps);
        backend.gate = Some(gate_rx);
        (backend, calls, gate_tx)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, _capability: DetectionCapability) -> bool {
        true
    }

    fn detect(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        _params: &ModelParams,
    ) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            // Held open until the test releases (or drops) the gate.
            let _ = gate.recv();
        }
        match self.script.lock().unwrap().pop_front() {
            Some(Step::Emit(detections)) => Ok(detections),
            Some(Step::Fail(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(vec![]),
        }
    }
}

#[derive(Clone, Default)]
struct RenderLog(Arc<Mutex<Vec<(u32, u32, Vec<Detection>)>>>);

impl RenderLog {
    fn push(&self, entry: (u32, u32, Vec<Detection>)) {
        self.0.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<(u32, u32, Vec<Detection>)> {
        self.0.lock().unwrap().clone()
    }
}

struct CountingRenderer(RenderLog);

impl OverlayRenderer for CountingRenderer {
    fn render(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
        self.0
            .push((frame.width, frame.height, detections.to_vec()));
        Ok(())
    }
}

type Callbacks = Rc<RefCell<Vec<Vec<Detection>>>>;

fn make_loop(
    backend: ScriptedBackend,
    device: &str,
) -> (CaptureLoop<ManualScheduler>, Callbacks, RenderLog) {
    let handle: Arc<Mutex<dyn DetectorBackend>> = Arc::new(Mutex::new(backend));
    let worker = DetectorWorker::spawn(handle);

    let callbacks: Callbacks = Rc::new(RefCell::new(Vec::new()));
    let callback_sink = callbacks.clone();
    let render_log = RenderLog::default();

    let capture = CaptureLoop::new(
        worker,
        ModelParams::default(),
        CameraSettings {
            device: device.to_string(),
            target_fps: 15,
            width: 64,
            height: 48,
        },
        Box::new(CountingRenderer(render_log.clone())),
        ManualScheduler::new(),
        Box::new(move |detections| {
            callback_sink.borrow_mut().push(detections.to_vec());
        }),
    );
    (capture, callbacks, render_log)
}

/// Tick the loop until the condition holds.
fn pump_until(
    capture: &mut CaptureLoop<ManualScheduler>,
    mut condition: impl FnMut(&CaptureLoop<ManualScheduler>) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition(capture) {
        assert!(Instant::now() < deadline, "loop condition timed out");
        capture.on_tick();
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn cat_detection() -> Detection {
    Detection::new("cat", 0.92, BoundingBox::new(10.0, 10.0, 100.0, 80.0))
}

// ---------------------------------------------------------------------------
// Still-image mode
// ---------------------------------------------------------------------------

#[test]
fn still_upload_fires_exactly_one_callback_with_the_model_results() {
    let (backend, _calls) = ScriptedBackend::new(vec![Step::Emit(vec![cat_detection()])]);
    let (mut capture, callbacks, render_log) = make_loop(backend, "stub://unused");

    let still = StillImage::from_rgb(RgbImage::new(640, 480));
    capture.submit_still(&still).expect("submit");
    assert_eq!(capture.state(), LoopState::StillDetecting);

    pump_until(&mut capture, |c| c.state() == LoopState::Idle);

    let reported = callbacks.borrow();
    assert_eq!(reported.len(), 1, "exactly one callback per upload");
    assert_eq!(reported[0].len(), 1);
    assert_eq!(reported[0][0].label, "cat");
    assert_eq!(reported[0][0].confidence, 0.92);
    assert_eq!(reported[0][0].bbox.x, 10.0);
    assert_eq!(reported[0][0].bbox.y, 10.0);
    assert_eq!(reported[0][0].bbox.width, 100.0);
    assert_eq!(reported[0][0].bbox.height, 80.0);

    let renders = render_log.entries();
    assert_eq!(renders.len(), 1, "renderer runs once per upload");
    assert_eq!(renders[0].0, 640);
    assert_eq!(renders[0].1, 480);
    assert_eq!(renders[0].2.len(), 1);
}

#[test]
fn each_still_upload_reports_separately() {
    let (backend, _calls) = ScriptedBackend::new(vec![
        Step::Emit(vec![cat_detection()]),
        Step::Emit(vec![]),
    ]);
    let (mut capture, callbacks, _render_log) = make_loop(backend, "stub://unused");

    let still = StillImage::from_rgb(RgbImage::new(32, 32));
    capture.submit_still(&still).expect("submit");
    pump_until(&mut capture, |c| c.state() == LoopState::Idle);
    capture.submit_still(&still).expect("resubmit");
    pump_until(&mut capture, |c| c.state() == LoopState::Idle);

    let reported = callbacks.borrow();
    assert_eq!(reported.len(), 2);
    assert_eq!(reported[0].len(), 1);
    // A zero-length sequence is still a report.
    assert_eq!(reported[1].len(), 0);
}

#[test]
fn still_failure_reports_an_empty_sequence_and_enters_error() {
    let (backend, _calls) = ScriptedBackend::new(vec![Step::Fail("model exploded")]);
    let (mut capture, callbacks, render_log) = make_loop(backend, "stub://unused");

    let still = StillImage::from_rgb(RgbImage::new(32, 32));
    capture.submit_still(&still).expect("submit");
    pump_until(&mut capture, |c| c.state() == LoopState::Error);

    assert_eq!(callbacks.borrow().as_slice(), &[Vec::<Detection>::new()]);
    assert!(capture.last_error().unwrap().contains("model exploded"));
    assert!(render_log.entries().is_empty());

    // Error requires an explicit re-trigger, then the loop works again.
    capture.retry();
    assert_eq!(capture.state(), LoopState::Idle);
    capture.submit_still(&still).expect("submit after retry");
    pump_until(&mut capture, |c| c.state() == LoopState::Idle);
    assert_eq!(callbacks.borrow().len(), 2);
}

// ---------------------------------------------------------------------------
// Live-stream mode
// ---------------------------------------------------------------------------

#[test]
fn reopening_live_mode_never_holds_two_device_acquisitions() {
    let _guard = TEST_LOCK.lock().unwrap();
    let before = active_device_count();

    let (backend, _calls) = ScriptedBackend::new(vec![]);
    let (mut capture, _callbacks, _render_log) = make_loop(backend, "stub://camera");

    capture.enable_live().expect("enable");
    assert_eq!(capture.state(), LoopState::StreamRunning);
    assert_eq!(active_device_count(), before + 1);

    // Re-enabling closes the first acquisition before opening the second.
    capture.enable_live().expect("re-enable");
    assert_eq!(capture.state(), LoopState::StreamRunning);
    assert_eq!(active_device_count(), before + 1);

    capture.disable_live();
    assert_eq!(capture.state(), LoopState::Idle);
    assert_eq!(active_device_count(), before);
}

#[test]
fn disabling_live_mode_releases_the_device_while_detection_is_in_flight() {
    let _guard = TEST_LOCK.lock().unwrap();
    let before = active_device_count();

    let (backend, calls, gate) = ScriptedBackend::gated(vec![Step::Emit(vec![cat_detection()])]);
    let (mut capture, callbacks, _render_log) = make_loop(backend, "stub://camera");

    capture.enable_live().expect("enable");
    // Warm-up skips, then one dispatch that blocks inside the backend.
    pump_until(&mut capture, |_| calls.load(Ordering::SeqCst) == 1);
    assert_eq!(active_device_count(), before + 1);

    capture.disable_live();
    assert_eq!(
        active_device_count(),
        before,
        "device released even with detection in flight"
    );
    assert_eq!(capture.state(), LoopState::Idle);

    // The in-flight detection resolves later; its result is discarded, not
    // reported.
    gate.send(()).expect("release gate");
    capture.enable_live().expect("re-enable");
    pump_until(&mut capture, |c| c.stats().results_discarded >= 1);
    assert!(callbacks.borrow().is_empty());

    capture.disable_live();
    assert_eq!(active_device_count(), before);
}

#[test]
fn ticks_while_detection_is_in_flight_do_not_start_another() {
    let _guard = TEST_LOCK.lock().unwrap();

    let (backend, calls, gate) = ScriptedBackend::gated(vec![Step::Emit(vec![cat_detection()])]);
    let (mut capture, callbacks, _render_log) = make_loop(backend, "stub://camera");

    capture.enable_live().expect("enable");
    pump_until(&mut capture, |_| calls.load(Ordering::SeqCst) == 1);

    // Extra ticks while the call is held open must not dispatch again.
    capture.on_tick();
    capture.on_tick();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gate.send(()).expect("release gate");
    pump_until(&mut capture, |c| c.stats().frames_detected == 1);
    assert_eq!(callbacks.borrow().len(), 1);
    assert_eq!(callbacks.borrow()[0][0].label, "cat");

    // Only after the resolution does the next detection start.
    pump_until(&mut capture, |_| calls.load(Ordering::SeqCst) == 2);

    gate.send(()).expect("release second call");
    capture.disable_live();
}

#[test]
fn per_frame_detection_failures_keep_the_stream_running() {
    let _guard = TEST_LOCK.lock().unwrap();

    let (backend, _calls) = ScriptedBackend::new(vec![
        Step::Fail("inference hiccup"),
        Step::Emit(vec![cat_detection()]),
    ]);
    let (mut capture, callbacks, _render_log) = make_loop(backend, "stub://camera");

    capture.enable_live().expect("enable");
    pump_until(&mut capture, |c| c.stats().detect_failures == 1);

    // The failure still produced a (empty) report and the loop kept going.
    assert_eq!(capture.state(), LoopState::StreamRunning);
    assert_eq!(callbacks.borrow()[0].len(), 0);

    pump_until(&mut capture, |c| c.stats().frames_detected >= 1);
    assert_eq!(capture.state(), LoopState::StreamRunning);
    assert_eq!(callbacks.borrow()[1][0].label, "cat");

    capture.disable_live();
}

#[test]
fn warmup_ticks_are_skipped_without_dispatching() {
    let _guard = TEST_LOCK.lock().unwrap();

    let (backend, calls) = ScriptedBackend::new(vec![]);
    let (mut capture, _callbacks, _render_log) = make_loop(backend, "stub://camera");

    capture.enable_live().expect("enable");
    for _ in 0..SYNTHETIC_WARMUP_POLLS {
        capture.on_tick();
    }

    assert_eq!(capture.stats().notready_skips, SYNTHETIC_WARMUP_POLLS as u64);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    capture.disable_live();
}

#[test]
fn stream_open_failures_surface_a_message_selected_by_cause() {
    let _guard = TEST_LOCK.lock().unwrap();
    let before = active_device_count();

    let (backend, _calls) = ScriptedBackend::new(vec![]);
    let (mut capture, callbacks, _render_log) = make_loop(backend, "stub://denied");

    capture.enable_live().expect("enable call itself succeeds");
    assert_eq!(capture.state(), LoopState::Error);
    assert!(capture.last_error().unwrap().contains("permission"));
    // Result reporting is never skipped, even on setup failure.
    assert_eq!(callbacks.borrow().as_slice(), &[Vec::<Detection>::new()]);
    assert_eq!(active_device_count(), before);

    let (backend, _calls) = ScriptedBackend::new(vec![]);
    let (mut capture, _callbacks, _render_log) = make_loop(backend, "stub://absent");
    capture.enable_live().expect("enable");
    assert_eq!(capture.state(), LoopState::Error);
    assert!(capture.last_error().unwrap().contains("no camera"));

    // Retry re-arms the machine for a working device.
    capture.retry();
    assert_eq!(capture.state(), LoopState::Idle);
}

#[test]
fn dropping_the_loop_releases_the_device() {
    let _guard = TEST_LOCK.lock().unwrap();
    let before = active_device_count();

    let (backend, _calls) = ScriptedBackend::new(vec![]);
    let (mut capture, _callbacks, _render_log) = make_loop(backend, "stub://camera");
    capture.enable_live().expect("enable");
    assert_eq!(active_device_count(), before + 1);

    drop(capture);
    assert_eq!(active_device_count(), before, "unmount releases the device");
}
